use serde::{Deserialize, Serialize};

/// A row of the student registry store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    /// Reference image path, relative to the reference image root.
    pub image_path: String,
    pub created_at: i64,
}

/// What the registry needs from the student store: one entry per student
/// with a reference image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StudentRef {
    pub student_id: String,
    pub name: String,
    pub image_path: String,
}

impl From<Student> for StudentRef {
    fn from(s: Student) -> Self {
        Self { student_id: s.student_id, name: s.name, image_path: s.image_path }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub image_base64: String,
    #[serde(default)]
    pub ext: Option<String>,
}
