use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::models::student::StudentRef;
use crate::pipeline::face::FaceAnalyzer;
use crate::store::{ImageStore, StudentStore};

/// A recognisable person. Immutable for the lifetime of a registry snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub signature: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegistryExclusion {
    pub student_id: String,
    pub reason: String,
}

/// Point-in-time snapshot of the known identities, in student-store order.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: Vec<Arc<Identity>>,
    excluded: Vec<RegistryExclusion>,
}

impl IdentityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities: identities.into_iter().map(Arc::new).collect(), excluded: Vec::new() }
    }

    /// Load every student's reference image and derive its signature.
    /// Students whose image is missing, unreadable, or faceless are left out
    /// and listed in `excluded()`; only a failure to list students is an error.
    pub fn build(students: &dyn StudentStore, images: &dyn ImageStore, analyzer: &dyn FaceAnalyzer) -> Result<Self> {
        let listed = students.list_students().context("Failed to list students")?;
        let mut identities = Vec::with_capacity(listed.len());
        let mut excluded = Vec::new();
        for student in listed {
            match load_identity(&student, images, analyzer) {
                Ok(identity) => identities.push(Arc::new(identity)),
                Err(e) => {
                    warn!(student_id = %student.student_id, "{}", e);
                    let reason = match e {
                        PipelineError::RegistryLoad { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    excluded.push(RegistryExclusion { student_id: student.student_id, reason });
                }
            }
        }
        info!("Identity registry built: {} identities, {} excluded", identities.len(), excluded.len());
        Ok(Self { identities, excluded })
    }

    pub fn identities(&self) -> &[Arc<Identity>] {
        &self.identities
    }

    pub fn excluded(&self) -> &[RegistryExclusion] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

fn load_identity(student: &StudentRef, images: &dyn ImageStore, analyzer: &dyn FaceAnalyzer) -> Result<Identity, PipelineError> {
    let excluded = |reason: String| PipelineError::RegistryLoad { student_id: student.student_id.clone(), reason };

    let bytes = images
        .load(&student.image_path)
        .map_err(|e| excluded(format!("reference image unavailable: {:#}", e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| excluded(format!("reference image undecodable: {}", e)))?
        .to_rgb8();
    let mut faces = analyzer
        .analyze(&image)
        .map_err(|e| excluded(format!("face analysis failed: {:#}", e)))?;
    if faces.is_empty() {
        return Err(excluded("no face found in reference image".to_string()));
    }
    if faces.len() > 1 {
        debug!(student_id = %student.student_id, "{} faces in reference image, using the first", faces.len());
    }
    let first = faces.swap_remove(0);
    Ok(Identity {
        id: student.student_id.clone(),
        display_name: student.name.clone(),
        signature: first.signature,
    })
}

/// The registry snapshot the matcher reads, swappable after student edits.
pub struct SharedRegistry {
    current: RwLock<Arc<IdentityRegistry>>,
    rebuild_lock: Mutex<()>,
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(IdentityRegistry::empty())
    }
}

impl SharedRegistry {
    pub fn new(registry: IdentityRegistry) -> Self {
        Self { current: RwLock::new(Arc::new(registry)), rebuild_lock: Mutex::new(()) }
    }

    pub fn snapshot(&self) -> Arc<IdentityRegistry> {
        self.current.read().clone()
    }

    /// Build a fresh snapshot and swap it in. Concurrent rebuilds are
    /// serialised so the last one started is the one that sticks.
    pub fn rebuild(&self, students: &dyn StudentStore, images: &dyn ImageStore, analyzer: &dyn FaceAnalyzer) -> Result<Arc<IdentityRegistry>> {
        let _guard = self.rebuild_lock.lock();
        let fresh = Arc::new(IdentityRegistry::build(students, images, analyzer)?);
        *self.current.write() = fresh.clone();
        Ok(fresh)
    }
}
