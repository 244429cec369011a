use thiserror::Error;

/// Failures surfaced by the recognition pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Camera unreadable. Terminates the loop.
    #[error("frame source failed: {0}")]
    SourceFailure(String),

    /// A single student could not be turned into an identity.
    #[error("student {student_id} excluded from registry: {reason}")]
    RegistryLoad { student_id: String, reason: String },

    /// The attendance store rejected or could not take a write.
    #[error("attendance write failed: {0}")]
    PersistWrite(#[source] anyhow::Error),

    #[error("face inference failed: {0}")]
    Inference(#[source] anyhow::Error),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
