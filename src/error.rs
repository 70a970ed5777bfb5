//! Pipeline error taxonomy.
//!
//! Every failure the ingestion pipeline can surface is classified here so the
//! state machine can decide between retrying a stage, parking a record, or
//! failing it outright.

use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or undecodable upload. Rejected before the pipeline starts.
    #[error("invalid image: {0}")]
    Validation(String),

    /// Master-key wrap/unwrap failure. Fatal, never retried: this either
    /// means the deployment is misconfigured or someone tampered with the
    /// stored key material.
    #[error("key operation failed: {0}")]
    Key(String),

    /// Embedding dimensionality mismatch. Fatal for the affected record only.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// Corrupted centroid state or a failed cluster assignment. The record is
    /// parked at `faces-detected` for re-attempt.
    #[error("face clustering failed: {0}")]
    Clustering(String),

    /// Blob storage failure. Recoverable: retried with backoff.
    #[error("storage error: {0}")]
    Storage(String),

    /// External call exceeded its deadline. Recoverable, same as `Storage`.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Face detection / embedding backend failure.
    #[error("face engine error: {0}")]
    FaceEngine(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Recoverable errors leave the record at its last completed stage and
    /// are eligible for retry with backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Storage(_) | PipelineError::Timeout(_))
    }

    /// Fatal errors move the record to the terminal `failed` stage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Key(_)
                | PipelineError::Dimension { .. }
                | PipelineError::Validation(_)
                | PipelineError::Database(_)
                | PipelineError::Io(_)
                | PipelineError::FaceEngine(_)
        )
    }

    /// Errors that should page an operator rather than fail quietly.
    pub fn is_alert(&self) -> bool {
        matches!(self, PipelineError::Key(_))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Database(e.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        PipelineError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PipelineError::Storage("unreachable".into()).is_recoverable());
        assert!(PipelineError::Timeout("put".into()).is_recoverable());
        assert!(!PipelineError::Key("bad ciphertext".into()).is_recoverable());
        assert!(PipelineError::Key("bad ciphertext".into()).is_fatal());
        assert!(PipelineError::Key("bad ciphertext".into()).is_alert());
        assert!(PipelineError::Dimension { expected: 512, actual: 256 }.is_fatal());
        assert!(!PipelineError::Clustering("corrupt centroid".into()).is_fatal());
        assert!(!PipelineError::Clustering("corrupt centroid".into()).is_recoverable());
    }
}
