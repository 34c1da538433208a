use thiserror::Error;

/// Failure taxonomy for the pipeline. Per-item failures (extraction,
/// generation) are contained and counted in the run report; persistence
/// failures abort the affected application and propagate.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every extraction strategy against every mirror came up empty.
    /// Recoverable: skip this source for the run.
    #[error("source unavailable: {src}: {reason}")]
    SourceUnavailable { src: String, reason: String },

    /// A single item yielded no usable title or company. Recoverable:
    /// skip this item only.
    #[error("extraction mismatch: {0}")]
    ExtractionMismatch(String),

    /// The primary text-generation call failed. Triggers the template
    /// fallback; never aborts a batch.
    #[error("tailoring provider error: {0}")]
    TailoringProvider(String),

    /// A ledger or artifact write failed. Fatal to the current
    /// application; must reach the caller.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Malformed status transition or malformed input. Rejected with no
    /// partial state mutation.
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for failures the pipeline absorbs into the run report rather
    /// than propagating.
    #[allow(dead_code)]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable { .. }
                | PipelineError::ExtractionMismatch(_)
                | PipelineError::TailoringProvider(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        assert!(
            PipelineError::SourceUnavailable {
                src: "board".into(),
                reason: "all mirrors exhausted".into(),
            }
            .is_recoverable()
        );
        assert!(PipelineError::ExtractionMismatch("no title".into()).is_recoverable());
        assert!(PipelineError::TailoringProvider("timeout".into()).is_recoverable());
        assert!(!PipelineError::Persistence("disk full".into()).is_recoverable());
        assert!(!PipelineError::Validation("bad status".into()).is_recoverable());
    }

    #[test]
    fn test_sqlite_errors_map_to_persistence() {
        let err: PipelineError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, PipelineError::Persistence(_)));
    }
}
