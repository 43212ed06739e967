use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PacerError>;

/// Classifies a failure reported by the external action executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The remote side rejected the action (target gone, already done, invalid input).
    #[error("action rejected: {0}")]
    Rejected(String),
    /// Infrastructure failure (navigation timeout, network error, crashed page).
    #[error("system failure: {0}")]
    System(String),
}

impl ExecutionError {
    /// Rejections are per-item and do not count toward the consecutive-failure limit.
    pub fn is_system(&self) -> bool {
        matches!(self, ExecutionError::System(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = PacerError::InvalidTransition {
            from: "completed".into(),
            to: "in_progress".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid workflow transition from completed to in_progress"
        );
    }

    #[test]
    fn execution_error_classification() {
        assert!(ExecutionError::System("timeout".into()).is_system());
        assert!(!ExecutionError::Rejected("already connected".into()).is_system());
        assert_eq!(
            ExecutionError::Rejected("gone".into()).to_string(),
            "action rejected: gone"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PacerError>();
        assert_send_sync::<ExecutionError>();
    }
}
