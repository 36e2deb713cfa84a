use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl AppError {
    /// True when `err` carries an [`AppError::Cancelled`] anywhere in its chain.
    pub fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<AppError>(), Some(AppError::Cancelled(_)))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = AppError::NotFound("job xyz".to_string());
        assert_eq!(err.to_string(), "Not found: job xyz");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = AppError::InvalidTransition("completed -> running".to_string());
        assert_eq!(err.to_string(), "Invalid transition: completed -> running");
    }

    #[test]
    fn test_cancelled_display() {
        let err = AppError::Cancelled("job abc".to_string());
        assert_eq!(err.to_string(), "Cancelled: job abc");
    }

    #[test]
    fn test_is_cancelled_through_anyhow() {
        let err: anyhow::Error = AppError::Cancelled("job abc".to_string()).into();
        assert!(AppError::is_cancelled(&err));

        let other: anyhow::Error = AppError::Timeout("1s".to_string()).into();
        assert!(!AppError::is_cancelled(&other));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let app_err: AppError = io_err.into();
        match app_err {
            AppError::Storage(msg) => assert!(msg.contains("file missing")),
            other => panic!("Expected Storage, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let app_err: AppError = json_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_from_uuid_error() {
        let uuid_err = "not-a-uuid".parse::<uuid::Uuid>().unwrap_err();
        let app_err: AppError = uuid_err.into();
        assert!(matches!(app_err, AppError::Validation(_)));
    }
}
