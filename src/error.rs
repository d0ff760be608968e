//! Error kinds surfaced by the relay and the history store.
//!
//! Transport failures are deliberately absent here: they are recorded as `failed`
//! history entries, not returned as errors.

use thiserror::Error;

/// Rejections raised before anything is dispatched or stored.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unsupported method: {0}")]
    InvalidMethod(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Dispatch task failed: {0}")]
    Task(String),
}

impl RelayError {
    /// True for errors caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidMethod(_)
                | RelayError::InvalidUrl(_)
                | RelayError::InvalidProxy(_)
                | RelayError::InvalidHeader { .. }
        )
    }
}

/// The history backend could not serve the operation. Fatal for the current call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("History storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Unavailable(format!("corrupt record: {}", e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Unavailable("history lock poisoned".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(RelayError::InvalidMethod("TRACE".into()).is_validation());
        assert!(RelayError::InvalidHeader {
            name: "bad name".into(),
            reason: "invalid token".into()
        }
        .is_validation());
        assert!(!RelayError::Storage(StoreError::Unavailable("disk".into())).is_validation());
    }

    #[test]
    fn test_messages_are_displayable() {
        let err = RelayError::InvalidUrl("not a url".into());
        assert_eq!(err.to_string(), "Invalid URL: not a url");

        let err: RelayError = StoreError::Unavailable("disk full".into()).into();
        assert_eq!(err.to_string(), "History storage unavailable: disk full");
    }
}
