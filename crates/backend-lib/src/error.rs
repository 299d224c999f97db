// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type and its mapping onto the wire protocol.
use thiserror::Error;
use typerace_common::{ErrorCode, ServerMessage};

/// Application error types, all recoverable: every variant is caught
/// at the message-dispatch boundary and turned into an `error` payload
/// for the offending session only. The connection stays open.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Only room admin can start a race")]
    NotAdmin,

    #[error("Race {race_id} already in progress")]
    RaceInProgress { race_id: String },

    #[error("Race not found or inactive")]
    RaceNotFound,

    #[error("Race not active")]
    RaceNotActive,

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Wire error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::AuthFailed => ErrorCode::AuthFailed,
            AppError::NotAuthenticated => ErrorCode::NotAuthenticated,
            AppError::RoomNotFound => ErrorCode::RoomNotFound,
            AppError::NotInRoom => ErrorCode::NotInRoom,
            AppError::NotAdmin => ErrorCode::NotAdmin,
            AppError::RaceInProgress { .. } => ErrorCode::RaceInProgress,
            AppError::RaceNotFound => ErrorCode::RaceNotFound,
            AppError::RaceNotActive => ErrorCode::RaceNotActive,
            AppError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            AppError::Internal(_) | AppError::Io(_) | AppError::Json(_) => ErrorCode::InternalError,
        }
    }

    /// Message text sent to the client. Internal failure details stay
    /// in the logs; the client only learns that the operation failed.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Internal(_) | AppError::Io(_) | AppError::Json(_) => {
                "An internal server error occurred".to_string()
            },
            other => other.to_string(),
        }
    }

    /// The `error` frame for this failure
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            message: self.client_message(),
            code: self.code(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::Internal("Failed to send message".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::AuthFailed.code(), ErrorCode::AuthFailed);
        assert_eq!(AppError::NotAuthenticated.code(), ErrorCode::NotAuthenticated);
        assert_eq!(
            AppError::RaceInProgress {
                race_id: "r1".to_string()
            }
            .code(),
            ErrorCode::RaceInProgress
        );
        assert_eq!(
            AppError::Internal("oops".to_string()).code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn test_race_in_progress_names_the_race() {
        let err = AppError::RaceInProgress {
            race_id: "race-42".to_string(),
        };
        assert!(err.to_string().contains("race-42"));
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = AppError::Internal("disk on fire at /var/data".to_string());
        assert!(!err.client_message().contains("/var/data"));

        let ServerMessage::Error { message, code } = err.to_server_message() else {
            panic!("expected error frame");
        };
        assert_eq!(code, ErrorCode::InternalError);
        assert!(!message.contains("disk"));
    }
}
