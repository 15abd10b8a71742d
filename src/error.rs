// =============================================================================
// Matrixon Matrix NextServer - Appservice Error Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 2.0.0-alpha (PostgreSQL Backend)
// License: Apache 2.0 / MIT
//
// Description:
//   Error types for the appservice SDK. This module is part of the Matrixon Matrix
//   NextServer implementation, designed for enterprise-grade deployment with 20,000+
//   concurrent connections and <50ms response latency.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Identity-operation errors naming the failing virtual user
//   • Standard Matrix errcode classification (M_FORBIDDEN, M_USER_IN_USE)
//   • Contract-violation error for bot-only operations
//   • Local power-level policy denials
//   • Transparent transport error propagation
//
// Architecture:
//   • Async/await native implementation
//   • Zero-copy operations where possible
//   • Memory pool optimization
//   • Lock-free data structures
//   • Enterprise monitoring integration
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with anyhow/thiserror
//   • Serialization with serde
//   • Matrix protocol types with ruma
//
// References:
//   • Matrix.org specification: https://matrix.org/
//   • Synapse reference: https://github.com/element-hq/synapse
//   • Matrix spec: https://spec.matrix.org/
//   • Performance guidelines: Internal Matrixon documentation
//
// Quality Assurance:
//   • Comprehensive unit testing
//   • Integration test coverage
//   • Performance benchmarking
//   • Memory leak detection
//   • Security audit compliance
//
// =============================================================================

use std::io;

use ruma::{IdParseError, OwnedRoomId, OwnedUserId, UserId};
use thiserror::Error;

/// Standard Matrix error code returned when an action is not allowed.
pub const ERRCODE_FORBIDDEN: &str = "M_FORBIDDEN";

/// Standard Matrix error code returned when a username is already taken.
pub const ERRCODE_USER_IN_USE: &str = "M_USER_IN_USE";

/// Appservice SDK error types
#[derive(Debug, Error)]
pub enum Error {
    /// User identifier does not have the `@localpart:domain` form
    #[error("Invalid user ID: {0}")]
    InvalidUserId(#[from] IdParseError),

    /// A register or join performed on behalf of a virtual user failed
    #[error("Failed to {action} as {user_id}: {source}")]
    Intent {
        /// The virtual user the operation was acting as
        user_id: OwnedUserId,
        /// What the intent was trying to do
        action: String,
        /// The underlying transport failure
        #[source]
        source: Box<Error>,
    },

    /// A bot-only operation was invoked on a puppet intent
    #[error("{0}() is only available on the bot intent")]
    BotOnly(&'static str),

    /// The local power-level policy denied the event
    #[error("Power level policy denied {user_id} sending {event_type} in {room_id}")]
    PowerLevel {
        user_id: OwnedUserId,
        room_id: OwnedRoomId,
        event_type: String,
    },

    /// The homeserver rejected the request with a standard Matrix error
    #[error("Matrix error {errcode} ({status}): {error}")]
    Matrix {
        /// HTTP status code of the response
        status: u16,
        /// Machine-readable Matrix error code, e.g. `M_FORBIDDEN`
        errcode: String,
        /// Human-readable message from the homeserver
        error: String,
    },

    /// Network error
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The homeserver replied with something we could not decode
    #[error("Bad server response: {0}")]
    BadServerResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for appservice operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a transport failure into an identity-operation error.
    pub(crate) fn intent(user_id: &UserId, action: impl Into<String>, source: Error) -> Self {
        Error::Intent {
            user_id: user_id.to_owned(),
            action: action.into(),
            source: Box::new(source),
        }
    }

    /// The machine-readable Matrix error code, if the homeserver sent one.
    pub fn errcode(&self) -> Option<&str> {
        match self {
            Error::Matrix { errcode, .. } => Some(errcode),
            _ => None,
        }
    }

    /// Whether the homeserver rejected the request with `M_FORBIDDEN`.
    pub fn is_forbidden(&self) -> bool {
        self.errcode() == Some(ERRCODE_FORBIDDEN)
    }

    /// Whether registration failed because the username is already taken.
    pub fn is_user_in_use(&self) -> bool {
        self.errcode() == Some(ERRCODE_USER_IN_USE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::{room_id, user_id};

    fn matrix_error(status: u16, errcode: &str) -> Error {
        Error::Matrix {
            status,
            errcode: errcode.to_owned(),
            error: "test".to_owned(),
        }
    }

    #[test]
    fn test_errcode_classification() {
        assert!(matrix_error(403, "M_FORBIDDEN").is_forbidden());
        assert!(!matrix_error(403, "M_FORBIDDEN").is_user_in_use());
        assert!(matrix_error(400, "M_USER_IN_USE").is_user_in_use());
        assert!(!matrix_error(500, "M_UNKNOWN").is_forbidden());
    }

    #[test]
    fn test_errcode_absent_on_other_variants() {
        let err = Error::BadServerResponse("not json".to_owned());
        assert_eq!(err.errcode(), None);
        assert!(!err.is_forbidden());
    }

    #[test]
    fn test_intent_error_names_the_user() {
        let err = Error::intent(
            user_id!("@tg_12345:example.org"),
            "join room !abc:example.org",
            matrix_error(403, "M_FORBIDDEN"),
        );
        let message = err.to_string();
        assert!(message.contains("@tg_12345:example.org"));
        assert!(message.contains("join room"));
    }

    #[test]
    fn test_power_level_error_display() {
        let err = Error::PowerLevel {
            user_id: user_id!("@bot:example.org").to_owned(),
            room_id: room_id!("!room:example.org").to_owned(),
            event_type: "m.room.message".to_owned(),
        };
        assert!(err.to_string().contains("m.room.message"));
    }
}
