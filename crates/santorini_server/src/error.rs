//! Submission errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use derive_more::Display;
use santorini_engine::{ErrorBody, ErrorCode, MatchStatus, Role, SequenceMismatch};
use serde_json::json;
use tracing::error;

use crate::session::AuthError;
use crate::store::StoreError;

/// Every way a match operation can fail.
#[derive(Debug, Clone, Display)]
pub enum SubmissionError {
    /// Missing, invalid or expired credentials.
    #[display("{}", _0)]
    Unauthorized(AuthError),
    /// Malformed request.
    #[display("Invalid request: {}", _0)]
    InvalidRequest(String),
    /// Caller is not seated in the match.
    #[display("Not a participant of this match")]
    NotParticipant,
    /// The other role is to move.
    #[display("Not your turn: waiting for {}", expected)]
    NotYourTurn {
        /// Role on move.
        expected: Role,
    },
    /// Match is not accepting this operation.
    #[display("Match is {}", _0)]
    MatchNotActive(MatchStatus),
    /// Declared move index disagrees with the server.
    #[display("Expected move index {}, received {}", _0.expected, _0.received)]
    MoveOutOfSequence(SequenceMismatch),
    /// Another submission took the index first.
    #[display("Move index {} was taken by a concurrent submission", move_index)]
    MoveConflict {
        /// Contested index.
        move_index: u32,
    },
    /// Undo target includes placement moves.
    #[display("Undo not allowed: {}", _0)]
    UndoNotAllowed(String),
    /// Rejected by the rules.
    #[display("Invalid move: {}", _0)]
    InvalidMove(String),
    /// Too many invalid attempts.
    #[display("Too many invalid moves, blocked until {}", until)]
    RateLimited {
        /// End of the block.
        until: DateTime<Utc>,
    },
    /// Unknown match or move.
    #[display("Not found: {}", _0)]
    NotFound(String),
    /// Server-side failure; details are logged, not returned.
    #[display("Internal error: {}", _0)]
    Internal(String),
}

impl std::error::Error for SubmissionError {}

impl SubmissionError {
    /// HTTP status of the error category.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotParticipant | Self::NotYourTurn { .. } => StatusCode::FORBIDDEN,
            Self::MatchNotActive(_)
            | Self::MoveOutOfSequence(_)
            | Self::MoveConflict { .. }
            | Self::UndoNotAllowed(_) => StatusCode::CONFLICT,
            Self::InvalidMove(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::NotParticipant => ErrorCode::NotParticipant,
            Self::NotYourTurn { .. } => ErrorCode::NotYourTurn,
            Self::MatchNotActive(_) => ErrorCode::MatchNotActive,
            Self::MoveOutOfSequence(_) => ErrorCode::MoveOutOfSequence,
            Self::MoveConflict { .. } => ErrorCode::MoveConflict,
            Self::UndoNotAllowed(_) => ErrorCode::UndoNotAllowed,
            Self::InvalidMove(_) => ErrorCode::InvalidMove,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Structured context for the client.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MoveOutOfSequence(mismatch) => serde_json::to_value(mismatch).ok(),
            Self::NotYourTurn { expected } => Some(json!({ "expected": expected })),
            Self::MatchNotActive(status) => Some(json!({ "status": status })),
            Self::MoveConflict { move_index } => Some(json!({ "moveIndex": move_index })),
            Self::RateLimited { until } => Some(json!({ "blockedUntil": until })),
            _ => None,
        }
    }

    /// JSON body; server errors get a generic message.
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: message,
            code: self.code(),
            details: self.details(),
        }
    }
}

impl From<AuthError> for SubmissionError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err)
    }
}

impl From<StoreError> for SubmissionError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for SubmissionError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(detail = %detail, "Request failed with server error");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_sequence_details() {
        let err = SubmissionError::MoveOutOfSequence(SequenceMismatch {
            expected: 4,
            received: 3,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let body = err.body();
        assert_eq!(body.code, ErrorCode::MoveOutOfSequence);
        assert_eq!(body.details, Some(json!({"expected": 4, "received": 3})));
    }

    #[test]
    fn test_internal_message_is_generic() {
        let body = SubmissionError::Internal("db exploded".to_string()).body();
        assert_eq!(body.error, "Internal server error");
        assert_eq!(body.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_categories_map_to_statuses() {
        assert_eq!(
            SubmissionError::Unauthorized(AuthError::InvalidToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SubmissionError::NotYourTurn { expected: Role::Creator }.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SubmissionError::InvalidMove("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            SubmissionError::RateLimited { until: Utc::now() }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
