//! Client synchronization errors.

use derive_more::Display;
use santorini_engine::{EngineError, ErrorBody, ErrorCode, Role};

/// Failure talking to the match server.
#[derive(Debug, Clone, Display)]
pub enum TransportError {
    /// The server answered with an error body.
    #[display("Server rejected request ({}): {}", status, body.error)]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Decoded error body.
        body: ErrorBody,
    },
    /// The request never produced a usable response.
    #[display("Network error: {}", _0)]
    Network(String),
    /// The response body could not be decoded.
    #[display("Malformed response: {}", _0)]
    Decode(String),
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Server error code, if the server answered.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected { body, .. } => Some(body.code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Why the sync engine refused or failed an operation.
#[derive(Debug, Clone, Display)]
pub enum SyncError {
    /// Local input is suspended while remote state is replayed.
    #[display("Reconciling with the server; input suspended")]
    Reconciling,
    /// A failed submission was rolled back; fetch the match before moving.
    #[display("Local state rolled back; resync required")]
    ResyncRequired,
    /// The local seat is not on move.
    #[display("Not your turn: waiting for {}", _0)]
    NotYourTurn(Role),
    /// The move is illegal locally.
    #[display("{}", _0)]
    Engine(EngineError),
    /// The server refused the move or could not be reached.
    #[display("{}", _0)]
    Transport(TransportError),
    /// An update belongs to another match.
    #[display("Update for match {} does not belong to this session", _0)]
    ForeignMatch(String),
}

impl std::error::Error for SyncError {}

impl From<EngineError> for SyncError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
