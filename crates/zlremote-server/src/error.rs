use thiserror::Error;
use zlremote_protocol::{ConnectionId, ErrorCode};

/// Per-message failures of the signaling layer.
///
/// None of these tear anything down: the router logs them and, for the join
/// and register flows, reports them back to the sender only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Not allowed: {0}")]
    UnauthorizedRelay(&'static str),

    #[error("Recipient {0} unavailable")]
    RecipientUnavailable(ConnectionId),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Could not allocate a unique session id after {attempts} attempts")]
    SessionIdExhausted { attempts: usize },
}

impl SignalingError {
    /// Wire code for errors that can be reported to a client
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SignalingError::SessionNotFound => Some(ErrorCode::SessionNotFound),
            SignalingError::InvalidPassword => Some(ErrorCode::InvalidPassword),
            SignalingError::MalformedMessage(_) => Some(ErrorCode::MalformedMessage),
            SignalingError::UnauthorizedRelay(_) => Some(ErrorCode::UnauthorizedRelay),
            SignalingError::SessionIdExhausted { .. } => Some(ErrorCode::SessionIdExhausted),
            SignalingError::RecipientUnavailable(_) | SignalingError::UnknownConnection(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;
