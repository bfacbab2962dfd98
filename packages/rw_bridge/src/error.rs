//! Front-end request errors.
//!
//! The Display text of each variant is exactly what the client sees in the
//! `message` field of an error envelope.

use backend_link::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The inbound frame was not a JSON envelope
    #[error("invalid json")]
    InvalidJson,

    #[error("role must be reader or writer")]
    InvalidRole,

    #[error("no control or message provided")]
    EmptyRequest,

    #[error("writer session already active")]
    LeaseAlreadyActive,

    #[error("no active writer session")]
    NoActiveLease,

    #[error("start writer session first")]
    LeaseRequired,

    #[error("TCP connect error: {0}")]
    Connect(#[from] LinkError),

    /// Reply text from the backend without the success marker, passed
    /// through verbatim
    #[error("{0}")]
    Backend(String),
}

impl BridgeError {
    /// Short machine-readable code, used for logs and metrics labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidRole => "invalid_role",
            Self::EmptyRequest => "empty_request",
            Self::LeaseAlreadyActive => "lease_already_active",
            Self::NoActiveLease => "no_active_lease",
            Self::LeaseRequired => "lease_required",
            Self::Connect(_) => "connect_failed",
            Self::Backend(_) => "backend_error",
        }
    }
}
