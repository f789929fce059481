use thiserror::Error;

/// Errors raised by a receiver control implementation.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("Timeout communicating with receiver: {0}")]
    Timeout(String),

    #[error("Receiver unreachable: {0}")]
    Network(String),

    #[error("No mapping for input source {0}")]
    InvalidInput(String),

    #[error("Command rejected by receiver: {0}")]
    Command(String),

    #[error("Unexpected receiver response: {0}")]
    Protocol(String),
}

impl ReceiverError {
    /// Classify the error into the status code reported to the remote.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReceiverError::Timeout(_) => StatusCode::Timeout,
            ReceiverError::Network(_) => StatusCode::ServiceUnavailable,
            ReceiverError::InvalidInput(_) => StatusCode::BadRequest,
            ReceiverError::Command(_) | ReceiverError::Protocol(_) => StatusCode::ServerError,
        }
    }
}

/// Result code of an entity command, following HTTP semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    Timeout,
    ServerError,
    NotImplemented,
    ServiceUnavailable,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::Timeout => 408,
            StatusCode::ServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }
}
