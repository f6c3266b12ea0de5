use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Every failure the client reports falls into one of these kinds.
///
/// - [`Error::Transport`] is fatal to the whole connection and is broadcast
///   to every in-flight call and open turn stream.
/// - [`Error::Protocol`] is local to one call or one turn.
/// - [`Error::Timeout`] is local; the timed-out registration is gone.
/// - [`Error::TurnInactive`] is caller-side misuse.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error{}: {message}", .code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Protocol {
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Turn {0} is not active")]
    TurnInactive(String),
}

impl Error {
    /// A protocol error with no server error code, e.g. a malformed payload.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    /// The JSON-RPC error code, if this is a server-reported protocol error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Protocol { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::protocol(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display_with_code() {
        let err = Error::Protocol {
            code: Some(-32601),
            message: "not found".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "Protocol error (-32601): not found");
        assert_eq!(err.code(), Some(-32601));
    }

    #[test]
    fn test_protocol_display_without_code() {
        let err = Error::protocol("missing thread id");
        assert_eq!(err.to_string(), "Protocol error: missing thread id");
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            operation: "turn/start".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("turn/start"));
    }

    #[test]
    fn test_json_error_maps_to_protocol() {
        let parse: std::result::Result<Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Protocol { code: None, .. }));
    }
}
