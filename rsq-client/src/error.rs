use thiserror::Error;

use crate::message::EntryId;

/// Errors that can occur during client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Communication or service-side failure, distinct from "no data right now"
    #[error("Transport error: {0}")]
    Transport(#[source] redis::RedisError),

    /// Local I/O failure (config file, stdin), never from the log service
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream or group creation failed for a reason other than pre-existence
    #[error("Group initialization failed for {stream}/{group}: {source}")]
    Init {
        /// Stream the group was being created on
        stream: String,
        /// Group being created
        group: String,
        /// Underlying failure
        #[source]
        source: Box<ClientError>,
    },

    /// The stored entry has no usable `body` field
    #[error("Cannot decode payload of entry {id}: {reason}")]
    DecodePayload {
        /// Entry whose payload could not be decoded
        id: EntryId,
        /// What was wrong with the stored fields
        reason: String,
    },

    /// The service replied with something that does not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true if this error is transient and the caller may retry the
    /// operation. The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Error replies (NOGROUP, WRONGTYPE, NOAUTH) fail again unchanged
            Self::Transport(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            },
            Self::Init { source, .. } => source.is_retryable(),
            // Non-retryable: Io, DecodePayload, InvalidResponse, Config
            _ => false,
        }
    }
}

impl From<redis::RedisError> for ClientError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use redis::{ErrorKind, RedisError};
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_error_reply_is_not_retryable() {
        let err = ClientError::from(RedisError::from((
            ErrorKind::ExtensionError,
            "NOGROUP",
            "No such key 'orders' or consumer group 'billing'".to_string(),
        )));
        assert!(!err.is_retryable());
        assert!(err.source().is_some());

        let err = ClientError::from(RedisError::from((
            ErrorKind::AuthenticationFailed,
            "NOAUTH",
        )));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connection_failure_is_retryable() {
        let dropped = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(ClientError::from(RedisError::from(dropped)).is_retryable());

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(ClientError::from(RedisError::from(refused)).is_retryable());
    }

    #[test]
    fn test_local_io_error_is_not_transport() {
        let err = ClientError::from(io::Error::new(io::ErrorKind::NotFound, "rsq.toml"));
        assert!(matches!(err, ClientError::Io(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn test_init_inherits_retryability() {
        let reply = RedisError::from((ErrorKind::ResponseError, "WRONGTYPE"));
        let err = ClientError::Init {
            stream: "orders".into(),
            group: "billing".into(),
            source: Box::new(reply.into()),
        };
        assert!(!err.is_retryable());
    }
}
