//! Core error types for the WES data sharing service

use thiserror::Error;

/// Main error type for the data sharing service
#[derive(Error, Debug)]
pub enum DataServiceError {
    /// The delivery body could not be decoded into a message envelope
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// The delivery carried neither an application UID nor a trusted user
    #[error("unidentified producer: no app id and no trusted user id")]
    UnidentifiedProducer,

    /// The producer UID has no registered application metadata
    #[error("unknown application: no metadata for uid {uid}")]
    UnknownApplication { uid: String },

    /// An upload message could not be rewritten into URL form
    #[error("invalid upload message: {reason}")]
    InvalidUploadMessage { reason: String },

    /// The delivery routing key is not a recognized publish scope
    #[error("unknown scope: {routing_key:?}")]
    UnknownScope { routing_key: String },

    /// Broker I/O failed; the delivery is left unacked for redelivery
    #[error("broker transport fault: {message}")]
    Transport { message: String },

    /// The pod event watcher died and cannot be restarted
    #[error("pod event watcher terminated: {message}")]
    WatcherTerminal { message: String },

    /// Invalid service configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Result type for the data sharing service
pub type Result<T> = std::result::Result<T, DataServiceError>;

impl DataServiceError {
    /// Short reason label used in reject logs and warnings.
    pub fn reason(&self) -> &'static str {
        match self {
            DataServiceError::MalformedEnvelope { .. } => "malformed envelope",
            DataServiceError::UnidentifiedProducer => "unidentified producer",
            DataServiceError::UnknownApplication { .. } => "unknown application",
            DataServiceError::InvalidUploadMessage { .. } => "invalid upload message",
            DataServiceError::UnknownScope { .. } => "unknown scope",
            DataServiceError::Transport { .. } => "transport fault",
            DataServiceError::WatcherTerminal { .. } => "watcher terminated",
            DataServiceError::Configuration { .. } => "configuration error",
        }
    }

    /// Data-plane errors are recovered locally: the delivery is rejected and
    /// counted, and consumption continues. Everything else tears state down.
    pub fn is_data_plane(&self) -> bool {
        matches!(
            self,
            DataServiceError::MalformedEnvelope { .. }
                | DataServiceError::UnidentifiedProducer
                | DataServiceError::UnknownApplication { .. }
                | DataServiceError::InvalidUploadMessage { .. }
                | DataServiceError::UnknownScope { .. }
        )
    }

    /// Build a transport fault from any broker-side error message.
    pub fn transport(message: impl Into<String>) -> Self {
        DataServiceError::Transport {
            message: message.into(),
        }
    }

    /// Build a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        DataServiceError::Configuration {
            message: message.into(),
        }
    }
}

impl From<lapin::Error> for DataServiceError {
    fn from(err: lapin::Error) -> Self {
        DataServiceError::Transport {
            message: err.to_string(),
        }
    }
}
