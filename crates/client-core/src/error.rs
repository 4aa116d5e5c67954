//! Error types for the client-core library

use thiserror::Error;

/// Result type for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse grouping of errors, used when an error is folded into
/// [`CallState::Error`](crate::CallState::Error)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential fetch from the token endpoint
    Network,
    /// Binding the device push token to the identity
    Registration,
    /// Outbound call setup or accepting an invitation
    Connect,
    /// A call that was up dropped
    RuntimeDisconnect,
    /// The caller asked for something the current session cannot do
    Usage,
    /// Local persistence or configuration
    Local,
}

/// Errors that can occur in the call client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Token endpoint unreachable, non-2xx, or an unreadable body
    #[error("Network failure: {message}")]
    NetworkFailure { message: String },

    /// The SDK refused to bind the push token to the identity
    #[error("Registration failure: {message}")]
    RegistrationFailure { message: String },

    /// Outbound call setup (or accepting an invitation) failed
    #[error("Connect failure: {message}")]
    ConnectFailure { message: String },

    /// An established call dropped
    #[error("Call dropped: {message}")]
    RuntimeDisconnect { message: String },

    /// `make_call` before a successful `connect`
    #[error("No access credential; connect before placing a call")]
    NoCredential,

    /// The session is not in a state that allows the operation
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Accept or reject without a matching pending invitation
    #[error("No pending call invitation")]
    NoPendingInvitation,

    /// Blank or otherwise unusable identity
    #[error("Invalid identity: {reason}")]
    InvalidIdentity { reason: String },

    /// Identity store I/O
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The controller task has shut down
    #[error("Call session controller is not running")]
    ControllerStopped,
}

impl ClientError {
    /// Create a network failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    /// Create a registration failure
    pub fn registration(message: impl Into<String>) -> Self {
        Self::RegistrationFailure {
            message: message.into(),
        }
    }

    /// Create a connect failure
    pub fn connect(message: impl Into<String>) -> Self {
        Self::ConnectFailure {
            message: message.into(),
        }
    }

    /// Create a runtime disconnect error
    pub fn dropped(message: impl Into<String>) -> Self {
        Self::RuntimeDisconnect {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid identity error
    pub fn invalid_identity(reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Which bucket of the failure taxonomy this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NetworkFailure { .. } => ErrorCategory::Network,
            Self::RegistrationFailure { .. } => ErrorCategory::Registration,
            Self::ConnectFailure { .. } => ErrorCategory::Connect,
            Self::RuntimeDisconnect { .. } => ErrorCategory::RuntimeDisconnect,
            Self::NoCredential
            | Self::InvalidState { .. }
            | Self::NoPendingInvitation
            | Self::InvalidIdentity { .. }
            | Self::ControllerStopped => ErrorCategory::Usage,
            Self::Storage { .. } | Self::Configuration { .. } => ErrorCategory::Local,
        }
    }

    /// Re-label an SDK error as a registration failure unless it already is one
    pub(crate) fn into_registration(self) -> Self {
        match self {
            Self::RegistrationFailure { .. } => self,
            other => Self::registration(other.to_string()),
        }
    }

    /// Re-label an SDK error as a connect failure unless it already is one
    pub(crate) fn into_connect(self) -> Self {
        match self {
            Self::ConnectFailure { .. } => self,
            other => Self::connect(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("corrupt identity store: {}", err))
    }
}
