//! Call state and the transition function driven by SDK callbacks

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sdk::SdkEvent;

/// Reason recorded when the local user hangs up
pub const DISCONNECTED_BY_USER: &str = "by user";

/// Reason recorded when the call ends without a fault
pub const DISCONNECTED_NORMALLY: &str = "call ended";

/// State of the single call session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Connecting,
    Ringing,
    Connected,
    Disconnected(String),
    Error(String),
}

impl CallState {
    /// Whether a new outbound call may start from here
    pub fn can_place_call(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected(_) | Self::Error(_))
    }

    /// Whether a call is being set up or is up
    pub fn is_in_call(&self) -> bool {
        matches!(self, Self::Connecting | Self::Ringing | Self::Connected)
    }

    /// Whether the state ends the current call
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Error(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ringing => "ringing",
            Self::Connected => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Error(_) => "error",
        }
    }
}

impl Default for CallState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(reason) => write!(f, "disconnected ({})", reason),
            Self::Error(message) => write!(f, "error: {}", message),
            other => f.write_str(other.label()),
        }
    }
}

/// State produced by a callback on the active call
///
/// The result depends only on the callback, so the published state always
/// matches the most recent callback applied.
pub fn transition(event: &SdkEvent) -> CallState {
    match event {
        SdkEvent::Ringing => CallState::Ringing,
        SdkEvent::Connected | SdkEvent::Reconnected => CallState::Connected,
        SdkEvent::Reconnecting { .. } => CallState::Connecting,
        SdkEvent::ConnectFailure { message } => CallState::Error(format!("Connect failure: {}", message)),
        SdkEvent::Disconnected { cause: None } => CallState::Disconnected(DISCONNECTED_NORMALLY.to_string()),
        SdkEvent::Disconnected { cause: Some(cause) } => CallState::Error(format!("Call dropped: {}", cause)),
    }
}

/// Whether `from -> to` is an edge of the call state machine
///
/// Callbacks that skip an edge are still applied; this only feeds logging.
pub fn is_expected(from: &CallState, to: &CallState) -> bool {
    use CallState::*;
    match (from, to) {
        (_, Idle) => true,
        (Idle | Disconnected(_) | Error(_), Connecting) => true,
        (Connecting, Ringing | Connected | Error(_) | Disconnected(_)) => true,
        (Ringing, Connected | Error(_) | Disconnected(_)) => true,
        (Connected, Connecting | Disconnected(_) | Error(_)) => true,
        (Connected, Connected) | (Ringing, Ringing) => true,
        _ => false,
    }
}
