//! Events published by the call session controller
//!
//! The authoritative state lives in the watch channel returned by
//! [`CallSessionController::subscribe_state`](crate::CallSessionController::subscribe_state).
//! These broadcast events carry the same transitions, plus the things that
//! do not show up in [`CallState`]: registration and the invitation slot.
//!
//! ```rust
//! use pushcall_client_core::{CallState, ClientEvent};
//!
//! fn describe(event: &ClientEvent) -> String {
//!     match event {
//!         ClientEvent::StateChanged { current, .. } => format!("now {}", current),
//!         ClientEvent::InvitationReceived { invitation } => format!("call from {}", invitation.from),
//!         other => format!("{:?}", other),
//!     }
//! }
//!
//! let event = ClientEvent::StateChanged {
//!     previous: CallState::Idle,
//!     current: CallState::Connecting,
//! };
//! assert_eq!(describe(&event), "now connecting");
//! ```

use std::fmt;

use crate::client::state::CallState;
use crate::identity::Identity;
use crate::push::CallInvitation;

/// Why an invitation left the pending slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationOutcome {
    Accepted,
    Rejected,
    /// Matching cancellation push arrived
    Cancelled,
    /// A newer invitation took the slot
    Replaced,
    /// The session was torn down by logout
    Discarded,
}

impl fmt::Display for InvitationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Replaced => "replaced",
            Self::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// Client events
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Call state changed
    StateChanged {
        previous: CallState,
        current: CallState,
    },

    /// Push delivery is bound to `identity`
    Registered { identity: Identity },

    /// Push delivery was released for `identity`
    Unregistered { identity: Identity },

    /// An invitation entered the pending slot
    InvitationReceived { invitation: CallInvitation },

    /// An invitation left the pending slot
    InvitationCleared {
        invitation: CallInvitation,
        outcome: InvitationOutcome,
    },
}

impl ClientEvent {
    /// New state, when this is a state change
    pub fn state(&self) -> Option<&CallState> {
        match self {
            Self::StateChanged { current, .. } => Some(current),
            _ => None,
        }
    }
}
