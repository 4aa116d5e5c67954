//! Push payloads and the call invitations carried inside them
//!
//! Payload contents belong to the voice SDK. The client never parses them
//! itself; it asks a [`PayloadInspector`] supplied by the SDK binding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Data section of a platform push message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushPayload {
    data: BTreeMap<String, String>,
}

impl PushPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PushPayload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Inbound request to establish a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInvitation {
    /// SDK-assigned identifier of the remote call leg
    pub call_sid: String,
    /// Inviting party
    pub from: Identity,
    /// Invited party, when the payload names one
    pub to: Option<Identity>,
    /// Application parameters attached by the caller
    pub custom_params: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl CallInvitation {
    pub fn new(call_sid: impl Into<String>, from: Identity) -> Self {
        Self {
            call_sid: call_sid.into(),
            from,
            to: None,
            custom_params: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }
}

/// Caller hung up before the invitation was answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCancellation {
    pub call_sid: String,
    pub from: Option<Identity>,
}

/// Classification API of the voice SDK
pub trait PayloadInspector: Send + Sync {
    /// Whether the payload is voice signaling at all
    fn is_voice_message(&self, payload: &PushPayload) -> bool;

    /// Invitation carried by the payload, if it is one
    fn extract_invitation(&self, payload: &PushPayload) -> Option<CallInvitation>;

    /// Cancellation carried by the payload, if it is one
    fn extract_cancellation(&self, payload: &PushPayload) -> Option<CallCancellation>;
}
