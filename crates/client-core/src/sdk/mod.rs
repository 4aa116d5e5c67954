//! Seam to the vendor voice SDK
//!
//! Media transport, codec negotiation and NAT traversal all live behind
//! [`VoiceSdk`]. The client only issues commands and listens for call
//! callbacks. Callbacks arrive on SDK-owned threads, so a [`CallListener`] is
//! a cheap, clonable, non-blocking handle that forwards them into the call
//! session controller's queue.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::manager::Inbound;
use crate::error::ClientResult;
use crate::identity::Identity;
use crate::push::CallInvitation;
use crate::token::AccessCredential;

pub mod loopback;

/// Identifier the controller assigns to a call before handing it to the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandleId(Uuid);

impl CallHandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call lifecycle callbacks raised by the SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    /// Remote side is being alerted
    Ringing,
    /// Media is flowing
    Connected,
    /// Call could not be set up
    ConnectFailure { message: String },
    /// Transport lost the call and is trying to recover it
    Reconnecting { message: String },
    /// Transport recovered the call
    Reconnected,
    /// Call ended; `cause` is set when it ended because of a fault
    Disconnected { cause: Option<String> },
}

/// Where the SDK reports callbacks for one call
#[derive(Clone)]
pub struct CallListener {
    handle: CallHandleId,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl CallListener {
    pub(crate) fn new(handle: CallHandleId, inbox: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { handle, inbox }
    }

    pub fn handle(&self) -> CallHandleId {
        self.handle
    }

    /// Forward a callback. Returns `false` once the controller has stopped.
    pub fn emit(&self, event: SdkEvent) -> bool {
        self.inbox
            .send(Inbound::Sdk {
                handle: self.handle,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for CallListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallListener")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Parameters of an outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub to: Identity,
    pub params: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn to(target: Identity) -> Self {
        Self {
            to: target,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Commands the client issues to the voice SDK
///
/// Retry, backoff and media timeouts are the SDK's business. Implementations
/// report the outcome of `connect`/`accept` setup through the returned
/// result and everything after that through the listener.
#[async_trait]
pub trait VoiceSdk: Send + Sync {
    /// Bind `device_token` to the credential's identity for inbound calls
    async fn register(&self, credential: &AccessCredential, device_token: &str) -> ClientResult<()>;

    /// Undo [`VoiceSdk::register`]
    async fn unregister(&self, credential: &AccessCredential, device_token: &str)
    -> ClientResult<()>;

    /// Open an outbound call
    async fn connect(
        &self,
        credential: &AccessCredential,
        options: ConnectOptions,
        listener: CallListener,
    ) -> ClientResult<()>;

    /// Answer an invitation
    async fn accept(&self, invitation: &CallInvitation, listener: CallListener) -> ClientResult<()>;

    /// Decline an invitation
    async fn reject(&self, invitation: &CallInvitation) -> ClientResult<()>;

    /// Tear down a call. Unknown handles are ignored.
    async fn disconnect(&self, handle: CallHandleId);
}
