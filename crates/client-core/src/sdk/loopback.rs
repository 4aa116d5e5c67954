//! In-process stand-in for the vendor voice SDK
//!
//! `LoopbackSdk` keeps registrations and open calls in memory, counts every
//! command it receives, and can be told to fail registration or call setup.
//! Callbacks are either scripted (`with_auto_answer`) or driven by hand
//! through [`LoopbackSdk::emit`]. [`LoopbackInspector`] understands the push
//! payloads built by [`LoopbackSdk::invitation_payload`] and
//! [`LoopbackSdk::cancellation_payload`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CallHandleId, CallListener, ConnectOptions, SdkEvent, VoiceSdk};
use crate::error::{ClientError, ClientResult};
use crate::identity::Identity;
use crate::push::{CallCancellation, CallInvitation, PayloadInspector, PushPayload};
use crate::token::AccessCredential;

/// Payload key naming the message type
pub const MESSAGE_TYPE_KEY: &str = "voice_message_type";
/// Message type of an invitation
pub const MESSAGE_TYPE_INVITE: &str = "call.invite";
/// Message type of a cancellation
pub const MESSAGE_TYPE_CANCEL: &str = "call.cancel";
pub const CALL_SID_KEY: &str = "voice_call_sid";
pub const FROM_KEY: &str = "voice_from";
pub const TO_KEY: &str = "voice_to";
/// Prefix of caller-supplied parameters
pub const PARAM_PREFIX: &str = "voice_param_";

/// Timing of scripted callbacks after connect/accept
#[derive(Debug, Clone, Copy)]
struct AutoAnswer {
    ring_after: Duration,
    answer_after: Duration,
}

#[derive(Debug, Default)]
struct LoopbackState {
    registrations: usize,
    unregistrations: usize,
    connects: usize,
    accepts: usize,
    rejects: usize,
    bindings: HashMap<String, Identity>,
    calls: HashMap<CallHandleId, CallListener>,
    last_handle: Option<CallHandleId>,
    disconnected: Vec<CallHandleId>,
    fail_registration: Option<String>,
    fail_connect: Option<String>,
}

/// Simulated voice SDK
#[derive(Debug, Default)]
pub struct LoopbackSdk {
    state: Mutex<LoopbackState>,
    auto_answer: Option<AutoAnswer>,
}

impl LoopbackSdk {
    /// SDK that never raises callbacks on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// SDK whose calls ring after `ring_after` and connect `answer_after` later
    pub fn with_auto_answer(ring_after: Duration, answer_after: Duration) -> Self {
        Self {
            state: Mutex::new(LoopbackState::default()),
            auto_answer: Some(AutoAnswer {
                ring_after,
                answer_after,
            }),
        }
    }

    pub fn fail_registration_with(&self, message: impl Into<String>) {
        self.state.lock().fail_registration = Some(message.into());
    }

    pub fn fail_connect_with(&self, message: impl Into<String>) {
        self.state.lock().fail_connect = Some(message.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_registration = None;
        state.fail_connect = None;
    }

    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations
    }

    pub fn unregistration_count(&self) -> usize {
        self.state.lock().unregistrations
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn accept_count(&self) -> usize {
        self.state.lock().accepts
    }

    pub fn reject_count(&self) -> usize {
        self.state.lock().rejects
    }

    /// Identity currently bound to `device_token`
    pub fn registered_identity(&self, device_token: &str) -> Option<Identity> {
        self.state.lock().bindings.get(device_token).cloned()
    }

    /// Handle of the most recently opened call
    pub fn last_handle(&self) -> Option<CallHandleId> {
        self.state.lock().last_handle
    }

    /// Calls that are still open
    pub fn open_calls(&self) -> Vec<CallHandleId> {
        self.state.lock().calls.keys().copied().collect()
    }

    /// Calls torn down through [`VoiceSdk::disconnect`], oldest first
    pub fn disconnected_handles(&self) -> Vec<CallHandleId> {
        self.state.lock().disconnected.clone()
    }

    /// Raise a callback on an open call, as the remote side or network would.
    /// Terminal events close the call. Returns `false` for unknown handles.
    pub fn emit(&self, handle: CallHandleId, event: SdkEvent) -> bool {
        let listener = {
            let mut state = self.state.lock();
            let terminal = matches!(
                event,
                SdkEvent::Disconnected { .. } | SdkEvent::ConnectFailure { .. }
            );
            if terminal {
                state.calls.remove(&handle)
            } else {
                state.calls.get(&handle).cloned()
            }
        };

        match listener {
            Some(listener) => listener.emit(event),
            None => false,
        }
    }

    /// Push payload carrying an invitation from `from`
    pub fn invitation_payload(from: &Identity, to: Option<&Identity>) -> PushPayload {
        let mut payload = PushPayload::new()
            .with(MESSAGE_TYPE_KEY, MESSAGE_TYPE_INVITE)
            .with(CALL_SID_KEY, format!("CA{}", Uuid::new_v4().simple()))
            .with(FROM_KEY, from.as_str());
        if let Some(to) = to {
            payload = payload.with(TO_KEY, to.as_str());
        }
        payload
    }

    /// Push payload cancelling the invitation `call_sid`
    pub fn cancellation_payload(call_sid: &str) -> PushPayload {
        PushPayload::new()
            .with(MESSAGE_TYPE_KEY, MESSAGE_TYPE_CANCEL)
            .with(CALL_SID_KEY, call_sid)
    }

    fn open(&self, listener: CallListener) {
        let handle = listener.handle();
        {
            let mut state = self.state.lock();
            state.calls.insert(handle, listener.clone());
            state.last_handle = Some(handle);
        }

        if let Some(script) = self.auto_answer {
            tokio::spawn(async move {
                tokio::time::sleep(script.ring_after).await;
                if !listener.emit(SdkEvent::Ringing) {
                    return;
                }
                tokio::time::sleep(script.answer_after).await;
                listener.emit(SdkEvent::Connected);
            });
        }
    }
}

#[async_trait]
impl VoiceSdk for LoopbackSdk {
    async fn register(&self, credential: &AccessCredential, device_token: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.registrations += 1;
        if let Some(message) = &state.fail_registration {
            return Err(ClientError::registration(message.clone()));
        }
        state
            .bindings
            .insert(device_token.to_string(), credential.identity().clone());
        debug!(identity = %credential.identity(), "Loopback registration accepted");
        Ok(())
    }

    async fn unregister(
        &self,
        credential: &AccessCredential,
        device_token: &str,
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.unregistrations += 1;
        if state.bindings.get(device_token) == Some(credential.identity()) {
            state.bindings.remove(device_token);
        }
        Ok(())
    }

    async fn connect(
        &self,
        credential: &AccessCredential,
        options: ConnectOptions,
        listener: CallListener,
    ) -> ClientResult<()> {
        {
            let mut state = self.state.lock();
            state.connects += 1;
            if let Some(message) = &state.fail_connect {
                return Err(ClientError::connect(message.clone()));
            }
        }
        info!(
            from = %credential.identity(),
            to = %options.to,
            handle = %listener.handle(),
            "Loopback call opened"
        );
        self.open(listener);
        Ok(())
    }

    async fn accept(&self, invitation: &CallInvitation, listener: CallListener) -> ClientResult<()> {
        {
            let mut state = self.state.lock();
            state.accepts += 1;
            if let Some(message) = &state.fail_connect {
                return Err(ClientError::connect(message.clone()));
            }
        }
        info!(from = %invitation.from, handle = %listener.handle(), "Loopback invitation accepted");

        let handle = listener.handle();
        {
            let mut state = self.state.lock();
            state.calls.insert(handle, listener.clone());
            state.last_handle = Some(handle);
        }
        if self.auto_answer.is_some() {
            tokio::spawn(async move {
                listener.emit(SdkEvent::Connected);
            });
        }
        Ok(())
    }

    async fn reject(&self, invitation: &CallInvitation) -> ClientResult<()> {
        self.state.lock().rejects += 1;
        debug!(call_sid = %invitation.call_sid, "Loopback invitation rejected");
        Ok(())
    }

    async fn disconnect(&self, handle: CallHandleId) {
        let listener = {
            let mut state = self.state.lock();
            state.disconnected.push(handle);
            state.calls.remove(&handle)
        };
        // the vendor SDK reports local hangups through the listener as well
        if let Some(listener) = listener {
            listener.emit(SdkEvent::Disconnected { cause: None });
        }
    }
}

/// Payload inspector for the loopback payload format
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackInspector;

impl PayloadInspector for LoopbackInspector {
    fn is_voice_message(&self, payload: &PushPayload) -> bool {
        matches!(
            payload.get(MESSAGE_TYPE_KEY),
            Some(MESSAGE_TYPE_INVITE) | Some(MESSAGE_TYPE_CANCEL)
        )
    }

    fn extract_invitation(&self, payload: &PushPayload) -> Option<CallInvitation> {
        if payload.get(MESSAGE_TYPE_KEY) != Some(MESSAGE_TYPE_INVITE) {
            return None;
        }
        let call_sid = payload.get(CALL_SID_KEY).filter(|s| !s.is_empty())?;
        let from = Identity::new(payload.get(FROM_KEY)?).ok()?;

        let mut invitation = CallInvitation::new(call_sid, from);
        invitation.to = payload.get(TO_KEY).and_then(|to| Identity::new(to).ok());
        invitation.custom_params = payload
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(PARAM_PREFIX)
                    .map(|name| (name.to_string(), v.to_string()))
            })
            .collect();
        Some(invitation)
    }

    fn extract_cancellation(&self, payload: &PushPayload) -> Option<CallCancellation> {
        if payload.get(MESSAGE_TYPE_KEY) != Some(MESSAGE_TYPE_CANCEL) {
            return None;
        }
        let call_sid = payload.get(CALL_SID_KEY).filter(|s| !s.is_empty())?;
        Some(CallCancellation {
            call_sid: call_sid.to_string(),
            from: payload.get(FROM_KEY).and_then(|f| Identity::new(f).ok()),
        })
    }
}
