//! Session worker tests
//!
//! These drive a `SessionWorker` directly, feeding it the messages its
//! spawned work posts back, so stale-completion handling can be checked
//! step by step without racing the worker task.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::manager::{Inbound, SessionContext, SessionWorker};
use super::state::{CallState, DISCONNECTED_BY_USER};
use crate::error::ClientError;
use crate::events::{ClientEvent, InvitationOutcome};
use crate::identity::Identity;
use crate::push::CallInvitation;
use crate::registration::PushRegistrar;
use crate::sdk::loopback::LoopbackSdk;
use crate::sdk::{CallHandleId, ConnectOptions, SdkEvent};
use crate::token::{AccessCredential, StaticTokenProvider};

fn id(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

struct Harness {
    worker: SessionWorker,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    events: broadcast::Receiver<ClientEvent>,
    sdk: Arc<LoopbackSdk>,
}

impl Harness {
    fn new() -> Self {
        let sdk = Arc::new(LoopbackSdk::new());
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);
        let (pending_tx, _) = watch::channel(None);
        let (events_tx, events) = broadcast::channel(64);

        let worker = SessionWorker {
            ctx: SessionContext::default(),
            inbox_tx,
            tokens: Arc::new(StaticTokenProvider::new("token")),
            registrar: Arc::new(PushRegistrar::new(sdk.clone(), Some("device".to_string()))),
            sdk: sdk.clone(),
            state_tx,
            pending_tx,
            events_tx,
        };

        Self {
            worker,
            inbox,
            events,
            sdk,
        }
    }

    fn signed_in(name: &str) -> Self {
        let mut harness = Self::new();
        harness.worker.ctx.identity = Some(id(name));
        harness.worker.ctx.credential = Some(AccessCredential::new(id(name), "token"));
        harness
    }

    fn state(&self) -> CallState {
        self.worker.current_state()
    }

    /// Apply the next message posted back by spawned work
    async fn pump(&mut self) {
        let message = tokio::time::timeout(Duration::from_secs(1), self.inbox.recv())
            .await
            .expect("nothing posted back to the worker")
            .expect("inbox closed");
        match message {
            Inbound::Sdk { handle, event } => self.worker.on_sdk_event(handle, event),
            Inbound::ConnectFinished { generation, result } => {
                self.worker.on_connect_finished(generation, result)
            }
            Inbound::CallOpened { handle, result } => self.worker.on_call_opened(handle, result),
            Inbound::Command(_) | Inbound::Shutdown => panic!("unexpected inbound message"),
        }
    }

    /// Place a call and let the SDK take it
    async fn open_outbound(&mut self, to: &str) -> CallHandleId {
        let (tx, rx) = oneshot::channel();
        self.worker.make_call(ConnectOptions::to(id(to)), tx);
        self.pump().await;
        rx.await.unwrap().unwrap()
    }

    fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

#[tokio::test]
async fn test_connect_caches_credential_and_returns_to_idle() {
    let mut h = Harness::new();
    let (tx, rx) = oneshot::channel();
    h.worker.connect(id("alice"), tx);
    assert_eq!(h.state(), CallState::Connecting);

    h.pump().await;
    rx.await.unwrap().unwrap();

    assert_eq!(h.state(), CallState::Idle);
    assert_eq!(h.worker.ctx.credential.as_ref().map(|c| c.identity().clone()), Some(id("alice")));
    assert_eq!(h.sdk.registered_identity("device"), Some(id("alice")));
    assert!(h
        .drain_events()
        .contains(&ClientEvent::Registered { identity: id("alice") }));
}

#[tokio::test]
async fn test_stale_connect_result_is_dropped() {
    let mut h = Harness::new();
    let (first_tx, first_rx) = oneshot::channel();
    h.worker.connect(id("alice"), first_tx);
    let (second_tx, mut second_rx) = oneshot::channel();
    h.worker.connect(id("bob"), second_tx);

    assert!(matches!(first_rx.await.unwrap(), Err(ClientError::InvalidState { .. })));

    h.worker
        .on_connect_finished(1, Ok(AccessCredential::new(id("alice"), "old")));
    assert_eq!(h.state(), CallState::Connecting);
    assert!(h.worker.ctx.credential.is_none());
    assert!(second_rx.try_recv().is_err());

    h.worker
        .on_connect_finished(2, Ok(AccessCredential::new(id("bob"), "new")));
    assert_eq!(h.state(), CallState::Idle);
    assert_eq!(h.worker.ctx.credential.as_ref().map(|c| c.token().to_string()), Some("new".to_string()));
    second_rx.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registration_failure_leaves_no_credential() {
    let mut h = Harness::new();
    h.sdk.fail_registration_with("push service unavailable");

    let (tx, rx) = oneshot::channel();
    h.worker.connect(id("alice"), tx);
    h.pump().await;

    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RegistrationFailure { .. }));
    assert_eq!(h.state(), CallState::Error(err.to_string()));
    assert!(h.worker.ctx.credential.is_none());
}

#[tokio::test]
async fn test_outbound_call_follows_callbacks() {
    let mut h = Harness::signed_in("alice");
    let handle = h.open_outbound("bob").await;
    assert_eq!(h.sdk.last_handle(), Some(handle));
    assert_eq!(h.state(), CallState::Connecting);

    assert!(h.sdk.emit(handle, SdkEvent::Ringing));
    h.pump().await;
    assert_eq!(h.state(), CallState::Ringing);

    assert!(h.sdk.emit(handle, SdkEvent::Connected));
    h.pump().await;
    assert_eq!(h.state(), CallState::Connected);

    assert!(h.sdk.emit(
        handle,
        SdkEvent::Disconnected {
            cause: Some("network lost".to_string())
        }
    ));
    h.pump().await;
    assert_eq!(h.state(), CallState::Error("Call dropped: network lost".to_string()));
    assert!(h.worker.ctx.active_call.is_none());
}

#[tokio::test]
async fn test_failure_before_sdk_reply_fails_caller_and_tears_down_late_handle() {
    let mut h = Harness::signed_in("alice");
    let (tx, rx) = oneshot::channel();
    h.worker.make_call(ConnectOptions::to(id("bob")), tx);
    let handle = h.worker.ctx.active_call.as_ref().unwrap().handle;

    h.worker.on_sdk_event(
        handle,
        SdkEvent::ConnectFailure {
            message: "busy".to_string(),
        },
    );
    assert_eq!(h.state(), CallState::Error("Connect failure: busy".to_string()));
    assert_eq!(
        rx.await.unwrap(),
        Err(ClientError::ConnectFailure {
            message: "busy".to_string()
        })
    );

    // SDK accepted the request after the call was already gone
    h.pump().await;
    // the teardown reports back through the listener and is ignored
    h.pump().await;
    assert_eq!(h.sdk.disconnected_handles(), vec![handle]);
    assert_eq!(h.state(), CallState::Error("Connect failure: busy".to_string()));
}

#[tokio::test]
async fn test_disconnect_ignores_callbacks_of_the_dropped_call() {
    let mut h = Harness::signed_in("alice");
    let handle = h.open_outbound("bob").await;

    h.worker.disconnect();
    assert_eq!(h.state(), CallState::Disconnected(DISCONNECTED_BY_USER.to_string()));

    h.pump().await;
    assert_eq!(h.state(), CallState::Disconnected(DISCONNECTED_BY_USER.to_string()));
    assert_eq!(h.sdk.disconnected_handles(), vec![handle]);
    assert!(!h.sdk.emit(handle, SdkEvent::Connected));
}

#[tokio::test]
async fn test_disconnect_with_nothing_to_tear_down_is_noop() {
    let mut h = Harness::signed_in("alice");
    h.worker.disconnect();
    assert_eq!(h.state(), CallState::Idle);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_disconnect_cancels_connect_in_flight() {
    let mut h = Harness::new();
    let (tx, rx) = oneshot::channel();
    h.worker.connect(id("alice"), tx);

    h.worker.disconnect();
    assert!(matches!(rx.await.unwrap(), Err(ClientError::InvalidState { .. })));
    assert_eq!(h.state(), CallState::Disconnected(DISCONNECTED_BY_USER.to_string()));

    h.pump().await;
    assert_eq!(h.state(), CallState::Disconnected(DISCONNECTED_BY_USER.to_string()));
    assert!(h.worker.ctx.credential.is_none());
}

#[tokio::test]
async fn test_make_call_without_credential_sets_error() {
    let mut h = Harness::new();
    let (tx, rx) = oneshot::channel();
    h.worker.make_call(ConnectOptions::to(id("bob")), tx);

    assert_eq!(rx.await.unwrap(), Err(ClientError::NoCredential));
    assert_eq!(h.state(), CallState::Error(ClientError::NoCredential.to_string()));
    assert!(h.worker.ctx.active_call.is_none());
}

#[tokio::test]
async fn test_make_call_while_busy_keeps_state() {
    let mut h = Harness::signed_in("alice");
    let (first_tx, _first_rx) = oneshot::channel();
    h.worker.make_call(ConnectOptions::to(id("bob")), first_tx);

    let (tx, rx) = oneshot::channel();
    h.worker.make_call(ConnectOptions::to(id("carol")), tx);

    assert!(matches!(rx.await.unwrap(), Err(ClientError::InvalidState { .. })));
    assert_eq!(h.state(), CallState::Connecting);
}

#[tokio::test]
async fn test_new_invitation_replaces_pending_one() {
    let mut h = Harness::signed_in("alice");
    let first = CallInvitation::new("CA1", id("bob"));
    let second = CallInvitation::new("CA2", id("carol"));

    h.worker.offer_invitation(first.clone());
    h.worker.offer_invitation(second.clone());

    assert_eq!(h.worker.ctx.pending_invitation.as_ref(), Some(&second));
    assert_eq!(
        h.drain_events(),
        vec![
            ClientEvent::InvitationReceived {
                invitation: first.clone()
            },
            ClientEvent::InvitationCleared {
                invitation: first,
                outcome: InvitationOutcome::Replaced
            },
            ClientEvent::InvitationReceived { invitation: second },
        ]
    );
}

#[tokio::test]
async fn test_accept_and_reject_need_matching_invitation() {
    let mut h = Harness::signed_in("alice");
    h.worker.offer_invitation(CallInvitation::new("CA1", id("bob")));

    let (tx, rx) = oneshot::channel();
    h.worker.accept("CA9", tx);
    assert_eq!(rx.await.unwrap(), Err(ClientError::NoPendingInvitation));
    assert_eq!(h.worker.reject("CA9"), Err(ClientError::NoPendingInvitation));
    assert!(h.worker.ctx.pending_invitation.is_some());

    assert_eq!(h.worker.reject("CA1"), Ok(()));
    assert!(h.worker.ctx.pending_invitation.is_none());
}

#[tokio::test]
async fn test_accept_opens_incoming_call() {
    let mut h = Harness::signed_in("alice");
    h.worker.offer_invitation(CallInvitation::new("CA1", id("bob")));

    let (tx, rx) = oneshot::channel();
    h.worker.accept("CA1", tx);
    assert_eq!(h.state(), CallState::Connecting);
    assert!(h.worker.ctx.pending_invitation.is_none());

    h.pump().await;
    let handle = rx.await.unwrap().unwrap();
    assert_eq!(h.sdk.accept_count(), 1);

    assert!(h.sdk.emit(handle, SdkEvent::Connected));
    h.pump().await;
    assert_eq!(h.state(), CallState::Connected);
}

#[tokio::test]
async fn test_logout_discards_invitation_and_unregisters() {
    let mut h = Harness::new();
    let (tx, rx) = oneshot::channel();
    h.worker.connect(id("alice"), tx);
    h.pump().await;
    rx.await.unwrap().unwrap();

    let invitation = CallInvitation::new("CA1", id("bob"));
    h.worker.offer_invitation(invitation.clone());
    h.drain_events();

    let (tx, rx) = oneshot::channel();
    h.worker.logout(tx);
    rx.await.unwrap().unwrap();

    assert!(h.worker.ctx.identity.is_none());
    assert!(h.worker.ctx.credential.is_none());
    assert_eq!(h.sdk.unregistration_count(), 1);
    assert_eq!(h.sdk.registered_identity("device"), None);
    assert_eq!(
        h.drain_events(),
        vec![
            ClientEvent::InvitationCleared {
                invitation,
                outcome: InvitationOutcome::Discarded
            },
            ClientEvent::Unregistered { identity: id("alice") },
        ]
    );
}

#[tokio::test]
async fn test_rotated_device_token_reregisters_once() {
    let mut h = Harness::signed_in("alice");
    let credential = AccessCredential::new(id("alice"), "token");
    h.worker.registrar.register(&credential).await.unwrap();
    assert_eq!(h.sdk.registered_identity("device"), Some(id("alice")));

    let (tx, rx) = oneshot::channel();
    h.worker.update_device_token("rotated".to_string(), tx);
    rx.await.unwrap().unwrap();
    assert_eq!(h.sdk.registration_count(), 2);
    assert_eq!(h.sdk.unregistration_count(), 1);
    assert_eq!(h.sdk.registered_identity("device"), None);
    assert_eq!(h.sdk.registered_identity("rotated"), Some(id("alice")));

    let (tx, rx) = oneshot::channel();
    h.worker.update_device_token("rotated".to_string(), tx);
    rx.await.unwrap().unwrap();
    assert_eq!(h.sdk.registration_count(), 2);
    assert_eq!(h.sdk.unregistration_count(), 1);
}

#[tokio::test]
async fn test_blank_device_token_is_refused() {
    let mut h = Harness::signed_in("alice");

    let (tx, rx) = oneshot::channel();
    h.worker.update_device_token("   ".to_string(), tx);
    let err = rx.await.unwrap().unwrap_err();

    assert!(matches!(err, ClientError::RegistrationFailure { .. }));
    assert_eq!(h.sdk.registration_count(), 0);
    assert_eq!(h.sdk.unregistration_count(), 0);
    assert_eq!(h.worker.registrar.device_token().as_deref(), Some("device"));
}
