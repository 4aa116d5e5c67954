//! Push payloads through the incoming call router

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;

use pushcall_client_core::sdk::loopback::{LoopbackInspector, LoopbackSdk};
use pushcall_client_core::{
    AlertPresenter, AlertSpec, AlertUrgency, CallInvitation, CallSessionController, CallState,
    ClientConfig, ClientError, ClientEvent, Identity, IncomingCallRouter, InvitationOutcome,
    PushPayload, PushRegistrar, RouteOutcome, SdkEvent, StaticTokenProvider,
};

const CHANNEL: &str = "incoming-call";

#[derive(Debug, Clone, PartialEq)]
enum AlertAction {
    Shown { channel: String, body: String },
    Withdrawn { channel: String },
}

#[derive(Default)]
struct RecordingAlerts {
    actions: Mutex<Vec<AlertAction>>,
    last_spec: Mutex<Option<AlertSpec>>,
}

impl RecordingAlerts {
    fn actions(&self) -> Vec<AlertAction> {
        self.actions.lock().clone()
    }
}

impl AlertPresenter for RecordingAlerts {
    fn show(&self, channel: &str, spec: &AlertSpec, _invitation: &CallInvitation) {
        *self.last_spec.lock() = Some(spec.clone());
        self.actions.lock().push(AlertAction::Shown {
            channel: channel.to_string(),
            body: spec.body.clone(),
        });
    }

    fn withdraw(&self, channel: &str) {
        self.actions.lock().push(AlertAction::Withdrawn {
            channel: channel.to_string(),
        });
    }
}

struct Fixture {
    controller: Arc<CallSessionController>,
    router: IncomingCallRouter,
    alerts: Arc<RecordingAlerts>,
    sdk: Arc<LoopbackSdk>,
}

async fn signed_in_as(name: &str) -> Fixture {
    let sdk = Arc::new(LoopbackSdk::new());
    let registrar = Arc::new(PushRegistrar::new(sdk.clone(), Some("device-1".to_string())));
    let controller = Arc::new(CallSessionController::spawn(
        &ClientConfig::new(),
        Arc::new(StaticTokenProvider::new("jwt")),
        registrar,
        sdk.clone(),
    ));
    controller.connect(id(name)).await.unwrap();

    let alerts = Arc::new(RecordingAlerts::default());
    let router = IncomingCallRouter::new(
        Arc::new(LoopbackInspector),
        alerts.clone(),
        controller.clone(),
        CHANNEL,
    );
    Fixture {
        controller,
        router,
        alerts,
        sdk,
    }
}

fn id(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

fn invite_from(from: &str, to: &str) -> PushPayload {
    LoopbackSdk::invitation_payload(&id(from), Some(&id(to)))
}

#[tokio::test]
async fn test_invite_then_cancel_never_starts_a_call() {
    let f = signed_in_as("alice").await;
    let mut events = f.controller.subscribe_events();

    let raised = match f.router.route(&invite_from("bob", "alice")).await.unwrap() {
        RouteOutcome::InvitationRaised(invitation) => invitation,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(raised.from, id("bob"));
    assert_eq!(f.controller.pending_invitation(), Some(raised.clone()));

    let cancel = LoopbackSdk::cancellation_payload(&raised.call_sid);
    assert_eq!(
        f.router.route(&cancel).await.unwrap(),
        RouteOutcome::InvitationCancelled {
            withdrawn: Some(raised.clone())
        }
    );

    assert!(f.controller.pending_invitation().is_none());
    assert_eq!(
        f.alerts.actions(),
        vec![
            AlertAction::Shown {
                channel: CHANNEL.to_string(),
                body: "bob is calling".to_string()
            },
            AlertAction::Withdrawn {
                channel: CHANNEL.to_string()
            },
        ]
    );

    f.controller.flush().await.unwrap();
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("event stream broke: {e}"),
        }
    }
    assert!(
        !seen
            .iter()
            .any(|e| e.state() == Some(&CallState::Connecting)),
        "{seen:?}"
    );
    assert!(seen.contains(&ClientEvent::InvitationCleared {
        invitation: raised,
        outcome: InvitationOutcome::Cancelled
    }));
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.sdk.accept_count(), 0);
}

#[tokio::test]
async fn test_alert_is_full_screen_and_high_priority() {
    let f = signed_in_as("alice").await;
    f.router.route(&invite_from("bob", "alice")).await.unwrap();

    let spec = f.alerts.last_spec.lock().clone().unwrap();
    assert_eq!(spec.title, "Incoming call");
    assert_eq!(spec.urgency, AlertUrgency::High);
    assert!(spec.full_screen);
    assert!(spec.ongoing);
}

#[tokio::test]
async fn test_accept_withdraws_alert_and_connects() {
    let f = signed_in_as("alice").await;
    f.router.route(&invite_from("bob", "alice")).await.unwrap();

    let handle = f.router.accept_pending().await.unwrap();
    assert_eq!(
        f.alerts.actions().last(),
        Some(&AlertAction::Withdrawn {
            channel: CHANNEL.to_string()
        })
    );
    assert_eq!(f.controller.state(), CallState::Connecting);

    f.sdk.emit(handle, SdkEvent::Connected);
    f.controller.flush().await.unwrap();
    assert_eq!(f.controller.state(), CallState::Connected);
    assert!(f.controller.pending_invitation().is_none());
}

#[tokio::test]
async fn test_reject_withdraws_alert_and_tells_sdk() {
    let f = signed_in_as("alice").await;
    f.router.route(&invite_from("bob", "alice")).await.unwrap();

    f.router.reject_pending().await.unwrap();
    f.controller.flush().await.unwrap();
    tokio::task::yield_now().await;

    assert!(f.controller.pending_invitation().is_none());
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.alerts.actions().len(), 2);
    assert_eq!(
        f.router.reject_pending().await,
        Err(ClientError::NoPendingInvitation)
    );
}

#[tokio::test]
async fn test_cancellation_is_matched_by_channel() {
    let f = signed_in_as("alice").await;
    let raised = match f.router.route(&invite_from("bob", "alice")).await.unwrap() {
        RouteOutcome::InvitationRaised(invitation) => invitation,
        other => panic!("unexpected outcome {other:?}"),
    };

    // a cancellation naming some other call still clears the pending one
    let outcome = f
        .router
        .route(&LoopbackSdk::cancellation_payload("CA-unrelated"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RouteOutcome::InvitationCancelled {
            withdrawn: Some(raised)
        }
    );
    assert!(f.controller.pending_invitation().is_none());
}

#[tokio::test]
async fn test_non_voice_and_malformed_payloads() {
    let f = signed_in_as("alice").await;

    let chat = PushPayload::new().with("type", "chat").with("body", "hi");
    assert_eq!(f.router.route(&chat).await.unwrap(), RouteOutcome::Ignored);

    let no_caller = PushPayload::new()
        .with("voice_message_type", "call.invite")
        .with("voice_call_sid", "CA1");
    assert_eq!(f.router.route(&no_caller).await.unwrap(), RouteOutcome::Malformed);

    assert!(f.alerts.actions().is_empty());
    assert!(f.controller.pending_invitation().is_none());
}

#[tokio::test]
async fn test_accept_while_in_call_is_refused() {
    let f = signed_in_as("alice").await;
    f.controller.make_call(id("carol")).await.unwrap();
    f.router.route(&invite_from("bob", "alice")).await.unwrap();

    let err = f.router.accept_pending().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
    assert_eq!(f.sdk.accept_count(), 0);

    // still answerable once the other call ends
    assert_eq!(f.controller.pending_invitation().map(|i| i.from), Some(id("bob")));
    assert_eq!(
        f.alerts.actions(),
        vec![AlertAction::Shown {
            channel: CHANNEL.to_string(),
            body: "bob is calling".to_string()
        }]
    );
}

#[tokio::test]
async fn test_stale_invitation_keeps_alert_up() {
    let f = signed_in_as("alice").await;
    f.router.route(&invite_from("bob", "alice")).await.unwrap();
    let stale = CallInvitation::new("CA-old", id("bob"));

    assert_eq!(
        f.router.accept(&stale).await,
        Err(ClientError::NoPendingInvitation)
    );
    assert_eq!(
        f.router.reject(&stale).await,
        Err(ClientError::NoPendingInvitation)
    );

    assert_eq!(f.controller.pending_invitation().map(|i| i.from), Some(id("bob")));
    assert!(
        !f.alerts
            .actions()
            .iter()
            .any(|a| matches!(a, AlertAction::Withdrawn { .. })),
        "{:?}",
        f.alerts.actions()
    );
    assert_eq!(f.sdk.accept_count(), 0);
    assert_eq!(f.sdk.reject_count(), 0);
}

#[tokio::test]
async fn test_sync_alert_only_withdraws_when_nothing_pending() {
    let f = signed_in_as("alice").await;
    f.router.route(&invite_from("bob", "alice")).await.unwrap();

    f.router.sync_alert();
    assert_eq!(f.alerts.actions().len(), 1);

    f.controller.logout().await.unwrap();
    f.router.sync_alert();
    assert_eq!(
        f.alerts.actions().last(),
        Some(&AlertAction::Withdrawn {
            channel: CHANNEL.to_string()
        })
    );
}
