//! Call session controller
//!
//! The controller is a handle to a single worker task that owns the session
//! context: identity, credential, the active call handle and the pending
//! invitation. Commands from the application, callbacks from the voice SDK and
//! the results of spawned network work all go through one queue into that
//! task, which is the only writer of [`CallState`].
//!
//! ```text
//!  UI commands ──┐
//!  SDK callbacks ├──► inbox (mpsc) ──► SessionWorker ──► watch<CallState>
//!  completions ──┘                          │          └─► broadcast<ClientEvent>
//!                                           └──► spawned token fetch / SDK calls
//! ```
//!
//! Work that awaits the network never runs on the worker itself. It is
//! spawned, and its result comes back into the queue tagged with the connect
//! generation or call handle that started it. Results whose tag is no longer
//! current are dropped, and a call handle opened by such a result is torn
//! down, so a late completion can never bring back a call the user hung up.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::client::config::ClientConfig;
use crate::client::state::{self, CallState};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, InvitationOutcome};
use crate::identity::Identity;
use crate::push::CallInvitation;
use crate::registration::PushRegistrar;
use crate::sdk::{CallHandleId, ConnectOptions, SdkEvent, VoiceSdk};
use crate::token::{AccessCredential, TokenProvider};

pub(crate) type Reply<T> = oneshot::Sender<ClientResult<T>>;

/// Everything the worker task consumes
pub(crate) enum Inbound {
    Command(Command),
    /// Callback raised by the SDK for one call
    Sdk { handle: CallHandleId, event: SdkEvent },
    /// Token fetch and registration finished for connect cycle `generation`
    ConnectFinished {
        generation: u64,
        result: ClientResult<AccessCredential>,
    },
    /// SDK answered a connect or accept request
    CallOpened {
        handle: CallHandleId,
        result: ClientResult<()>,
    },
    Shutdown,
}

pub(crate) enum Command {
    Connect { identity: Identity, reply: Reply<()> },
    MakeCall { options: ConnectOptions, reply: Reply<CallHandleId> },
    Disconnect { reply: oneshot::Sender<()> },
    Accept { call_sid: String, reply: Reply<CallHandleId> },
    Reject { call_sid: String, reply: Reply<()> },
    OfferInvitation { invitation: CallInvitation, reply: oneshot::Sender<()> },
    CancelInvitation { reply: oneshot::Sender<Option<CallInvitation>> },
    Logout { reply: Reply<()> },
    UpdateDeviceToken { token: String, reply: Reply<()> },
    Flush { reply: oneshot::Sender<()> },
}

/// Direction of the active call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

pub(crate) struct ActiveCall {
    pub(crate) handle: CallHandleId,
    pub(crate) direction: CallDirection,
    pub(crate) remote: Identity,
    /// Caller of `make_call`/`accept` waiting for the SDK to take the call
    pub(crate) opening: Option<Reply<CallHandleId>>,
}

/// Session state owned by the worker
#[derive(Default)]
pub(crate) struct SessionContext {
    pub(crate) identity: Option<Identity>,
    pub(crate) credential: Option<AccessCredential>,
    /// Bumped whenever a connect cycle starts or is abandoned
    pub(crate) generation: u64,
    pub(crate) pending_connect: Option<Reply<()>>,
    pub(crate) active_call: Option<ActiveCall>,
    pub(crate) pending_invitation: Option<CallInvitation>,
}

pub(crate) struct SessionWorker {
    pub(crate) ctx: SessionContext,
    pub(crate) inbox_tx: mpsc::UnboundedSender<Inbound>,
    pub(crate) tokens: Arc<dyn TokenProvider>,
    pub(crate) registrar: Arc<PushRegistrar>,
    pub(crate) sdk: Arc<dyn VoiceSdk>,
    pub(crate) state_tx: watch::Sender<CallState>,
    pub(crate) pending_tx: watch::Sender<Option<CallInvitation>>,
    pub(crate) events_tx: broadcast::Sender<ClientEvent>,
}

impl SessionWorker {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        debug!("Call session worker started");
        while let Some(message) = inbox.recv().await {
            match message {
                Inbound::Command(command) => self.handle_command(command),
                Inbound::Sdk { handle, event } => self.on_sdk_event(handle, event),
                Inbound::ConnectFinished { generation, result } => {
                    self.on_connect_finished(generation, result)
                }
                Inbound::CallOpened { handle, result } => self.on_call_opened(handle, result),
                Inbound::Shutdown => break,
            }
        }
        debug!("Call session worker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { identity, reply } => self.connect(identity, reply),
            Command::MakeCall { options, reply } => self.make_call(options, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Accept { call_sid, reply } => self.accept(&call_sid, reply),
            Command::Reject { call_sid, reply } => {
                let _ = reply.send(self.reject(&call_sid));
            }
            Command::OfferInvitation { invitation, reply } => {
                self.offer_invitation(invitation);
                let _ = reply.send(());
            }
            Command::CancelInvitation { reply } => {
                let _ = reply.send(self.cancel_invitation());
            }
            Command::Logout { reply } => self.logout(reply),
            Command::UpdateDeviceToken { token, reply } => self.update_device_token(token, reply),
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    pub(crate) fn current_state(&self) -> CallState {
        self.state_tx.borrow().clone()
    }

    /// Publish a new state. The only place `CallState` is written.
    pub(crate) fn set_state(&self, next: CallState) {
        let previous = self.state_tx.send_replace(next.clone());
        if !state::is_expected(&previous, &next) {
            warn!(from = %previous, to = %next, "Call state skipped an edge");
        }
        info!(from = %previous, to = %next, "Call state changed");
        let _ = self.events_tx.send(ClientEvent::StateChanged {
            previous,
            current: next,
        });
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Empty the invitation slot, announcing why
    pub(crate) fn take_invitation(&mut self, outcome: InvitationOutcome) -> Option<CallInvitation> {
        let invitation = self.ctx.pending_invitation.take()?;
        self.pending_tx.send_replace(None);
        debug!(call_sid = %invitation.call_sid, %outcome, "Invitation cleared");
        self.emit(ClientEvent::InvitationCleared {
            invitation: invitation.clone(),
            outcome,
        });
        Some(invitation)
    }

    /// Start a connect cycle: fetch a credential, then register for push
    pub(crate) fn connect(&mut self, identity: Identity, reply: Reply<()>) {
        self.ctx.generation += 1;
        let generation = self.ctx.generation;

        if let Some(previous) = self.ctx.pending_connect.take() {
            let _ = previous.send(Err(ClientError::invalid_state(
                "superseded by a newer connect",
            )));
        }
        self.abandon_active_call("fresh connect");

        info!(%identity, generation, "Connecting");
        self.ctx.identity = Some(identity.clone());
        self.ctx.credential = None;
        self.ctx.pending_connect = Some(reply);
        self.set_state(CallState::Connecting);

        let tokens = self.tokens.clone();
        let registrar = self.registrar.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let credential = tokens.fetch(&identity).await?;
                registrar.register(&credential).await?;
                Ok::<_, ClientError>(credential)
            }
            .await;
            let _ = inbox.send(Inbound::ConnectFinished { generation, result });
        });
    }

    pub(crate) fn on_connect_finished(&mut self, generation: u64, result: ClientResult<AccessCredential>) {
        if generation != self.ctx.generation {
            debug!(
                generation,
                current = self.ctx.generation,
                "Dropping result of an abandoned connect"
            );
            return;
        }
        let Some(reply) = self.ctx.pending_connect.take() else {
            return;
        };

        match result {
            Ok(credential) => {
                let identity = credential.identity().clone();
                self.ctx.credential = Some(credential);
                self.set_state(CallState::Idle);
                self.emit(ClientEvent::Registered { identity });
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                warn!("Connect failed: {}", err);
                self.set_state(CallState::Error(err.to_string()));
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Drop the session's credential and push binding
    pub(crate) fn logout(&mut self, reply: Reply<()>) {
        self.ctx.generation += 1;
        if let Some(pending) = self.ctx.pending_connect.take() {
            let _ = pending.send(Err(ClientError::invalid_state("connect cancelled by logout")));
        }
        self.abandon_active_call("logout");
        self.take_invitation(InvitationOutcome::Discarded);
        self.ctx.identity = None;
        let credential = self.ctx.credential.take();
        if self.current_state() != CallState::Idle {
            self.set_state(CallState::Idle);
        }

        let Some(credential) = credential else {
            let _ = reply.send(Ok(()));
            return;
        };

        let registrar = self.registrar.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = registrar.unregister(&credential).await;
            match &result {
                Ok(()) => {
                    let _ = events.send(ClientEvent::Unregistered {
                        identity: credential.identity().clone(),
                    });
                }
                Err(e) => warn!("Unregister failed: {}", e),
            }
            let _ = reply.send(result);
        });
    }

    /// Re-register under a rotated push token when a session is up
    ///
    /// The binding held by the replaced token is released first. A failed
    /// release is logged and does not stop the new registration.
    pub(crate) fn update_device_token(&mut self, token: String, reply: Reply<()>) {
        let change = match self.registrar.set_device_token(token) {
            Ok(change) => change,
            Err(e) => {
                warn!("Ignoring device token rotation: {}", e);
                let _ = reply.send(Err(e));
                return;
            }
        };
        let (credential, previous) = match (&self.ctx.credential, change) {
            (Some(credential), Some(change)) => (credential.clone(), change.previous),
            _ => {
                let _ = reply.send(Ok(()));
                return;
            }
        };

        let registrar = self.registrar.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = registrar.release_token(&credential, &previous).await {
                    warn!("Releasing the replaced push token failed: {}", e);
                }
            }
            let result = registrar.register(&credential).await;
            if let Err(e) = &result {
                warn!("Re-registration with rotated push token failed: {}", e);
            }
            let _ = reply.send(result);
        });
    }
}

/// Owns the single call session and publishes its state
///
/// Created with [`CallSessionController::spawn`], which must run inside a
/// Tokio runtime.
pub struct CallSessionController {
    inbox: mpsc::UnboundedSender<Inbound>,
    state_rx: watch::Receiver<CallState>,
    pending_rx: watch::Receiver<Option<CallInvitation>>,
    events_tx: broadcast::Sender<ClientEvent>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CallSessionController {
    /// Start the worker task
    pub fn spawn(
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        registrar: Arc<PushRegistrar>,
        sdk: Arc<dyn VoiceSdk>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallState::Idle);
        let (pending_tx, pending_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        let worker = SessionWorker {
            ctx: SessionContext::default(),
            inbox_tx: inbox_tx.clone(),
            tokens,
            registrar,
            sdk,
            state_tx,
            pending_tx,
            events_tx: events_tx.clone(),
        };
        let handle = tokio::spawn(worker.run(inbox_rx));

        Self {
            inbox: inbox_tx,
            state_rx,
            pending_rx,
            events_tx,
            worker: parking_lot::Mutex::new(Some(handle)),
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ClientResult<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbound::Command(build(tx)))
            .map_err(|_| ClientError::ControllerStopped)?;
        rx.await.map_err(|_| ClientError::ControllerStopped)
    }

    /// Fetch a credential for `identity` and register for incoming calls
    ///
    /// Resolves once the connect cycle finishes. The state is `Idle` on
    /// success and `Error` on a network or registration failure.
    pub async fn connect(&self, identity: Identity) -> ClientResult<()> {
        self.request(|reply| Command::Connect { identity, reply }).await?
    }

    /// Call `target`
    pub async fn make_call(&self, target: Identity) -> ClientResult<CallHandleId> {
        self.make_call_with(ConnectOptions::to(target)).await
    }

    /// Call with extra parameters for the remote side
    ///
    /// Without a cached credential this sets the `Error` state and never
    /// reaches the SDK. While another call is being set up or is up, the
    /// request is refused and the state is left alone.
    pub async fn make_call_with(&self, options: ConnectOptions) -> ClientResult<CallHandleId> {
        self.request(|reply| Command::MakeCall { options, reply }).await?
    }

    /// Hang up. A no-op when there is nothing to tear down.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Answer the pending invitation
    pub async fn accept_incoming_call(&self, invitation: &CallInvitation) -> ClientResult<CallHandleId> {
        let call_sid = invitation.call_sid.clone();
        self.request(|reply| Command::Accept { call_sid, reply }).await?
    }

    /// Decline the pending invitation
    pub async fn reject_incoming_call(&self, invitation: &CallInvitation) -> ClientResult<()> {
        let call_sid = invitation.call_sid.clone();
        self.request(|reply| Command::Reject { call_sid, reply }).await?
    }

    /// Put an invitation in the pending slot, replacing any earlier one
    pub async fn offer_invitation(&self, invitation: CallInvitation) -> ClientResult<()> {
        self.request(|reply| Command::OfferInvitation { invitation, reply }).await
    }

    /// Empty the pending slot after a cancellation; returns what was there
    pub async fn cancel_invitation(&self) -> ClientResult<Option<CallInvitation>> {
        self.request(|reply| Command::CancelInvitation { reply }).await
    }

    /// Hang up, drop the credential and release push delivery
    pub async fn logout(&self) -> ClientResult<()> {
        self.request(|reply| Command::Logout { reply }).await?
    }

    /// The push service issued a new device token
    pub async fn update_device_token(&self, token: impl Into<String>) -> ClientResult<()> {
        let token = token.into();
        self.request(|reply| Command::UpdateDeviceToken { token, reply }).await?
    }

    /// Wait until everything queued before this call has been applied
    pub async fn flush(&self) -> ClientResult<()> {
        self.request(|reply| Command::Flush { reply }).await
    }

    pub fn state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// State as a stream, starting with the current value
    pub fn state_stream(&self) -> WatchStream<CallState> {
        WatchStream::new(self.state_rx.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    pub fn pending_invitation(&self) -> Option<CallInvitation> {
        self.pending_rx.borrow().clone()
    }

    pub fn subscribe_invitations(&self) -> watch::Receiver<Option<CallInvitation>> {
        self.pending_rx.clone()
    }

    /// Stop the worker and wait for it to exit
    pub async fn shutdown(&self) {
        let _ = self.inbox.send(Inbound::Shutdown);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbound::Shutdown);
    }
}

impl std::fmt::Debug for CallSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionController")
            .field("state", &*self.state_rx.borrow())
            .field("pending_invitation", &self.pending_rx.borrow().is_some())
            .finish()
    }
}
