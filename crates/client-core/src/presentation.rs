//! Presentation layer
//!
//! [`Screen`] is what the user should be looking at, derived from the saved
//! identity, the call state and the pending invitation. [`App`] wires the
//! identity store, controller and router together and turns
//! [`UserCommand`]s into calls on them.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::client::{CallSessionController, CallState};
use crate::error::ClientResult;
use crate::identity::{Identity, IdentityStore};
use crate::push::CallInvitation;
use crate::router::IncomingCallRouter;

/// User-facing surfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// No identity yet
    IdentityEntry,
    /// Signed in; dial and watch the call state
    Dialer { identity: Identity, state: CallState },
    /// Full-screen incoming-call overlay
    IncomingCall { from: Identity },
}

impl Screen {
    /// A pending invitation covers everything else
    pub fn derive(
        identity: Option<&Identity>,
        state: &CallState,
        pending: Option<&CallInvitation>,
    ) -> Self {
        if let Some(invitation) = pending {
            return Self::IncomingCall {
                from: invitation.from.clone(),
            };
        }
        match identity {
            None => Self::IdentityEntry,
            Some(identity) => Self::Dialer {
                identity: identity.clone(),
                state: state.clone(),
            },
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityEntry => write!(f, "Who are you? (no identity saved)"),
            Self::Dialer { identity, state } => write!(f, "Signed in as {} | {}", identity, state),
            Self::IncomingCall { from } => write!(f, ">>> Incoming call from {} <<<", from),
        }
    }
}

/// Actions the user can take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Login(Identity),
    Logout,
    Dial(Identity),
    HangUp,
    Accept,
    Reject,
}

/// Application shell over the client core
pub struct App {
    store: Arc<dyn IdentityStore>,
    controller: Arc<CallSessionController>,
    router: Arc<IncomingCallRouter>,
    identity: RwLock<Option<Identity>>,
}

impl App {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        controller: Arc<CallSessionController>,
        router: Arc<IncomingCallRouter>,
    ) -> Self {
        Self {
            store,
            controller,
            router,
            identity: RwLock::new(None),
        }
    }

    /// Load the saved identity and connect with it
    ///
    /// A failed connect leaves the app usable in the `Error` state; only a
    /// storage failure is returned.
    pub async fn start(&self) -> ClientResult<Option<Identity>> {
        let saved = self.store.get().await?;
        *self.identity.write() = saved.clone();

        match &saved {
            Some(identity) => {
                info!(%identity, "Auto-connecting with saved identity");
                if let Err(e) = self.controller.connect(identity.clone()).await {
                    warn!(%identity, "Auto-connect failed: {}", e);
                }
            }
            None => info!("No saved identity; waiting for login"),
        }
        Ok(saved)
    }

    pub async fn handle(&self, command: UserCommand) -> ClientResult<()> {
        match command {
            UserCommand::Login(identity) => {
                self.store.save(&identity).await?;
                *self.identity.write() = Some(identity.clone());
                self.controller.connect(identity).await
            }
            UserCommand::Logout => {
                let result = self.controller.logout().await;
                self.router.sync_alert();
                self.store.clear().await?;
                *self.identity.write() = None;
                result
            }
            UserCommand::Dial(target) => self.controller.make_call(target).await.map(|_| ()),
            UserCommand::HangUp => self.controller.disconnect().await,
            UserCommand::Accept => self.router.accept_pending().await.map(|_| ()),
            UserCommand::Reject => self.router.reject_pending().await,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn screen(&self) -> Screen {
        let identity = self.identity();
        let pending = self.controller.pending_invitation();
        Screen::derive(identity.as_ref(), &self.controller.state(), pending.as_ref())
    }

    pub fn controller(&self) -> &Arc<CallSessionController> {
        &self.controller
    }

    pub fn router(&self) -> &Arc<IncomingCallRouter> {
        &self.router
    }
}
