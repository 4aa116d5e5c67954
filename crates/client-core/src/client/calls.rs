//! Call operations of the session worker
//!
//! Outbound calls, hangup, and the accept/reject/offer/cancel operations on
//! the pending invitation slot. Each runs on the worker task; anything that
//! awaits the SDK is spawned and reports back through the inbox.

use tracing::{debug, info, warn};

use super::manager::{ActiveCall, CallDirection, Inbound, Reply, SessionWorker};
use super::state::{CallState, DISCONNECTED_BY_USER};
use crate::error::ClientError;
use crate::events::{ClientEvent, InvitationOutcome};
use crate::push::CallInvitation;
use crate::sdk::{CallHandleId, CallListener, ConnectOptions};

impl SessionWorker {
    pub(crate) fn make_call(&mut self, options: ConnectOptions, reply: Reply<CallHandleId>) {
        let current = self.current_state();
        if self.ctx.active_call.is_some() || !current.can_place_call() {
            debug!(to = %options.to, state = %current, "Refusing call while busy");
            let _ = reply.send(Err(ClientError::invalid_state(format!(
                "cannot place a call while {}",
                current
            ))));
            return;
        }

        let Some(credential) = self.ctx.credential.clone() else {
            let err = ClientError::NoCredential;
            warn!(to = %options.to, "Refusing call: {}", err);
            self.set_state(CallState::Error(err.to_string()));
            let _ = reply.send(Err(err));
            return;
        };

        let handle = CallHandleId::new();
        info!(%handle, to = %options.to, "Placing outbound call");
        self.ctx.active_call = Some(ActiveCall {
            handle,
            direction: CallDirection::Outgoing,
            remote: options.to.clone(),
            opening: Some(reply),
        });
        self.set_state(CallState::Connecting);

        let sdk = self.sdk.clone();
        let inbox = self.inbox_tx.clone();
        let listener = CallListener::new(handle, self.inbox_tx.clone());
        tokio::spawn(async move {
            let result = sdk
                .connect(&credential, options, listener)
                .await
                .map_err(ClientError::into_connect);
            let _ = inbox.send(Inbound::CallOpened { handle, result });
        });
    }

    /// Tear down whatever is in progress and record a user hangup
    pub(crate) fn disconnect(&mut self) {
        let connecting = self.ctx.pending_connect.is_some();
        if self.ctx.active_call.is_none() && !connecting {
            debug!(state = %self.current_state(), "Disconnect with nothing to tear down");
            return;
        }

        if let Some(pending) = self.ctx.pending_connect.take() {
            self.ctx.generation += 1;
            let _ = pending.send(Err(ClientError::invalid_state(
                "connect cancelled by disconnect",
            )));
        }
        self.abandon_active_call(DISCONNECTED_BY_USER);
        self.set_state(CallState::Disconnected(DISCONNECTED_BY_USER.to_string()));
    }

    /// Forget the active call and ask the SDK to drop it
    pub(crate) fn abandon_active_call(&mut self, reason: &str) {
        let Some(call) = self.ctx.active_call.take() else {
            return;
        };
        info!(handle = %call.handle, remote = %call.remote, direction = ?call.direction, reason, "Tearing down call");
        if let Some(opening) = call.opening {
            let _ = opening.send(Err(ClientError::invalid_state(format!(
                "call abandoned before it opened: {}",
                reason
            ))));
        }

        let sdk = self.sdk.clone();
        let handle = call.handle;
        tokio::spawn(async move {
            sdk.disconnect(handle).await;
        });
    }

    pub(crate) fn accept(&mut self, call_sid: &str, reply: Reply<CallHandleId>) {
        let pending = self
            .ctx
            .pending_invitation
            .as_ref()
            .is_some_and(|invitation| invitation.call_sid == call_sid);
        if !pending {
            let _ = reply.send(Err(ClientError::NoPendingInvitation));
            return;
        }
        if self.ctx.active_call.is_some() {
            let _ = reply.send(Err(ClientError::invalid_state(
                "another call is in progress",
            )));
            return;
        }
        let Some(invitation) = self.take_invitation(InvitationOutcome::Accepted) else {
            let _ = reply.send(Err(ClientError::NoPendingInvitation));
            return;
        };

        let handle = CallHandleId::new();
        info!(%handle, from = %invitation.from, call_sid = %invitation.call_sid, "Accepting invitation");
        self.ctx.active_call = Some(ActiveCall {
            handle,
            direction: CallDirection::Incoming,
            remote: invitation.from.clone(),
            opening: Some(reply),
        });
        self.set_state(CallState::Connecting);

        let sdk = self.sdk.clone();
        let inbox = self.inbox_tx.clone();
        let listener = CallListener::new(handle, self.inbox_tx.clone());
        tokio::spawn(async move {
            let result = sdk
                .accept(&invitation, listener)
                .await
                .map_err(ClientError::into_connect);
            let _ = inbox.send(Inbound::CallOpened { handle, result });
        });
    }

    pub(crate) fn reject(&mut self, call_sid: &str) -> Result<(), ClientError> {
        let pending = self
            .ctx
            .pending_invitation
            .as_ref()
            .is_some_and(|invitation| invitation.call_sid == call_sid);
        if !pending {
            return Err(ClientError::NoPendingInvitation);
        }
        let Some(invitation) = self.take_invitation(InvitationOutcome::Rejected) else {
            return Err(ClientError::NoPendingInvitation);
        };

        info!(from = %invitation.from, call_sid = %invitation.call_sid, "Rejecting invitation");
        let sdk = self.sdk.clone();
        tokio::spawn(async move {
            if let Err(e) = sdk.reject(&invitation).await {
                warn!(call_sid = %invitation.call_sid, "SDK reject failed: {}", e);
            }
        });
        Ok(())
    }

    pub(crate) fn offer_invitation(&mut self, invitation: CallInvitation) {
        if self.take_invitation(InvitationOutcome::Replaced).is_some() {
            warn!(call_sid = %invitation.call_sid, "New invitation replaced a pending one");
        }
        info!(from = %invitation.from, call_sid = %invitation.call_sid, "Invitation pending");
        self.ctx.pending_invitation = Some(invitation.clone());
        self.pending_tx.send_replace(Some(invitation.clone()));
        self.emit(ClientEvent::InvitationReceived { invitation });
    }

    /// Cancellations are matched by channel: whatever is pending goes
    pub(crate) fn cancel_invitation(&mut self) -> Option<CallInvitation> {
        let withdrawn = self.take_invitation(InvitationOutcome::Cancelled);
        if withdrawn.is_none() {
            debug!("Cancellation with no pending invitation");
        }
        withdrawn
    }
}
