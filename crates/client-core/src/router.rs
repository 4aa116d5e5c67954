//! Routing of inbound push payloads
//!
//! The router decides what a push payload means (with the SDK's inspector),
//! raises or withdraws the incoming-call alert, and hands invitations to the
//! call session controller.
//!
//! Cancellation is matched by alert channel only. A cancellation withdraws
//! whatever invitation is pending, even when its call SID names a different
//! one. With two invitations in flight this can withdraw the wrong alert;
//! the behaviour is kept as is and the mismatch is logged.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::CallSessionController;
use crate::error::{ClientError, ClientResult};
use crate::push::{CallInvitation, PayloadInspector, PushPayload};
use crate::sdk::CallHandleId;

/// How intrusive an alert is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertUrgency {
    Default,
    /// Heads-up / full-screen capable
    High,
}

/// What the platform notification for an invitation should look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSpec {
    pub title: String,
    pub body: String,
    pub urgency: AlertUrgency,
    /// Launch the incoming-call screen, even from a terminated app
    pub full_screen: bool,
    /// Stay visible until explicitly withdrawn
    pub ongoing: bool,
}

impl AlertSpec {
    /// Alert for an incoming call invitation
    pub fn incoming_call(invitation: &CallInvitation) -> Self {
        Self {
            title: "Incoming call".to_string(),
            body: format!("{} is calling", invitation.from),
            urgency: AlertUrgency::High,
            full_screen: true,
            ongoing: true,
        }
    }
}

/// Platform notification surface
pub trait AlertPresenter: Send + Sync {
    /// Show `spec` on `channel`, replacing whatever the channel shows
    fn show(&self, channel: &str, spec: &AlertSpec, invitation: &CallInvitation);

    /// Remove the alert on `channel`, if any
    fn withdraw(&self, channel: &str);
}

/// What the router did with a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not voice signaling
    Ignored,
    /// Voice signaling the inspector could not decode
    Malformed,
    /// Invitation is pending and its alert is up
    InvitationRaised(CallInvitation),
    /// Alert withdrawn; carries the invitation that was pending, if any
    InvitationCancelled { withdrawn: Option<CallInvitation> },
}

/// Turns push payloads into invitations and alerts
pub struct IncomingCallRouter {
    inspector: Arc<dyn PayloadInspector>,
    alerts: Arc<dyn AlertPresenter>,
    controller: Arc<CallSessionController>,
    channel: String,
}

impl IncomingCallRouter {
    pub fn new(
        inspector: Arc<dyn PayloadInspector>,
        alerts: Arc<dyn AlertPresenter>,
        controller: Arc<CallSessionController>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            inspector,
            alerts,
            controller,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Handle one push payload
    pub async fn route(&self, payload: &PushPayload) -> ClientResult<RouteOutcome> {
        if !self.inspector.is_voice_message(payload) {
            debug!("Push payload is not voice signaling");
            return Ok(RouteOutcome::Ignored);
        }

        if let Some(invitation) = self.inspector.extract_invitation(payload) {
            info!(from = %invitation.from, call_sid = %invitation.call_sid, "Call invitation received");
            self.controller.offer_invitation(invitation.clone()).await?;
            let spec = AlertSpec::incoming_call(&invitation);
            self.alerts.show(&self.channel, &spec, &invitation);
            return Ok(RouteOutcome::InvitationRaised(invitation));
        }

        if let Some(cancellation) = self.inspector.extract_cancellation(payload) {
            info!(call_sid = %cancellation.call_sid, "Call invitation cancelled");
            self.alerts.withdraw(&self.channel);
            let withdrawn = self.controller.cancel_invitation().await?;
            if let Some(pending) = &withdrawn {
                if pending.call_sid != cancellation.call_sid {
                    warn!(
                        pending = %pending.call_sid,
                        cancelled = %cancellation.call_sid,
                        "Cancellation withdrew an invitation with a different call SID"
                    );
                }
            }
            return Ok(RouteOutcome::InvitationCancelled { withdrawn });
        }

        warn!("Voice push payload carried neither an invitation nor a cancellation");
        Ok(RouteOutcome::Malformed)
    }

    /// Answer the invitation, then withdraw its alert
    ///
    /// A refused accept leaves the invitation pending and its alert up.
    pub async fn accept(&self, invitation: &CallInvitation) -> ClientResult<CallHandleId> {
        let handle = self.controller.accept_incoming_call(invitation).await?;
        self.alerts.withdraw(&self.channel);
        Ok(handle)
    }

    /// Decline the invitation, then withdraw its alert
    pub async fn reject(&self, invitation: &CallInvitation) -> ClientResult<()> {
        self.controller.reject_incoming_call(invitation).await?;
        self.alerts.withdraw(&self.channel);
        Ok(())
    }

    /// Withdraw the alert if the controller no longer holds an invitation
    ///
    /// Called after the controller drops its invitation on its own, as it
    /// does on logout.
    pub fn sync_alert(&self) {
        if self.controller.pending_invitation().is_none() {
            debug!(channel = %self.channel, "No pending invitation; withdrawing alert");
            self.alerts.withdraw(&self.channel);
        }
    }

    /// Accept whatever is pending
    pub async fn accept_pending(&self) -> ClientResult<CallHandleId> {
        let invitation = self
            .controller
            .pending_invitation()
            .ok_or(ClientError::NoPendingInvitation)?;
        self.accept(&invitation).await
    }

    /// Reject whatever is pending
    pub async fn reject_pending(&self) -> ClientResult<()> {
        let invitation = self
            .controller
            .pending_invitation()
            .ok_or(ClientError::NoPendingInvitation)?;
        self.reject(&invitation).await
    }
}

impl std::fmt::Debug for IncomingCallRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCallRouter")
            .field("channel", &self.channel)
            .finish()
    }
}
