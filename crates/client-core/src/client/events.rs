//! Bridging of SDK callbacks into the call state
//!
//! Callbacks are only applied when they belong to the active call. Anything
//! tagged with another handle comes from a call the session already let go of
//! and is dropped.

use tracing::{debug, warn};

use super::manager::SessionWorker;
use super::state::{self, CallState};
use crate::error::{ClientError, ClientResult};
use crate::sdk::{CallHandleId, SdkEvent};

impl SessionWorker {
    pub(crate) fn on_sdk_event(&mut self, handle: CallHandleId, event: SdkEvent) {
        let is_active = self
            .ctx
            .active_call
            .as_ref()
            .is_some_and(|call| call.handle == handle);
        if !is_active {
            debug!(%handle, ?event, "Ignoring callback for an inactive call");
            return;
        }

        debug!(%handle, ?event, "SDK callback");
        let next = state::transition(&event);

        if next.is_terminal() {
            if let Some(opening) = self.ctx.active_call.take().and_then(|call| call.opening) {
                let _ = opening.send(Err(setup_error(&event)));
            }
        }
        self.set_state(next);
    }

    pub(crate) fn on_call_opened(&mut self, handle: CallHandleId, result: ClientResult<()>) {
        let is_active = self
            .ctx
            .active_call
            .as_ref()
            .is_some_and(|call| call.handle == handle);

        if !is_active {
            if result.is_ok() {
                warn!(%handle, "Call opened after it was abandoned; tearing it down");
                let sdk = self.sdk.clone();
                tokio::spawn(async move {
                    sdk.disconnect(handle).await;
                });
            }
            return;
        }

        match result {
            Ok(()) => {
                debug!(%handle, "SDK accepted the call");
                if let Some(opening) = self.ctx.active_call.as_mut().and_then(|c| c.opening.take()) {
                    let _ = opening.send(Ok(handle));
                }
            }
            Err(err) => {
                warn!(%handle, "Call setup failed: {}", err);
                if let Some(opening) = self.ctx.active_call.take().and_then(|c| c.opening) {
                    let _ = opening.send(Err(err.clone()));
                }
                self.set_state(CallState::Error(err.to_string()));
            }
        }
    }
}

/// Error for a `make_call`/`accept` caller whose call ended before the SDK took it
fn setup_error(event: &SdkEvent) -> ClientError {
    match event {
        SdkEvent::ConnectFailure { message } => ClientError::connect(message.clone()),
        SdkEvent::Disconnected { cause: Some(cause) } => ClientError::dropped(cause.clone()),
        _ => ClientError::connect("call ended before it was set up"),
    }
}
