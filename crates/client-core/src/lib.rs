//! # pushcall client core
//!
//! Call session coordination for an app-to-app VoIP client whose calls are
//! signaled through push notifications and carried by a vendor voice SDK.
//!
//! ## Components
//!
//! - [`TokenProvider`] / [`HttpTokenClient`] - fetch an access credential for an identity
//! - [`PushRegistrar`] - bind the device push token to that identity through the SDK
//! - [`CallSessionController`] - single owner of the call session and its state stream
//! - [`IdentityStore`] - persist the chosen identity across restarts
//! - [`IncomingCallRouter`] - turn push payloads into invitations and alerts
//! - [`App`] / [`Screen`] - presentation state and user commands
//!
//! The vendor SDK, the push transport and the platform notification system
//! sit behind the [`VoiceSdk`], [`PayloadInspector`] and [`AlertPresenter`]
//! traits. [`sdk::loopback`] provides an in-process SDK for demos and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pushcall_client_core::{
//!     CallSessionController, ClientConfig, HttpTokenClient, Identity, PushRegistrar,
//!     sdk::loopback::LoopbackSdk,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new().with_device_push_token("device-token");
//!     let sdk = Arc::new(LoopbackSdk::new());
//!     let tokens = Arc::new(HttpTokenClient::new(&config.token_url, &config.user_agent)?);
//!     let registrar = Arc::new(PushRegistrar::new(sdk.clone(), config.device_push_token.clone()));
//!     let controller = CallSessionController::spawn(&config, tokens, registrar, sdk);
//!
//!     controller.connect(Identity::new("alice")?).await?;
//!     controller.make_call(Identity::new("bob")?).await?;
//!     println!("state: {}", controller.state());
//!     controller.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod identity;
pub mod presentation;
pub mod push;
pub mod registration;
pub mod router;
pub mod sdk;
pub mod token;

pub use client::{CallDirection, CallSessionController, CallState, ClientConfig};
pub use error::{ClientError, ClientResult, ErrorCategory};
pub use events::{ClientEvent, InvitationOutcome};
pub use identity::{FileIdentityStore, Identity, IdentityStore, MemoryIdentityStore};
pub use presentation::{App, Screen, UserCommand};
pub use push::{CallCancellation, CallInvitation, PayloadInspector, PushPayload};
pub use registration::{DeviceTokenChange, PushRegistrar, RegistrationStatus};
pub use router::{AlertPresenter, AlertSpec, AlertUrgency, IncomingCallRouter, RouteOutcome};
pub use sdk::{CallHandleId, CallListener, ConnectOptions, SdkEvent, VoiceSdk};
pub use token::{AccessCredential, HttpTokenClient, StaticTokenProvider, TokenProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
