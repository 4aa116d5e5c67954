//! Push registration
//!
//! Binding the device push token to an identity is what makes inbound
//! invitations reach this device. The registrar keeps the current device
//! token (the push service may rotate it at any time) and delegates the
//! binding itself to the voice SDK.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::sdk::VoiceSdk;
use crate::token::AccessCredential;

/// Registration status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Nothing bound yet
    Unregistered,
    /// Registration request is in flight
    Registering,
    /// Push delivery is bound to this identity
    Registered { identity: String },
    /// Last attempt failed
    Failed { reason: String },
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "Unregistered"),
            Self::Registering => write!(f, "Registering"),
            Self::Registered { identity } => write!(f, "Registered as {}", identity),
            Self::Failed { reason } => write!(f, "Failed: {}", reason),
        }
    }
}

/// A device token rotation recorded by [`PushRegistrar::set_device_token`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTokenChange {
    /// Token bound before the rotation, if any
    pub previous: Option<String>,
}

/// Exchanges the device push token and access credential with the SDK
pub struct PushRegistrar {
    sdk: Arc<dyn VoiceSdk>,
    device_token: RwLock<Option<String>>,
    status: RwLock<RegistrationStatus>,
}

impl PushRegistrar {
    pub fn new(sdk: Arc<dyn VoiceSdk>, device_token: Option<String>) -> Self {
        Self {
            sdk,
            device_token: RwLock::new(device_token.filter(|t| !t.trim().is_empty())),
            status: RwLock::new(RegistrationStatus::Unregistered),
        }
    }

    pub fn device_token(&self) -> Option<String> {
        self.device_token.read().clone()
    }

    /// Record a rotated device token
    ///
    /// Returns the token it replaced, `Ok(None)` when nothing changed. Blank
    /// tokens are refused and leave the current one in place.
    pub fn set_device_token(&self, token: impl Into<String>) -> ClientResult<Option<DeviceTokenChange>> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ClientError::registration("device push token is blank"));
        }
        let mut current = self.device_token.write();
        if current.as_deref() == Some(token.as_str()) {
            return Ok(None);
        }
        debug!("Device push token updated");
        let previous = current.replace(token);
        Ok(Some(DeviceTokenChange { previous }))
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status.read().clone()
    }

    /// Bind the device token to the credential's identity
    pub async fn register(&self, credential: &AccessCredential) -> ClientResult<()> {
        let Some(device_token) = self.device_token() else {
            let err = ClientError::registration("no device push token available");
            *self.status.write() = RegistrationStatus::Failed {
                reason: err.to_string(),
            };
            return Err(err);
        };

        *self.status.write() = RegistrationStatus::Registering;
        let identity = credential.identity().clone();

        match self.sdk.register(credential, &device_token).await {
            Ok(()) => {
                info!(%identity, "Registered for incoming calls");
                *self.status.write() = RegistrationStatus::Registered {
                    identity: identity.to_string(),
                };
                Ok(())
            }
            Err(e) => {
                let err = e.into_registration();
                warn!(%identity, "Push registration failed: {}", err);
                *self.status.write() = RegistrationStatus::Failed {
                    reason: err.to_string(),
                };
                Err(err)
            }
        }
    }

    /// Release the binding an earlier device token holds, leaving the status alone
    pub async fn release_token(&self, credential: &AccessCredential, device_token: &str) -> ClientResult<()> {
        self.sdk
            .unregister(credential, device_token)
            .await
            .map_err(ClientError::into_registration)?;
        debug!(identity = %credential.identity(), "Released binding of replaced device token");
        Ok(())
    }

    /// Release the binding made by [`PushRegistrar::register`]
    pub async fn unregister(&self, credential: &AccessCredential) -> ClientResult<()> {
        let Some(device_token) = self.device_token() else {
            *self.status.write() = RegistrationStatus::Unregistered;
            return Ok(());
        };

        self.sdk
            .unregister(credential, &device_token)
            .await
            .map_err(ClientError::into_registration)?;
        info!(identity = %credential.identity(), "Unregistered from incoming calls");
        *self.status.write() = RegistrationStatus::Unregistered;
        Ok(())
    }
}

impl fmt::Debug for PushRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRegistrar")
            .field("has_device_token", &self.device_token.read().is_some())
            .field("status", &*self.status.read())
            .finish()
    }
}
