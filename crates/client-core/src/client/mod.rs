//! Call session control
//!
//! - [`config`] - client configuration
//! - [`state`] - call state and its transition function
//! - [`manager`] - the controller handle and its worker task
//! - `calls` / `events` - worker operations for commands and SDK callbacks

pub mod config;
pub mod manager;
pub mod state;

mod calls;
mod events;

#[cfg(test)]
mod tests;

pub use config::ClientConfig;
pub use manager::{CallDirection, CallSessionController};
pub use state::{CallState, DISCONNECTED_BY_USER, DISCONNECTED_NORMALLY};
