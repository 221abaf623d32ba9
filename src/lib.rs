//! evdi-vnc: serve an EVDI virtual display over VNC
//!
//! This crate makes a headless EVDI virtual monitor visible to VNC viewers.
//! The kernel copies the monitor's contents into one pixel buffer owned by
//! the bridge, and the same buffer backs the VNC screen; damage reported by
//! the kernel is forwarded as modified regions.
//!
//! # Modules
//!
//! - `bridge`: The bridge engine: mode negotiation, buffer ownership, damage translation and the event loop.
//! - `evdi`: The virtual display interface, plus the `libevdi` binding behind the `evdi` feature.
//! - `vnc`: The VNC screen interface and its `rustvncserver` implementation.
//! - `config`: Bridge configuration.

pub mod bridge;
pub mod config;
pub mod error;
pub mod evdi;
pub mod vnc;

#[cfg(test)]
mod testing;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, ServerError};
