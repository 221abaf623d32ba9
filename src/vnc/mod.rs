//! VNC (Remote Framebuffer) side of the bridge.
//!
//! The bridge drives the VNC server through [`RfbServer`], which mirrors the
//! screen lifecycle of a classic RFB server library: create a screen for a
//! geometry, point it at a framebuffer, start it, then alternate between
//! marking damaged regions and servicing client I/O.
//!
//! # Modules
//!
//! - **`format`**: server pixel format and the EVDI channel-order fixup
//! - **`server`**: [`RfbServer`] implementation on top of `rustvncserver`

pub mod format;
pub mod server;

use std::time::Duration;

use crate::error::ServerError;
use crate::evdi::{BufferView, Mode, Rect};

pub use format::{adjust_pixel_format, PixelFormat};
pub use server::RustVncScreen;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;

/// Screen geometry in the terms of `rfbGetScreen`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    pub samples_per_pixel: u32,
    pub bytes_per_pixel: u32,
}

impl ScreenGeometry {
    /// Geometry for a negotiated mode: 8-bit RGB samples, padded to the
    /// mode's pixel size.
    pub fn for_mode(mode: &Mode) -> Self {
        Self {
            width: mode.width,
            height: mode.height,
            bits_per_sample: 8,
            samples_per_pixel: 3,
            bytes_per_pixel: mode.bytes_per_pixel(),
        }
    }
}

/// Listener settings for a VNC screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    /// TCP port to accept viewers on.
    pub port: u16,
    pub desktop_name: String,
    pub password: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            desktop_name: "evdi-vnc".to_string(),
            password: None,
        }
    }
}

/// Client lifecycle notifications delivered while the server services I/O.
pub trait ClientHooks {
    fn client_connected(&mut self, client_id: u64);
    fn client_gone(&mut self, client_id: u64);
}

/// A VNC screen the bridge can publish the virtual display on.
pub trait RfbServer {
    /// Create a screen for `geometry`. The screen is not serving until
    /// [`RfbServer::init`] is called.
    fn create(geometry: ScreenGeometry, options: &ServerOptions) -> Result<Self, ServerError>
    where
        Self: Sized;

    fn pixel_format(&self) -> &PixelFormat;

    fn pixel_format_mut(&mut self) -> &mut PixelFormat;

    /// Use `framebuffer` as the screen's backing store. Its geometry must
    /// match the one the screen was created with.
    ///
    /// A server that cannot read the buffer in place may keep its own copy
    /// of the pixels. Such a copy is refreshed only through
    /// [`RfbServer::mark_rect_as_modified`].
    fn set_framebuffer(&mut self, framebuffer: BufferView);

    /// Replace the backing store with one of a different geometry and tell
    /// connected viewers about the new size.
    fn new_framebuffer(
        &mut self,
        framebuffer: BufferView,
        geometry: ScreenGeometry,
    ) -> Result<(), ServerError>;

    /// Start accepting viewers.
    fn init(&mut self) -> Result<(), ServerError>;

    /// Flag `rect` as changed so it is sent to viewers on the next update.
    ///
    /// Implementations may snapshot the region out of the framebuffer here
    /// instead of reading it when the update is sent. Either way the pixels
    /// viewers see for `rect` are at least as new as they were at this call.
    fn mark_rect_as_modified(&mut self, rect: Rect);

    /// Service client I/O for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the failure that stopped the server, such as a listener that
    /// could not bind its port. The screen is inactive afterwards.
    fn process_events(
        &mut self,
        timeout: Duration,
        hooks: &mut dyn ClientHooks,
    ) -> Result<(), ServerError>;

    fn is_active(&self) -> bool;

    /// Request an orderly stop; [`RfbServer::is_active`] turns false.
    fn shutdown(&mut self);

    /// Release the screen's framebuffer and listener resources.
    fn cleanup(&mut self);
}
