//! Kernel virtual display (EVDI) side of the bridge.
//!
//! The bridge talks to the device only through [`DisplayDevice`]. The device
//! reports asynchronous events (mode changes, damage, power state) by invoking
//! a [`DeviceEventHandler`] from inside [`DisplayDevice::handle_events`], the
//! same way `evdi_handle_events` invokes its callback table.
//!
//! # Modules
//!
//! - **`rect`**: damage rectangles and the bounded [`RectSet`]
//! - **`edid`**: the built-in EDID capability descriptor
//! - **`node`**: `libevdi` binding (requires the `evdi` feature)

pub mod edid;
pub mod rect;

#[cfg(feature = "evdi")]
pub mod node;

use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use crate::error::Result;

pub use rect::{Rect, RectSet, MAX_RECTS};

/// Bits per pixel of the only pixel layout the bridge can serve (XRGB8888).
pub const SUPPORTED_BPP: u32 = 32;

/// A display mode negotiated by the virtual display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub refresh_rate: u32,
}

impl Mode {
    pub const fn new(width: u32, height: u32, bits_per_pixel: u32, refresh_rate: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel,
            refresh_rate,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel() as usize
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ {}Hz", self.width, self.height, self.refresh_rate)
    }
}

/// Identifier under which a buffer is registered with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub i32);

/// Borrowed raw view of the active pixel buffer.
///
/// Both the device and the VNC server receive a copy of this view. It points at
/// memory owned by [`crate::bridge::FramebufferOwner`] and is only valid until
/// the next mode change replaces the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferView {
    pub id: BufferId,
    pub ptr: NonNull<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}

impl BufferView {
    pub fn len(&self) -> usize {
        self.height as usize * self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterpret the view as a byte slice.
    ///
    /// # Safety
    ///
    /// The owning buffer must still be live, i.e. no mode change may have
    /// been processed since this view was published.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len())
    }
}

/// Callbacks the device invokes while dispatching its pending events.
///
/// All four must be provided even when the bridge does not act on them.
pub trait DeviceEventHandler<D: ?Sized> {
    /// The display negotiated a new mode.
    fn on_mode_changed(&mut self, device: &mut D, mode: Mode);

    /// The display power state changed.
    fn on_dpms(&mut self, device: &mut D, dpms_mode: i32);

    /// The CRTC was enabled or disabled.
    fn on_crtc_state(&mut self, device: &mut D, state: i32);

    /// Fresh pixels are available in `buffer`.
    fn on_update_ready(&mut self, device: &mut D, buffer: BufferId);
}

/// A connected virtual display node.
pub trait DisplayDevice {
    /// Announce the monitor to the kernel with its EDID.
    ///
    /// `bandwidth_hint` caps the modes the kernel will offer.
    fn connect(&mut self, edid: &[u8], bandwidth_hint: u32) -> Result<()>;

    fn disconnect(&mut self);

    /// Release the node handle. No other call is valid afterwards.
    fn close(&mut self);

    /// Make `buffer` the target of the kernel's framebuffer copies.
    fn register_buffer(&mut self, buffer: BufferView);

    fn unregister_buffer(&mut self, id: BufferId);

    /// Ask whether an update for `id` is available right now.
    ///
    /// Returns `true` when the pixels are ready and the caller should grab them
    /// immediately; `false` means the update will arrive as an event later.
    fn request_update(&mut self, id: BufferId) -> bool;

    /// Copy the pending damage into `rects`, bounded by [`MAX_RECTS`].
    fn grab_pixels(&mut self, rects: &mut RectSet);

    /// Block until events are pending or `timeout` expires (`None` waits
    /// forever). Returns whether events are ready.
    fn wait_event_ready(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Invoke `handler` for every pending event.
    fn handle_events(&mut self, handler: &mut dyn DeviceEventHandler<Self>);
}
