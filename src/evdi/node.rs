//! `libevdi` binding.
//!
//! Thin FFI over `evdi_lib.h` (library version 1.9 or newer, which added the
//! cursor and DDC/CI slots to the event context). Only the calls the bridge
//! needs are declared.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::io;
use std::ptr;
use std::time::Duration;

use log::{debug, info};

use super::{BufferId, BufferView, DeviceEventHandler, DisplayDevice, Mode, Rect, RectSet};
use crate::error::{BridgeError, Result};

type evdi_handle = *mut c_void;
type evdi_selectable = c_int;

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct evdi_mode {
    width: c_int,
    height: c_int,
    refresh_rate: c_int,
    bits_per_pixel: c_int,
    pixel_format: c_uint,
}

#[repr(C)]
struct evdi_buffer {
    id: c_int,
    buffer: *mut c_void,
    width: c_int,
    height: c_int,
    stride: c_int,
    rects: *mut Rect,
    rect_count: c_int,
}

// Cursor and DDC/CI payloads are never requested, so their handler slots stay
// null and only need the pointer width.
type unused_handler = Option<unsafe extern "C" fn()>;

#[repr(C)]
struct evdi_event_context {
    dpms_handler: Option<unsafe extern "C" fn(c_int, *mut c_void)>,
    mode_changed_handler: Option<unsafe extern "C" fn(evdi_mode, *mut c_void)>,
    update_ready_handler: Option<unsafe extern "C" fn(c_int, *mut c_void)>,
    crtc_state_handler: Option<unsafe extern "C" fn(c_int, *mut c_void)>,
    cursor_set_handler: unused_handler,
    cursor_move_handler: unused_handler,
    ddcci_data_handler: unused_handler,
    user_data: *mut c_void,
}

#[link(name = "evdi")]
extern "C" {
    fn evdi_open_attached_to(sysfs_parent_device: *const c_char) -> evdi_handle;
    fn evdi_close(handle: evdi_handle);
    fn evdi_connect(handle: evdi_handle, edid: *const u8, edid_length: c_uint, sku_area_limit: u32);
    fn evdi_disconnect(handle: evdi_handle);
    fn evdi_register_buffer(handle: evdi_handle, buffer: evdi_buffer);
    fn evdi_unregister_buffer(handle: evdi_handle, buffer_id: c_int);
    fn evdi_request_update(handle: evdi_handle, buffer_id: c_int) -> bool;
    fn evdi_grab_pixels(handle: evdi_handle, rects: *mut Rect, num_rects: *mut c_int);
    fn evdi_handle_events(handle: evdi_handle, evtctx: *mut evdi_event_context);
    fn evdi_get_event_ready(handle: evdi_handle) -> evdi_selectable;
}

impl From<evdi_mode> for Mode {
    fn from(mode: evdi_mode) -> Self {
        let unsigned = |v: c_int| u32::try_from(v).unwrap_or(0);
        Mode {
            width: unsigned(mode.width),
            height: unsigned(mode.height),
            bits_per_pixel: unsigned(mode.bits_per_pixel),
            refresh_rate: unsigned(mode.refresh_rate),
        }
    }
}

fn c_int_of(v: impl TryInto<c_int>) -> c_int {
    v.try_into().unwrap_or(c_int::MAX)
}

/// An open EVDI node.
pub struct EvdiNode {
    handle: evdi_handle,
}

impl EvdiNode {
    /// Open the first EVDI node not attached to a parent device, creating one
    /// if the kernel module allows it.
    pub fn open() -> Result<Self> {
        let handle = unsafe { evdi_open_attached_to(ptr::null()) };
        if handle.is_null() {
            return Err(BridgeError::NoDevice(
                "no EVDI node available (is the evdi kernel module loaded?)".to_string(),
            ));
        }
        info!("Opened EVDI node");
        Ok(Self { handle })
    }
}

impl Drop for EvdiNode {
    fn drop(&mut self) {
        self.close();
    }
}

/// State threaded through `user_data` while `evdi_handle_events` runs.
struct Dispatch<'a> {
    node: *mut EvdiNode,
    handler: &'a mut dyn DeviceEventHandler<EvdiNode>,
}

/// # Safety
///
/// `user_data` must be the `Dispatch` installed by [`EvdiNode::handle_events`].
unsafe fn dispatch<'a>(user_data: *mut c_void) -> (&'a mut EvdiNode, &'a mut dyn DeviceEventHandler<EvdiNode>) {
    let dispatch = &mut *(user_data as *mut Dispatch<'a>);
    (&mut *dispatch.node, &mut *dispatch.handler)
}

unsafe extern "C" fn on_dpms(dpms_mode: c_int, user_data: *mut c_void) {
    let (node, handler) = dispatch(user_data);
    handler.on_dpms(node, dpms_mode);
}

unsafe extern "C" fn on_mode_changed(mode: evdi_mode, user_data: *mut c_void) {
    let (node, handler) = dispatch(user_data);
    handler.on_mode_changed(node, Mode::from(mode));
}

unsafe extern "C" fn on_update_ready(buffer: c_int, user_data: *mut c_void) {
    let (node, handler) = dispatch(user_data);
    handler.on_update_ready(node, BufferId(buffer));
}

unsafe extern "C" fn on_crtc_state(state: c_int, user_data: *mut c_void) {
    let (node, handler) = dispatch(user_data);
    handler.on_crtc_state(node, state);
}

impl DisplayDevice for EvdiNode {
    fn connect(&mut self, edid: &[u8], bandwidth_hint: u32) -> Result<()> {
        let len = c_uint::try_from(edid.len())
            .map_err(|_| BridgeError::Connect(format!("EDID too large ({} bytes)", edid.len())))?;
        unsafe { evdi_connect(self.handle, edid.as_ptr(), len, bandwidth_hint) };
        info!("Connected to EVDI node (EDID {} bytes)", edid.len());
        Ok(())
    }

    fn disconnect(&mut self) {
        unsafe { evdi_disconnect(self.handle) };
        info!("Disconnected from EVDI node");
    }

    fn close(&mut self) {
        if !self.handle.is_null() {
            unsafe { evdi_close(self.handle) };
            self.handle = ptr::null_mut();
            debug!("Closed EVDI node");
        }
    }

    fn register_buffer(&mut self, buffer: BufferView) {
        let raw = evdi_buffer {
            id: buffer.id.0,
            buffer: buffer.ptr.as_ptr().cast(),
            width: c_int_of(buffer.width),
            height: c_int_of(buffer.height),
            stride: c_int_of(buffer.stride),
            rects: ptr::null_mut(),
            rect_count: 0,
        };
        unsafe { evdi_register_buffer(self.handle, raw) };
    }

    fn unregister_buffer(&mut self, id: BufferId) {
        unsafe { evdi_unregister_buffer(self.handle, id.0) };
    }

    fn request_update(&mut self, id: BufferId) -> bool {
        unsafe { evdi_request_update(self.handle, id.0) }
    }

    fn grab_pixels(&mut self, rects: &mut RectSet) {
        let mut count: c_int = 0;
        // libevdi writes at most MAX_RECTS entries.
        unsafe { evdi_grab_pixels(self.handle, rects.storage_mut().as_mut_ptr(), &mut count) };
        rects.set_reported(count);
    }

    fn wait_event_ready(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: unsafe { evdi_get_event_ready(self.handle) },
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.map_or(-1, |t| c_int_of(t.as_millis()));
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err.into());
        }
        Ok(ready > 0)
    }

    fn handle_events(&mut self, handler: &mut dyn DeviceEventHandler<Self>) {
        let handle = self.handle;
        let mut state = Dispatch {
            node: self as *mut EvdiNode,
            handler,
        };
        let mut ctx = evdi_event_context {
            dpms_handler: Some(on_dpms),
            mode_changed_handler: Some(on_mode_changed),
            update_ready_handler: Some(on_update_ready),
            crtc_state_handler: Some(on_crtc_state),
            cursor_set_handler: None,
            cursor_move_handler: None,
            ddcci_data_handler: None,
            user_data: (&mut state as *mut Dispatch<'_>).cast(),
        };
        unsafe { evdi_handle_events(handle, &mut ctx) };
    }
}
