//! Recording doubles for the device and the VNC screen.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Result, ServerError};
use crate::evdi::{BufferId, BufferView, DeviceEventHandler, DisplayDevice, Mode, Rect, RectSet};
use crate::vnc::{ClientHooks, PixelFormat, RfbServer, ScreenGeometry, ServerOptions};

/// Something the virtual display can report.
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    ModeChanged(Mode),
    Dpms(i32),
    CrtcState(i32),
    UpdateReady(BufferId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    Connect { edid_len: usize, bandwidth_hint: u32 },
    Disconnect,
    Close,
    Register { id: BufferId, width: u32, height: u32, stride: usize },
    Unregister(BufferId),
    RequestUpdate(BufferId),
    Grab,
}

/// Scripted virtual display.
///
/// Events queue up until the bridge dispatches them; each damage report is
/// handed out by one grab. `request_update` answers `true` once per queued
/// "immediate" report.
#[derive(Default)]
pub struct MockDevice {
    events: VecDeque<DeviceEvent>,
    damage: VecDeque<(Vec<Rect>, i32)>,
    immediate_updates: usize,
    registered: Option<BufferView>,
    calls: Vec<DeviceCall>,
    /// Events to queue after the first dispatch, modelling a later mode change.
    later: VecDeque<DeviceEvent>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, event: DeviceEvent) {
        self.events.push_back(event);
    }

    pub fn push_later(&mut self, event: DeviceEvent) {
        self.later.push_back(event);
    }

    /// Queue a grab result whose reported count equals the number of rects.
    pub fn push_damage(&mut self, rects: &[Rect]) {
        self.damage.push_back((rects.to_vec(), rects.len() as i32));
    }

    /// Queue a grab result that claims `count` rects regardless of `rects`.
    pub fn push_raw_damage(&mut self, rects: &[Rect], count: i32) {
        self.damage.push_back((rects.to_vec(), count));
    }

    /// Make the next `n` update requests return `true`.
    pub fn set_immediate_updates(&mut self, n: usize) {
        self.immediate_updates = n;
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn registered(&self) -> Option<BufferView> {
        self.registered
    }
}

impl DisplayDevice for MockDevice {
    fn connect(&mut self, edid: &[u8], bandwidth_hint: u32) -> Result<()> {
        self.calls.push(DeviceCall::Connect {
            edid_len: edid.len(),
            bandwidth_hint,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.calls.push(DeviceCall::Disconnect);
    }

    fn close(&mut self) {
        self.calls.push(DeviceCall::Close);
    }

    fn register_buffer(&mut self, buffer: BufferView) {
        assert!(
            self.registered.is_none(),
            "buffer registered while another is still registered"
        );
        self.calls.push(DeviceCall::Register {
            id: buffer.id,
            width: buffer.width,
            height: buffer.height,
            stride: buffer.stride,
        });
        self.registered = Some(buffer);
    }

    fn unregister_buffer(&mut self, id: BufferId) {
        assert_eq!(self.registered.map(|b| b.id), Some(id));
        self.calls.push(DeviceCall::Unregister(id));
        self.registered = None;
    }

    fn request_update(&mut self, id: BufferId) -> bool {
        self.calls.push(DeviceCall::RequestUpdate(id));
        if self.immediate_updates > 0 {
            self.immediate_updates -= 1;
            true
        } else {
            false
        }
    }

    fn grab_pixels(&mut self, rects: &mut RectSet) {
        self.calls.push(DeviceCall::Grab);
        let (reported, count) = self.damage.pop_front().unwrap_or_default();
        let storage = rects.storage_mut();
        for (slot, rect) in storage.iter_mut().zip(reported.iter()) {
            *slot = *rect;
        }
        rects.set_reported(count);
    }

    fn wait_event_ready(&mut self, _timeout: Option<Duration>) -> Result<bool> {
        assert!(!self.events.is_empty(), "waiting on a device with no events would block forever");
        Ok(true)
    }

    fn handle_events(&mut self, handler: &mut dyn DeviceEventHandler<Self>) {
        while let Some(event) = self.events.pop_front() {
            match event {
                DeviceEvent::ModeChanged(mode) => handler.on_mode_changed(self, mode),
                DeviceEvent::Dpms(mode) => handler.on_dpms(self, mode),
                DeviceEvent::CrtcState(state) => handler.on_crtc_state(self, state),
                DeviceEvent::UpdateReady(id) => handler.on_update_ready(self, id),
            }
        }
        self.events.extend(self.later.drain(..));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerCall {
    SetFramebuffer(BufferView),
    NewFramebuffer(BufferView, ScreenGeometry),
    Init,
    Mark(Rect),
    Process(Duration),
    Shutdown,
    Cleanup,
}

thread_local! {
    /// How many I/O slices a new mock screen serves before going inactive.
    pub static IO_BUDGET: Cell<usize> = const { Cell::new(1) };
    /// Clients to connect during the first I/O slice.
    pub static CONNECTING_CLIENTS: Cell<u64> = const { Cell::new(0) };
    /// Whether a new mock screen's listener fails during the first I/O slice.
    pub static LISTEN_FAILS: Cell<bool> = const { Cell::new(false) };
}

/// Recording VNC screen.
pub struct MockServer {
    pub geometry: ScreenGeometry,
    pub options: ServerOptions,
    pub format: PixelFormat,
    pub calls: Vec<ServerCall>,
    active: bool,
    io_budget: usize,
    connecting: u64,
    listen_fails: bool,
}

impl MockServer {
    pub fn marks(&self) -> Vec<Rect> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ServerCall::Mark(r) => Some(*r),
                _ => None,
            })
            .collect()
    }
}

impl RfbServer for MockServer {
    fn create(geometry: ScreenGeometry, options: &ServerOptions) -> std::result::Result<Self, ServerError> {
        if geometry.width > 8192 {
            return Err(ServerError::Geometry {
                width: geometry.width,
                height: geometry.height,
            });
        }
        Ok(Self {
            geometry,
            options: options.clone(),
            format: PixelFormat::default(),
            calls: Vec::new(),
            active: false,
            io_budget: IO_BUDGET.with(Cell::get),
            connecting: CONNECTING_CLIENTS.with(Cell::get),
            listen_fails: LISTEN_FAILS.with(Cell::get),
        })
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn pixel_format_mut(&mut self) -> &mut PixelFormat {
        &mut self.format
    }

    fn set_framebuffer(&mut self, framebuffer: BufferView) {
        self.calls.push(ServerCall::SetFramebuffer(framebuffer));
    }

    fn new_framebuffer(
        &mut self,
        framebuffer: BufferView,
        geometry: ScreenGeometry,
    ) -> std::result::Result<(), ServerError> {
        self.geometry = geometry;
        self.format = PixelFormat::default();
        self.calls.push(ServerCall::NewFramebuffer(framebuffer, geometry));
        Ok(())
    }

    fn init(&mut self) -> std::result::Result<(), ServerError> {
        self.active = true;
        self.calls.push(ServerCall::Init);
        Ok(())
    }

    fn mark_rect_as_modified(&mut self, rect: Rect) {
        self.calls.push(ServerCall::Mark(rect));
    }

    fn process_events(
        &mut self,
        timeout: Duration,
        hooks: &mut dyn ClientHooks,
    ) -> std::result::Result<(), ServerError> {
        self.calls.push(ServerCall::Process(timeout));
        if std::mem::take(&mut self.listen_fails) {
            self.active = false;
            return Err(ServerError::Listen {
                port: self.options.port,
                reason: "Address already in use".to_string(),
            });
        }
        for id in 0..std::mem::take(&mut self.connecting) {
            hooks.client_connected(id);
        }
        self.io_budget = self.io_budget.saturating_sub(1);
        if self.io_budget == 0 {
            self.active = false;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn shutdown(&mut self) {
        self.active = false;
        self.calls.push(ServerCall::Shutdown);
    }

    fn cleanup(&mut self) {
        self.active = false;
        self.calls.push(ServerCall::Cleanup);
    }
}
