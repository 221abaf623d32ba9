//! Bridge state and the mode negotiation state machine.

use log::{debug, error, info, warn};

use super::damage::DamageTranslator;
use super::framebuffer::FramebufferOwner;
use crate::error::{BridgeError, Result, ServerError};
use crate::evdi::{BufferId, DeviceEventHandler, DisplayDevice, Mode, SUPPORTED_BPP};
use crate::vnc::{adjust_pixel_format, ClientHooks, RfbServer, ScreenGeometry, ServerOptions};

/// Where the bridge is in mode negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    /// No usable mode has been reported yet.
    AwaitingFirstMode,
    /// A mode is active and a buffer is registered for it.
    Negotiated,
}

/// Connected viewer count, maintained by the server's client hooks.
///
/// Only reported in logs; nothing in the bridge depends on it.
#[derive(Debug, Default)]
pub struct ClientCounter {
    connected: i32,
}

impl ClientCounter {
    pub fn connected(&self) -> i32 {
        self.connected
    }
}

impl ClientHooks for ClientCounter {
    fn client_connected(&mut self, client_id: u64) {
        self.connected += 1;
        info!("Client {} connected ({} connected)", client_id, self.connected);
    }

    fn client_gone(&mut self, client_id: u64) {
        self.connected -= 1;
        info!("Client {} disconnected ({} connected)", client_id, self.connected);
    }
}

/// State of one display bridge: the negotiated mode, the pixel buffer, and
/// the VNC screen once started.
///
/// The engine is the handler the device dispatches into. A fatal condition
/// raised inside a callback cannot propagate through the device's dispatch
/// call, so it is latched: later callbacks are ignored and the event loop
/// collects it with [`Engine::take_fatal`] as soon as dispatch returns.
pub struct Engine<S> {
    mode: Mode,
    framebuffer: FramebufferOwner,
    server: Option<S>,
    damage: DamageTranslator,
    clients: ClientCounter,
    fatal: Option<BridgeError>,
}

impl<S: RfbServer> Engine<S> {
    pub fn new() -> Self {
        Self {
            mode: Mode::default(),
            framebuffer: FramebufferOwner::new(),
            server: None,
            damage: DamageTranslator::new(),
            clients: ClientCounter::default(),
            fatal: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        if self.framebuffer.active().is_some() {
            NegotiationState::Negotiated
        } else {
            NegotiationState::AwaitingFirstMode
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn framebuffer(&self) -> &FramebufferOwner {
        &self.framebuffer
    }

    pub fn server(&self) -> Option<&S> {
        self.server.as_ref()
    }

    pub fn server_mut(&mut self) -> Option<&mut S> {
        self.server.as_mut()
    }

    pub fn connected_clients(&self) -> i32 {
        self.clients.connected()
    }

    /// Take the fatal error raised during the last dispatch, if any.
    pub fn take_fatal(&mut self) -> Option<BridgeError> {
        self.fatal.take()
    }

    /// Switch to `mode`: validate it, swap the pixel buffer, and re-point a
    /// running VNC screen at the new buffer.
    ///
    /// On success exactly one buffer sized for `mode` is registered and, if
    /// the screen is running, its geometry matches `mode`. A mode with the
    /// wrong pixel depth is rejected before anything is touched.
    pub fn change_mode<D>(&mut self, device: &mut D, mode: Mode) -> Result<()>
    where
        D: DisplayDevice + ?Sized,
    {
        info!("Mode changed to {}", mode);
        if mode.bits_per_pixel != SUPPORTED_BPP {
            return Err(BridgeError::UnsupportedBitsPerPixel(mode.bits_per_pixel));
        }
        if mode.width == 0 || mode.height == 0 {
            warn!("Ignoring empty mode {}x{}", mode.width, mode.height);
            return Ok(());
        }

        let view = self.framebuffer.replace(device, &mode)?;
        self.mode = mode;

        // The first mode sizes the screen when it starts.
        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };
        server.new_framebuffer(view, ScreenGeometry::for_mode(&mode))?;
        adjust_pixel_format(server.pixel_format_mut());
        Ok(())
    }

    /// Forward the pending damage for `buffer` to the VNC screen.
    pub fn update_ready<D>(&mut self, device: &mut D, buffer: BufferId) -> usize
    where
        D: DisplayDevice + ?Sized,
    {
        if self.framebuffer.active().map(|b| b.id()) != Some(buffer) {
            debug!("Update for unknown buffer {}", buffer.0);
        }
        self.damage
            .translate(device, self.server.as_mut(), self.mode.width, self.mode.height)
    }

    /// Create and start the VNC screen for the negotiated mode.
    pub fn start_server(&mut self, options: &ServerOptions) -> Result<()> {
        let Some(view) = self.framebuffer.view() else {
            return Err(BridgeError::ServerStart(ServerError::Library(
                "no display mode negotiated".to_string(),
            )));
        };

        let mut server =
            S::create(ScreenGeometry::for_mode(&self.mode), options).map_err(BridgeError::ServerStart)?;
        adjust_pixel_format(server.pixel_format_mut());
        let format = server.pixel_format();
        info!(
            "Pixel format: shift R {} G {} B {}, max R {} G {} B {}",
            format.red_shift,
            format.green_shift,
            format.blue_shift,
            format.red_max,
            format.green_max,
            format.blue_max
        );
        server.set_framebuffer(view);
        server.init().map_err(BridgeError::ServerStart)?;
        self.server = Some(server);
        Ok(())
    }

    pub fn server_active(&self) -> bool {
        self.server.as_ref().is_some_and(|s| s.is_active())
    }

    /// Let the VNC screen service its clients for up to `timeout`.
    ///
    /// A listener that never came up is reported as a failed server start.
    pub fn service_server(&mut self, timeout: std::time::Duration) -> Result<()> {
        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };
        server
            .process_events(timeout, &mut self.clients)
            .map_err(|e| match e {
                ServerError::Listen { .. } => BridgeError::ServerStart(e),
                other => BridgeError::Server(other),
            })
    }

    /// Release the screen's resources. The screen stays inspectable.
    pub fn shut_down_server(&mut self) {
        if let Some(server) = self.server.as_mut() {
            server.cleanup();
        }
    }

    /// Unregister and free the pixel buffer.
    pub fn release_framebuffer<D>(&mut self, device: &mut D)
    where
        D: DisplayDevice + ?Sized,
    {
        self.framebuffer.release(device);
    }
}

impl<S: RfbServer> Default for Engine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, D> DeviceEventHandler<D> for Engine<S>
where
    S: RfbServer,
    D: DisplayDevice + ?Sized,
{
    fn on_mode_changed(&mut self, device: &mut D, mode: Mode) {
        if self.fatal.is_some() {
            return;
        }
        if let Err(e) = self.change_mode(device, mode) {
            error!("{}", e);
            self.fatal = Some(e);
        }
    }

    fn on_dpms(&mut self, _device: &mut D, dpms_mode: i32) {
        debug!("DPMS mode {} (not handled)", dpms_mode);
    }

    fn on_crtc_state(&mut self, _device: &mut D, state: i32) {
        debug!("CRTC state {} (not handled)", state);
    }

    fn on_update_ready(&mut self, device: &mut D, buffer: BufferId) {
        if self.fatal.is_some() {
            return;
        }
        self.update_ready(device, buffer);
    }
}
