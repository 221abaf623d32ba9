//! The bridge event loop.
//!
//! One thread alternates between the two event sources: the virtual display
//! (damage and mode changes) and the VNC screen (client I/O). The screen's I/O
//! slice is sized to just under one refresh period of the negotiated mode, so
//! viewers are updated at the rate the virtual monitor refreshes.

use std::time::Duration;

use log::{debug, info};

use super::engine::Engine;
use super::framebuffer::BUFFER_ID;
use crate::config::{BridgeConfig, DEFAULT_REFRESH_RATE};
use crate::error::Result;
use crate::evdi::{DisplayDevice, Mode};
use crate::vnc::RfbServer;

/// Part of each refresh period reserved for draining damage.
const DAMAGE_MARGIN: Duration = Duration::from_micros(1000);

/// I/O time slice for one loop iteration at `refresh_rate` Hz: one refresh
/// period (rounded to the nearest microsecond) minus [`DAMAGE_MARGIN`].
///
/// A `refresh_rate` of 0 paces at `fallback` Hz instead.
pub fn io_timeout(refresh_rate: u32, fallback: u32) -> Duration {
    let rate = match (refresh_rate, fallback) {
        (0, 0) => u64::from(DEFAULT_REFRESH_RATE),
        (0, fallback) => u64::from(fallback),
        (rate, _) => u64::from(rate),
    };
    let period = Duration::from_micros((1_000_000 + rate / 2) / rate);
    period.saturating_sub(DAMAGE_MARGIN)
}

/// Drives one virtual display and one VNC screen.
pub struct Bridge<D, S> {
    device: D,
    engine: Engine<S>,
    config: BridgeConfig,
    connected: bool,
}

impl<D, S> Bridge<D, S>
where
    D: DisplayDevice,
    S: RfbServer,
{
    pub fn new(device: D, config: BridgeConfig) -> Self {
        Self {
            device,
            engine: Engine::new(),
            config,
            connected: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Run until the VNC screen stops, then tear everything down.
    ///
    /// Teardown also runs when a fatal error ends the bridge early; the error
    /// is returned afterwards.
    pub fn run(&mut self) -> Result<()> {
        let result = self.serve();
        self.teardown();
        result
    }

    fn serve(&mut self) -> Result<()> {
        self.connect()?;
        let mode = self.wait_for_first_mode()?;

        info!("Trying to start VNC server at {}", mode);
        self.engine.start_server(&self.config.server)?;

        info!("Starting event loop");
        while self.engine.server_active() {
            self.step()?;
        }
        Ok(())
    }

    /// Announce the virtual monitor to the kernel.
    pub fn connect(&mut self) -> Result<()> {
        self.device
            .connect(&self.config.edid, self.config.bandwidth_hint)?;
        self.connected = true;
        Ok(())
    }

    /// Block until the device has negotiated a usable mode.
    pub fn wait_for_first_mode(&mut self) -> Result<Mode> {
        while self.engine.mode().width == 0 {
            if self.device.wait_event_ready(None)? {
                self.dispatch()?;
            }
        }
        Ok(self.engine.mode())
    }

    /// One steady-state iteration: drain damage, dispatch device events, then
    /// service VNC clients for the rest of the refresh period.
    pub fn step(&mut self) -> Result<()> {
        self.drain_damage();
        self.dispatch()?;
        let timeout = io_timeout(
            self.engine.mode().refresh_rate,
            self.config.fallback_refresh_rate,
        );
        self.engine.service_server(timeout)
    }

    /// Forward every update that is ready right now.
    fn drain_damage(&mut self) -> usize {
        let mut updates = 0;
        while self.device.request_update(BUFFER_ID) {
            self.engine.update_ready(&mut self.device, BUFFER_ID);
            updates += 1;
        }
        updates
    }

    fn dispatch(&mut self) -> Result<()> {
        self.device.handle_events(&mut self.engine);
        match self.engine.take_fatal() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release the screen, the buffer and the device, in that order.
    fn teardown(&mut self) {
        info!("Cleaning up...");
        self.engine.shut_down_server();
        self.engine.release_framebuffer(&mut self.device);
        if self.connected {
            self.device.disconnect();
            self.connected = false;
        }
        self.device.close();
        debug!("Bridge torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, ServerError};
    use crate::evdi::Rect;
    use crate::testing::{
        DeviceCall, DeviceEvent, MockDevice, MockServer, ServerCall, CONNECTING_CLIENTS, IO_BUDGET,
        LISTEN_FAILS,
    };

    fn bridge_with(events: &[DeviceEvent]) -> Bridge<MockDevice, MockServer> {
        let mut device = MockDevice::new();
        for event in events {
            device.push_event(event.clone());
        }
        Bridge::new(device, BridgeConfig::default())
    }

    #[test]
    fn timeout_tracks_refresh_rate() {
        assert_eq!(io_timeout(60, 60), Duration::from_micros(15_667));
        assert_eq!(io_timeout(30, 60), Duration::from_micros(32_333));
        assert_eq!(io_timeout(0, 60), io_timeout(60, 60));
        assert_eq!(io_timeout(0, 30), io_timeout(30, 60));
        assert_eq!(io_timeout(0, 0), io_timeout(60, 60));
        // Faster than 1 kHz leaves no time for I/O
        assert_eq!(io_timeout(2000, 60), Duration::ZERO);
    }

    #[test]
    fn zero_hz_mode_paces_at_configured_fallback() {
        IO_BUDGET.with(|b| b.set(1));
        let mut device = MockDevice::new();
        device.push_event(DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 0)));
        let config = BridgeConfig::default().with_fallback_refresh_rate(30).unwrap();
        let mut bridge: Bridge<MockDevice, MockServer> = Bridge::new(device, config);

        bridge.run().unwrap();

        let server = bridge.engine().server().unwrap();
        assert!(server
            .calls
            .contains(&ServerCall::Process(Duration::from_micros(32_333))));
    }

    #[test]
    fn listener_failure_is_fatal_and_tears_down() {
        IO_BUDGET.with(|b| b.set(3));
        LISTEN_FAILS.with(|f| f.set(true));
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 60))]);

        let err = bridge.run().unwrap_err();
        LISTEN_FAILS.with(|f| f.set(false));

        assert!(matches!(
            err,
            BridgeError::ServerStart(ServerError::Listen { port: 5900, .. })
        ));
        let server = bridge.engine().server().unwrap();
        let slices = server
            .calls
            .iter()
            .filter(|c| matches!(c, ServerCall::Process(_)))
            .count();
        assert_eq!(slices, 1);
        assert_eq!(server.calls.last(), Some(&ServerCall::Cleanup));
        assert_eq!(
            &bridge.device().calls()[bridge.device().calls().len() - 3..],
            &[DeviceCall::Unregister(BUFFER_ID), DeviceCall::Disconnect, DeviceCall::Close]
        );
    }

    #[test]
    fn run_negotiates_serves_and_tears_down() {
        IO_BUDGET.with(|b| b.set(2));
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 60))]);

        bridge.run().unwrap();

        let calls = bridge.device().calls();
        let config = BridgeConfig::default();
        assert_eq!(
            calls.first(),
            Some(&DeviceCall::Connect {
                edid_len: config.edid.len(),
                bandwidth_hint: config.bandwidth_hint,
            })
        );
        assert_eq!(
            calls[1],
            DeviceCall::Register { id: BUFFER_ID, width: 1920, height: 1080, stride: 7680 }
        );
        assert_eq!(
            &calls[calls.len() - 3..],
            &[DeviceCall::Unregister(BUFFER_ID), DeviceCall::Disconnect, DeviceCall::Close]
        );
        assert!(bridge.device().registered().is_none());

        let server = bridge.engine().server().unwrap();
        let slices: Vec<_> = server
            .calls
            .iter()
            .filter(|c| matches!(c, ServerCall::Process(_)))
            .collect();
        assert_eq!(slices, vec![&ServerCall::Process(Duration::from_micros(15_667)); 2]);
        assert_eq!(server.calls.last(), Some(&ServerCall::Cleanup));
    }

    #[test]
    fn damage_is_drained_before_io() {
        IO_BUDGET.with(|b| b.set(1));
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 60))]);
        bridge.device.set_immediate_updates(2);
        bridge.device.push_damage(&[Rect::new(0, 0, 10, 10)]);
        bridge.device.push_damage(&[Rect::new(5, 5, 15, 15), Rect::new(20, 20, 30, 30)]);

        bridge.run().unwrap();

        let server = bridge.engine().server().unwrap();
        let io_at = server
            .calls
            .iter()
            .position(|c| matches!(c, ServerCall::Process(_)))
            .unwrap();
        let marks: Vec<_> = server.calls[..io_at]
            .iter()
            .filter(|c| matches!(c, ServerCall::Mark(_)))
            .cloned()
            .collect();
        assert_eq!(
            marks,
            vec![
                ServerCall::Mark(Rect::new(0, 0, 10, 10)),
                ServerCall::Mark(Rect::new(5, 5, 15, 15)),
                ServerCall::Mark(Rect::new(20, 20, 30, 30)),
            ]
        );
        let requests = bridge
            .device()
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::RequestUpdate(_)))
            .count();
        assert_eq!(requests, 3);
    }

    #[test]
    fn mode_change_while_running_updates_cadence() {
        IO_BUDGET.with(|b| b.set(2));
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 60))]);
        bridge
            .device
            .push_later(DeviceEvent::ModeChanged(Mode::new(1280, 720, 32, 30)));

        bridge.run().unwrap();

        let server = bridge.engine().server().unwrap();
        assert_eq!((server.geometry.width, server.geometry.height), (1280, 720));
        assert_eq!((server.format.red_shift, server.format.blue_shift), (16, 0));
        assert!(server
            .calls
            .contains(&ServerCall::Process(Duration::from_micros(32_333))));
        assert_eq!(bridge.engine().mode(), Mode::new(1280, 720, 32, 30));
    }

    #[test]
    fn unsupported_first_mode_fails_before_allocation() {
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 16, 60))]);

        let err = bridge.run().unwrap_err();

        assert!(matches!(err, BridgeError::UnsupportedBitsPerPixel(16)));
        assert!(bridge.engine().server().is_none());
        assert!(!bridge
            .device()
            .calls()
            .iter()
            .any(|c| matches!(c, DeviceCall::Register { .. } | DeviceCall::Unregister(_))));
        assert_eq!(bridge.device().calls().last(), Some(&DeviceCall::Close));
    }

    #[test]
    fn first_mode_wait_skips_other_events() {
        IO_BUDGET.with(|b| b.set(1));
        let mut bridge = bridge_with(&[DeviceEvent::Dpms(0), DeviceEvent::CrtcState(1)]);
        bridge
            .device
            .push_later(DeviceEvent::ModeChanged(Mode::new(1024, 768, 32, 75)));

        bridge.connect().unwrap();
        let mode = bridge.wait_for_first_mode().unwrap();

        assert_eq!(mode, Mode::new(1024, 768, 32, 75));
        assert!(bridge.engine().server().is_none());
    }

    #[test]
    fn client_hooks_fire_during_io() {
        IO_BUDGET.with(|b| b.set(1));
        CONNECTING_CLIENTS.with(|c| c.set(2));
        let mut bridge = bridge_with(&[DeviceEvent::ModeChanged(Mode::new(1920, 1080, 32, 60))]);

        bridge.run().unwrap();

        assert_eq!(bridge.engine().connected_clients(), 2);
    }
}
