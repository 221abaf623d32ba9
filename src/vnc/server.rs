//! [`RfbServer`] implementation backed by the `rustvncserver` crate.
//!
//! `rustvncserver` is asynchronous: client sessions run as tasks on a Tokio
//! runtime owned by the screen. The bridge stays single-threaded by only
//! touching the server through `block_on` from its own loop. Servicing I/O
//! means draining the server's event channel for the time slice the bridge
//! grants, which is where client connect/disconnect hooks fire.
//!
//! The library keeps its own RGBA framebuffer, so marking a region modified
//! copies that region out of the shared EVDI buffer (fixing up the channel
//! order on the way) instead of the server reading the buffer in place.
//!
//! The listener runs as its own task. If it cannot bind its port, the error
//! is handed back over a oneshot channel and returned from the next
//! `process_events`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rustvncserver::server::ServerEvent;
use rustvncserver::VncServer;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::format::{append_rgba, PixelFormat};
use super::{ClientHooks, RfbServer, ScreenGeometry, ServerOptions};
use crate::error::ServerError;
use crate::evdi::{BufferView, Rect};

/// Largest width or height the library accepts.
const MAX_DIMENSION: u32 = 8192;
const MIN_DIMENSION: u32 = 1;

/// A VNC screen served by `rustvncserver`.
pub struct RustVncScreen {
    runtime: Runtime,
    server: Arc<VncServer>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown_tx: broadcast::Sender<()>,
    active: Arc<AtomicBool>,
    port: u16,
    /// Filled by the listener task if it stops on an error.
    listen_failed: oneshot::Receiver<ServerError>,
    listen_failed_tx: Option<oneshot::Sender<ServerError>>,
    format: PixelFormat,
    geometry: ScreenGeometry,
    framebuffer: Option<BufferView>,
    scratch: Vec<u8>,
}

/// Validates one screen dimension.
///
/// # Returns
///
/// The dimension as the library's `u16`, or `None` if out of range.
fn dimension(value: u32) -> Option<u16> {
    if (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        u16::try_from(value).ok()
    } else {
        None
    }
}

fn checked_size(geometry: &ScreenGeometry) -> Result<(u16, u16), ServerError> {
    match (dimension(geometry.width), dimension(geometry.height)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => {
            error!(
                "Invalid framebuffer size: {}x{} (must be {}-{})",
                geometry.width, geometry.height, MIN_DIMENSION, MAX_DIMENSION
            );
            Err(ServerError::Geometry {
                width: geometry.width,
                height: geometry.height,
            })
        }
    }
}

impl RustVncScreen {
    /// Rows of `rect` from the shared buffer, converted to packed RGBA.
    fn copy_region(&mut self, view: &BufferView, rect: &Rect) {
        self.scratch.clear();
        // SAFETY: the bridge re-points the screen before releasing a buffer,
        // so the current view is always backed by live memory.
        let pixels = unsafe { view.as_slice() };
        let row_bytes = rect.width() as usize * 4;
        for y in rect.y1..rect.y2 {
            let start = y as usize * view.stride + rect.x1 as usize * 4;
            append_rgba(&pixels[start..start + row_bytes], &self.format, &mut self.scratch);
        }
    }

    /// Translates one library event into client hooks.
    fn handle_server_event(event: ServerEvent, hooks: &mut dyn ClientHooks) {
        match event {
            ServerEvent::ClientConnected { client_id } => {
                hooks.client_connected(client_id as u64);
            }
            ServerEvent::ClientDisconnected { client_id } => {
                hooks.client_gone(client_id as u64);
            }
            // View-only bridge: viewer input has nowhere to go.
            _ => {}
        }
    }
}

impl RfbServer for RustVncScreen {
    fn create(geometry: ScreenGeometry, options: &ServerOptions) -> Result<Self, ServerError> {
        let (width, height) = checked_size(&geometry)?;
        if geometry.bytes_per_pixel != 4 {
            return Err(ServerError::Library(format!(
                "unsupported pixel size: {} bytes",
                geometry.bytes_per_pixel
            )));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let (server, events) = {
            let _guard = runtime.enter();
            VncServer::new(
                width,
                height,
                options.desktop_name.clone(),
                options.password.clone(),
            )
        };
        let (shutdown_tx, _) = broadcast::channel(16);
        let (listen_failed_tx, listen_failed) = oneshot::channel();

        info!("Created VNC screen: {}x{}", width, height);

        Ok(Self {
            runtime,
            server: Arc::new(server),
            events,
            shutdown_tx,
            active: Arc::new(AtomicBool::new(false)),
            port: options.port,
            listen_failed,
            listen_failed_tx: Some(listen_failed_tx),
            format: PixelFormat::default(),
            geometry,
            framebuffer: None,
            scratch: Vec::new(),
        })
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn pixel_format_mut(&mut self) -> &mut PixelFormat {
        &mut self.format
    }

    fn set_framebuffer(&mut self, framebuffer: BufferView) {
        if framebuffer.width != self.geometry.width || framebuffer.height != self.geometry.height {
            warn!(
                "Framebuffer {}x{} does not match screen {}x{}",
                framebuffer.width, framebuffer.height, self.geometry.width, self.geometry.height
            );
        }
        self.framebuffer = Some(framebuffer);
    }

    fn new_framebuffer(
        &mut self,
        framebuffer: BufferView,
        geometry: ScreenGeometry,
    ) -> Result<(), ServerError> {
        let (width, height) = checked_size(&geometry)?;

        // The old view dangles as soon as the bridge frees its buffer.
        self.framebuffer = None;
        self.runtime
            .block_on(self.server.framebuffer().resize(width, height))
            .map_err(|e| ServerError::Library(format!("failed to resize framebuffer: {}", e)))?;

        self.geometry = geometry;
        self.format = PixelFormat::default();
        self.framebuffer = Some(framebuffer);
        info!("Framebuffer resized to {}x{}", width, height);
        Ok(())
    }

    fn init(&mut self) -> Result<(), ServerError> {
        if self.framebuffer.is_none() {
            return Err(ServerError::Library(
                "screen has no framebuffer".to_string(),
            ));
        }
        let Some(failed) = self.listen_failed_tx.take() else {
            return Err(ServerError::Library(
                "screen already started".to_string(),
            ));
        };
        self.active.store(true, Ordering::SeqCst);

        let port = self.port;
        let server = self.server.clone();
        let active = self.active.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.runtime.spawn(async move {
            tokio::select! {
                result = server.listen(port) => {
                    if let Err(e) = result {
                        error!("VNC server listen error: {}", e);
                        let _ = failed.send(ServerError::Listen {
                            port,
                            reason: e.to_string(),
                        });
                    }
                    active.store(false, Ordering::SeqCst);
                }
                _ = shutdown_rx.recv() => {
                    info!("VNC listener received shutdown signal");
                }
            }
        });
        info!("VNC server listening on port {}", port);

        // Ctrl-C asks the screen to shut down; the bridge notices on its next
        // is_active check and tears down in order.
        let active = self.active.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.runtime.spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Shutting down VNC server."),
                        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                    }
                    active.store(false, Ordering::SeqCst);
                    let _ = shutdown_tx.send(());
                }
                _ = shutdown_rx.recv() => {}
            }
        });

        Ok(())
    }

    fn mark_rect_as_modified(&mut self, rect: Rect) {
        let Some(view) = self.framebuffer else {
            warn!("Damage reported before the screen has a framebuffer");
            return;
        };
        let Some(rect) = rect.clip(view.width, view.height) else {
            return;
        };

        self.copy_region(&view, &rect);
        let result = self.runtime.block_on(self.server.framebuffer().update_cropped(
            &self.scratch,
            rect.x1 as u16,
            rect.y1 as u16,
            rect.width() as u16,
            rect.height() as u16,
        ));
        if let Err(e) = result {
            error!("Failed to update framebuffer region: {}", e);
        }
    }

    fn process_events(
        &mut self,
        timeout: Duration,
        hooks: &mut dyn ClientHooks,
    ) -> Result<(), ServerError> {
        let events = &mut self.events;
        let active = &self.active;
        self.runtime.block_on(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => Self::handle_server_event(event, hooks),
                        None => {
                            warn!("VNC server event channel closed");
                            active.store(false, Ordering::SeqCst);
                            break;
                        }
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        });

        match self.listen_failed.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Stopping VNC server");
        }
        let _ = self.shutdown_tx.send(());
    }

    fn cleanup(&mut self) {
        self.shutdown();
        self.framebuffer = None;
        self.scratch = Vec::new();
        debug!("VNC screen cleaned up");
    }
}
