//! Error types for the display bridge.

use thiserror::Error;

/// Errors that stop the bridge.
///
/// Every variant is fatal: the bridge never attempts a degraded mode of
/// operation, so the binary reports the error and exits with a nonzero status.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No virtual display device could be opened.
    #[error("failed to open an EVDI node: {0}")]
    NoDevice(String),

    /// The device refused the connection request.
    #[error("failed to connect to EVDI node: {0}")]
    Connect(String),

    /// The device negotiated a pixel depth this bridge cannot serve.
    #[error("evdi-vnc requires modes with 32 bits per pixel, received {0} bpp")]
    UnsupportedBitsPerPixel(u32),

    /// The pixel buffer for a mode could not be allocated.
    #[error("failed to allocate {bytes} bytes for the pixel buffer")]
    Allocation {
        /// Requested size in bytes.
        bytes: usize,
    },

    /// The VNC screen could not be created or started.
    #[error("failed to start VNC server: {0}")]
    ServerStart(#[source] ServerError),

    /// The running VNC server rejected an operation.
    #[error("VNC server error: {0}")]
    Server(#[from] ServerError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O failure while waiting on the device or reading configuration.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by a VNC server implementation.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Geometry outside what the server can represent.
    #[error("unsupported framebuffer geometry {width}x{height}")]
    Geometry {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// The async runtime backing the server could not be built.
    #[error("failed to build server runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The listener task could not accept viewers on its port.
    #[error("failed to listen on port {port}: {reason}")]
    Listen {
        /// Port the listener was started on.
        port: u16,
        /// Failure reported by the listener.
        reason: String,
    },

    /// The server library reported a failure.
    #[error("{0}")]
    Library(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
