//! Bridge configuration.

use std::path::Path;

use log::info;

use crate::error::{BridgeError, Result};
use crate::evdi::edid::{self, DEFAULT_EDID};
use crate::vnc::ServerOptions;

/// Largest mode area times refresh rate the kernel may offer: 4K at 120 Hz.
pub const DEFAULT_BANDWIDTH_HINT: u32 = 3840 * 2160 * 120;

/// Refresh rate assumed when the device reports 0 Hz.
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// Everything the bridge needs besides its device.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// VNC listener settings.
    pub server: ServerOptions,
    /// EDID announced to the kernel.
    pub edid: Vec<u8>,
    /// Bandwidth hint passed to the kernel at connect time.
    pub bandwidth_hint: u32,
    /// Pacing rate for modes that report a refresh rate of 0 Hz.
    pub fallback_refresh_rate: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerOptions::default(),
            edid: DEFAULT_EDID.to_vec(),
            bandwidth_hint: DEFAULT_BANDWIDTH_HINT,
            fallback_refresh_rate: DEFAULT_REFRESH_RATE,
        }
    }
}

impl BridgeConfig {
    /// Set the VNC port viewers connect to.
    pub fn with_port(mut self, port: u16) -> Result<Self> {
        if port == 0 {
            return Err(BridgeError::Config(
                "invalid port: 0 (must be 1-65535)".to_string(),
            ));
        }
        self.server.port = port;
        Ok(self)
    }

    pub fn with_desktop_name(mut self, name: impl Into<String>) -> Self {
        self.server.desktop_name = name.into();
        self
    }

    /// An empty password disables authentication.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.server.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_bandwidth_hint(mut self, hint: u32) -> Result<Self> {
        if hint == 0 {
            return Err(BridgeError::Config(
                "bandwidth hint must be nonzero".to_string(),
            ));
        }
        self.bandwidth_hint = hint;
        Ok(self)
    }

    pub fn with_fallback_refresh_rate(mut self, rate: u32) -> Result<Self> {
        if rate == 0 {
            return Err(BridgeError::Config(
                "fallback refresh rate must be nonzero".to_string(),
            ));
        }
        self.fallback_refresh_rate = rate;
        Ok(self)
    }

    /// Replace the built-in EDID with the blob in `path`.
    pub fn with_edid_file(mut self, path: &Path) -> Result<Self> {
        let blob = std::fs::read(path)?;
        edid::validate(&blob)?;
        info!("Using EDID from {} ({} bytes)", path.display(), blob.len());
        self.edid = blob;
        Ok(self)
    }
}
