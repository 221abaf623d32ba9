//! Server pixel format and channel-order fixups.

use log::info;

/// True-colour pixel format advertised by the server, in RFB terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The default layout of a new 32bpp screen: red in the low byte.
    pub const fn rgbx8888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// Unpack one little-endian 32-bit pixel into `[r, g, b]`.
    pub fn unpack(&self, pixel: [u8; 4]) -> [u8; 3] {
        let value = u32::from_le_bytes(pixel);
        [
            (value >> self.red_shift) as u8,
            (value >> self.green_shift) as u8,
            (value >> self.blue_shift) as u8,
        ]
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgbx8888()
    }
}

/// Match the server format to EVDI's XRGB8888 buffers (red in bits 16..24,
/// blue in bits 0..8).
///
/// Must be re-applied whenever the screen's framebuffer is (re)created, since
/// a new framebuffer resets the server format.
pub fn adjust_pixel_format(format: &mut PixelFormat) {
    // TODO: derive the shifts from the fourcc in evdi_mode.pixel_format
    format.red_shift = 16;
    format.blue_shift = 0;
    info!("Pixel format adjusted");
}

/// Convert a tightly packed run of 32-bit pixels in `format` to RGBA,
/// appending to `out`. Trailing bytes that do not form a pixel are ignored.
pub fn append_rgba(src: &[u8], format: &PixelFormat, out: &mut Vec<u8>) {
    out.reserve(src.len());
    for chunk in src.chunks_exact(4) {
        let [r, g, b] = format.unpack([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out.extend_from_slice(&[r, g, b, 0xFF]);
    }
}
