//! EDID capability descriptor announced to the kernel at connect time.
//!
//! The bridge treats the EDID as opaque: it is only checked for a plausible
//! shape before being handed to the device.

use crate::error::{BridgeError, Result};

/// Size of one EDID block.
pub const EDID_BLOCK_LEN: usize = 128;

const EDID_HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];

/// Default monitor ("Virtualdisp", base block plus one CEA extension), taken
/// from the ChromiumOS autotest EDID collection.
pub const DEFAULT_EDID: [u8; 256] = [
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x88, 0x41, 0xd2, 0x04,
    0x23, 0x16, 0x00, 0x00, 0x2a, 0x21, 0x01, 0x04, 0xb5, 0x3e, 0x22, 0x78,
    0x3b, 0xad, 0x65, 0xad, 0x50, 0x45, 0x9f, 0x25, 0x0e, 0x50, 0x54, 0xbf,
    0xef, 0x00, 0xd1, 0xc0, 0xb3, 0x00, 0x95, 0x00, 0x81, 0x80, 0x81, 0x40,
    0x81, 0xc0, 0x01, 0x01, 0x01, 0x01, 0x4d, 0xd0, 0x00, 0xa0, 0xf0, 0x70,
    0x3e, 0x80, 0x30, 0x40, 0x35, 0x00, 0x6d, 0x55, 0x21, 0x00, 0x00, 0x1a,
    0x00, 0x00, 0x00, 0xff, 0x00, 0x66, 0x61, 0x6b, 0x65, 0x73, 0x65, 0x72,
    0x69, 0x61, 0x6c, 0x0a, 0x20, 0x20, 0x00, 0x00, 0x00, 0xfc, 0x00, 0x56,
    0x69, 0x72, 0x74, 0x75, 0x61, 0x6c, 0x64, 0x69, 0x73, 0x70, 0x0a, 0x20,
    0x00, 0x00, 0x00, 0xfd, 0x00, 0x28, 0x3c, 0x8c, 0x8c, 0x3c, 0x01, 0x0a,
    0x20, 0x20, 0x20, 0x20, 0x20, 0x20, 0x01, 0xa3, 0x02, 0x03, 0x18, 0xf1,
    0x4b, 0x01, 0x03, 0x05, 0x14, 0x04, 0x13, 0x1f, 0x12, 0x02, 0x11, 0x90,
    0x23, 0x09, 0x07, 0x07, 0x83, 0x01, 0x00, 0x00, 0xa3, 0x66, 0x00, 0xa0,
    0xf0, 0x70, 0x1f, 0x80, 0x30, 0x20, 0x35, 0x00, 0x6d, 0x55, 0x21, 0x00,
    0x00, 0x1a, 0x56, 0x5e, 0x00, 0xa0, 0xa0, 0xa0, 0x29, 0x50, 0x30, 0x20,
    0x35, 0x00, 0x6d, 0x55, 0x21, 0x00, 0x00, 0x1e, 0x4d, 0x6c, 0x80, 0xa0,
    0x70, 0x70, 0x3e, 0x80, 0x30, 0x20, 0x3a, 0x00, 0x6d, 0x55, 0x21, 0x00,
    0x00, 0x1a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x26,
];

/// Check that `edid` looks like an EDID blob: whole blocks, fixed header.
pub fn validate(edid: &[u8]) -> Result<()> {
    if edid.is_empty() || edid.len() % EDID_BLOCK_LEN != 0 {
        return Err(BridgeError::Config(format!(
            "EDID must be a non-empty multiple of {} bytes, got {}",
            EDID_BLOCK_LEN,
            edid.len()
        )));
    }
    if edid[..EDID_HEADER.len()] != EDID_HEADER {
        return Err(BridgeError::Config("EDID header mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_edid_is_valid() {
        validate(&DEFAULT_EDID).unwrap();
    }

    #[test]
    fn default_edid_blocks_checksum_to_zero() {
        for block in DEFAULT_EDID.chunks(EDID_BLOCK_LEN) {
            let sum = block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum, 0);
        }
    }

    #[test]
    fn rejects_truncated_and_foreign_blobs() {
        assert!(validate(&DEFAULT_EDID[..100]).is_err());
        assert!(validate(&[]).is_err());
        assert!(validate(&[0u8; 128]).is_err());
    }
}
