//! Small helpers shared by the encode/decode routines.

use crate::error::{ProtoError, Result};

/// Appends a big-endian `u16`.
pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u32`.
pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u64`.
pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends `n` zero bytes of padding.
pub(crate) fn pad(out: &mut Vec<u8>, n: usize) {
    out.extend(std::iter::repeat(0u8).take(n));
}

/// Checks that `buf` holds at least `need` bytes of `what`.
pub(crate) fn need(buf: &[u8], need: usize, what: &'static str) -> Result<()> {
    if buf.len() < need {
        Err(ProtoError::Truncated {
            what,
            need,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_helpers() {
        let mut out = Vec::new();
        put_u16(&mut out, 0x1122);
        put_u32(&mut out, 0x33445566);
        pad(&mut out, 2);
        assert_eq!(out, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0, 0]);
    }

    #[test]
    fn test_need() {
        assert!(need(&[0; 8], 8, "x").is_ok());
        let err = need(&[0; 4], 8, "x").unwrap_err();
        assert!(err.to_string().contains("truncated x"));
    }
}
