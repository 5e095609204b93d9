//! Versioned, CRC-protected configuration blob.
//!
//! Layout: `version: u16 @0`, `length: u16 @2` (payload length, not including this
//! header), `crc32: u32 @4` (over the payload only), `payload @8`. This crate only
//! knows the encode/decode contract; actual flash/EEPROM I/O is the firmware's job via
//! [`PersistenceMedium`].

use crc::{Crc, CRC_32_BZIP2};

const HEADER_LEN: usize = 8;
const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    BufferTooSmall,
    TruncatedHeader,
    LengthMismatch,
    CrcMismatch,
    UnsupportedVersion(u16),
}

/// Encodes `payload` into `out` under `version`. Returns the total number of bytes
/// written (`HEADER_LEN + payload.len()`).
pub fn encode(out: &mut [u8], version: u16, payload: &[u8]) -> Result<usize, PersistenceError> {
    let total = HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(PersistenceError::BufferTooSmall);
    }
    if payload.len() > u16::MAX as usize {
        return Err(PersistenceError::BufferTooSmall);
    }

    let crc32 = CRC.checksum(payload);

    out[0..2].copy_from_slice(&version.to_le_bytes());
    out[2..4].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    out[4..8].copy_from_slice(&crc32.to_le_bytes());
    out[HEADER_LEN..total].copy_from_slice(payload);

    Ok(total)
}

/// Validates the header and CRC in `buf` and returns `(version, payload_slice)`.
pub fn decode(buf: &[u8], expected_version: u16) -> Result<(u16, &[u8]), PersistenceError> {
    if buf.len() < HEADER_LEN {
        return Err(PersistenceError::TruncatedHeader);
    }

    let version = u16::from_le_bytes([buf[0], buf[1]]);
    let length = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let crc32 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if version != expected_version {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    if buf.len() < HEADER_LEN + length {
        return Err(PersistenceError::LengthMismatch);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + length];
    if CRC.checksum(payload) != crc32 {
        return Err(PersistenceError::CrcMismatch);
    }

    Ok((version, payload))
}

/// External flash/EEPROM access the firmware provides; this crate never touches a
/// peripheral directly.
pub trait PersistenceMedium {
    type Error;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<(), Self::Error>;
    fn erase(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let mut buf = [0u8; 64];
        let payload = b"hello controller";
        let written = encode(&mut buf, 3, payload).unwrap();
        let (version, decoded) = decode(&buf[..written], 3).unwrap();
        assert_eq!(version, 3);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut buf = [0u8; 64];
        let written = encode(&mut buf, 1, b"abcdefgh").unwrap();
        buf[HEADER_LEN] ^= 0xFF;
        assert_eq!(decode(&buf[..written], 1), Err(PersistenceError::CrcMismatch));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut buf = [0u8; 64];
        let written = encode(&mut buf, 2, b"xyz").unwrap();
        assert_eq!(
            decode(&buf[..written], 5),
            Err(PersistenceError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn buffer_too_small_to_encode() {
        let mut buf = [0u8; 4];
        assert_eq!(encode(&mut buf, 1, b"toolong"), Err(PersistenceError::BufferTooSmall));
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        let buf = [0u8; 3];
        assert_eq!(decode(&buf, 1), Err(PersistenceError::TruncatedHeader));
    }
}
