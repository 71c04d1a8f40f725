//! Checksum helper for internal, non-wire-format integrity checks.
//!
//! Used for B+Tree snapshot pages and other internal blobs. The WAL's own
//! wire-format checksum is a separate, spec-mandated hex SHA-256 (see
//! `txn::wal`) — this module is CRC32C, kept from the teacher for everything
//! that isn't that wire format.
//!
//! ## Algorithm
//! CRC32C, hardware-accelerated on SSE4.2 targets, cheap enough to run on
//! every read.

use crc32fast::Hasher;
use std::io::{self, Write};

/// Checksum algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    /// CRC32C (hardware-accelerated via SSE4.2 where available).
    CRC32C,
    /// No checksum; tests only.
    None,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::CRC32C
    }
}

/// Stateless checksum computation/verification over a byte slice.
pub struct Checksum;

impl Checksum {
    pub fn compute(checksum_type: ChecksumType, data: &[u8]) -> u32 {
        match checksum_type {
            ChecksumType::CRC32C => {
                let mut hasher = Hasher::new();
                hasher.update(data);
                hasher.finalize()
            }
            ChecksumType::None => 0,
        }
    }

    pub fn verify(
        checksum_type: ChecksumType,
        data: &[u8],
        expected: u32,
    ) -> Result<(), ChecksumError> {
        if checksum_type == ChecksumType::None {
            return Ok(());
        }

        let actual = Self::compute(checksum_type, data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }

        Ok(())
    }

    /// Incremental checksum for streamed data.
    pub fn builder(checksum_type: ChecksumType) -> ChecksumBuilder {
        ChecksumBuilder::new(checksum_type)
    }

    /// Encodes a checksummed block: `[data_len: u32][data][checksum: u32]`.
    pub fn encode_with_checksum(checksum_type: ChecksumType, data: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(checksum_type, data);
        let mut encoded = Vec::with_capacity(4 + data.len() + 4);
        encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// Decodes and verifies a block produced by `encode_with_checksum`.
    pub fn decode_with_checksum(
        checksum_type: ChecksumType,
        encoded: &[u8],
    ) -> Result<Vec<u8>, ChecksumError> {
        if encoded.len() < 8 {
            return Err(ChecksumError::InvalidFormat("data too short".to_string()));
        }

        let data_len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;

        if encoded.len() != 4 + data_len + 4 {
            return Err(ChecksumError::InvalidFormat(format!(
                "expected {} bytes, got {}",
                4 + data_len + 4,
                encoded.len()
            )));
        }

        let data = &encoded[4..4 + data_len];
        let expected_checksum = u32::from_le_bytes([
            encoded[4 + data_len],
            encoded[4 + data_len + 1],
            encoded[4 + data_len + 2],
            encoded[4 + data_len + 3],
        ]);

        Self::verify(checksum_type, data, expected_checksum)?;
        Ok(data.to_vec())
    }
}

/// Incremental CRC32C builder for streamed data; also implements `Write`.
pub struct ChecksumBuilder {
    checksum_type: ChecksumType,
    hasher: Option<Hasher>,
}

impl ChecksumBuilder {
    pub fn new(checksum_type: ChecksumType) -> Self {
        let hasher = match checksum_type {
            ChecksumType::CRC32C => Some(Hasher::new()),
            ChecksumType::None => None,
        };
        Self { checksum_type, hasher }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(hasher) = &mut self.hasher {
            hasher.update(data);
        }
    }

    pub fn finalize(self) -> u32 {
        match self.hasher {
            Some(hasher) => hasher.finalize(),
            None => 0,
        }
    }
}

impl Write for ChecksumBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch { expected: u32, actual: u32, data_len: usize },

    #[error("invalid checksum format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_and_verify_roundtrip() {
        let data = b"hello, checksum";
        let checksum = Checksum::compute(ChecksumType::CRC32C, data);
        assert!(Checksum::verify(ChecksumType::CRC32C, data, checksum).is_ok());
        assert!(Checksum::verify(ChecksumType::CRC32C, data, checksum + 1).is_err());
        assert!(Checksum::verify(ChecksumType::CRC32C, b"tampered", checksum).is_err());
    }

    #[test]
    fn none_type_always_passes() {
        let data = b"hello, checksum";
        assert_eq!(Checksum::compute(ChecksumType::None, data), 0);
        assert!(Checksum::verify(ChecksumType::None, data, 12345).is_ok());
    }

    #[test]
    fn builder_matches_one_shot() {
        let mut builder = Checksum::builder(ChecksumType::CRC32C);
        builder.update(b"hello, ");
        builder.update(b"checksum");
        assert_eq!(builder.finalize(), Checksum::compute(ChecksumType::CRC32C, b"hello, checksum"));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let data = b"a block of bytes to protect";
        let encoded = Checksum::encode_with_checksum(ChecksumType::CRC32C, data);
        let decoded = Checksum::decode_with_checksum(ChecksumType::CRC32C, &encoded).unwrap();
        assert_eq!(data.as_slice(), decoded.as_slice());
    }

    #[test]
    fn decode_detects_corruption() {
        let data = b"a block of bytes to protect";
        let mut encoded = Checksum::encode_with_checksum(ChecksumType::CRC32C, data);
        encoded[10] ^= 0xFF;
        let result = Checksum::decode_with_checksum(ChecksumType::CRC32C, &encoded);
        assert!(matches!(result.unwrap_err(), ChecksumError::Mismatch { .. }));
    }

    #[test]
    fn decode_rejects_short_or_mismatched_length() {
        assert!(Checksum::decode_with_checksum(ChecksumType::CRC32C, b"abc").is_err());
        let mut invalid = vec![0u8; 20];
        invalid[0] = 100;
        assert!(Checksum::decode_with_checksum(ChecksumType::CRC32C, &invalid).is_err());
    }

    #[test]
    fn empty_data_checksum_is_zero() {
        assert_eq!(Checksum::compute(ChecksumType::CRC32C, b""), 0);
    }

    #[test]
    fn builder_implements_write() {
        let mut builder = Checksum::builder(ChecksumType::CRC32C);
        builder.write_all(b"hello, ").unwrap();
        builder.write_all(b"checksum").unwrap();
        builder.flush().unwrap();
        assert_eq!(builder.finalize(), Checksum::compute(ChecksumType::CRC32C, b"hello, checksum"));
    }
}
