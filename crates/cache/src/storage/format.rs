//! Storage frame format shared by every blobstore backend
//!
//! Each stored object is a bincode [`FrameHeader`] followed by the payload.
//! The payload is zstd-compressed when compression is enabled and the blob
//! is at least `min_size` bytes. Both the header and the payload carry a
//! CRC32C so that corruption is detected on read regardless of backend.

use super::compression::CompressionConfig;
use crc32c::crc32c;
use remcache_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use zstd::stream::{decode_all as zstd_decode, encode_all as zstd_encode};

/// Magic number for stored frames: "RCAC"
pub const FRAME_MAGIC: u32 = 0x5243_4143;

/// Current frame format version
pub const FRAME_VERSION: u16 = 1;

/// Default zstd compression level (3 = fast with good compression)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Binary header written in front of every stored payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[repr(C)]
pub struct FrameHeader {
    /// Magic number for validation
    magic: u32,
    /// Frame format version
    version: u16,
    /// Flags (bit 0: compressed)
    flags: u16,
    /// CRC32C of the header (excluding this field)
    header_crc: u32,
    /// Seconds since the epoch when written
    timestamp: u64,
    /// Length of the original blob
    uncompressed_size: u64,
    /// Length of the payload following the header
    stored_size: u64,
    /// CRC32C of the payload
    data_crc: u32,
}

impl FrameHeader {
    const FLAG_COMPRESSED: u16 = 1 << 0;

    fn new(uncompressed_size: u64, stored_size: u64, data_crc: u32, compressed: bool) -> Self {
        let mut header = Self {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            flags: if compressed { Self::FLAG_COMPRESSED } else { 0 },
            header_crc: 0,
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uncompressed_size,
            stored_size,
            data_crc,
        };

        header.header_crc = header.calculate_crc();
        header
    }

    fn calculate_crc(&self) -> u32 {
        let mut temp = *self;
        temp.header_crc = 0;

        match bincode::serialize(&temp) {
            Ok(bytes) => crc32c(&bytes),
            Err(_) => 0,
        }
    }

    fn validate(&self, key: &str) -> Result<()> {
        if self.magic != FRAME_MAGIC {
            return Err(Error::corrupt(
                key,
                format!(
                    "invalid magic number: expected {:08x}, got {:08x}",
                    FRAME_MAGIC, self.magic
                ),
            ));
        }

        if self.version > FRAME_VERSION {
            return Err(Error::corrupt(
                key,
                format!("unsupported frame version {}", self.version),
            ));
        }

        let expected_crc = self.calculate_crc();
        if self.header_crc != expected_crc {
            return Err(Error::corrupt(
                key,
                format!(
                    "header CRC mismatch: expected {:08x}, got {:08x}",
                    expected_crc, self.header_crc
                ),
            ));
        }

        Ok(())
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & Self::FLAG_COMPRESSED != 0
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Encoded header length; fixed because every field is fixed-width
    fn encoded_len() -> usize {
        // 4 + 2 + 2 + 4 + 8 + 8 + 8 + 4
        40
    }
}

/// Wrap a blob in a frame, compressing it when configured to
pub fn encode_frame(key: &str, data: &[u8], compression: &CompressionConfig) -> Result<Vec<u8>> {
    let should_compress = compression.enabled && data.len() >= compression.min_size;

    let compressed;
    let payload: &[u8] = if should_compress {
        compressed = zstd_encode(data, compression.level)
            .map_err(|e| Error::unknown(format!("failed to compress '{key}'"), e))?;
        tracing::trace!(
            key,
            original = data.len(),
            compressed = compressed.len(),
            "compressed frame payload"
        );
        &compressed
    } else {
        data
    };

    let header = FrameHeader::new(
        data.len() as u64,
        payload.len() as u64,
        crc32c(payload),
        should_compress,
    );

    let header_bytes = bincode::serialize(&header)
        .map_err(|e| Error::unknown(format!("failed to encode frame header for '{key}'"), e))?;

    let mut output = Vec::with_capacity(header_bytes.len() + payload.len());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(payload);
    Ok(output)
}

/// Validate a stored frame and return the original blob
pub fn decode_frame(key: &str, frame: &[u8]) -> Result<Vec<u8>> {
    let header_len = FrameHeader::encoded_len();
    if frame.len() < header_len {
        return Err(Error::corrupt(
            key,
            format!("frame of {} bytes is shorter than its header", frame.len()),
        ));
    }

    let header: FrameHeader = bincode::deserialize(&frame[..header_len])
        .map_err(|e| Error::corrupt(key, format!("undecodable frame header: {e}")))?;
    header.validate(key)?;

    let payload = &frame[header_len..];
    if payload.len() as u64 != header.stored_size {
        return Err(Error::corrupt(
            key,
            format!(
                "payload is {} bytes, header declares {}",
                payload.len(),
                header.stored_size
            ),
        ));
    }

    let actual_crc = crc32c(payload);
    if actual_crc != header.data_crc {
        return Err(Error::corrupt(
            key,
            format!(
                "data CRC mismatch: expected {:08x}, got {:08x}",
                header.data_crc, actual_crc
            ),
        ));
    }

    let data = if header.is_compressed() {
        zstd_decode(payload)
            .map_err(|e| Error::corrupt(key, format!("failed to decompress payload: {e}")))?
    } else {
        payload.to_vec()
    };

    if data.len() as u64 != header.uncompressed_size() {
        return Err(Error::corrupt(
            key,
            format!(
                "decoded {} bytes, header declares {}",
                data.len(),
                header.uncompressed_size()
            ),
        ));
    }

    Ok(data)
}
