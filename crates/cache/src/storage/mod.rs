//! On-storage representation shared by every blobstore backend
//!
//! - Storage keys sharded by digest prefix and partitioned by instance
//! - Binary frame header with bincode serialization
//! - Zstd compression for payloads above a size threshold
//! - CRC32C checksums for corruption detection

mod compression;
mod format;
mod keys;

pub use compression::CompressionConfig;
pub use format::{decode_frame, encode_frame, FrameHeader, DEFAULT_COMPRESSION_LEVEL, FRAME_MAGIC, FRAME_VERSION};
pub use keys::BlobKey;
