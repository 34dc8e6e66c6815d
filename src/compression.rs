//! The compression facility used for size accounting.
//!
//! The index reports both its raw and its compressed serialized size; the
//! codec is zstd at level 1, which is deterministic for a given input.

use std::io;

const ZSTD_LEVEL: i32 = 1;

/// Compresses the given bytes.
pub fn compress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    zstd::encode_all(bytes, ZSTD_LEVEL)
}

/// Uncompresses bytes previously compressed with [`compress`].
pub fn uncompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    zstd::decode_all(bytes)
}
