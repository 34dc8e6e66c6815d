//! A Cuckoo-filter-based secondary index for columnar data partitioned into
//! fixed-size stripes.
//!
//! The index answers "which stripes may contain key k?" with exact answers
//! for keys present in the data and a tunable, bounded false-positive rate
//! for absent keys, while storing far fewer bits per distinct value than
//! per-stripe filters on low-to-medium-cardinality columns. Build one with
//! [`CuckooIndex::build`] and probe it with [`CuckooIndex::stripe_contains`]
//! or [`CuckooIndex::qualifying_stripes`].
//!
//! Distinct keys are placed into a Cuckoo table via kicking; each bucket
//! stores fingerprints just long enough to stay collision free and to meet
//! the configured scan-rate target. At rest, fingerprints are grouped by
//! length into bit-packed blocks and the per-slot stripe bitmaps are
//! run-length encoded into a single global bitmap.

use thiserror::Error;

pub mod bit_packing;
pub mod bitmap;
mod byte_coding;
pub mod column;
pub mod compression;
pub mod cuckoo_index;
pub mod cuckoo_kicker;
pub mod cuckoo_utils;
pub mod fingerprint_store;
pub mod rle_bitmap;

pub use bitmap::Bitmap;
pub use column::{Column, IntColumn, NULL_SENTINEL};
pub use cuckoo_index::{CuckooAlgorithm, CuckooIndex, CuckooIndexConfig};
pub use cuckoo_utils::Fingerprint;
pub use fingerprint_store::FingerprintStore;
pub use rle_bitmap::RleBitmap;

/// Error returned when construction of the index fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The provided configuration values are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A bucket would need more than 64 fingerprint bits to become collision
    /// free or to meet the scan-rate target.
    #[error("exhausted all 64 fingerprint bits and still having collisions")]
    ExhaustedBits,
    /// The kicker kept failing even after growing the bucket count up to the
    /// safety cap.
    #[error("could not distribute values after growing to {num_buckets} buckets")]
    RetriesExhausted { num_buckets: usize },
    /// Compressing the encoded index failed.
    #[error("compression failed: {0}")]
    Compression(String),
}
