//! Building and querying the Cuckoo index itself.
//!
//! A build distributes the column's distinct values into buckets with the
//! kicking algorithm, picks a per-bucket fingerprint length that meets the
//! scan-rate target, and materializes two compact structures: the
//! [`FingerprintStore`] and one RLE-encoded global bitmap holding the
//! concatenated per-slot stripe bitmaps. Queries probe the primary and the
//! secondary bucket and, on a fingerprint hit, read the slot's stripe bitmap
//! out of the global bitmap.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use crate::bitmap::Bitmap;
use crate::byte_coding::put_string;
use crate::column::Column;
use crate::compression::compress;
use crate::cuckoo_kicker::CuckooKicker;
use crate::cuckoo_utils::{
    fill_kicked, fingerprint_prefix, fingerprint_suffix, min_collision_free_length,
    min_collision_free_prefix_or_suffix, min_num_buckets, Bucket, CuckooValue, Fingerprint,
};
use crate::fingerprint_store::FingerprintStore;
use crate::rle_bitmap::RleBitmap;
use crate::BuildError;

// When distributing values to buckets fails, grow the number of requested
// buckets by this factor (at least by one bucket).
const NUM_BUCKETS_GROW_FACTOR: f64 = 1.01;
// Give up once the bucket count exceeds this multiple of the initial count.
const MAX_NUM_BUCKETS_GROWTH: usize = 100;

/// How the distribution of values to their primary / secondary bucket is
/// chosen: "classically" by kicking out existing values, or with a biased
/// coin toss during the kicking procedure to increase the ratio of
/// primary-bucket placements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CuckooAlgorithm {
    Kicking,
    SkewedKicking,
}

/// Build-time parameters of a [`CuckooIndex`].
#[derive(Clone, Copy, Debug)]
pub struct CuckooIndexConfig {
    pub algorithm: CuckooAlgorithm,
    /// Upper bound on the load factor of the Cuckoo table, in (0, 1).
    pub max_load_factor: f64,
    /// Upper bound on the expected scan rate of negative lookups, in (0, 1).
    pub scan_rate: f64,
    /// Number of slots per bucket, one of {1, 2, 4, 8}.
    pub slots_per_bucket: usize,
    /// If set, uses either prefix or suffix bits of hash fingerprints on a
    /// per-bucket basis, depending on which of the two requires fewer bits to
    /// make the bucket's fingerprints collision free.
    pub prefix_bits_optimization: bool,
}

impl Default for CuckooIndexConfig {
    fn default() -> Self {
        Self {
            algorithm: CuckooAlgorithm::SkewedKicking,
            max_load_factor: crate::cuckoo_utils::MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET,
            scan_rate: 0.01,
            slots_per_bucket: 2,
            prefix_bits_optimization: false,
        }
    }
}

/// An immutable secondary index answering "which stripes may contain key k?"
/// with exact answers for present keys and a bounded false-positive rate for
/// absent ones.
pub struct CuckooIndex {
    num_buckets: usize,
    slots_per_bucket: usize,
    num_stripes: usize,
    fingerprint_store: FingerprintStore,
    // Indicates per bucket whether prefix or suffix bits of hash fingerprints
    // were used. Only present under the prefix-bits optimization.
    use_prefix_bits_bitmap: Option<Bitmap>,
    // The concatenated stripe bitmaps of all active slots, in slot order.
    global_slot_bitmap: RleBitmap,
    encoded: Vec<u8>,
    compressed_byte_size: usize,
}

impl CuckooIndex {
    /// Builds an index over `column` with stripes of `num_rows_per_stripe`
    /// rows. Trailing rows that do not fill a whole stripe are ignored.
    pub fn build<C: Column + ?Sized>(
        column: &C,
        num_rows_per_stripe: usize,
        config: &CuckooIndexConfig,
    ) -> Result<Self, BuildError> {
        validate_config(num_rows_per_stripe, config)?;

        let num_stripes = column.len() / num_rows_per_stripe;
        let mut value_to_bitmap = value_to_stripe_bitmaps(column, num_rows_per_stripe, num_stripes);

        // The distinct values are drawn from the stripe-bitmap map (rows
        // beyond the last full stripe must not contribute) and sorted so that
        // the build is deterministic.
        let mut distinct_values: Vec<i32> = value_to_bitmap.keys().copied().collect();
        distinct_values.sort_unstable();
        debug!(
            num_rows = column.len(),
            num_stripes,
            num_distinct_values = distinct_values.len(),
            "building cuckoo index"
        );

        let buckets = distribute(&distinct_values, config)?;
        let num_buckets = buckets.len();

        let slots = create_slots(
            config,
            &buckets,
            &mut value_to_bitmap,
            num_buckets,
        )?;
        // Release the transient map before materializing the persistent
        // state; it typically dominates the build's memory peak.
        drop(value_to_bitmap);
        drop(buckets);

        let fingerprint_store = FingerprintStore::new(
            &slots.fingerprints,
            config.slots_per_bucket,
            /*use_rle_block_bitmaps=*/ false,
        );

        let global_bitmap = Bitmap::concat(slots.bitmaps.iter().map(Option::as_ref));
        let global_slot_bitmap = RleBitmap::new(&global_bitmap);

        let encoded = encode(
            &fingerprint_store,
            config.prefix_bits_optimization,
            slots.use_prefix_bits_bitmap.as_ref(),
            &global_slot_bitmap,
        );
        let compressed_byte_size = compress(&encoded)
            .map_err(|e| BuildError::Compression(e.to_string()))?
            .len();
        debug!(
            byte_size = encoded.len(),
            compressed_byte_size, "encoded cuckoo index"
        );

        Ok(Self {
            num_buckets,
            slots_per_bucket: config.slots_per_bucket,
            num_stripes,
            fingerprint_store,
            use_prefix_bits_bitmap: slots.use_prefix_bits_bitmap,
            global_slot_bitmap,
            encoded,
            compressed_byte_size,
        })
    }

    /// Builds one index per column, in parallel. The columns share the stripe
    /// size and configuration; builds are independent of each other.
    pub fn build_all<C: Column + Sync>(
        columns: &[C],
        num_rows_per_stripe: usize,
        config: &CuckooIndexConfig,
    ) -> Result<Vec<Self>, BuildError> {
        columns
            .par_iter()
            .map(|column| Self::build(column, num_rows_per_stripe, config))
            .collect()
    }

    /// Returns whether stripe `stripe_id` may contain `value`. Exact for
    /// values present in the indexed column; false positives are possible
    /// only for absent values.
    pub fn stripe_contains(&self, stripe_id: usize, value: i32) -> bool {
        assert!(stripe_id < self.num_stripes, "stripe id out of range");
        let val = CuckooValue::new(value, self.num_buckets);
        let slot = match self
            .bucket_contains(val.primary_bucket, val.fingerprint)
            .or_else(|| self.bucket_contains(val.secondary_bucket, val.fingerprint))
        {
            Some(slot) => slot,
            None => return false,
        };

        // Empty slots have no bitmap in the global bitmap, so the slot index
        // is first projected onto the active slots.
        let active_slot = self.active_slot_rank(slot);
        self.global_slot_bitmap
            .get(self.num_stripes * active_slot + stripe_id)
    }

    /// Returns the bitmap of stripes that may contain `value` (all zeros if
    /// the value hits no fingerprint).
    pub fn qualifying_stripes(&self, value: i32) -> Bitmap {
        let val = CuckooValue::new(value, self.num_buckets);
        let slot = match self
            .bucket_contains(val.primary_bucket, val.fingerprint)
            .or_else(|| self.bucket_contains(val.secondary_bucket, val.fingerprint))
        {
            Some(slot) => slot,
            None => return Bitmap::new(self.num_stripes),
        };
        let active_slot = self.active_slot_rank(slot);
        self.global_slot_bitmap
            .extract(self.num_stripes * active_slot, self.num_stripes)
    }

    pub fn num_stripes(&self) -> usize {
        self.num_stripes
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn slots_per_bucket(&self) -> usize {
        self.slots_per_bucket
    }

    /// The serialized representation of the index.
    pub fn data(&self) -> &[u8] {
        &self.encoded
    }

    /// Size of the serialized representation.
    pub fn byte_size(&self) -> usize {
        self.encoded.len()
    }

    /// Size of the compressed serialized representation.
    pub fn compressed_byte_size(&self) -> usize {
        self.compressed_byte_size
    }

    /// Number of slots holding a fingerprint.
    pub fn active_slots(&self) -> usize {
        (0..self.fingerprint_store.num_slots())
            .filter(|&slot| self.fingerprint_store.get_fingerprint(slot).active)
            .count()
    }

    // Probes all slots of `bucket` for the given 64-bit fingerprint, taking
    // only the per-slot significant bits into account. Returns the matching
    // slot, if any.
    fn bucket_contains(&self, bucket: usize, fingerprint: u64) -> Option<usize> {
        let use_prefix_bits = self
            .use_prefix_bits_bitmap
            .as_ref()
            .is_some_and(|bitmap| bitmap.get(bucket));
        for slot in bucket * self.slots_per_bucket..(bucket + 1) * self.slots_per_bucket {
            let fp = self.fingerprint_store.get_fingerprint(slot);
            if !fp.active {
                continue;
            }
            let probe_bits = if use_prefix_bits {
                fingerprint_prefix(fingerprint, fp.num_bits)
            } else {
                fingerprint_suffix(fingerprint, fp.num_bits)
            };
            if fp.bits == probe_bits {
                return Some(slot);
            }
        }
        None
    }

    // Maps a slot index to its rank among the non-empty slots.
    fn active_slot_rank(&self, slot: usize) -> usize {
        slot - self.fingerprint_store.empty_slots_bitmap().rank(slot)
    }
}

fn validate_config(
    num_rows_per_stripe: usize,
    config: &CuckooIndexConfig,
) -> Result<(), BuildError> {
    if num_rows_per_stripe == 0 {
        return Err(BuildError::InvalidConfig(
            "num_rows_per_stripe must be greater than 0",
        ));
    }
    if !(config.max_load_factor > 0.0 && config.max_load_factor < 1.0) {
        return Err(BuildError::InvalidConfig(
            "max_load_factor must be in (0, 1)",
        ));
    }
    if !(config.scan_rate > 0.0 && config.scan_rate < 1.0) {
        return Err(BuildError::InvalidConfig("scan_rate must be in (0, 1)"));
    }
    if !matches!(config.slots_per_bucket, 1 | 2 | 4 | 8) {
        return Err(BuildError::InvalidConfig(
            "slots_per_bucket must be one of 1, 2, 4 or 8",
        ));
    }
    Ok(())
}

// Returns a map from values to their stripe bitmaps. Rows beyond the last
// full stripe are ignored.
fn value_to_stripe_bitmaps<C: Column + ?Sized>(
    column: &C,
    num_rows_per_stripe: usize,
    num_stripes: usize,
) -> HashMap<i32, Bitmap> {
    let num_rows = num_stripes * num_rows_per_stripe;
    let mut bitmaps: HashMap<i32, Bitmap> = HashMap::new();
    for row in 0..num_rows {
        bitmaps
            .entry(column.get(row))
            .or_insert_with(|| Bitmap::new(num_stripes))
            .set(row / num_rows_per_stripe, true);
    }
    bitmaps
}

// Distributes the distinct values to buckets, retrying with a grown bucket
// count whenever the kicker gives up.
fn distribute(distinct_values: &[i32], config: &CuckooIndexConfig) -> Result<Vec<Bucket>, BuildError> {
    let initial_num_buckets = min_num_buckets(
        distinct_values.len(),
        config.slots_per_bucket,
        config.max_load_factor,
    )
    .max(1);
    let mut num_buckets = initial_num_buckets;
    loop {
        debug!(
            num_values = distinct_values.len(),
            num_buckets,
            slots_per_bucket = config.slots_per_bucket,
            load_factor = distinct_values.len() as f64
                / (num_buckets * config.slots_per_bucket) as f64,
            "attempting to distribute values"
        );
        let values: Vec<CuckooValue> = distinct_values
            .iter()
            .map(|&value| CuckooValue::new(value, num_buckets))
            .collect();
        let mut buckets = vec![Bucket::new(config.slots_per_bucket); num_buckets];
        let skew_kicking = config.algorithm == CuckooAlgorithm::SkewedKicking;
        let mut kicker = CuckooKicker::new(config.slots_per_bucket, &mut buckets, skew_kicking);
        if kicker.insert_values(&values) {
            // Record for every value that stayed in its secondary bucket that
            // its primary bucket "kicked" it; the kicked lists feed the
            // per-bucket fingerprint lengths.
            fill_kicked(&values, &mut buckets);
            return Ok(buckets);
        }
        num_buckets =
            ((num_buckets as f64 * NUM_BUCKETS_GROW_FACTOR) as usize).max(num_buckets + 1);
        if num_buckets > initial_num_buckets.saturating_mul(MAX_NUM_BUCKETS_GROWTH) {
            return Err(BuildError::RetriesExhausted { num_buckets });
        }
    }
}

struct Slots {
    fingerprints: Vec<Fingerprint>,
    use_prefix_bits_bitmap: Option<Bitmap>,
    bitmaps: Vec<Option<Bitmap>>,
}

// Computes the minimum usable fingerprint length per bucket, extends it until
// the expected scan rate of the bucket meets the target, and fills the slot
// fingerprints accordingly. Moves the stripe bitmaps of placed values from
// `value_to_bitmap` into slot order.
fn create_slots(
    config: &CuckooIndexConfig,
    buckets: &[Bucket],
    value_to_bitmap: &mut HashMap<i32, Bitmap>,
    num_buckets: usize,
) -> Result<Slots, BuildError> {
    let slots_per_bucket = config.slots_per_bucket;
    let num_slots = num_buckets * slots_per_bucket;
    let num_empty_buckets = buckets.iter().filter(|b| b.slots.is_empty()).count();
    let bucket_density = 1.0 - num_empty_buckets as f64 / num_buckets as f64;

    let mut slots = Slots {
        fingerprints: vec![Fingerprint::INACTIVE; num_slots],
        use_prefix_bits_bitmap: config
            .prefix_bits_optimization
            .then(|| Bitmap::new(num_buckets)),
        bitmaps: (0..num_slots).map(|_| None).collect(),
    };

    for (bucket_id, bucket) in buckets.iter().enumerate() {
        // Start from the minimum number of bits that keeps the fingerprints
        // of all values contained in this bucket, or kicked from it (it was
        // their primary choice), collision free.
        let possibly_colliding_fingerprints: Vec<u64> = bucket
            .slots
            .iter()
            .chain(bucket.kicked.iter())
            .map(|value| value.fingerprint)
            .collect();
        let (mut num_bits, use_prefix_bits) = if config.prefix_bits_optimization {
            let (num_bits, use_prefix_bits) =
                min_collision_free_prefix_or_suffix(&possibly_colliding_fingerprints)?;
            if let Some(bitmap) = &mut slots.use_prefix_bits_bitmap {
                bitmap.set(bucket_id, use_prefix_bits);
            }
            (num_bits, use_prefix_bits)
        } else {
            (
                min_collision_free_length(&possibly_colliding_fingerprints, false)?,
                false,
            )
        };

        // Now add more bits if needed to reach the desired scan rate. The
        // local scan rates of the bucket's items are averaged (a lookup can
        // match at most one fingerprint, so over many lookups the scan rate
        // averages out), then adjusted for the share of non-empty buckets and
        // for the fact that a lookup may probe two buckets.
        if !bucket.slots.is_empty() {
            loop {
                let fp_prob = 1.0 / 2f64.powi(num_bits as i32);
                let sum_scan_rate: f64 = bucket
                    .slots
                    .iter()
                    .map(|value| {
                        let bitmap = &value_to_bitmap[&value.orig_value];
                        fp_prob * bitmap.ones_count() as f64 / bitmap.bits() as f64
                    })
                    .sum();
                let actual_scan_rate =
                    sum_scan_rate / bucket.slots.len() as f64 * bucket_density * 2.0;
                if actual_scan_rate <= config.scan_rate {
                    break;
                }
                if num_bits >= 64 {
                    return Err(BuildError::ExhaustedBits);
                }
                num_bits += 1;
            }
        }

        // The bucket's length is settled; set the actual slots.
        for i in 0..slots_per_bucket {
            let slot = bucket_id * slots_per_bucket + i;
            if let Some(value) = bucket.slots.get(i) {
                let bits = if use_prefix_bits {
                    fingerprint_prefix(value.fingerprint, num_bits)
                } else {
                    fingerprint_suffix(value.fingerprint, num_bits)
                };
                slots.fingerprints[slot] = Fingerprint {
                    active: true,
                    num_bits,
                    bits,
                };
                slots.bitmaps[slot] = value_to_bitmap.remove(&value.orig_value);
            }
        }
    }
    Ok(slots)
}

// The serialized representation: the fingerprint store, a flag byte for the
// prefix-bits optimization (followed by the per-bucket prefix/suffix bitmap
// if set), and the RLE-encoded global slot bitmap.
fn encode(
    fingerprint_store: &FingerprintStore,
    prefix_bits_optimization: bool,
    use_prefix_bits_bitmap: Option<&Bitmap>,
    global_slot_bitmap: &RleBitmap,
) -> Vec<u8> {
    let mut out = Vec::new();
    put_string(&fingerprint_store.encode(false), &mut out);
    out.push(prefix_bits_optimization as u8);
    if prefix_bits_optimization {
        if let Some(bitmap) = use_prefix_bits_bitmap {
            put_string(RleBitmap::new(bitmap).data(), &mut out);
        }
    }
    put_string(global_slot_bitmap.data(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::IntColumn;
    use crate::cuckoo_utils::MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET;

    const NUM_ROWS: usize = 300;
    const NUM_ROWS_PER_STRIPE: usize = 3;
    const NUM_NEGATIVE_LOOKUPS: i32 = 10_000;

    // Returns a column with `num_rows` entries and `num_values` different
    // values, set in runs of `num_rows / num_values` rows per value.
    fn fill_column(num_rows: usize, num_values: usize) -> IntColumn {
        assert!(num_values > 0 && num_rows >= num_values);
        let factor = num_rows / num_values;
        let data: Vec<i32> = (0..num_rows).map(|i| (i / factor) as i32).collect();
        IntColumn::new("int-column", data)
    }

    fn test_config(algorithm: CuckooAlgorithm, scan_rate: f64) -> CuckooIndexConfig {
        CuckooIndexConfig {
            algorithm,
            max_load_factor: MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET,
            scan_rate,
            slots_per_bucket: 2,
            prefix_bits_optimization: false,
        }
    }

    // Checks that lookups of all existing values are exact, for all stripes.
    fn check_positive_lookups(column: &IntColumn, index: &CuckooIndex) {
        let num_stripes = column.len() / NUM_ROWS_PER_STRIPE;
        for value in column.distinct_values() {
            for stripe_id in 0..num_stripes {
                assert_eq!(
                    index.stripe_contains(stripe_id, value),
                    column.stripe_contains(NUM_ROWS_PER_STRIPE, stripe_id, value),
                    "value {} in stripe {}",
                    value,
                    stripe_id
                );
            }
        }
    }

    // Returns the average scan rate over NUM_NEGATIVE_LOOKUPS lookups of
    // values that are absent from `column`.
    fn scan_rate_negative_lookups(column: &IntColumn, index: &CuckooIndex) -> f64 {
        let num_stripes = column.len() / NUM_ROWS_PER_STRIPE;
        let start = column.max().expect("non-empty column") + 1;
        let mut num_false_positive_stripes = 0usize;
        for value in start..start + NUM_NEGATIVE_LOOKUPS {
            num_false_positive_stripes += index.qualifying_stripes(value).ones_count();
        }
        num_false_positive_stripes as f64 / (num_stripes * NUM_NEGATIVE_LOOKUPS as usize) as f64
    }

    fn positive_lookups(num_values: usize, prefix_bits_optimization: bool) {
        let column = fill_column(NUM_ROWS, num_values);
        for algorithm in [CuckooAlgorithm::Kicking, CuckooAlgorithm::SkewedKicking] {
            let config = CuckooIndexConfig {
                prefix_bits_optimization,
                ..test_config(algorithm, 0.05)
            };
            let index = CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config)
                .expect("index should build");
            check_positive_lookups(&column, &index);
        }
    }

    fn negative_lookups(num_values: usize, prefix_bits_optimization: bool) {
        let column = fill_column(NUM_ROWS, num_values);
        let config = CuckooIndexConfig {
            prefix_bits_optimization,
            ..test_config(CuckooAlgorithm::Kicking, 0.1)
        };
        let index =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        let scan_rate = scan_rate_negative_lookups(&column, &index);
        assert!(scan_rate <= 0.101, "scan rate {} exceeds bound", scan_rate);
        assert!(scan_rate > 0.0);
    }

    #[test]
    fn positive_lookups_single_value() {
        positive_lookups(1, false);
    }

    #[test]
    fn positive_lookups_single_value_with_prefix_bits() {
        positive_lookups(1, true);
    }

    #[test]
    fn negative_lookups_single_value() {
        negative_lookups(1, false);
    }

    #[test]
    fn negative_lookups_single_value_with_prefix_bits() {
        negative_lookups(1, true);
    }

    #[test]
    fn positive_lookups_few_values() {
        positive_lookups(30, false);
    }

    #[test]
    fn positive_lookups_few_values_with_prefix_bits() {
        positive_lookups(30, true);
    }

    #[test]
    fn negative_lookups_few_values() {
        negative_lookups(30, false);
    }

    #[test]
    fn negative_lookups_few_values_with_prefix_bits() {
        negative_lookups(30, true);
    }

    #[test]
    fn positive_lookups_all_uniques() {
        positive_lookups(NUM_ROWS, false);
    }

    #[test]
    fn positive_lookups_all_uniques_with_prefix_bits() {
        positive_lookups(NUM_ROWS, true);
    }

    #[test]
    fn negative_lookups_all_uniques() {
        negative_lookups(NUM_ROWS, false);
    }

    #[test]
    fn negative_lookups_tighter_scan_rate() {
        let column = fill_column(NUM_ROWS, 30);
        let config = test_config(CuckooAlgorithm::Kicking, 0.05);
        let index =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        let scan_rate = scan_rate_negative_lookups(&column, &index);
        assert!(scan_rate <= 0.0505, "scan rate {} exceeds bound", scan_rate);
    }

    #[test]
    fn exactness_on_trivial_column() {
        let column = IntColumn::new("trivial", vec![1, 2, 3, 4]);
        let config = CuckooIndexConfig {
            algorithm: CuckooAlgorithm::SkewedKicking,
            max_load_factor: 0.49,
            scan_rate: 0.1,
            slots_per_bucket: 1,
            prefix_bits_optimization: false,
        };
        let index = CuckooIndex::build(&column, 2, &config).expect("index should build");
        assert_eq!(index.num_stripes(), 2);
        assert!(index.stripe_contains(0, 1));
        assert!(index.stripe_contains(0, 2));
        assert!(index.stripe_contains(1, 3));
        assert!(index.stripe_contains(1, 4));
        // Present keys are exact, so looking them up in the wrong stripe must
        // come back negative.
        assert!(!index.stripe_contains(0, 3));
        assert!(!index.stripe_contains(1, 1));
    }

    #[test]
    fn last_stripe_dropped() {
        // Only one full stripe of 3 rows fits; the 4th row is ignored, which
        // leaves 3 indexed values.
        let column = IntColumn::new("short", vec![0, 1, 2, 3]);
        let config = test_config(CuckooAlgorithm::Kicking, 0.1);
        let index = CuckooIndex::build(&column, 3, &config).expect("index should build");
        assert_eq!(index.num_stripes(), 1);
        assert_eq!(index.active_slots(), 3);
    }

    #[test]
    fn deterministic_build() {
        let column = fill_column(NUM_ROWS, 30);
        let config = test_config(CuckooAlgorithm::SkewedKicking, 0.05);
        let index1 =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        let index2 =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        assert_eq!(index1.data(), index2.data());
        assert_eq!(index1.byte_size(), index2.byte_size());
        assert_eq!(index1.compressed_byte_size(), index2.compressed_byte_size());
        for value in column.distinct_values() {
            for stripe_id in 0..index1.num_stripes() {
                assert_eq!(
                    index1.stripe_contains(stripe_id, value),
                    index2.stripe_contains(stripe_id, value)
                );
            }
        }
    }

    #[test]
    fn qualifying_stripes_matches_point_lookups() {
        let column = fill_column(NUM_ROWS, 30);
        let config = test_config(CuckooAlgorithm::SkewedKicking, 0.05);
        let index =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        for value in column.distinct_values() {
            let stripes = index.qualifying_stripes(value);
            assert_eq!(stripes.bits(), index.num_stripes());
            for stripe_id in 0..index.num_stripes() {
                assert_eq!(stripes.get(stripe_id), index.stripe_contains(stripe_id, value));
            }
        }
    }

    #[test]
    fn empty_column_builds() {
        let column = IntColumn::new("empty", vec![1, 2]);
        let config = test_config(CuckooAlgorithm::Kicking, 0.1);
        // 2 rows with 10 rows per stripe: no full stripe, nothing indexed.
        let index = CuckooIndex::build(&column, 10, &config).expect("index should build");
        assert_eq!(index.num_stripes(), 0);
        assert_eq!(index.active_slots(), 0);
        assert!(index.qualifying_stripes(1).is_all_zeroes());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let column = fill_column(30, 3);
        let mut config = test_config(CuckooAlgorithm::Kicking, 0.1);
        config.slots_per_bucket = 3;
        assert!(matches!(
            CuckooIndex::build(&column, 3, &config),
            Err(BuildError::InvalidConfig(_))
        ));

        let mut config = test_config(CuckooAlgorithm::Kicking, 0.1);
        config.scan_rate = 0.0;
        assert!(matches!(
            CuckooIndex::build(&column, 3, &config),
            Err(BuildError::InvalidConfig(_))
        ));

        let config = test_config(CuckooAlgorithm::Kicking, 0.1);
        assert!(matches!(
            CuckooIndex::build(&column, 0, &config),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn build_all_builds_every_column() {
        let columns = vec![fill_column(NUM_ROWS, 10), fill_column(NUM_ROWS, 30)];
        let config = test_config(CuckooAlgorithm::Kicking, 0.1);
        let indexes = CuckooIndex::build_all(&columns, NUM_ROWS_PER_STRIPE, &config)
            .expect("indexes should build");
        assert_eq!(indexes.len(), 2);
        for (column, index) in columns.iter().zip(&indexes) {
            check_positive_lookups(column, index);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(8))]

            // Whatever the column looks like, a present key must be reported
            // in every stripe that actually contains it.
            #[test]
            fn no_false_negatives(
                data in proptest::collection::vec(0i32..50, 30..200),
                num_rows_per_stripe in 1usize..10,
            ) {
                let column = IntColumn::new("random", data);
                let config = test_config(CuckooAlgorithm::SkewedKicking, 0.1);
                let index = CuckooIndex::build(&column, num_rows_per_stripe, &config)
                    .expect("index should build");
                for value in column.distinct_values() {
                    for stripe_id in 0..index.num_stripes() {
                        if column.stripe_contains(num_rows_per_stripe, stripe_id, value) {
                            prop_assert!(index.stripe_contains(stripe_id, value));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn four_slots_per_bucket() {
        let column = fill_column(NUM_ROWS, 60);
        let config = CuckooIndexConfig {
            algorithm: CuckooAlgorithm::SkewedKicking,
            max_load_factor: 0.95,
            scan_rate: 0.05,
            slots_per_bucket: 4,
            prefix_bits_optimization: false,
        };
        let index =
            CuckooIndex::build(&column, NUM_ROWS_PER_STRIPE, &config).expect("index should build");
        check_positive_lookups(&column, &index);
    }
}
