//! Hashing of keys to buckets and fingerprints, plus the scratch types used
//! while distributing values.

use std::collections::HashSet;

use xxhash_rust::xxh64::xxh64;

use crate::bitmap::Bitmap;
use crate::BuildError;

/// The seeds for the primary & secondary buckets and the fingerprint. Fixed
/// per build so that builds are reproducible.
pub const SEED_PRIMARY_BUCKET: u64 = 17;
pub const SEED_SECONDARY_BUCKET: u64 = 23;
pub const SEED_FINGERPRINT: u64 = 42;

/// Maximum load factors (occupied vs. all slots), from the Cuckoo filter
/// paper (https://www.cs.cmu.edu/~dga/papers/cuckoo-conext2014.pdf). We don't
/// use partial-key Cuckoo hashing, but empirically the kicking implementation
/// does not sustain higher load factors either.
pub const MAX_LOAD_FACTOR_1_SLOTS_PER_BUCKET: f64 = 0.49;
pub const MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET: f64 = 0.84;
pub const MAX_LOAD_FACTOR_4_SLOTS_PER_BUCKET: f64 = 0.95;
pub const MAX_LOAD_FACTOR_8_SLOTS_PER_BUCKET: f64 = 0.98;

/// Returns the empirically obtained max load factor for the given bucket
/// width, or `None` for unsupported widths.
pub fn default_max_load_factor(slots_per_bucket: usize) -> Option<f64> {
    match slots_per_bucket {
        1 => Some(MAX_LOAD_FACTOR_1_SLOTS_PER_BUCKET),
        2 => Some(MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET),
        4 => Some(MAX_LOAD_FACTOR_4_SLOTS_PER_BUCKET),
        8 => Some(MAX_LOAD_FACTOR_8_SLOTS_PER_BUCKET),
        _ => None,
    }
}

/// Returns the minimum number of buckets required to accommodate `num_values`
/// values with `slots_per_bucket` slots per bucket under `max_load_factor`.
pub fn min_num_buckets(
    num_values: usize,
    slots_per_bucket: usize,
    max_load_factor: f64,
) -> usize {
    debug_assert!(max_load_factor > 0.0 && max_load_factor < 1.0);
    ((num_values as f64 / max_load_factor) / slots_per_bucket as f64).ceil() as usize
}

/// A slot's fingerprint. Inactive slots carry no bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    /// Whether the corresponding slot in the Cuckoo table is filled.
    pub active: bool,
    /// Number of significant bits, counting from least significant.
    pub num_bits: usize,
    /// Variable-sized fingerprint using up to 64 bits. Non-significant bits
    /// must be cleared.
    pub bits: u64,
}

impl Fingerprint {
    pub const INACTIVE: Fingerprint = Fingerprint {
        active: false,
        num_bits: 0,
        bits: 0,
    };
}

/// Returns a mask with the lowest `num_bits` set.
#[inline]
pub fn fingerprint_suffix_mask(num_bits: usize) -> u64 {
    if num_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << num_bits) - 1
    }
}

/// Returns the `num_bits` suffix (lowest) bits of `fingerprint`.
#[inline]
pub fn fingerprint_suffix(fingerprint: u64, num_bits: usize) -> u64 {
    fingerprint & fingerprint_suffix_mask(num_bits)
}

/// Returns the `num_bits` prefix (highest) bits of `fingerprint`.
#[inline]
pub fn fingerprint_prefix(fingerprint: u64, num_bits: usize) -> u64 {
    if num_bits == 0 {
        0
    } else if num_bits >= 64 {
        fingerprint
    } else {
        fingerprint >> (64 - num_bits)
    }
}

/// Determines the minimum number of bits to make `fingerprints` collision
/// free, using either prefix or suffix bits. Returns 0 for fewer than two
/// fingerprints and `ExhaustedBits` if even all 64 bits collide.
pub fn min_collision_free_length(
    fingerprints: &[u64],
    use_prefix_bits: bool,
) -> Result<usize, BuildError> {
    if fingerprints.len() < 2 {
        return Ok(0);
    }
    let mut unique = HashSet::with_capacity(fingerprints.len());
    for num_bits in 1..=64 {
        unique.clear();
        let collision_free = fingerprints.iter().all(|&fp| {
            let fp_bits = if use_prefix_bits {
                fingerprint_prefix(fp, num_bits)
            } else {
                fingerprint_suffix(fp, num_bits)
            };
            unique.insert(fp_bits)
        });
        if collision_free {
            return Ok(num_bits);
        }
    }
    Err(BuildError::ExhaustedBits)
}

/// Convenience form that tries both prefix and suffix bits, preferring suffix
/// bits on ties. Returns the minimum length and whether prefix bits were
/// chosen.
pub fn min_collision_free_prefix_or_suffix(
    fingerprints: &[u64],
) -> Result<(usize, bool), BuildError> {
    let num_suffix_bits = min_collision_free_length(fingerprints, false)?;
    if num_suffix_bits <= 1 {
        // No need to check prefix bits.
        return Ok((num_suffix_bits, false));
    }
    let num_prefix_bits = min_collision_free_length(fingerprints, true)?;
    if num_suffix_bits <= num_prefix_bits {
        return Ok((num_suffix_bits, false));
    }
    Ok((num_prefix_bits, true))
}

/// Returns true if all non-empty slots of every bucket contain fingerprints
/// of the same length.
pub fn buckets_have_uniform_lengths(
    fingerprints: &[Fingerprint],
    slots_per_bucket: usize,
) -> bool {
    for bucket in fingerprints.chunks(slots_per_bucket) {
        let mut bucket_num_bits = None;
        for fp in bucket.iter().filter(|fp| fp.active) {
            match bucket_num_bits {
                None => bucket_num_bits = Some(fp.num_bits),
                Some(num_bits) if num_bits != fp.num_bits => return false,
                Some(_) => {}
            }
        }
    }
    true
}

/// Representation of a key as its two candidate buckets and 64-bit
/// fingerprint. Both buckets are derived independently of the fingerprint (no
/// partial-key Cuckoo hashing).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CuckooValue {
    pub orig_value: i32,
    pub primary_bucket: usize,
    pub secondary_bucket: usize,
    pub fingerprint: u64,
}

impl CuckooValue {
    pub fn new(value: i32, num_buckets: usize) -> Self {
        let bytes = value.to_le_bytes();
        Self {
            orig_value: value,
            primary_bucket: (xxh64(&bytes, SEED_PRIMARY_BUCKET) % num_buckets as u64) as usize,
            secondary_bucket: (xxh64(&bytes, SEED_SECONDARY_BUCKET) % num_buckets as u64) as usize,
            fingerprint: xxh64(&bytes, SEED_FINGERPRINT),
        }
    }
}

/// Scratch container used while assigning values to buckets. Also keeps the
/// values which could *not* stay in this bucket even though it was their
/// primary choice.
#[derive(Clone, Debug)]
pub struct Bucket {
    num_slots: usize,
    /// The actually assigned values, up to `num_slots` entries.
    pub slots: Vec<CuckooValue>,
    /// The values which were kicked out of the bucket even though it was
    /// their primary choice.
    pub kicked: Vec<CuckooValue>,
}

impl Bucket {
    pub fn new(num_slots: usize) -> Self {
        Self {
            num_slots,
            slots: Vec::new(),
            kicked: Vec::new(),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Returns false if the bucket is full.
    pub fn insert_value(&mut self, value: CuckooValue) -> bool {
        if self.slots.len() < self.num_slots {
            self.slots.push(value);
            return true;
        }
        false
    }

    pub fn contains_value(&self, value: &CuckooValue) -> bool {
        contains_value(&self.slots, value)
    }
}

fn contains_value(values: &[CuckooValue], value: &CuckooValue) -> bool {
    values.iter().any(|v| v.orig_value == value.orig_value)
}

/// Searches for `value` in its primary and secondary bucket. Returns
/// `Some(true)` if it resides in its primary bucket, `Some(false)` for the
/// secondary one and `None` if it is in neither.
pub fn lookup_value_in_buckets(buckets: &[Bucket], value: &CuckooValue) -> Option<bool> {
    if buckets[value.primary_bucket].contains_value(value) {
        return Some(true);
    }
    if buckets[value.secondary_bucket].contains_value(value) {
        return Some(false);
    }
    None
}

/// Derives each bucket's `kicked` list: every value placed in its secondary
/// bucket is appended to its primary bucket's list (once).
pub fn fill_kicked(values: &[CuckooValue], buckets: &mut [Bucket]) {
    for value in values {
        if lookup_value_in_buckets(buckets, value) != Some(false) {
            continue;
        }
        let kicked = &mut buckets[value.primary_bucket].kicked;
        if !contains_value(kicked, value) {
            kicked.push(*value);
        }
    }
}

/// Folds groups of `slots_per_bucket` slots of an empty-slots bitmap into a
/// per-bucket bit that is set iff all slots in the bucket are empty.
pub fn empty_buckets_bitmap(empty_slots_bitmap: &Bitmap, slots_per_bucket: usize) -> Bitmap {
    assert_eq!(empty_slots_bitmap.bits() % slots_per_bucket, 0);
    let num_buckets = empty_slots_bitmap.bits() / slots_per_bucket;
    let mut result = Bitmap::new(num_buckets);
    for bucket in 0..num_buckets {
        let first_slot = bucket * slots_per_bucket;
        let all_empty = (first_slot..first_slot + slots_per_bucket)
            .all(|slot| empty_slots_bitmap.get(slot));
        if all_empty {
            result.set(bucket, true);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_num_buckets_two_slots_per_bucket() {
        // (1 / 0.84) * 10 values / 2 slots per bucket = 5.95
        assert_eq!(
            min_num_buckets(10, 2, MAX_LOAD_FACTOR_2_SLOTS_PER_BUCKET),
            6
        );
    }

    #[test]
    fn min_num_buckets_four_slots_per_bucket() {
        // (1 / 0.95) * 10 values / 4 slots per bucket = 2.63
        assert_eq!(
            min_num_buckets(10, 4, MAX_LOAD_FACTOR_4_SLOTS_PER_BUCKET),
            3
        );
    }

    #[test]
    fn min_num_buckets_eight_slots_per_bucket() {
        // (1 / 0.98) * 10 values / 8 slots per bucket = 1.28
        assert_eq!(
            min_num_buckets(10, 8, MAX_LOAD_FACTOR_8_SLOTS_PER_BUCKET),
            2
        );
    }

    #[test]
    fn min_num_buckets_custom_load_factor() {
        assert_eq!(min_num_buckets(10, 1, 0.5), 20);
    }

    #[test]
    fn min_num_buckets_zero_values() {
        assert_eq!(min_num_buckets(0, 1, 0.5), 0);
    }

    #[test]
    fn prefix_extracts_highest_bits() {
        assert_eq!(fingerprint_prefix(0b1111u64 << 60, 0), 0b0);
        assert_eq!(fingerprint_prefix(0b1111u64 << 60, 1), 0b1);
        assert_eq!(fingerprint_prefix(0b1111u64 << 60, 2), 0b11);
        assert_eq!(fingerprint_prefix(0b1111u64 << 60, 3), 0b111);

        assert_eq!(fingerprint_prefix(0b1011u64 << 60, 0), 0b0);
        assert_eq!(fingerprint_prefix(0b1011u64 << 60, 1), 0b1);
        assert_eq!(fingerprint_prefix(0b1011u64 << 60, 2), 0b10);
        assert_eq!(fingerprint_prefix(0b1011u64 << 60, 3), 0b101);
    }

    #[test]
    fn suffix_extracts_lowest_bits() {
        assert_eq!(fingerprint_suffix(0b1011, 0), 0);
        assert_eq!(fingerprint_suffix(0b1011, 2), 0b11);
        assert_eq!(fingerprint_suffix(0b1011, 3), 0b011);
        assert_eq!(fingerprint_suffix(u64::MAX, 64), u64::MAX);
    }

    #[test]
    fn min_collision_free_length_prefers_suffix() {
        let fingerprints = vec![0b001u64, 0b011, 0b111];

        assert_eq!(min_collision_free_length(&fingerprints, false), Ok(3));
        assert_eq!(min_collision_free_length(&fingerprints, true), Ok(63));

        // The convenience form finds the same result and sticks with suffix
        // bits.
        assert_eq!(
            min_collision_free_prefix_or_suffix(&fingerprints),
            Ok((3, false))
        );
    }

    #[test]
    fn min_collision_free_length_trivial_sets() {
        assert_eq!(min_collision_free_length(&[], false), Ok(0));
        assert_eq!(min_collision_free_length(&[42], false), Ok(0));
    }

    #[test]
    fn min_collision_free_length_exhausts_on_duplicates() {
        assert_eq!(
            min_collision_free_length(&[7, 7], false),
            Err(BuildError::ExhaustedBits)
        );
    }

    #[test]
    fn uniform_length_check() {
        let fingerprints = vec![
            Fingerprint {
                active: false,
                num_bits: 1,
                bits: 0,
            },
            Fingerprint {
                active: true,
                num_bits: 1,
                bits: 0,
            },
            Fingerprint {
                active: true,
                num_bits: 2,
                bits: 0,
            },
            Fingerprint {
                active: true,
                num_bits: 2,
                bits: 0,
            },
        ];
        assert!(buckets_have_uniform_lengths(&fingerprints, 1));
        assert!(buckets_have_uniform_lengths(&fingerprints, 2));
        assert!(!buckets_have_uniform_lengths(&fingerprints, 4));
    }

    #[test]
    fn bucket_insert_value() {
        let mut bucket = Bucket::new(1);
        // First insert succeeds, second fails since the bucket is full.
        assert!(bucket.insert_value(CuckooValue::new(42, 1)));
        assert!(!bucket.insert_value(CuckooValue::new(17, 1)));
    }

    #[test]
    fn bucket_contains_value() {
        let value = CuckooValue::new(42, 1);
        let mut bucket = Bucket::new(1);
        assert!(!bucket.contains_value(&value));
        bucket.insert_value(value);
        assert!(bucket.contains_value(&value));
        assert!(!bucket.contains_value(&CuckooValue::new(17, 1)));
    }

    #[test]
    fn cuckoo_value_is_deterministic() {
        let a = CuckooValue::new(12345, 77);
        let b = CuckooValue::new(12345, 77);
        assert_eq!(a, b);
        assert!(a.primary_bucket < 77);
        assert!(a.secondary_bucket < 77);
    }

    #[test]
    fn empty_buckets_bitmap_folds_slots() {
        let empty_slots = Bitmap::from_bits(&[0, 1, 1, 1]);

        assert_eq!(
            empty_buckets_bitmap(&empty_slots, 1).true_bit_indices(),
            vec![1, 2, 3]
        );
        assert_eq!(
            empty_buckets_bitmap(&empty_slots, 2).true_bit_indices(),
            vec![1]
        );
        assert!(empty_buckets_bitmap(&empty_slots, 4)
            .true_bit_indices()
            .is_empty());
    }
}
