//! The kicking placement algorithm that distributes values into buckets.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::cuckoo_utils::{Bucket, CuckooValue};

/// Maximum number of kicks allowed before an insertion fails.
pub const DEFAULT_MAX_KICKS: usize = 50_000;

// The RNG seed is fixed so that builds are reproducible.
const KICKER_RNG_SEED: u64 = 42;

/// Used to skew the kicking procedure towards items that reside in their
/// secondary bucket (by using a value greater than 1.0). Skewed kicking
/// affects build performance and may lead to build failures. The constants
/// were obtained empirically using a random test set of 1M items.
pub const KICK_SKEW_FACTOR_1_SLOTS_PER_BUCKET: f64 = 1.1;
pub const KICK_SKEW_FACTOR_2_SLOTS_PER_BUCKET: f64 = 16.0;
pub const KICK_SKEW_FACTOR_4_SLOTS_PER_BUCKET: f64 = 128.0;
pub const KICK_SKEW_FACTOR_8_SLOTS_PER_BUCKET: f64 = 1024.0;

fn kick_skew_factor(slots_per_bucket: usize) -> f64 {
    match slots_per_bucket {
        1 => KICK_SKEW_FACTOR_1_SLOTS_PER_BUCKET,
        2 => KICK_SKEW_FACTOR_2_SLOTS_PER_BUCKET,
        4 => KICK_SKEW_FACTOR_4_SLOTS_PER_BUCKET,
        8 => KICK_SKEW_FACTOR_8_SLOTS_PER_BUCKET,
        // Unsupported widths fall back to unbiased kicking.
        _ => 1.0,
    }
}

/// Distributes values to buckets using the kicking algorithm.
///
/// Skewed kicking may lead to a smaller index (items in secondary buckets
/// affect the minimum fingerprint lengths of their primary buckets) and makes
/// positive lookups more likely to hit the primary bucket, at the price of
/// longer builds and possible build failures.
pub struct CuckooKicker<'a> {
    rng: ChaCha8Rng,
    slots_per_bucket: usize,
    buckets: &'a mut [Bucket],
    skew_kicking: bool,
    kick_skew_factor: f64,
    max_kicks: usize,

    // ** Statistics.
    max_kicks_observed: usize,
    successful_inserts: usize,
}

impl<'a> CuckooKicker<'a> {
    pub fn new(slots_per_bucket: usize, buckets: &'a mut [Bucket], skew_kicking: bool) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(KICKER_RNG_SEED),
            slots_per_bucket,
            buckets,
            skew_kicking,
            kick_skew_factor: kick_skew_factor(slots_per_bucket),
            max_kicks: DEFAULT_MAX_KICKS,
            max_kicks_observed: 0,
            successful_inserts: 0,
        }
    }

    /// Attempts to place every value in its primary or secondary bucket.
    /// Returns false if some value couldn't be placed within `max_kicks`
    /// kicks.
    pub fn insert_values(&mut self, values: &[CuckooValue]) -> bool {
        for value in values {
            if !self.insert_value_with_kicking(*value) {
                return false;
            }
            self.successful_inserts += 1;
        }
        debug!(
            slots_per_bucket = self.slots_per_bucket,
            max_kicks_observed = self.max_kicks_observed,
            successful_inserts = self.successful_inserts,
            load_factor = self.successful_inserts as f64
                / (self.buckets.len() * self.slots_per_bucket) as f64,
            "kicker finished"
        );
        true
    }

    pub fn max_kicks_observed(&self) -> usize {
        self.max_kicks_observed
    }

    // Tries to insert `value`, kicking existing occupants if both buckets are
    // full. Does not check for duplicates (duplicate fingerprints would only
    // occur on a 64-bit hash collision and are handled when determining
    // per-bucket fingerprint lengths).
    fn insert_value_with_kicking(&mut self, value: CuckooValue) -> bool {
        if self.buckets[value.primary_bucket].insert_value(value) {
            return true;
        }
        if self.buckets[value.secondary_bucket].insert_value(value) {
            return true;
        }

        // Both buckets are full, enter the kick loop.
        let mut in_flight = value;
        for num_kicks in 0..=self.max_kicks {
            if self.insert_value_with_kick(&mut in_flight) {
                self.max_kicks_observed = self.max_kicks_observed.max(num_kicks);
                return true;
            }
        }
        false
    }

    // Performs a single kick. Returns true if the displaced value could be
    // inserted into its alternative bucket; otherwise the displaced value
    // becomes the new in-flight value.
    fn insert_value_with_kick(&mut self, in_flight: &mut CuckooValue) -> bool {
        let (victim, victim_bucket_idx) = self.swap_with_random_value(*in_flight);

        let alternative_bucket_idx = if victim_bucket_idx == victim.primary_bucket {
            victim.secondary_bucket
        } else {
            victim.primary_bucket
        };
        if self.buckets[alternative_bucket_idx].insert_value(victim) {
            return true;
        }
        *in_flight = victim;
        false
    }

    // Swaps `value` with a victim inside its primary or secondary bucket.
    // Both buckets must be full.
    fn swap_with_random_value(&mut self, value: CuckooValue) -> (CuckooValue, usize) {
        debug_assert_eq!(
            self.buckets[value.primary_bucket].slots.len(),
            self.slots_per_bucket
        );
        debug_assert_eq!(
            self.buckets[value.secondary_bucket].slots.len(),
            self.slots_per_bucket
        );

        if !self.skew_kicking {
            return self.swap_with_uniform_victim(value);
        }

        let num_slots_both_buckets = 2 * self.slots_per_bucket;
        let num_in_secondary = self.num_secondary_items(value.primary_bucket)
            + self.num_secondary_items(value.secondary_bucket);
        if num_in_secondary == 0 || num_in_secondary == num_slots_both_buckets {
            // Can't perform a skewed kick, just kick any item.
            return self.swap_with_uniform_victim(value);
        }
        let num_in_primary = num_slots_both_buckets - num_in_secondary;

        // Weigh the probability by the ratio of items in secondary vs. primary
        // residence, so that under a skew factor of 1.0 every item is equally
        // likely to be kicked (we first pick the set, then a victim within
        // it), then apply the skew factor on top.
        let secondary_weight_factor =
            num_in_secondary as f64 / num_in_primary as f64 * self.kick_skew_factor;
        let weighted_probability = secondary_weight_factor / (secondary_weight_factor + 1.0);
        debug_assert!(weighted_probability > 0.0 && weighted_probability < 1.0);

        let kick_secondary = self.rng.gen_bool(weighted_probability);
        let num_potential_victims = if kick_secondary {
            num_in_secondary
        } else {
            num_in_primary
        };
        let victim_idx = self.rng.gen_range(0..num_potential_victims);

        let (victim_bucket_idx, idx_within_victim_bucket) = self.find_victim(
            victim_idx,
            value.primary_bucket,
            value.secondary_bucket,
            kick_secondary,
        );
        let victim = std::mem::replace(
            &mut self.buckets[victim_bucket_idx].slots[idx_within_victim_bucket],
            value,
        );
        (victim, victim_bucket_idx)
    }

    fn swap_with_uniform_victim(&mut self, value: CuckooValue) -> (CuckooValue, usize) {
        let victim_bucket_idx = if self.rng.gen_bool(0.5) {
            value.primary_bucket
        } else {
            value.secondary_bucket
        };
        let victim_slot = self.rng.gen_range(0..self.slots_per_bucket);
        let victim = std::mem::replace(
            &mut self.buckets[victim_bucket_idx].slots[victim_slot],
            value,
        );
        (victim, victim_bucket_idx)
    }

    // Number of items in bucket `bucket_idx` for which this bucket is their
    // secondary choice.
    fn num_secondary_items(&self, bucket_idx: usize) -> usize {
        self.buckets[bucket_idx]
            .slots
            .iter()
            .filter(|value| value.secondary_bucket == bucket_idx)
            .count()
    }

    // Finds the `victim_idx`-th item in the set of primary or secondary
    // residents (depending on `kick_secondary`) across both involved buckets.
    fn find_victim(
        &self,
        victim_idx: usize,
        primary_bucket_idx: usize,
        secondary_bucket_idx: usize,
        kick_secondary: bool,
    ) -> (usize, usize) {
        let mut remaining = victim_idx;
        for &bucket_idx in &[primary_bucket_idx, secondary_bucket_idx] {
            for (i, value) in self.buckets[bucket_idx].slots.iter().enumerate() {
                let residence_bucket = if kick_secondary {
                    value.secondary_bucket
                } else {
                    value.primary_bucket
                };
                if residence_bucket == bucket_idx {
                    if remaining == 0 {
                        return (bucket_idx, i);
                    }
                    remaining -= 1;
                }
            }
        }
        unreachable!("victim index {victim_idx} out of range");
    }
}
