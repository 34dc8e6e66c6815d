//! A dynamic bit sequence with precomputed rank over fixed-size super-blocks.
//!
//! The rank layout follows the usual succinct-structure scheme: cumulative
//! ones counts are precomputed per [`RANK_BLOCK_SIZE`]-bit block, adding
//! around 6% of size overhead. Select is a plain scan.

/// Number of bits in a rank super-block.
pub const RANK_BLOCK_SIZE: usize = 512;

const WORD_BITS: usize = 64;

/// A growable-at-construction, fixed-length bit sequence backed by `u64`
/// words. Bits beyond the logical length are kept clear.
#[derive(Clone, Debug, Default)]
pub struct Bitmap {
    num_bits: usize,
    words: Vec<u64>,
    // Cumulative ones count per rank super-block; empty until
    // `init_rank_lookup_table` is called (and for short bitmaps).
    rank_lookup_table: Vec<u32>,
}

impl Bitmap {
    /// Creates an all-zeros bitmap of the given length.
    pub fn new(num_bits: usize) -> Self {
        Self {
            num_bits,
            words: vec![0; num_bits.div_ceil(WORD_BITS)],
            rank_lookup_table: Vec::new(),
        }
    }

    /// Creates a bitmap of the given length with every bit set to
    /// `fill_value`.
    pub fn with_fill(num_bits: usize, fill_value: bool) -> Self {
        let mut bitmap = Self::new(num_bits);
        if fill_value {
            for word in &mut bitmap.words {
                *word = u64::MAX;
            }
            bitmap.clear_tail();
        }
        bitmap
    }

    /// Creates a bitmap from 0/1 entries, mostly useful in tests.
    pub fn from_bits(bits: &[u8]) -> Self {
        let mut bitmap = Self::new(bits.len());
        for (i, &bit) in bits.iter().enumerate() {
            if bit != 0 {
                bitmap.set(i, true);
            }
        }
        bitmap
    }

    /// Concatenates the given bitmaps (skipping `None` entries) into one
    /// bitmap, preserving order.
    pub fn concat<'a, I>(bitmaps: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a Bitmap>> + Clone,
    {
        let num_bits: usize = bitmaps
            .clone()
            .into_iter()
            .flatten()
            .map(|bitmap| bitmap.bits())
            .sum();
        let mut global = Bitmap::new(num_bits);
        let mut base_index = 0;
        for bitmap in bitmaps.into_iter().flatten() {
            for index in bitmap.true_bit_indices() {
                global.set(base_index + index, true);
            }
            base_index += bitmap.bits();
        }
        global
    }

    pub fn bits(&self) -> usize {
        self.num_bits
    }

    #[inline]
    pub fn get(&self, pos: usize) -> bool {
        assert!(pos < self.num_bits);
        self.words[pos / WORD_BITS] >> (pos % WORD_BITS) & 1 == 1
    }

    pub fn set(&mut self, pos: usize, value: bool) {
        assert!(pos < self.num_bits);
        let word = &mut self.words[pos / WORD_BITS];
        let mask = 1u64 << (pos % WORD_BITS);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn ones_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn zeroes_count(&self) -> usize {
        self.num_bits - self.ones_count()
    }

    pub fn is_all_zeroes(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns the positions of all set bits in increasing order.
    pub fn true_bit_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (word_idx, &word) in self.words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros() as usize;
                indices.push(word_idx * WORD_BITS + bit);
                w &= w - 1;
            }
        }
        indices
    }

    /// Precomputes the ranks of bit-blocks of size [`RANK_BLOCK_SIZE`]. Not
    /// built when there is at most a single block.
    pub fn init_rank_lookup_table(&mut self) {
        if self.num_bits <= RANK_BLOCK_SIZE {
            return;
        }
        let num_rank_blocks = self.num_bits / RANK_BLOCK_SIZE + 1;
        self.rank_lookup_table = vec![0; num_rank_blocks];
        let mut cumulative_rank = 0u32;
        for i in 0..num_rank_blocks - 1 {
            self.rank_lookup_table[i] = cumulative_rank;
            cumulative_rank += self.ones_count_in_rank_block(i, RANK_BLOCK_SIZE) as u32;
        }
        self.rank_lookup_table[num_rank_blocks - 1] = cumulative_rank;
    }

    /// Returns the number of set bits in `[0, limit)`.
    pub fn rank(&self, limit: usize) -> usize {
        assert!(limit <= self.num_bits);
        if limit == 0 {
            return 0;
        }
        if self.rank_lookup_table.is_empty() {
            // No precomputed ranks; count manually.
            return self.ones_count_before(limit);
        }
        let last_pos = limit - 1;
        let rank_block_id = last_pos / RANK_BLOCK_SIZE;
        let limit_within_block = (last_pos & (RANK_BLOCK_SIZE - 1)) + 1;
        self.rank_lookup_table[rank_block_id] as usize
            + self.ones_count_in_rank_block(rank_block_id, limit_within_block)
    }

    /// Returns the position of the `ith` (zero-based) set bit, if any.
    pub fn select_one(&self, ith: usize) -> Option<usize> {
        self.select(ith, true)
    }

    /// Returns the position of the `ith` (zero-based) unset bit, if any.
    pub fn select_zero(&self, ith: usize) -> Option<usize> {
        self.select(ith, false)
    }

    fn select(&self, ith: usize, count_ones: bool) -> Option<usize> {
        let mut count = 0;
        for i in 0..self.num_bits {
            if self.get(i) == count_ones {
                if count == ith {
                    return Some(i);
                }
                count += 1;
            }
        }
        None
    }

    /// Serializes the bitmap densely: bit count, word storage and the rank
    /// lookup table.
    pub fn dense_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.num_bits as u32).to_le_bytes());
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&(self.rank_lookup_table.len() as u32).to_le_bytes());
        for entry in &self.rank_lookup_table {
            out.extend_from_slice(&entry.to_le_bytes());
        }
    }

    /// Inverse of [`dense_encode`]. `data` must hold a complete encoding.
    ///
    /// [`dense_encode`]: Bitmap::dense_encode
    pub fn dense_decode(data: &[u8]) -> Self {
        let mut pos = 0;
        let num_bits = read_u32(data, &mut pos) as usize;
        let num_words = num_bits.div_ceil(WORD_BITS);
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            let mut word = [0u8; 8];
            word.copy_from_slice(&data[pos..pos + 8]);
            words.push(u64::from_le_bytes(word));
            pos += 8;
        }
        let num_rank_entries = read_u32(data, &mut pos) as usize;
        let mut rank_lookup_table = Vec::with_capacity(num_rank_entries);
        for _ in 0..num_rank_entries {
            rank_lookup_table.push(read_u32(data, &mut pos));
        }
        Self {
            num_bits,
            words,
            rank_lookup_table,
        }
    }

    fn ones_count_before(&self, limit: usize) -> usize {
        let full_words = limit / WORD_BITS;
        let mut count: usize = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rem = limit % WORD_BITS;
        if rem > 0 {
            count += (self.words[full_words] & ((1u64 << rem) - 1)).count_ones() as usize;
        }
        count
    }

    // Number of set bits in rank block `rank_block_id` before
    // `limit_within_block`.
    fn ones_count_in_rank_block(&self, rank_block_id: usize, limit_within_block: usize) -> usize {
        let start = rank_block_id * RANK_BLOCK_SIZE;
        let end = start + limit_within_block;
        assert!(end <= self.num_bits);
        self.ones_count_before(end) - if start == 0 { 0 } else { self.ones_count_before(start) }
    }

    fn clear_tail(&mut self) {
        let rem = self.num_bits % WORD_BITS;
        if rem > 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[*pos..*pos + 4]);
    *pos += 4;
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn get_and_set() {
        let mut bitmap = Bitmap::new(130);
        assert!(bitmap.is_all_zeroes());
        bitmap.set(0, true);
        bitmap.set(64, true);
        bitmap.set(129, true);
        assert!(bitmap.get(0));
        assert!(!bitmap.get(1));
        assert!(bitmap.get(64));
        assert!(bitmap.get(129));
        assert_eq!(bitmap.ones_count(), 3);
        assert_eq!(bitmap.zeroes_count(), 127);
        assert_eq!(bitmap.true_bit_indices(), vec![0, 64, 129]);
        bitmap.set(64, false);
        assert_eq!(bitmap.ones_count(), 2);
    }

    #[test]
    fn with_fill_keeps_tail_clear() {
        let bitmap = Bitmap::with_fill(70, true);
        assert_eq!(bitmap.ones_count(), 70);
        assert_eq!(bitmap.rank(70), 70);
    }

    #[test]
    fn rank_single_bit() {
        assert_eq!(Bitmap::from_bits(&[0]).rank(0), 0);
        assert_eq!(Bitmap::from_bits(&[1]).rank(0), 0);
        assert_eq!(Bitmap::from_bits(&[1]).rank(1), 1);
    }

    #[test]
    fn rank_all_zeros() {
        let bitmap = Bitmap::from_bits(&[0, 0, 0]);
        for i in 0..=3 {
            assert_eq!(bitmap.rank(i), 0);
        }
    }

    #[test]
    fn rank_all_ones() {
        let bitmap = Bitmap::from_bits(&[1, 1, 1]);
        for i in 0..=3 {
            assert_eq!(bitmap.rank(i), i);
        }
    }

    #[test]
    fn rank_with_lookup_table_matches_scan() {
        let num_bits = RANK_BLOCK_SIZE * 2 + RANK_BLOCK_SIZE / 10;
        let bits: Vec<u8> = (0..num_bits).map(|i| (i % 2 == 0) as u8).collect();
        let plain = Bitmap::from_bits(&bits);
        let mut with_rank = Bitmap::from_bits(&bits);
        with_rank.init_rank_lookup_table();
        for i in 0..=num_bits {
            assert_eq!(plain.rank(i), with_rank.rank(i));
        }
    }

    #[test]
    fn select_on_small_bitmaps() {
        assert_eq!(Bitmap::from_bits(&[0]).select_one(0), None);
        assert_eq!(Bitmap::from_bits(&[0]).select_zero(0), Some(0));
        assert_eq!(Bitmap::from_bits(&[1]).select_one(0), Some(0));
        assert_eq!(Bitmap::from_bits(&[1]).select_zero(0), None);

        let bitmap = Bitmap::from_bits(&[1, 0, 1]);
        assert_eq!(bitmap.select_one(0), Some(0));
        assert_eq!(bitmap.select_one(1), Some(2));
        assert_eq!(bitmap.select_one(2), None);
        assert_eq!(bitmap.select_zero(0), Some(1));
    }

    #[test]
    fn concat_skips_missing_bitmaps() {
        let a = Bitmap::from_bits(&[1, 0]);
        let b = Bitmap::from_bits(&[0, 1, 1]);
        let parts = [Some(&a), None, Some(&b)];
        let global = Bitmap::concat(parts.iter().copied());
        assert_eq!(global.bits(), 5);
        assert_eq!(global.true_bit_indices(), vec![0, 3, 4]);
    }

    #[test]
    fn dense_codec_preserves_bits_and_rank() {
        let num_bits = RANK_BLOCK_SIZE * 2 + RANK_BLOCK_SIZE / 10;
        let bits: Vec<u8> = (0..num_bits).map(|i| (i % 2 == 0) as u8).collect();
        let mut bitmap = Bitmap::from_bits(&bits);
        bitmap.init_rank_lookup_table();

        let mut encoded = Vec::new();
        bitmap.dense_encode(&mut encoded);
        let decoded = Bitmap::dense_decode(&encoded);

        assert_eq!(bitmap.bits(), decoded.bits());
        for i in 0..num_bits {
            assert_eq!(bitmap.get(i), decoded.get(i));
            assert_eq!(bitmap.rank(i), decoded.rank(i));
        }
    }

    proptest! {
        #[test]
        fn dense_codec_round_trip(bits in proptest::collection::vec(0u8..=1, 0..1500)) {
            let mut bitmap = Bitmap::from_bits(&bits);
            bitmap.init_rank_lookup_table();
            let mut encoded = Vec::new();
            bitmap.dense_encode(&mut encoded);
            let decoded = Bitmap::dense_decode(&encoded);
            prop_assert_eq!(bitmap.bits(), decoded.bits());
            for i in 0..bitmap.bits() {
                prop_assert_eq!(bitmap.get(i), decoded.get(i));
            }
            prop_assert_eq!(bitmap.rank(bitmap.bits()), decoded.rank(decoded.bits()));
        }

        #[test]
        fn rank_counts_ones_before_limit(bits in proptest::collection::vec(0u8..=1, 0..600)) {
            let bitmap = Bitmap::from_bits(&bits);
            let mut expected = 0;
            for i in 0..bits.len() {
                prop_assert_eq!(bitmap.rank(i), expected);
                expected += bits[i] as usize;
            }
        }
    }
}
