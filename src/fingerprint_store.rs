//! Block-structured storage for variable-sized fingerprints.
//!
//! Fingerprints are grouped by length into blocks, each block storing its
//! fingerprints bit-packed. For each block a bitmap indicates which buckets
//! it covers, so individual fingerprints remain randomly accessible without
//! decompressing anything.
//!
//! As an optimization, consecutive block bitmaps are compacted: a bitmap only
//! keeps a bit for each bucket that is NOT covered by any previous block. To
//! increase the effect, blocks are ordered by decreasing cardinality (number
//! of covered buckets).
//!
//! Example encoding for the fingerprints {1, 101, 01, 0, 001} with one slot
//! per bucket:
//!
//! ```text
//! Block 0: 101001       -- bit-packed fingerprints 101 and 001
//! Block 1: 10           -- bit-packed fingerprints 1 and 0
//! Block 2: 01           -- bit-packed fingerprint
//!
//! Block bitmap 0: 01001 -- fingerprints no. 1 and 4 are stored in this block
//! Block bitmap 1: 101   -- of the 3 remaining fingerprints no. 0 and 2 here
//! Block bitmap 2: 1     -- only one remaining fingerprint
//! ```
//!
//! At rest, all block bitmaps are concatenated and encoded as a single
//! bitmap (RLE or dense).

use std::collections::BTreeMap;

use tracing::debug;

use crate::bit_packing::{
    bytes_required, max_bit_width, put_slop_bytes, store_bit_packed, BitPackedReader, SLOP_BYTES,
};
use crate::bitmap::Bitmap;
use crate::byte_coding::{get_string, get_varint32, put_string, put_varint32};
use crate::cuckoo_utils::{
    buckets_have_uniform_lengths, empty_buckets_bitmap, fingerprint_suffix, Fingerprint,
};
use crate::rle_bitmap::RleBitmap;

/// Stores fingerprints of a fixed length (`num_bits`) bit-packed at their
/// actual maximum bit width (which may be lower).
///
/// The block's byte encoding is: varint num_bits, varint bit_width, the
/// bit-packed fingerprints and 8 slop bytes.
pub struct Block {
    num_bits: usize,
    num_fingerprints: usize,
    bit_width: usize,
    fingerprints_pos: usize,
    data: Vec<u8>,
}

impl Block {
    pub fn new(num_bits: usize, fingerprints: &[u64]) -> Self {
        let bit_width = max_bit_width(fingerprints);
        assert!(
            bit_width <= num_bits,
            "fingerprints use {} bits, but the block holds {}-bit fingerprints",
            bit_width,
            num_bits
        );
        let mut data = Vec::new();
        // `num_bits` is needed to reconstruct the original fingerprints since
        // the packed bit width may be smaller. The fingerprint count is not
        // encoded; it is reconstructed from the block bitmaps.
        put_varint32(num_bits as u32, &mut data);
        put_varint32(bit_width as u32, &mut data);
        let fingerprints_pos = data.len();
        store_bit_packed(fingerprints, bit_width, &mut data);
        put_slop_bytes(&mut data);
        Self {
            num_bits,
            num_fingerprints: fingerprints.len(),
            bit_width,
            fingerprints_pos,
            data,
        }
    }

    // Rebuilds a block from its decoded parts (`packed` excludes header and
    // slop bytes).
    fn from_parts(num_bits: usize, bit_width: usize, num_fingerprints: usize, packed: &[u8]) -> Self {
        let mut data = Vec::new();
        put_varint32(num_bits as u32, &mut data);
        put_varint32(bit_width as u32, &mut data);
        let fingerprints_pos = data.len();
        data.extend_from_slice(packed);
        put_slop_bytes(&mut data);
        Self {
            num_bits,
            num_fingerprints,
            bit_width,
            fingerprints_pos,
            data,
        }
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Returns the fingerprint bits stored at `idx`.
    pub fn get(&self, idx: usize) -> u64 {
        assert!(idx < self.num_fingerprints);
        BitPackedReader::new(self.bit_width, &self.data[self.fingerprints_pos..]).get(idx)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Stores variable-sized fingerprints in per-length blocks with a chain of
/// compacted block bitmaps (see the module docs).
pub struct FingerprintStore {
    // A bitmap indicating empty slots.
    empty_slots_bitmap: Bitmap,
    // Bitmaps indicating which bucket is covered by which block. A subsequent
    // bitmap has `prev.ones_count()` fewer bits than its predecessor.
    block_bitmaps: Vec<Bitmap>,
    // One entry per block bitmap; `None` marks the virtual empty-buckets
    // block, which carries no fingerprints and is not serialized (it is
    // regenerable from `empty_slots_bitmap`).
    blocks: Vec<Option<Block>>,
    num_slots: usize,
    num_stored_fingerprints: usize,
    slots_per_bucket: usize,
    use_rle_block_bitmaps: bool,
}

impl FingerprintStore {
    /// Builds the store from per-slot fingerprints. The fingerprints have a
    /// 1:1 correspondence to the slots of the Cuckoo table; inactive entries
    /// mark empty slots. When `slots_per_bucket > 1`, all active fingerprints
    /// of a bucket must share the same length.
    pub fn new(
        fingerprints: &[Fingerprint],
        slots_per_bucket: usize,
        use_rle_block_bitmaps: bool,
    ) -> Self {
        assert_eq!(fingerprints.len() % slots_per_bucket, 0);
        debug_assert!(
            slots_per_bucket == 1 || buckets_have_uniform_lengths(fingerprints, slots_per_bucket),
            "all fingerprints in a bucket need to share the same length"
        );
        let num_slots = fingerprints.len();
        let num_buckets = num_slots / slots_per_bucket;

        let mut empty_slots_bitmap = Bitmap::new(num_slots);
        for (i, fp) in fingerprints.iter().enumerate() {
            if !fp.active {
                empty_slots_bitmap.set(i, true);
            }
        }
        empty_slots_bitmap.init_rank_lookup_table();
        let num_stored_fingerprints = empty_slots_bitmap.zeroes_count();

        // Group the active fingerprints into per-length block contents.
        let mut contents: BTreeMap<usize, (Bitmap, Vec<u64>)> = BTreeMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            if !fp.active {
                continue;
            }
            let (block_bitmap, block_fingerprints) = contents
                .entry(fp.num_bits)
                .or_insert_with(|| (Bitmap::new(num_buckets), Vec::new()));
            block_bitmap.set(i / slots_per_bucket, true);
            block_fingerprints.push(fingerprint_suffix(fp.bits, fp.num_bits));
        }

        // Order blocks by decreasing cardinality to allow for smaller
        // compacted bitmaps; ties resolve to the shorter fingerprint length
        // so the layout stays deterministic.
        let mut lengths: Vec<usize> = contents.keys().copied().collect();
        lengths.sort_by_key(|length| std::cmp::Reverse(contents[length].0.ones_count()));

        let mut store = Self {
            empty_slots_bitmap,
            block_bitmaps: Vec::with_capacity(lengths.len() + 1),
            blocks: Vec::with_capacity(lengths.len() + 1),
            num_slots,
            num_stored_fingerprints,
            slots_per_bucket,
            use_rle_block_bitmaps,
        };

        // The virtual empty-buckets block comes first. It simplifies the
        // lookup logic (the alternative would be a per-empty-bucket rank on
        // `empty_slots_bitmap`) and is regenerable, so it is never
        // serialized. Being first also means its bitmap is never compacted.
        let mut first_bitmap =
            empty_buckets_bitmap(&store.empty_slots_bitmap, slots_per_bucket);
        first_bitmap.init_rank_lookup_table();
        store.block_bitmaps.push(first_bitmap);
        store.blocks.push(None);

        // Create and compact the block bitmaps of the remaining blocks: a
        // compacted bitmap only keeps the bit positions that are zero in its
        // (already compacted) predecessor.
        for &length in &lengths {
            let (block_bitmap, block_fingerprints) = &contents[&length];
            let num_bits_compacted = store
                .block_bitmaps
                .last()
                .map(|bitmap| bitmap.zeroes_count())
                .unwrap_or(num_buckets);
            let mut compacted = Bitmap::new(num_bits_compacted);
            for bucket_idx in block_bitmap.true_bit_indices() {
                compacted.set(store.map_bucket_index_to_chain(bucket_idx), true);
            }
            compacted.init_rank_lookup_table();
            store.block_bitmaps.push(compacted);
            store.blocks.push(Some(Block::new(length, block_fingerprints)));
        }

        store.log_stats();
        store
    }

    /// Decodes a store previously serialized with [`encode`]. The
    /// `slots_per_bucket` and `use_rle_block_bitmaps` parameters must match
    /// the ones used at encoding time; `data` must hold a complete encoding
    /// written with `bitmaps_only = false`.
    ///
    /// [`encode`]: FingerprintStore::encode
    pub fn decode(data: &[u8], slots_per_bucket: usize, use_rle_block_bitmaps: bool) -> Self {
        let mut pos = 0;
        let num_blocks = get_varint32(data, &mut pos) as usize;

        let num_slots = get_varint32(data, &mut pos) as usize;
        let mut empty_slots_bitmap =
            decode_bitmap(get_string(data, &mut pos), num_slots, use_rle_block_bitmaps);
        empty_slots_bitmap.init_rank_lookup_table();
        let num_stored_fingerprints = empty_slots_bitmap.zeroes_count();

        let num_bitmap_bits: Vec<usize> = (1..num_blocks)
            .map(|_| get_varint32(data, &mut pos) as usize)
            .collect();
        let total_bits: usize = num_bitmap_bits.iter().sum();
        let global_bitmap = decode_bitmap(
            get_string(data, &mut pos),
            total_bits,
            use_rle_block_bitmaps,
        );

        // Rebuild the bitmap chain: the regenerated empty-buckets bitmap
        // first, then the compacted block bitmaps sliced out of the global
        // bitmap.
        let mut block_bitmaps = Vec::with_capacity(num_blocks);
        let mut first_bitmap = empty_buckets_bitmap(&empty_slots_bitmap, slots_per_bucket);
        first_bitmap.init_rank_lookup_table();
        block_bitmaps.push(first_bitmap);
        let mut base = 0;
        for &num_bits in &num_bitmap_bits {
            let mut bitmap = Bitmap::new(num_bits);
            for i in 0..num_bits {
                if global_bitmap.get(base + i) {
                    bitmap.set(i, true);
                }
            }
            base += num_bits;
            bitmap.init_rank_lookup_table();
            block_bitmaps.push(bitmap);
        }

        let mut store = Self {
            empty_slots_bitmap,
            block_bitmaps,
            blocks: (0..num_blocks).map(|_| None).collect(),
            num_slots,
            num_stored_fingerprints,
            slots_per_bucket,
            use_rle_block_bitmaps,
        };

        // The fingerprint count of each block is not part of the encoding; it
        // is derived from the bitmap chain and the empty-slots bitmap.
        for block_idx in 1..num_blocks {
            let num_fingerprints = store.num_fingerprints_in_block(block_idx);
            let num_bits = get_varint32(data, &mut pos) as usize;
            let bit_width = get_varint32(data, &mut pos) as usize;
            let packed_len = bytes_required(num_fingerprints * bit_width);
            let packed = &data[pos..pos + packed_len];
            pos += packed_len + SLOP_BYTES;
            store.blocks[block_idx] =
                Some(Block::from_parts(num_bits, bit_width, num_fingerprints, packed));
        }
        store
    }

    /// Returns the fingerprint stored in slot `slot_idx`.
    pub fn get_fingerprint(&self, slot_idx: usize) -> Fingerprint {
        assert!(slot_idx < self.num_slots);

        if self.empty_slots_bitmap.get(slot_idx) {
            return Fingerprint::INACTIVE;
        }

        let bucket_idx = slot_idx / self.slots_per_bucket;

        // Walk the blocks, re-projecting `idx_in_compacted_bitmap` from one
        // compacted bitmap into the next as we go.
        let mut idx_in_compacted_bitmap = bucket_idx;
        for block_idx in 0..self.blocks.len() {
            if block_idx > 0 {
                idx_in_compacted_bitmap -=
                    self.block_bitmaps[block_idx - 1].rank(idx_in_compacted_bitmap);
            }

            // The fingerprint can't be part of the empty-buckets block; that
            // case is already covered by the empty-slots check above.
            let Some(block) = &self.blocks[block_idx] else {
                continue;
            };

            if self.block_bitmaps[block_idx].get(idx_in_compacted_bitmap) {
                let idx_in_block = self.index_of_fingerprint_in_block(
                    block_idx,
                    idx_in_compacted_bitmap,
                    slot_idx,
                );
                return Fingerprint {
                    active: true,
                    num_bits: block.num_bits(),
                    bits: block.get(idx_in_block),
                };
            }
        }
        unreachable!("no block holds the fingerprint of slot {slot_idx}");
    }

    /// Encodes the store as bytes. For `bitmaps_only = true` only the bitmaps
    /// are encoded (used for size accounting).
    pub fn encode(&self, bitmaps_only: bool) -> Vec<u8> {
        let mut out = Vec::new();
        put_varint32(self.blocks.len() as u32, &mut out);

        // ** Bitmaps.
        put_varint32(self.empty_slots_bitmap.bits() as u32, &mut out);
        put_string(&self.encode_bitmap(&self.empty_slots_bitmap), &mut out);

        // The empty-buckets block is skipped: it is regenerated from the
        // empty-slots bitmap when decoding.
        let real_bitmaps: Vec<Option<&Bitmap>> = self
            .blocks
            .iter()
            .zip(&self.block_bitmaps)
            .filter(|(block, _)| block.is_some())
            .map(|(_, bitmap)| Some(bitmap))
            .collect();
        for bitmap in real_bitmaps.iter().flatten() {
            put_varint32(bitmap.bits() as u32, &mut out);
        }
        let global_bitmap = Bitmap::concat(real_bitmaps.iter().copied());
        put_string(&self.encode_bitmap(&global_bitmap), &mut out);

        if !bitmaps_only {
            // ** Blocks.
            for block in self.blocks.iter().flatten() {
                out.extend_from_slice(block.data());
            }
        }
        out
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn num_stored_fingerprints(&self) -> usize {
        self.num_stored_fingerprints
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The bitmap indicating empty slots.
    pub fn empty_slots_bitmap(&self) -> &Bitmap {
        &self.empty_slots_bitmap
    }

    pub fn size_in_bytes(&self, bitmaps_only: bool) -> usize {
        self.encode(bitmaps_only).len()
    }

    pub fn bits_per_fingerprint(&self, bitmaps_only: bool) -> f64 {
        (self.size_in_bytes(bitmaps_only) * 8) as f64 / self.num_stored_fingerprints as f64
    }

    fn encode_bitmap(&self, bitmap: &Bitmap) -> Vec<u8> {
        if self.use_rle_block_bitmaps {
            RleBitmap::new(bitmap).data().to_vec()
        } else {
            let mut encoded = Vec::new();
            bitmap.dense_encode(&mut encoded);
            encoded
        }
    }

    // Maps `bucket_idx` through the whole existing chain of compacted
    // bitmaps: each step subtracts the rank within the current bitmap,
    // yielding the index within the next one.
    fn map_bucket_index_to_chain(&self, bucket_idx: usize) -> usize {
        let mut curr_idx = bucket_idx;
        for bitmap in &self.block_bitmaps {
            let rank = bitmap.rank(curr_idx);
            debug_assert!(curr_idx >= rank);
            curr_idx -= rank;
        }
        curr_idx
    }

    // Returns the bucket index that bit `bit_idx` in block bitmap `block_idx`
    // corresponds to, by walking the chain in reverse via select-zero.
    fn bucket_index(&self, block_idx: usize, bit_idx: usize) -> usize {
        let mut pos = bit_idx;
        for i in (0..block_idx).rev() {
            pos = match self.block_bitmaps[i].select_zero(pos) {
                Some(p) => p,
                None => unreachable!("insufficient zero bits in block bitmap {i}"),
            };
        }
        pos
    }

    // Number of non-empty slots in bucket `bucket_idx`.
    fn num_items_in_bucket(&self, bucket_idx: usize) -> usize {
        let first_slot_idx = bucket_idx * self.slots_per_bucket;
        (first_slot_idx..first_slot_idx + self.slots_per_bucket)
            .filter(|&slot| !self.empty_slots_bitmap.get(slot))
            .count()
    }

    // Total number of fingerprints stored in block `block_idx`.
    fn num_fingerprints_in_block(&self, block_idx: usize) -> usize {
        let bitmap = &self.block_bitmaps[block_idx];
        if self.slots_per_bucket == 1 {
            return bitmap.ones_count();
        }
        bitmap
            .true_bit_indices()
            .into_iter()
            .map(|bit_idx| self.num_items_in_bucket(self.bucket_index(block_idx, bit_idx)))
            .sum()
    }

    // Returns the index of the fingerprint of `slot_idx` within the
    // bit-packed storage of block `block_idx`. `idx_in_compacted_bitmap` is
    // the slot's bucket projected into the block's compacted bitmap.
    fn index_of_fingerprint_in_block(
        &self,
        block_idx: usize,
        idx_in_compacted_bitmap: usize,
        slot_idx: usize,
    ) -> usize {
        let block_bitmap = &self.block_bitmaps[block_idx];

        // For one slot per bucket the index is simply the rank within the
        // block bitmap.
        if self.slots_per_bucket == 1 {
            return block_bitmap.rank(idx_in_compacted_bitmap);
        }

        // For multiple slots per bucket the block bitmaps only carry one bit
        // per bucket, so empty slots of prior buckets in the same block have
        // to be accounted for: de-compact each set bit before
        // `idx_in_compacted_bitmap` back to its bucket and count that
        // bucket's occupied slots.
        let mut count = 0;
        for bit_idx in block_bitmap.true_bit_indices() {
            if bit_idx >= idx_in_compacted_bitmap {
                break;
            }
            count += self.num_items_in_bucket(self.bucket_index(block_idx, bit_idx));
        }

        // Within the target bucket, skip the empty slots before `slot_idx`.
        let bucket_idx = slot_idx / self.slots_per_bucket;
        let first_slot_in_bucket = bucket_idx * self.slots_per_bucket;
        let num_empty_slots = (first_slot_in_bucket..slot_idx)
            .filter(|&slot| self.empty_slots_bitmap.get(slot))
            .count();

        count - num_empty_slots + (slot_idx % self.slots_per_bucket)
    }

    fn log_stats(&self) {
        for (i, (block, bitmap)) in self.blocks.iter().zip(&self.block_bitmaps).enumerate() {
            debug!(
                block = i,
                num_bits = block.as_ref().map(|b| b.num_bits()),
                buckets = bitmap.ones_count(),
                "fingerprint store block"
            );
        }
        debug!(
            size_in_bytes = self.size_in_bytes(false),
            bitmaps_only_size_in_bytes = self.size_in_bytes(true),
            num_stored_fingerprints = self.num_stored_fingerprints,
            "fingerprint store built"
        );
    }
}

fn decode_bitmap(data: &[u8], num_bits: usize, use_rle: bool) -> Bitmap {
    if use_rle {
        RleBitmap::from_data(data.to_vec()).extract(0, num_bits)
    } else {
        Bitmap::dense_decode(data)
    }
}
