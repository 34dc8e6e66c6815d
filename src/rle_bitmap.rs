//! Run-length-encoded bitmaps with a skip list for partial random access.
//!
//! At construction the smaller of two formats is chosen. The dense form
//! alternates raw runs (bits copied verbatim) with repeated runs (one bit,
//! repeated). The sparse form stores the gaps between set bits. Either way a
//! skip list over the run-length entries lets [`RleBitmap::extract`] jump
//! close to the requested offset instead of scanning from the start.

use crate::bit_packing::{
    bytes_required, max_bit_width, put_slop_bytes, store_bit_packed, BitPackedReader, SLOP_BYTES,
};
use crate::bitmap::Bitmap;
use crate::byte_coding::{get_varint32, put_varint32};

// Each repeated entry costs in the worst case 8 + 8 bits for the two extra
// run-lengths (raw & repeated) plus 1 bit for the value to repeat, so only
// runs saving more than 17 bits are encoded as repeats.
const MIN_DENSE_RUN_LENGTH: u32 = 18;
// Capping the run length keeps every entry within 8 bits, which also helps
// zstd when compressing the entries.
const MAX_DENSE_RUN_LENGTH: u32 = 128;

// Fudge factor applied when deciding whether to use the sparse encoding.
// Slightly prefer sparse, it tends to compress better with zstd.
const SPARSE_FUDGE_FACTOR: f64 = 1.1;
// Maximum run length for the sparse encoding.
const MAX_SPARSE_RUN_LENGTH: u32 = 255;

/// An immutable, compressed bitmap supporting slice extraction.
pub struct RleBitmap {
    data: Vec<u8>,
    is_sparse: bool,
    num_bits: usize,
    skip_offsets_step: usize,
    skip_offsets_len: usize,
    run_lengths_len: usize,
    bits_len: usize,
    skip_offsets_width: usize,
    skip_offsets_pos: usize,
    run_lengths_width: usize,
    run_lengths_pos: usize,
    bits_pos: usize,
}

impl RleBitmap {
    /// Encodes `bitmap`, stepping skip offsets over roughly
    /// sqrt(#run-lengths) entries.
    pub fn new(bitmap: &Bitmap) -> Self {
        Self::build(bitmap, None)
    }

    /// Encodes `bitmap` with an explicit skip-offsets step. Mostly useful in
    /// tests, to force skip offsets to exist for small bitmaps.
    pub fn with_step(bitmap: &Bitmap, skip_offsets_step: usize) -> Self {
        Self::build(bitmap, Some(skip_offsets_step))
    }

    /// Re-attaches a reader to bytes previously produced by [`data`]. The
    /// bytes must hold a complete encoding.
    ///
    /// [`data`]: RleBitmap::data
    pub fn from_data(data: Vec<u8>) -> Self {
        Self::parse(data)
    }

    /// The self-contained byte encoding of this bitmap.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of bits in the uncompressed bitmap.
    pub fn bits(&self) -> usize {
        self.num_bits
    }

    pub fn get(&self, pos: usize) -> bool {
        self.extract(pos, 1).get(0)
    }

    /// Returns the slice of the bitmap from `offset` on of the given `size`.
    pub fn extract(&self, offset: usize, size: usize) -> Bitmap {
        assert!(offset + size <= self.num_bits);
        if self.is_sparse {
            self.extract_sparse(offset, size)
        } else {
            self.extract_dense(offset, size)
        }
    }

    fn build(bitmap: &Bitmap, step_override: Option<usize>) -> Self {
        let (mut run_lengths, mut bits) = encode_dense_run_lengths(bitmap);
        // Decide whether the sparse encoding is a better match. Note that for
        // each set bit there is roughly one entry in `run_lengths`.
        let is_sparse = (bitmap.ones_count() as f64)
            < SPARSE_FUDGE_FACTOR * run_lengths.len() as f64 + (bits.len() / 8) as f64;
        let skip_offsets;
        let skip_offsets_step;
        if is_sparse {
            bits.clear();
            run_lengths = encode_sparse_run_lengths(bitmap);
            skip_offsets_step =
                step_override.unwrap_or_else(|| (run_lengths.len() as f64).sqrt() as usize);
            skip_offsets = compute_sparse_skip_offsets(&run_lengths, skip_offsets_step);
        } else {
            skip_offsets_step =
                step_override.unwrap_or_else(|| (run_lengths.len() as f64).sqrt() as usize);
            skip_offsets = compute_dense_skip_offsets(&run_lengths, skip_offsets_step);
        }

        let mut data = Vec::new();
        // ** Flag whether the encoding is sparse or dense.
        put_varint32(is_sparse as u32, &mut data);
        // ** The number of uncompressed bits.
        put_varint32(bitmap.bits() as u32, &mut data);
        // ** Step and length of the skip offsets.
        put_varint32(skip_offsets_step as u32, &mut data);
        put_varint32(skip_offsets.len() as u32, &mut data);
        // ** Sizes of `run_lengths` and `bits`.
        put_varint32(run_lengths.len() as u32, &mut data);
        put_varint32(bits.len() as u32, &mut data);
        // ** The skip offsets.
        let skip_offsets_width = max_bit_width_u32(&skip_offsets);
        put_varint32(skip_offsets_width as u32, &mut data);
        store_bit_packed_u32(&skip_offsets, skip_offsets_width, &mut data);
        // ** The run lengths. Their width stays within 8 bits in both
        // encodings.
        let run_lengths_width = max_bit_width_u32(&run_lengths);
        debug_assert!(run_lengths_width < 9);
        put_varint32(run_lengths_width as u32, &mut data);
        if !run_lengths.is_empty() {
            store_bit_packed_u32(&run_lengths, run_lengths_width, &mut data);
        }
        // ** The bits.
        if !bits.is_empty() {
            store_bit_packed_u32(&bits, 1, &mut data);
        }
        put_slop_bytes(&mut data);

        Self::parse(data)
    }

    // Parses the header of a complete encoding and records the positions of
    // the three bit-packed streams.
    fn parse(data: Vec<u8>) -> Self {
        let mut pos = 0;
        let is_sparse = get_varint32(&data, &mut pos) != 0;
        let num_bits = get_varint32(&data, &mut pos) as usize;
        let skip_offsets_step = get_varint32(&data, &mut pos) as usize;
        let skip_offsets_len = get_varint32(&data, &mut pos) as usize;
        let run_lengths_len = get_varint32(&data, &mut pos) as usize;
        let bits_len = get_varint32(&data, &mut pos) as usize;
        let skip_offsets_width = get_varint32(&data, &mut pos) as usize;
        let skip_offsets_pos = pos;
        pos += bytes_required(skip_offsets_len * skip_offsets_width);
        let run_lengths_width = get_varint32(&data, &mut pos) as usize;
        let run_lengths_pos = pos;
        if run_lengths_len > 0 {
            pos += bytes_required(run_lengths_len * run_lengths_width);
        }
        let bits_pos = pos;
        if bits_len > 0 {
            pos += bytes_required(bits_len);
        }
        debug_assert_eq!(pos + SLOP_BYTES, data.len());
        Self {
            data,
            is_sparse,
            num_bits,
            skip_offsets_step,
            skip_offsets_len,
            run_lengths_len,
            bits_len,
            skip_offsets_width,
            skip_offsets_pos,
            run_lengths_width,
            run_lengths_pos,
            bits_pos,
        }
    }

    fn skip_offsets(&self) -> BitPackedReader<'_> {
        BitPackedReader::new(self.skip_offsets_width, &self.data[self.skip_offsets_pos..])
    }

    fn run_lengths(&self) -> BitPackedReader<'_> {
        BitPackedReader::new(self.run_lengths_width, &self.data[self.run_lengths_pos..])
    }

    fn bit_values(&self) -> BitPackedReader<'_> {
        BitPackedReader::new(1, &self.data[self.bits_pos..])
    }

    fn extract_dense(&self, mut offset: usize, size: usize) -> Bitmap {
        let mut result = Bitmap::new(size);
        let skip_offsets = self.skip_offsets();
        let run_lengths = self.run_lengths();
        let bits = self.bit_values();

        let mut rle_pos = 0;
        let mut bits_pos = 0;
        // Use the skip list to find where to start scanning `run_lengths` and
        // `bits`. Even entries count uncompressed bits, odd entries count
        // consumed compressed bits.
        debug_assert_eq!(self.skip_offsets_len % 2, 0);
        let mut i = 0;
        while i < self.skip_offsets_len {
            let uncompressed = skip_offsets.get(i) as usize;
            if uncompressed > offset {
                break;
            }
            offset -= uncompressed;
            rle_pos += self.skip_offsets_step;
            bits_pos += skip_offsets.get(i + 1) as usize;
            i += 2;
        }

        // Scan from `rle_pos` and `bits_pos` on.
        let mut count_rep = 0usize;
        let mut count_raw = 0usize;
        for i in 0..offset + size {
            if count_rep == 0 && count_raw == 0 {
                let rle_entry = run_lengths.get(rle_pos) as u32;
                rle_pos += 1;
                if rle_entry & 1 == 1 {
                    count_raw = (rle_entry >> 1) as usize + 1;
                } else {
                    count_rep = (rle_entry >> 1) as usize + MIN_DENSE_RUN_LENGTH as usize;
                }
            }
            let bit;
            if count_rep > 0 {
                count_rep -= 1;
                bit = bits.get(bits_pos) != 0;
                if count_rep == 0 {
                    bits_pos += 1;
                }
            } else {
                debug_assert!(count_raw > 0);
                count_raw -= 1;
                bit = bits.get(bits_pos) != 0;
                bits_pos += 1;
            }
            if i >= offset && bit {
                result.set(i - offset, true);
            }
        }
        result
    }

    fn extract_sparse(&self, mut offset: usize, size: usize) -> Bitmap {
        let mut result = Bitmap::new(size);
        let skip_offsets = self.skip_offsets();
        let run_lengths = self.run_lengths();

        let mut rle_pos = 0;
        // Use the skip list to find where to start scanning `run_lengths`.
        for i in 0..self.skip_offsets_len {
            let skipped = skip_offsets.get(i) as usize;
            if skipped > offset {
                break;
            }
            offset -= skipped;
            rle_pos += self.skip_offsets_step;
        }

        // Scan from `rle_pos` on.
        let mut i: i64 = -1;
        let end = (offset + size) as i64;
        while i < end && rle_pos < self.run_lengths_len {
            let count = run_lengths.get(rle_pos) as u32;
            rle_pos += 1;
            if count == 0 {
                i += MAX_SPARSE_RUN_LENGTH as i64;
            } else {
                i += count as i64;
                if i >= offset as i64 && i < end {
                    result.set((i - offset as i64) as usize, true);
                }
            }
        }
        result
    }
}

// Encodes `bitmap` in runs using the dense encoding. Each run length is
// encoded as `l..llr` where `l..ll` gives the length of the run minus 1 (raw
// runs) or minus MIN_DENSE_RUN_LENGTH (repeated runs); r = 1 marks a raw run
// whose bits are copied verbatim, r = 0 a run repeating a single bit.
fn encode_dense_run_lengths(bitmap: &Bitmap) -> (Vec<u32>, Vec<u32>) {
    let mut run_lengths = Vec::new();
    let mut bits = Vec::new();
    let mut i = 0;
    while i < bitmap.bits() {
        // From `i` on search for a repeated run of length at least
        // MIN_DENSE_RUN_LENGTH. Once found, add a verbatim run if necessary
        // and then the repeated run.
        let mut count_rep: u32 = 1;
        let mut count_raw: u32 = 0;
        for j in i + 1..bitmap.bits() {
            if count_rep >= MAX_DENSE_RUN_LENGTH + MIN_DENSE_RUN_LENGTH - 1
                || count_raw >= MAX_DENSE_RUN_LENGTH
            {
                break;
            }
            if bitmap.get(j) != bitmap.get(j - 1) {
                if count_rep >= MIN_DENSE_RUN_LENGTH {
                    break;
                }
                count_raw += count_rep;
                count_rep = 1;
            } else {
                count_rep += 1;
            }
        }
        // Adjust count_raw / count_rep if they are too large / too small.
        if count_rep < MIN_DENSE_RUN_LENGTH {
            count_raw += count_rep;
            count_rep = 0;
        }
        if count_raw > MAX_DENSE_RUN_LENGTH {
            count_raw = MAX_DENSE_RUN_LENGTH;
            count_rep = 0;
        }
        // Store the (possibly adjusted) runs: possibly a few raw values
        // followed by a run of repeated values.
        if count_raw > 0 {
            run_lengths.push((count_raw - 1) << 1 | 1);
            for j in 0..count_raw as usize {
                bits.push(bitmap.get(i + j) as u32);
            }
        }
        if count_rep > 0 {
            debug_assert!(count_rep >= MIN_DENSE_RUN_LENGTH);
            run_lengths.push((count_rep - MIN_DENSE_RUN_LENGTH) << 1);
            bits.push(bitmap.get(i + count_raw as usize) as u32);
        }
        i += (count_raw + count_rep) as usize;
    }
    (run_lengths, bits)
}

// Fills `run_lengths` with the offsets from one set bit to the next (plus a
// sentinel gap to the total length). A 0 entry stands for skipping
// MAX_SPARSE_RUN_LENGTH unset bits without setting the following bit.
fn encode_sparse_run_lengths(bitmap: &Bitmap) -> Vec<u32> {
    let mut run_lengths = Vec::new();
    let mut indices = bitmap.true_bit_indices();
    // The virtual set bit at `bitmap.bits()` avoids special-casing the final
    // run of unset bits.
    indices.push(bitmap.bits());
    let mut prev_index: i64 = -1;
    for index in indices {
        let mut gap = index as i64 - prev_index;
        prev_index = index as i64;
        while gap > MAX_SPARSE_RUN_LENGTH as i64 {
            run_lengths.push(0);
            gap -= MAX_SPARSE_RUN_LENGTH as i64;
        }
        debug_assert!(gap >= 1);
        run_lengths.push(gap as u32);
    }
    run_lengths
}

// Dense skip offsets with a stride of `step` run-length entries: even entries
// give the count in the uncompressed bitmap, odd entries the corresponding
// count in the compressed `bits` stream.
fn compute_dense_skip_offsets(run_lengths: &[u32], step: usize) -> Vec<u32> {
    let mut skip_offsets = Vec::new();
    if step == 0 {
        return skip_offsets;
    }
    for chunk in run_lengths.chunks(step) {
        let mut uncompressed_count = 0u32;
        let mut compressed_count = 0u32;
        for &entry in chunk {
            let is_raw = entry & 1 == 1;
            let count = (entry >> 1) + if is_raw { 1 } else { MIN_DENSE_RUN_LENGTH };
            uncompressed_count += count;
            compressed_count += if is_raw { count } else { 1 };
        }
        skip_offsets.push(uncompressed_count);
        skip_offsets.push(compressed_count);
    }
    skip_offsets
}

// Sparse skip offsets: entry i is the number of uncompressed bits covered by
// run-length entries [i * step, (i + 1) * step).
fn compute_sparse_skip_offsets(run_lengths: &[u32], step: usize) -> Vec<u32> {
    let mut skip_offsets = Vec::new();
    if step == 0 {
        return skip_offsets;
    }
    for chunk in run_lengths.chunks(step) {
        let count: u32 = chunk
            .iter()
            .map(|&entry| if entry == 0 { MAX_SPARSE_RUN_LENGTH } else { entry })
            .sum();
        skip_offsets.push(count);
    }
    skip_offsets
}

fn max_bit_width_u32(values: &[u32]) -> usize {
    max_bit_width(&values.iter().map(|&v| v as u64).collect::<Vec<_>>())
}

fn store_bit_packed_u32(values: &[u32], bit_width: usize, buffer: &mut Vec<u8>) {
    let widened: Vec<u64> = values.iter().map(|&v| v as u64).collect();
    store_bit_packed(&widened, bit_width, buffer);
}
