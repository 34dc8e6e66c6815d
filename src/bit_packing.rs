//! Fixed-width bit-packed integer streams over byte buffers.
//!
//! Bit-packing here simply means using the least amount of bits necessary to
//! store a value. Values are packed back to back in little-endian order
//! starting at bit 0 of the first appended byte. Readers load whole 64-bit
//! words unconditionally, which is why packed runs must be followed by
//! [`SLOP_BYTES`] trailing zero bytes (see [`put_slop_bytes`]).

/// Number of trailing zero bytes required after the last packed run so that
/// [`BitPackedReader::get`] may load a full 64-bit word at any valid element
/// position. They only need to be added once, usually to the end of the
/// buffer.
pub const SLOP_BYTES: usize = 8;

// For bit widths > 58 a single 64-bit load may not cover the value: the
// payload can start at bit 7 of the first byte, leaving at most 57 readable
// bits in the remaining loaded bytes. Wider values take a second load.
const MAX_SINGLE_WORD_BIT_WIDTH: usize = 58;

/// Returns the number of bits needed for the given value, 0 for `val == 0`.
#[inline]
pub fn bit_width(val: u64) -> usize {
    (64 - val.leading_zeros()) as usize
}

/// Returns the maximum number of bits needed to bit-pack `values`. Returns 0
/// if `values` is empty or contains only zeros.
pub fn max_bit_width(values: &[u64]) -> usize {
    values.iter().copied().map(bit_width).max().unwrap_or(0)
}

/// Returns the number of bytes required to store `num_bits` bits.
#[inline]
pub fn bytes_required(num_bits: usize) -> usize {
    (num_bits + 7) >> 3
}

#[inline]
fn bit_mask(num_bits: usize) -> u64 {
    // num_bits = 64 cannot be computed with a single shift.
    debug_assert!(num_bits < 64);
    (1u64 << num_bits) - 1
}

#[inline]
fn load_u64_le(data: &[u8], pos: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[pos..pos + 8]);
    u64::from_le_bytes(word)
}

/// Appends `values` in fixed `bit_width` encoding to `buffer`, starting at a
/// byte boundary. For `bit_width == 0` nothing is written. The caller is
/// responsible for eventually appending slop bytes via [`put_slop_bytes`].
pub fn store_bit_packed(values: &[u64], bit_width: usize, buffer: &mut Vec<u8>) {
    if bit_width == 0 {
        return;
    }
    debug_assert!(bit_width <= 64);
    let num_bytes = bytes_required(bit_width * values.len());
    let start = buffer.len();
    // Reserve scratch room past the packed run: a single value may spill up to
    // 9 bytes when it starts at bit 7 of a byte. The scratch is cut off again
    // below; only zero bits ever land there.
    buffer.resize(start + num_bytes + SLOP_BYTES, 0);
    let data = &mut buffer[start..];
    let mut bit_pos = 0usize;
    for &val in values {
        debug_assert!(self::bit_width(val) <= bit_width);
        let byte = bit_pos >> 3;
        let shift = bit_pos & 7;
        let wide = (val as u128) << shift;
        for (i, &b) in wide.to_le_bytes().iter().take(9).enumerate() {
            data[byte + i] |= b;
        }
        bit_pos += bit_width;
    }
    buffer.truncate(start + num_bytes);
}

/// Appends the slop bytes required for reading bit-packed runs.
pub fn put_slop_bytes(buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&[0u8; SLOP_BYTES]);
}

/// Lightweight reader for values previously written with [`store_bit_packed`].
///
/// Does not track the number of packed elements; reading past the packed
/// length is a caller bug (bounds live with separately stored counts). The
/// underlying data must extend at least [`SLOP_BYTES`] bytes past the last
/// packed value.
#[derive(Clone, Copy)]
pub struct BitPackedReader<'a> {
    bit_width: usize,
    data: &'a [u8],
}

impl<'a> BitPackedReader<'a> {
    pub fn new(bit_width: usize, data: &'a [u8]) -> Self {
        debug_assert!(bit_width <= 64);
        Self { bit_width, data }
    }

    pub fn bit_width(&self) -> usize {
        self.bit_width
    }

    /// Returns the value at the given index.
    pub fn get(&self, index: usize) -> u64 {
        let bit0_offset = index * self.bit_width;
        let byte0_offset = bit0_offset >> 3;
        // The index of the 0th bit within the first loaded byte.
        let start = bit0_offset & 0x7;
        let mut val = load_u64_le(self.data, byte0_offset) >> start;

        if self.bit_width > MAX_SINGLE_WORD_BIT_WIDTH {
            let next_word_bits = (start + self.bit_width) as isize - 64;
            if next_word_bits > 0 {
                val |= load_u64_le(self.data, byte0_offset + 8)
                    << (self.bit_width - next_word_bits as usize);
            }
            if self.bit_width == 64 {
                return val;
            }
        }
        // Also correct for bit_width == 0: the mask is 0 and the loaded slop
        // bytes are discarded entirely.
        val & bit_mask(self.bit_width)
    }

    /// Visits the elements `[0, size)` in order, calling `add_value(i, value)`
    /// for each. Produces exactly the same values as repeated [`get`] calls.
    ///
    /// [`get`]: BitPackedReader::get
    pub fn scan<F: FnMut(usize, u64)>(&self, size: usize, mut add_value: F) {
        for i in 0..size {
            add_value(i, self.get(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(values: &[u64], width: usize) {
        let mut buffer = Vec::new();
        store_bit_packed(values, width, &mut buffer);
        put_slop_bytes(&mut buffer);
        let reader = BitPackedReader::new(width, &buffer);
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(reader.get(i), v, "index {} at width {}", i, width);
        }
        let mut scanned = Vec::new();
        reader.scan(values.len(), |i, v| {
            assert_eq!(i, scanned.len());
            scanned.push(v);
        });
        assert_eq!(scanned, values);
    }

    #[test]
    fn bit_width_of_values() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(255), 8);
        assert_eq!(bit_width(256), 9);
        assert_eq!(bit_width(u64::MAX), 64);
    }

    #[test]
    fn max_bit_width_of_slices() {
        assert_eq!(max_bit_width(&[]), 0);
        assert_eq!(max_bit_width(&[0, 0]), 0);
        assert_eq!(max_bit_width(&[1, 7, 3]), 3);
        assert_eq!(max_bit_width(&[1, u64::MAX]), 64);
    }

    #[test]
    fn zero_width_reads_zero() {
        let mut buffer = Vec::new();
        store_bit_packed(&[0, 0, 0], 0, &mut buffer);
        assert!(buffer.is_empty());
        put_slop_bytes(&mut buffer);
        let reader = BitPackedReader::new(0, &buffer);
        for i in 0..3 {
            assert_eq!(reader.get(i), 0);
        }
    }

    #[test]
    fn small_widths() {
        round_trip(&[1, 0, 1, 1, 0, 0, 1, 0, 1], 1);
        round_trip(&[3, 1, 2, 0, 3], 2);
        round_trip(&[5, 2, 7, 6, 1, 0, 4], 3);
        round_trip(&(0..255u64).collect::<Vec<_>>(), 8);
    }

    #[test]
    fn widths_around_single_word_limit() {
        for width in 57..=64usize {
            let mask = if width == 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            let values: Vec<u64> = (0..100u64)
                .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) & mask)
                .collect();
            round_trip(&values, width);
        }
    }

    #[test]
    fn max_values_at_full_width() {
        round_trip(&[u64::MAX, 0, u64::MAX, 1], 64);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_any_width(
            width in 0usize..=64,
            raw in proptest::collection::vec(any::<u64>(), 0..200),
        ) {
            let mask = match width {
                0 => 0,
                64 => u64::MAX,
                w => (1u64 << w) - 1,
            };
            let values: Vec<u64> = raw.iter().map(|v| v & mask).collect();
            round_trip(&values, width);
        }
    }
}
