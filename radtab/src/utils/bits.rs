//! Bit-addressed views over byte buffers.
//!
//! Bits are numbered MSB-first: bit 0 of a buffer is `0x80` of byte 0.

/// Read a single bit.
#[inline]
pub fn bit_at(bytes: &[u8], bit: usize) -> bool {
    bytes[bit >> 3] & (0x80 >> (bit & 7)) != 0
}

/// A run of `len` bits starting `start` bits into `bytes`.
#[derive(Clone, Copy, Debug)]
pub struct Span<'a> {
    bytes: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> Span<'a> {
    pub fn new(bytes: &'a [u8], start: usize, len: usize) -> Self {
        debug_assert!(start + len <= bytes.len() * 8, "span past end of buffer");
        Self { bytes, start, len }
    }

    /// The whole of `bytes`, starting at bit `start`.
    pub fn from_bit(bytes: &'a [u8], start: usize) -> Self {
        Self::new(bytes, start, bytes.len() * 8 - start)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bit(&self, at: usize) -> bool {
        debug_assert!(at < self.len);
        bit_at(self.bytes, self.start + at)
    }

    /// The byte holding span bits `at..at + 8`, if that run is byte-aligned in the buffer.
    #[inline]
    pub fn aligned_byte(&self, at: usize) -> Option<u8> {
        let pos = self.start + at;
        (pos & 7 == 0 && at + 8 <= self.len).then(|| self.bytes[pos >> 3])
    }

    /// Span with the first `n` bits dropped.
    pub fn skip(&self, n: usize) -> Self {
        debug_assert!(n <= self.len);
        Self::new(self.bytes, self.start + n, self.len - n)
    }

    /// Length, in bits, of the prefix shared by `self` and `other`.
    ///
    /// Whenever both cursors sit on byte boundaries the comparison runs a word, then a byte,
    /// at a time; it only drops to single bits around a boundary or at the first mismatching
    /// byte.
    pub fn common_prefix(&self, other: &Span<'_>) -> usize {
        let limit = self.len.min(other.len);
        let mut n = 0;
        while n < limit {
            let (a, b) = (self.start + n, other.start + n);
            if a & 7 == 0 && b & 7 == 0 {
                let (ab, bb) = (a >> 3, b >> 3);
                if limit - n >= 64 {
                    let x = u64::from_be_bytes(word(self.bytes, ab))
                        ^ u64::from_be_bytes(word(other.bytes, bb));
                    if x != 0 {
                        return n + x.leading_zeros() as usize;
                    }
                    n += 64;
                    continue;
                }
                if limit - n >= 8 {
                    let x = self.bytes[ab] ^ other.bytes[bb];
                    if x != 0 {
                        return n + x.leading_zeros() as usize;
                    }
                    n += 8;
                    continue;
                }
            }
            if bit_at(self.bytes, a) != bit_at(other.bytes, b) {
                return n;
            }
            n += 1;
        }
        limit
    }
}

#[inline]
fn word(bytes: &[u8], at: usize) -> [u8; 8] {
    let mut w = [0u8; 8];
    w.copy_from_slice(&bytes[at..at + 8]);
    w
}

#[cfg(test)]
mod tests {
    use rand::{Rng, rng};

    use super::*;

    fn naive_common_prefix(a: &Span<'_>, b: &Span<'_>) -> usize {
        let limit = a.len().min(b.len());
        (0..limit).take_while(|&i| a.bit(i) == b.bit(i)).count()
    }

    #[test]
    fn test_bit_order_is_msb_first() {
        let bytes = [0b1000_0001u8, 0b0100_0000];
        assert!(bit_at(&bytes, 0));
        assert!(!bit_at(&bytes, 1));
        assert!(bit_at(&bytes, 7));
        assert!(bit_at(&bytes, 9));
        assert!(!bit_at(&bytes, 10));
    }

    #[test]
    fn test_aligned_mismatch() {
        let a = Span::from_bit(b"abc", 0);
        let b = Span::from_bit(b"abd", 0);
        // 'c' = 0110_0011, 'd' = 0110_0100: they part ways at bit 5 of the third byte.
        assert_eq!(a.common_prefix(&b), 16 + 5);
    }

    #[test]
    fn test_prefix_of_other() {
        let a = Span::from_bit(b"ab", 0);
        let b = Span::from_bit(b"abc", 0);
        assert_eq!(a.common_prefix(&b), 16);
        assert_eq!(b.common_prefix(&a), 16);
    }

    #[test]
    fn test_unaligned_offsets() {
        // Same bit string shifted by three bits.
        let a = [0b1011_0110u8, 0b1100_0000];
        let b = [0b0001_0110u8, 0b1101_1000];
        let sa = Span::new(&a, 0, 10);
        let sb = Span::new(&b, 3, 10);
        assert_eq!(sa.common_prefix(&sb), 10);
        assert_eq!(sa.skip(2).common_prefix(&sb.skip(2)), 8);
    }

    #[test]
    fn test_aligned_byte() {
        let bytes = b"xyz";
        let span = Span::new(bytes, 4, 20);
        assert_eq!(span.aligned_byte(0), None);
        assert_eq!(span.aligned_byte(4), Some(b'y'));
        assert_eq!(span.aligned_byte(12), Some(b'z'));
        assert_eq!(span.skip(12).len(), 8);
    }

    #[test]
    fn test_matches_naive_on_random_input() {
        let mut rng = rng();
        for _ in 0..2_000 {
            let len = rng.random_range(1..40);
            let a: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let mut b = a.clone();
            // Flip one bit somewhere (or nowhere) so there is a long shared prefix to find.
            if rng.random_bool(0.8) {
                let bit = rng.random_range(0..len * 8);
                b[bit >> 3] ^= 0x80 >> (bit & 7);
            }
            let start = rng.random_range(0..8);
            let sa = Span::from_bit(&a, start);
            let sb = Span::from_bit(&b, start);
            assert_eq!(sa.common_prefix(&sb), naive_common_prefix(&sa, &sb));

            let other_start = rng.random_range(0..8);
            let sc = Span::from_bit(&b, other_start);
            assert_eq!(sa.common_prefix(&sc), naive_common_prefix(&sa, &sc));
        }
    }
}
