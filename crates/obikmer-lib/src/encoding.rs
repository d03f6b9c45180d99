//! DNA nucleotide encoding
//!
//! This module implements the 2-bit encoding used for every k-mer code:
//!
//! - A -> 00
//! - C -> 01
//! - G -> 10
//! - T/U -> 11
//!
//! Bases are looked up through a 32-entry table indexed by `byte & 31`, which
//! folds upper and lower case together and maps `U` onto `T`. Under this
//! encoding the complement of a base is its bitwise NOT, so the reverse
//! complement of a k-mer is a masked NOT followed by a 2-bit pair reversal.

use crate::constants::ERROR_TAG_MASK;

/// Sentinel returned by [`encode_base_checked`] for non-ACGTU bytes
pub const AMBIGUOUS: u8 = 0xFF;

const fn build_table(fill: u8) -> [u8; 32] {
    let mut table = [fill; 32];
    table[(b'A' & 31) as usize] = 0b00;
    table[(b'C' & 31) as usize] = 0b01;
    table[(b'G' & 31) as usize] = 0b10;
    table[(b'T' & 31) as usize] = 0b11;
    table[(b'U' & 31) as usize] = 0b11;
    table
}

/// Plain encoding table: anything that is not ACGTU becomes A
pub static NUC_TABLE: [u8; 32] = build_table(0b00);

/// Error-aware encoding table: anything that is not ACGTU becomes [`AMBIGUOUS`]
pub static NUC_TABLE_CHECKED: [u8; 32] = build_table(AMBIGUOUS);

/// Encode a nucleotide, silently collapsing ambiguous bases to A
#[inline]
pub fn encode_base(base: u8) -> u8 {
    NUC_TABLE[(base & 31) as usize]
}

/// Encode a nucleotide, returning [`AMBIGUOUS`] for non-ACGTU bytes
#[inline]
pub fn encode_base_checked(base: u8) -> u8 {
    // `byte & 31` aliases some punctuation onto letters; only letters are bases
    if !base.is_ascii_alphabetic() {
        return AMBIGUOUS;
    }
    NUC_TABLE_CHECKED[(base & 31) as usize]
}

/// Whether a byte is one of A, C, G, T, U (any case)
#[inline]
pub fn is_acgt(base: u8) -> bool {
    encode_base_checked(base) != AMBIGUOUS
}

/// Decode a 2-bit value to an uppercase nucleotide
#[inline]
pub const fn decode_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b10 => b'G',
        _ => b'T',
    }
}

/// Mask keeping the low `2k` bits
#[inline]
pub const fn kmer_mask(k: usize) -> u64 {
    if k >= 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Reverse complement of a `k`-wide code
///
/// Bits 62-63 (the ambiguity tag of error-tagged k-mers) are carried over
/// unchanged, so the operation is an involution on tagged codes as well.
#[inline]
pub fn reverse_complement(kmer: u64, k: usize) -> u64 {
    debug_assert!(k >= 1 && k <= 31);
    let tag = kmer & ERROR_TAG_MASK;
    // Complement: NOT flips A<->T and C<->G
    let mut x = !kmer;
    // Swap adjacent 2-bit pairs
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    // Swap adjacent nibbles
    x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    // Reverse bytes
    x = x.swap_bytes();
    // The k bases now sit in the high 2k bits
    x >>= 64 - 2 * k;
    (x & kmer_mask(k)) | tag
}

/// Canonical form: the smaller of a code and its reverse complement
#[inline]
pub fn canonical(kmer: u64, k: usize) -> u64 {
    let tag = kmer & ERROR_TAG_MASK;
    let fwd = kmer & !ERROR_TAG_MASK;
    let rc = reverse_complement(fwd, k);
    fwd.min(rc) | tag
}

/// Encode an ASCII sequence of at most 31 bases into a code (ambiguous bases become A)
pub fn encode_kmer(seq: &[u8]) -> u64 {
    debug_assert!(seq.len() <= 32);
    seq.iter()
        .fold(0u64, |acc, &b| (acc << 2) | encode_base(b) as u64)
}

/// Render a `k`-wide code as an uppercase string (the ambiguity tag is ignored)
pub fn decode_kmer(kmer: u64, k: usize) -> String {
    let mut out = String::with_capacity(k);
    for i in (0..k).rev() {
        out.push(decode_base(((kmer >> (2 * i)) & 0b11) as u8) as char);
    }
    out
}

/// Reverse complement of an ASCII sequence (ambiguous bases become N)
pub fn reverse_complement_sequence(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match encode_base_checked(b) {
            AMBIGUOUS => b'N',
            code => decode_base(code ^ 0b11),
        })
        .collect()
}

/// Extract the ambiguity tag (0-3) of an error-tagged k-mer
#[inline]
pub fn error_tag(kmer: u64) -> u8 {
    (kmer >> 62) as u8
}

/// Pack bases 2 bits each, high bits first in every byte; the last byte is zero-padded
pub fn pack_bases(seq: &[u8], out: &mut Vec<u8>) {
    for chunk in seq.chunks(4) {
        let mut byte = 0u8;
        for (i, &b) in chunk.iter().enumerate() {
            byte |= encode_base(b) << (6 - 2 * i);
        }
        out.push(byte);
    }
}

/// Read the 2-bit code of base `i` from a packed buffer produced by [`pack_bases`]
#[inline]
pub fn packed_base(packed: &[u8], i: usize) -> u8 {
    (packed[i / 4] >> (6 - 2 * (i % 4))) & 0b11
}

/// Unpack `len` bases from a packed buffer into ASCII
pub fn unpack_bases(packed: &[u8], len: usize) -> Vec<u8> {
    (0..len).map(|i| decode_base(packed_base(packed, i))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base() {
        assert_eq!(encode_base(b'A'), 0b00);
        assert_eq!(encode_base(b'a'), 0b00);
        assert_eq!(encode_base(b'C'), 0b01);
        assert_eq!(encode_base(b'c'), 0b01);
        assert_eq!(encode_base(b'G'), 0b10);
        assert_eq!(encode_base(b'g'), 0b10);
        assert_eq!(encode_base(b'T'), 0b11);
        assert_eq!(encode_base(b't'), 0b11);
        assert_eq!(encode_base(b'U'), 0b11);
        assert_eq!(encode_base(b'u'), 0b11);

        // Ambiguous bases collapse to A
        assert_eq!(encode_base(b'N'), 0b00);
        assert_eq!(encode_base(b'R'), 0b00);
    }

    #[test]
    fn test_encode_base_checked() {
        assert_eq!(encode_base_checked(b'G'), 0b10);
        assert_eq!(encode_base_checked(b'u'), 0b11);
        assert_eq!(encode_base_checked(b'N'), AMBIGUOUS);
        assert_eq!(encode_base_checked(b'n'), AMBIGUOUS);
        assert_eq!(encode_base_checked(b'-'), AMBIGUOUS);
        assert_eq!(encode_base_checked(b'!'), AMBIGUOUS);
    }

    #[test]
    fn test_reverse_complement() {
        let k = 5;
        let kmer = encode_kmer(b"ACGTG");
        assert_eq!(decode_kmer(reverse_complement(kmer, k), k), "CACGT");

        let kmer = encode_kmer(b"ACGTACG");
        assert_eq!(decode_kmer(reverse_complement(kmer, 7), 7), "CGTACGT");

        let kmer = encode_kmer(b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(
            decode_kmer(reverse_complement(kmer, 31), 31),
            "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"
        );
    }

    #[test]
    fn test_reverse_complement_preserves_tag() {
        let kmer = encode_kmer(b"ACGTTGCAA") | (2u64 << 62);
        let rc = reverse_complement(kmer, 9);
        assert_eq!(error_tag(rc), 2);
        assert_eq!(reverse_complement(rc, 9), kmer);
    }

    #[test]
    fn test_canonical() {
        let k = 5;
        let kmer = encode_kmer(b"TTTTT");
        assert_eq!(canonical(kmer, k), encode_kmer(b"AAAAA"));
        let kmer = encode_kmer(b"ACGTG");
        let rc = reverse_complement(kmer, k);
        assert_eq!(canonical(kmer, k), kmer.min(rc));
        assert_eq!(canonical(rc, k), canonical(kmer, k));
    }

    #[test]
    fn test_decode_roundtrip() {
        for seq in ["ACGT", "AAAA", "TTTT", "GATTACA"] {
            assert_eq!(decode_kmer(encode_kmer(seq.as_bytes()), seq.len()), seq);
        }
    }

    #[test]
    fn test_pack_unpack() {
        let seq = b"ACGTACGTTGA";
        let mut packed = Vec::new();
        pack_bases(seq, &mut packed);
        assert_eq!(packed.len(), 3);
        // ACGT = 00 01 10 11
        assert_eq!(packed[0], 0b0001_1011);
        // TGA + padding = 11 10 00 00
        assert_eq!(packed[2], 0b1110_0000);
        assert_eq!(unpack_bases(&packed, seq.len()), seq.to_vec());
    }

    #[test]
    fn test_reverse_complement_sequence() {
        assert_eq!(reverse_complement_sequence(b"ACGTN"), b"NACGT".to_vec());
        assert_eq!(reverse_complement_sequence(b"aacc"), b"GGTT".to_vec());
    }
}
