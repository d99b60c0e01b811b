// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of the private bit-twiddling helpers from mempoolEbr.c (log2Envelope,
// findLastSet, multipleBits) and idxpyr.c (countTrailingZeros).

/// Ceiling log2: the smallest `k` with `2^k >= val`.
///
/// `log2Envelope(0) == 0` and `log2Envelope(1) == 0` by definition (there is
/// no smaller-than-one envelope); every other value rounds up to the next
/// power of two's exponent.
pub const fn log2_envelope(val: usize) -> u32 {
    if val == 0 {
        return 0;
    }
    let last_set = find_last_set(val as u64);
    if val.is_power_of_two() {
        last_set as u32
    } else {
        last_set as u32 + 1
    }
}

/// Position of the most significant set bit, or `-1` for zero.
pub const fn find_last_set(val: u64) -> i32 {
    if val == 0 {
        return -1;
    }
    63 - val.leading_zeros() as i32
}

/// Position of the least significant set bit, or `-1` for zero.
///
/// Mirrors `idxpyr.c`'s `countTrailingZeros`: the descent in
/// [`crate::pyramid::IndexPyramid`] guards every call site against a zero
/// block, so this is never invoked on zero in practice, but the contract is
/// preserved for the unit tests ported from the original.
pub const fn count_trailing_zeros(val: u32) -> i32 {
    if val == 0 {
        return -1;
    }
    val.trailing_zeros() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port of mp_findLastSet
    #[test]
    fn find_last_set_matches_reference() {
        assert_eq!(find_last_set(0), -1);
        assert_eq!(find_last_set(1 << 0), 0);
        assert_eq!(find_last_set(1 << 1), 1);
        assert_eq!(find_last_set(1 << 2), 2);
        assert_eq!(find_last_set(1 << 15), 15);
        assert_eq!(find_last_set(0x5555), 14);
        assert_eq!(find_last_set(0xAAAA), 15);
    }

    // Port of mp_testGetLog2Envelope
    #[test]
    fn log2_envelope_matches_reference() {
        assert_eq!(log2_envelope(0), 0);
        assert_eq!(log2_envelope(1), 0);
        assert_eq!(log2_envelope(2), 1);
        assert_eq!(log2_envelope(3), 2);
        assert_eq!(log2_envelope((1 << 15) + 1), 16);

        let bit_count = usize::BITS as usize;
        let highest_pow = 1usize << (bit_count - 1);
        assert_eq!(log2_envelope(highest_pow), bit_count as u32 - 1);
    }

    // Port of idxpyr_countTrailingZeros
    #[test]
    fn count_trailing_zeros_matches_reference() {
        assert_eq!(count_trailing_zeros(0), -1);
        assert_eq!(count_trailing_zeros(0x0F00), 8);
        assert_eq!(count_trailing_zeros(0x1000_0000), 28);
        assert_eq!(count_trailing_zeros(0x2000_0000), 29);
        assert_eq!(count_trailing_zeros(0x4000_0000), 30);
        assert_eq!(count_trailing_zeros(0x8000_0000), 31);
    }
}
