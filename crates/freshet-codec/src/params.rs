//! Code parameter selection.
//!
//! Given `(message_bytes, block_bytes)` this module fixes everything about
//! the check matrix: the block count, the prime moduli for the column walks,
//! the dense row count, and the peel/dense seeds. Both endpoints derive the
//! same parameters independently, so the piecewise dense-count curve and the
//! seed lookup rules are wire contract just like the tables they index.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tables::{
    DENSE_SEEDS, EXCEPT_TABLE, PRIMES_UNDER_256, SIEVE_TABLE, SMALL_PEEL_SEEDS, SQUARE_ROOT_TABLE,
};
use crate::{HEAVY_ROWS, MAX_BLOCK_COUNT, MIN_BLOCK_COUNT};

/// Largest dense row count the seed table covers.
const MAX_DENSE_COUNT: u16 = 486;

/// Block counts at or below this use the tuned small-count peel seed table.
const SMALL_SEED_MAX: u16 = 261;

/// Selected code parameters for one message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CodeParams {
    /// Number of source blocks `N`.
    pub block_count: u16,
    /// Bytes per block `B`.
    pub block_bytes: usize,
    /// Smallest prime at or above `block_count`.
    pub block_next_prime: u16,
    /// Dense row count `D`, always `D mod 4 = 2`.
    pub dense_count: u16,
    /// Mixing column count, `dense_count + HEAVY_ROWS`.
    pub mix_count: u16,
    /// Smallest prime at or above `mix_count`.
    pub mix_next_prime: u16,
    /// Seed for the peeling matrix rows.
    pub p_seed: u32,
    /// Seed for the dense Shuffle-2 rows.
    pub d_seed: u32,
}

impl CodeParams {
    /// Select parameters for a message.
    pub fn choose(message_bytes: usize, block_bytes: usize) -> Result<Self, Error> {
        if message_bytes < 1 || block_bytes < 1 {
            return Err(Error::InvalidInput);
        }

        let blocks = message_bytes.div_ceil(block_bytes);
        if blocks < usize::from(MIN_BLOCK_COUNT) {
            return Err(Error::TooSmall);
        }
        if blocks > usize::from(MAX_BLOCK_COUNT) {
            return Err(Error::TooLarge);
        }
        let block_count = blocks as u16;

        let dense_count = dense_count_for(block_count);
        let d_seed = dense_seed_for(dense_count)?;
        let p_seed = peel_seed_for(block_count);
        let mix_count = dense_count + HEAVY_ROWS;

        Ok(CodeParams {
            block_count,
            block_bytes,
            block_next_prime: next_prime16(block_count),
            dense_count,
            mix_count,
            mix_next_prime: next_prime16(mix_count),
            p_seed,
            d_seed,
        })
    }

    /// Bytes occupied by the final source block.
    pub fn final_bytes(&self, message_bytes: usize) -> usize {
        let partial = message_bytes % self.block_bytes;
        if partial == 0 {
            self.block_bytes
        } else {
            partial
        }
    }
}

/// Dense row count for a block count.
///
/// Piecewise curve fitted against measured invertibility, then rounded up to
/// the next count with `D mod 4 = 2` (other residues shuffle into matrices
/// that are much less often invertible).
fn dense_count_for(block_count: u16) -> u16 {
    let n = block_count;
    let mut dense = if n < 256 {
        match n {
            2 => 2,
            3 => 6,
            _ => 10 + square_root16(n) / 2 + n / 50,
        }
    } else if n <= 4096 {
        18 + square_root16(n) + n / 300
    } else if n <= 32768 {
        22 + n / 100
    } else if n <= 44000 {
        26 + n / 114
    } else if n <= 52500 {
        74 + n / 128
    } else {
        880 - n / 128
    };

    match dense & 3 {
        0 => dense += 2,
        1 => dense += 1,
        3 => dense += 3,
        _ => {}
    }
    dense
}

/// Shuffle-2 seed for a dense row count.
fn dense_seed_for(dense_count: u16) -> Result<u32, Error> {
    if dense_count < 14 {
        return match dense_count {
            2 => Ok(0), // 2x2 is invertible for any seed
            6 => Ok(67),
            _ => Err(Error::BadDenseSeed),
        };
    }
    if dense_count > MAX_DENSE_COUNT {
        return Err(Error::BadDenseSeed);
    }
    // NOTE: the table entry for dense_count = 70 is known to be weak; it is
    // kept as-is for interoperability at the cost of a small overhead bump
    // in the affected block-count range.
    Ok(u32::from(DENSE_SEEDS[usize::from(dense_count - 14) / 4]))
}

/// Peel seed for a block count.
///
/// Small counts use a tuned table. Above that the block count itself is the
/// seed unless the exception bitfield flags it, in which case a short ladder
/// of fallback seeds applies.
fn peel_seed_for(block_count: u16) -> u32 {
    if block_count <= SMALL_SEED_MAX {
        return u32::from(SMALL_PEEL_SEEDS[usize::from(block_count)]);
    }

    // The bitfield covers counts below 64000 exactly; the one count past it
    // (64000 itself) has no exception entry.
    let word = EXCEPT_TABLE.get(usize::from(block_count >> 6)).copied().unwrap_or(0);
    if word & (1u64 << (block_count & 63)) == 0 {
        return u32::from(block_count);
    }

    match block_count {
        51467 => 5,
        5627 | 12740 | 14315 | 22012 | 29074 | 29737 | 33755 | 33811 | 34162 | 34413 | 37991
        | 42658 | 45776 | 52135 | 52675 | 54075 | 54354 | 57005 | 58589 | 63912 => 3,
        _ => 1,
    }
}

/// 16-bit integer square root, rounded.
pub(crate) fn square_root16(x: u16) -> u16 {
    if x < 0x100 {
        return u16::from(SQUARE_ROOT_TABLE[usize::from(x)]) >> 4;
    }

    let mut r = if x >= 0x1000 {
        if x >= 0x4000 {
            u16::from(SQUARE_ROOT_TABLE[usize::from(x >> 8)]) + 1
        } else {
            (u16::from(SQUARE_ROOT_TABLE[usize::from(x >> 6)]) >> 1) + 1
        }
    } else if x >= 0x400 {
        (u16::from(SQUARE_ROOT_TABLE[usize::from(x >> 4)]) >> 2) + 1
    } else {
        (u16::from(SQUARE_ROOT_TABLE[usize::from(x >> 2)]) >> 3) + 1
    };

    if u32::from(r) * u32::from(r) > u32::from(x) {
        r -= 1;
    }
    r
}

/// Smallest prime at or above `n`.
///
/// Trial division over the primes table, with a truncated Sieve of
/// Eratosthenes picking candidates coprime to 2, 3, 5, and 7.
pub(crate) fn next_prime16(n: u16) -> u16 {
    match n {
        0 | 1 => return 1,
        2 => return 2,
        3 => return 3,
        4 | 5 => return 5,
        6 | 7 => return 7,
        _ => {}
    }

    let mut offset = usize::from(n % 210);
    let next = u16::from(SIEVE_TABLE[offset]);
    offset += usize::from(next) + 1;
    let mut n = n + next;

    let mut p_max = square_root16(n);
    loop {
        let mut composite = false;
        for &p in PRIMES_UNDER_256.iter() {
            if p > p_max {
                return n;
            }
            if n % p == 0 {
                composite = true;
                break;
            }
        }
        debug_assert!(composite);

        if offset >= SIEVE_TABLE.len() {
            offset -= SIEVE_TABLE.len();
        }
        let next = u16::from(SIEVE_TABLE[offset]);
        offset += usize::from(next) + 1;
        n += next + 1;

        // Derivative square-root update; cheaper than recomputing.
        if u32::from(p_max) * u32::from(p_max) < u32::from(n) {
            p_max += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime(n: u16) -> bool {
        if n < 2 {
            return false;
        }
        let mut d = 2u32;
        while d * d <= u32::from(n) {
            if u32::from(n) % d == 0 {
                return false;
            }
            d += 1;
        }
        true
    }

    #[test]
    fn square_root_matches_reference() {
        for x in 0..=u16::MAX {
            let expect = (f64::from(x)).sqrt().floor() as u16;
            assert_eq!(square_root16(x), expect, "sqrt({x})");
        }
    }

    #[test]
    fn next_prime_is_prime_and_minimal() {
        for n in [2u16, 3, 4, 28, 100, 255, 256, 1000, 4095, 64000] {
            let p = next_prime16(n);
            assert!(p >= n);
            assert!(is_prime(p), "next_prime16({n}) = {p} not prime");
            for q in n..p {
                assert!(!is_prime(q), "skipped prime {q} for n={n}");
            }
        }
    }

    #[test]
    fn dense_count_spot_values() {
        assert_eq!(dense_count_for(2), 2);
        assert_eq!(dense_count_for(3), 6);
        for n in (4..=64000u32).step_by(61) {
            let d = dense_count_for(n as u16);
            assert_eq!(d % 4, 2, "D mod 4 != 2 for n={n}");
            assert!(d <= MAX_DENSE_COUNT, "D={d} too large for n={n}");
        }
    }

    #[test]
    fn choose_rejects_out_of_range() {
        assert!(matches!(CodeParams::choose(1, 1), Err(Error::TooSmall)));
        assert!(matches!(CodeParams::choose(64001, 1), Err(Error::TooLarge)));
        assert!(matches!(CodeParams::choose(0, 8), Err(Error::InvalidInput)));
        assert!(matches!(CodeParams::choose(8, 0), Err(Error::InvalidInput)));
    }

    #[test]
    fn choose_basic_invariants() {
        for (m, b) in [(2usize, 1usize), (28_000, 1000), (1024 * 1300, 1300), (64_000, 1)] {
            let p = CodeParams::choose(m, b).unwrap();
            assert_eq!(usize::from(p.block_count), m.div_ceil(b));
            assert!(p.block_next_prime >= p.block_count);
            assert_eq!(p.mix_count, p.dense_count + HEAVY_ROWS);
            assert!(p.mix_next_prime >= p.mix_count);
        }
    }

    #[test]
    fn peel_seed_default_and_exceptions() {
        // Small counts come from the tuned table.
        assert_eq!(peel_seed_for(2), u32::from(SMALL_PEEL_SEEDS[2]));
        // Unflagged large counts seed with the count itself.
        assert_eq!(peel_seed_for(1000), 1000);
        // Known exception ladder entries.
        assert_eq!(peel_seed_for(51467), 5);
        assert_eq!(peel_seed_for(5627), 3);
    }

    #[test]
    fn final_bytes_partial_and_exact() {
        let p = CodeParams::choose(1001, 100).unwrap();
        assert_eq!(p.final_bytes(1001), 1);
        let p = CodeParams::choose(1000, 100).unwrap();
        assert_eq!(p.final_bytes(1000), 100);
    }
}
