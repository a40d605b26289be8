//! Row structure generation.
//!
//! Every coded block is described by a deterministic function of
//! `(id, peel_seed)`: a Hamming weight drawn from a Soliton-like
//! distribution, a `(start, step)` pair walking the peel columns, and a
//! second pair walking the three mixing columns. Encoder and decoder must
//! produce identical walks for every id, so nothing in here may depend on
//! anything but its arguments.

use crate::prng::Abyssinian;
use crate::tables::WEIGHT_DIST;

/// Block counts above this stop emitting weight-1 rows.
const MAX_WEIGHT_1: u16 = 4096;

/// Probability of a weight-1 row, as a fraction of the 32-bit draw range.
const WEIGHT_1_PROB: u32 = ((1u64 << 32) / 128 - 1) as u32;

/// Column-walk parameters regenerated from `(id, peel_seed)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RowParams {
    pub peel_weight: u16,
    pub peel_a: u16,
    pub peel_x0: u16,
    pub mix_a: u16,
    pub mix_x0: u16,
}

impl RowParams {
    /// Generate the row description for a block id.
    pub(crate) fn generate(id: u32, p_seed: u32, block_count: u16, mix_count: u16) -> Self {
        let mut prng = Abyssinian::new_pair(id, p_seed);

        let weight = peel_row_weight(prng.next_u32(), block_count);
        // Do not touch more than half the message in one row.
        let peel_weight = weight.min(block_count / 2);

        let rv = prng.next_u32();
        let peel_a = ((rv as u16) % (block_count - 1)) + 1;
        let peel_x0 = ((rv >> 16) as u16) % block_count;

        let rv = prng.next_u32();
        let mix_a = ((rv as u16) % (mix_count - 1)) + 1;
        let mix_x0 = ((rv >> 16) as u16) % mix_count;

        RowParams { peel_weight, peel_a, peel_x0, mix_a, mix_x0 }
    }
}

/// Draw a peel-row weight from the cumulative Soliton table.
///
/// For small block counts a 1/128 slice of the draw range yields weight 1;
/// the remainder is rescaled onto the table. Larger block counts peel better
/// with a minimum weight of 2.
fn peel_row_weight(mut rv: u32, block_count: u16) -> u16 {
    if block_count <= MAX_WEIGHT_1 {
        if rv < WEIGHT_1_PROB {
            return 1;
        }
        rv -= WEIGHT_1_PROB;
    }

    if rv <= WEIGHT_DIST[1] {
        return 2;
    }
    if rv <= WEIGHT_DIST[2] {
        return 3;
    }

    let mut weight = 3;
    while rv > WEIGHT_DIST[weight as usize] {
        weight += 1;
    }
    weight + 1
}

/// Advance a column walk one step.
///
/// Weyl sequence modulo the prime `p`, folded back into `[0, b)` without a
/// second modulus in the common cases.
#[inline]
pub(crate) fn iterate_next_column(x: u16, b: u16, p: u16, a: u16) -> u16 {
    let mut x = ((u32::from(x) + u32::from(a)) % u32::from(p)) as u16;
    if x >= b {
        let distance = p - x;
        if a >= distance {
            x = a - distance;
        } else {
            // Rare: fold through a wider intermediate.
            x = (((u32::from(a) << 16) - u32::from(distance)) % u32::from(a)) as u16;
        }
    }
    x
}

/// Visit the three mixing columns of a row in walk order.
#[inline]
pub(crate) fn for_each_mix_column<F: FnMut(u16)>(
    params: &RowParams,
    mix_count: u16,
    mix_next_prime: u16,
    mut f: F,
) {
    let mut x = params.mix_x0;
    f(x);
    x = iterate_next_column(x, mix_count, mix_next_prime, params.mix_a);
    f(x);
    x = iterate_next_column(x, mix_count, mix_next_prime, params.mix_a);
    f(x);
}
