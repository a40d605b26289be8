//! Compression: turn the peeled graph into a small dense GE system.
//!
//! Diagonalizing the peeled submatrix leaves the deferred and mixing
//! columns dense; those columns of every row are tracked in the compression
//! matrix. Deferred rows then copy into the GE matrix, dense Shuffle-2 rows
//! add on top, and the heavy Cauchy tail and the invertibility patch close
//! the system.

use freshet_gf256::ops;

use crate::codec::{block_pair_mut, flip_bit, xor_row, xor_row_into, Codec, Mark, LIST_TERM};
use crate::prng::{shuffle_deck16, Abyssinian};
use crate::row;
use crate::tables::{HEAVY_MATRIX, INVERTIBLE_MATRIX_SEEDS};
use crate::HEAVY_ROWS;

impl Codec {
    /// Assign GE columns `[0, defer_count)` to the deferred columns in list
    /// order and set their bits in every referencing compression row. The
    /// next `mix_count` GE columns map to the mixing columns.
    pub(crate) fn set_deferred_columns(&mut self) {
        let mut ge_column_i: u16 = 0;
        let mut defer_i = self.defer_head_columns;
        while defer_i != LIST_TERM {
            let refs = self.peel_col_refs[usize::from(defer_i)];
            for &row_i in &refs.rows[..usize::from(refs.count)] {
                set_row_bit(self.compress_row_mut(usize::from(row_i)), ge_column_i);
            }

            self.ge_col_map[usize::from(ge_column_i)] = defer_i;
            let column = &mut self.peel_cols[usize::from(defer_i)];
            column.aux = ge_column_i;
            defer_i = column.next;
            ge_column_i += 1;
        }

        for added_i in 0..self.params.mix_count {
            let ge_column_i = self.defer_count + added_i;
            let column_i = self.params.block_count + added_i;
            self.ge_col_map[usize::from(ge_column_i)] = column_i;
        }
    }

    /// Set the three mixing-column bits for every deferred row and mark the
    /// row as deferred (`peel_column = LIST_TERM`).
    pub(crate) fn set_mixing_columns_for_deferred_rows(&mut self) {
        let p = self.params;
        let mut defer_row_i = self.defer_head_rows;
        while defer_row_i != LIST_TERM {
            let (params, next) = {
                let row = &mut self.peel_rows[usize::from(defer_row_i)];
                row.peel_column = LIST_TERM;
                (row.params, row.next)
            };

            let defer_count = self.defer_count;
            let compress_row = self.compress_row_mut(usize::from(defer_row_i));
            row::for_each_mix_column(&params, p.mix_count, p.mix_next_prime, |x| {
                flip_bit(compress_row, usize::from(defer_count + x));
            });

            defer_row_i = next;
        }
    }

    /// Diagonalize the peeled rows in forward solution order.
    ///
    /// Each peeled row's mixing bits are set, its block value materializes
    /// into its solved column's recovery slot, and both its compression row
    /// and its value fold into every other row referencing the solved
    /// column. The first value-use of a row fuses the copy and the add.
    pub(crate) fn peel_diagonal(&mut self) {
        let p = self.params;
        let bb = p.block_bytes;
        let n_minus_1 = usize::from(p.block_count) - 1;

        let mut peel_row_i = self.peel_head_rows;
        while peel_row_i != LIST_TERM {
            let (params, next, peel_column_i, is_copied) = {
                let row = &self.peel_rows[usize::from(peel_row_i)];
                (row.params, row.next, row.peel_column, row.is_copied)
            };

            // Mixing bits for this row.
            let defer_count = self.defer_count;
            let compress_row = self.compress_row_mut(usize::from(peel_row_i));
            row::for_each_mix_column(&params, p.mix_count, p.mix_next_prime, |x| {
                flip_bit(compress_row, usize::from(defer_count + x));
            });

            // Materialize this row's block value if nothing fused it yet.
            if !is_copied {
                let final_bytes = self.input_final_bytes;
                let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                let dest = &mut recovery[usize::from(peel_column_i) * bb..][..bb];
                let src = input.block(usize::from(peel_row_i), bb);
                if usize::from(peel_row_i) != n_minus_1 {
                    dest.copy_from_slice(&src[..bb]);
                } else {
                    dest[..final_bytes].copy_from_slice(&src[..final_bytes]);
                    dest[final_bytes..].fill(0);
                }
            }

            // Fold into every other row that references the solved column.
            let refs = self.peel_col_refs[usize::from(peel_column_i)];
            for &ref_row_i in &refs.rows[..usize::from(refs.count)] {
                if ref_row_i == peel_row_i {
                    continue;
                }

                xor_row_into(
                    &mut self.compress_matrix,
                    self.ge_pitch,
                    usize::from(ref_row_i),
                    usize::from(peel_row_i),
                    0,
                );

                let (ref_column_i, ref_is_copied) = {
                    let ref_row = &self.peel_rows[usize::from(ref_row_i)];
                    (ref_row.peel_column, ref_row.is_copied)
                };
                if ref_column_i == LIST_TERM {
                    continue; // deferred row: bits only, values come later
                }

                let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                let (dest, temp) = block_pair_mut(
                    recovery,
                    bb,
                    usize::from(ref_column_i),
                    usize::from(peel_column_i),
                );
                if ref_is_copied {
                    ops::add_mem(dest, temp);
                } else {
                    // Fuse the pending input copy with this add.
                    let src = input.block(usize::from(ref_row_i), bb);
                    if usize::from(ref_row_i) != n_minus_1 {
                        ops::addset_mem(dest, temp, src);
                    } else {
                        let final_bytes = self.input_final_bytes;
                        ops::addset_mem(&mut dest[..final_bytes], temp, src);
                        dest[final_bytes..].copy_from_slice(&temp[final_bytes..]);
                    }
                    self.peel_rows[usize::from(ref_row_i)].is_copied = true;
                }
            }

            peel_row_i = next;
        }
    }

    /// Copy the deferred rows' compression rows into GE rows
    /// `[dense_count, dense_count + defer_count)`.
    pub(crate) fn copy_deferred_rows(&mut self) {
        let mut ge_row_i = usize::from(self.params.dense_count);
        let mut defer_row_i = self.defer_head_rows;
        while defer_row_i != LIST_TERM {
            let pitch = self.ge_pitch;
            let src_start = usize::from(defer_row_i) * pitch;
            let dest_start = ge_row_i * pitch;
            let (ge, compress) = (&mut self.ge_matrix, &self.compress_matrix);
            ge[dest_start..dest_start + pitch]
                .copy_from_slice(&compress[src_start..src_start + pitch]);

            self.ge_row_map[ge_row_i] = defer_row_i;
            defer_row_i = self.peel_rows[usize::from(defer_row_i)].next;
            ge_row_i += 1;
        }
    }

    /// Generate the dense rows with the Shuffle-2 construction and add them
    /// into GE rows `[0, dense_count)`.
    ///
    /// Work proceeds in blocks of `dense_count` columns. Within a block the
    /// first output row carries a random half-weight bit pattern; each
    /// following row differs from the running pattern by exactly two flips,
    /// with two deck reshuffles interleaved. Output rows land in shuffled
    /// order, accumulating across column blocks.
    pub(crate) fn multiply_dense_rows(&mut self) {
        let p = self.params;
        let dense_count = usize::from(p.dense_count);
        let mut prng = Abyssinian::new(p.d_seed);

        let mut rows = vec![0u16; dense_count];
        let mut bits = vec![0u16; dense_count];
        // The extra GE row past the live rows is the running-pattern
        // scratch.
        let temp_row_i = dense_count + usize::from(self.defer_count);

        let mut column_i: usize = 0;
        while column_i < usize::from(p.block_count) {
            let max_x = dense_count.min(usize::from(p.block_count) - column_i);

            shuffle_deck16(&mut prng, &mut rows, p.dense_count.into());
            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());

            let set_count = (dense_count + 1) >> 1;

            // First output row: sum of the set-half columns.
            self.ge_row_mut(temp_row_i).fill(0);
            for ii in 0..set_count {
                let bit_i = usize::from(bits[ii]);
                if bit_i < max_x {
                    self.add_dense_column(column_i + bit_i, temp_row_i);
                }
            }
            let mut row_cursor = 0usize;
            self.store_temp_row(temp_row_i, usize::from(rows[row_cursor]));
            row_cursor += 1;

            // First half: flip one set bit and one clear bit per row.
            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());
            let loop_count = dense_count >> 1;
            for ii in 0..loop_count {
                let bit0 = usize::from(bits[ii]);
                let bit1 = usize::from(bits[set_count + ii]);
                if bit0 < max_x {
                    self.add_dense_column(column_i + bit0, temp_row_i);
                }
                if bit1 < max_x {
                    self.add_dense_column(column_i + bit1, temp_row_i);
                }
                self.store_temp_row(temp_row_i, usize::from(rows[row_cursor]));
                row_cursor += 1;
            }

            // Second half, after another reshuffle.
            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());
            let second_loop_count = loop_count - 1 + (dense_count & 1);
            for ii in 0..second_loop_count {
                let bit0 = usize::from(bits[ii]);
                let bit1 = usize::from(bits[set_count + ii]);
                if bit0 < max_x {
                    self.add_dense_column(column_i + bit0, temp_row_i);
                }
                if bit1 < max_x {
                    self.add_dense_column(column_i + bit1, temp_row_i);
                }
                self.store_temp_row(temp_row_i, usize::from(rows[row_cursor]));
                row_cursor += 1;
            }

            column_i += dense_count;
        }
    }

    /// Fold one conceptual column into the scratch GE row: a peeled
    /// column contributes its compression row, a deferred column its single
    /// GE bit.
    fn add_dense_column(&mut self, column_i: usize, temp_row_i: usize) {
        let column = self.peel_cols[column_i];
        if column.mark == Mark::Peel {
            let pitch = self.ge_pitch;
            let src = usize::from(column.aux) * pitch;
            let dest = temp_row_i * pitch;
            let (ge, compress) = (&mut self.ge_matrix, &self.compress_matrix);
            xor_row(&mut ge[dest..dest + pitch], &compress[src..src + pitch]);
        } else {
            let ge_column_i = usize::from(column.aux);
            flip_bit(self.ge_row_mut(temp_row_i), ge_column_i);
        }
    }

    /// XOR the scratch row into a destination GE row.
    fn store_temp_row(&mut self, temp_row_i: usize, dest_row_i: usize) {
        xor_row_into(&mut self.ge_matrix, self.ge_pitch, dest_row_i, temp_row_i, 0);
    }

    /// Install the fixed Cauchy block and its identity tail into the heavy
    /// matrix, below any extra-row slots.
    pub(crate) fn set_heavy_rows(&mut self) {
        let heavy_columns = usize::from(self.heavy_columns);
        let extra = usize::from(self.extra_count);

        for row_i in 0..usize::from(HEAVY_ROWS) {
            let dest = self.heavy_row_mut(extra + row_i);
            dest[..heavy_columns].copy_from_slice(&HEAVY_MATRIX[row_i][..heavy_columns]);
        }

        // Identity ties each heavy row to one of the last six mixing
        // columns.
        let base = heavy_columns - usize::from(HEAVY_ROWS);
        for ii in 0..usize::from(HEAVY_ROWS) {
            let dest = self.heavy_row_mut(extra + ii);
            for jj in 0..usize::from(HEAVY_ROWS) {
                dest[base + jj] = u8::from(ii == jj);
            }
        }
    }

    /// Add a known-invertible random GF(2) matrix over the dense block of
    /// the GE matrix, tying dense rows to dense mixing columns.
    pub(crate) fn add_invertibility_patch(&mut self) {
        let n = usize::from(self.params.dense_count);
        let offset = usize::from(self.defer_count);
        add_invertible_gf2_matrix(&mut self.ge_matrix, self.ge_pitch, offset, n);
    }
}

#[inline]
fn set_row_bit(row: &mut [u64], ge_column_i: u16) {
    row[usize::from(ge_column_i) >> 6] |= 1u64 << (ge_column_i & 63);
}

/// XOR a seeded random invertible `n x n` GF(2) matrix into `matrix` at bit
/// column `offset`, one destination row per matrix row starting at row 0.
///
/// Sizes past the seed table fall back to the identity, which is trivially
/// invertible.
pub(crate) fn add_invertible_gf2_matrix(matrix: &mut [u64], pitch: usize, offset: usize, n: usize) {
    if n == 0 {
        return;
    }

    if n >= INVERTIBLE_MATRIX_SEEDS.len() {
        for ii in 0..n {
            let column_i = offset + ii;
            matrix[ii * pitch + (column_i >> 6)] ^= 1u64 << (column_i & 63);
        }
        return;
    }

    fn next_word(prng: &mut Abyssinian) -> u64 {
        let rv1 = u64::from(prng.next_u32());
        let rv2 = u64::from(prng.next_u32());
        (rv2 << 32) | rv1
    }

    let mut prng = Abyssinian::new(u32::from(INVERTIBLE_MATRIX_SEEDS[n]));
    let shift = offset & 63;
    let word0 = offset >> 6;
    let add_pitch = n.div_ceil(64);

    for row_i in 0..n {
        let row = &mut matrix[row_i * pitch..][..pitch];
        if shift > 0 {
            let mut prev: u64 = 0;
            for ii in 0..add_pitch - 1 {
                let word = next_word(&mut prng);
                row[word0 + ii] ^= (prev >> (64 - shift)) | (word << shift);
                prev = word;
            }

            let word = next_word(&mut prng);
            let last_bit = (shift + n).div_ceil(64);
            let write_count = (shift + n) & 63;
            if last_bit > add_pitch {
                row[word0 + add_pitch - 1] ^= (prev >> (64 - shift)) | (word << shift);
                prev = word;
                let tail = prev >> (64 - shift);
                row[word0 + add_pitch] ^=
                    if write_count == 0 { tail } else { tail & ((1u64 << write_count) - 1) };
            } else {
                let tail = (prev >> (64 - shift)) | (word << shift);
                row[word0 + add_pitch - 1] ^=
                    if write_count == 0 { tail } else { tail & ((1u64 << write_count) - 1) };
            }
        } else {
            for ii in 0..add_pitch - 1 {
                let word = next_word(&mut prng);
                row[word0 + ii] ^= word;
            }
            let word = next_word(&mut prng);
            let write_count = n & 63;
            row[word0 + add_pitch - 1] ^=
                if write_count == 0 { word } else { word & ((1u64 << write_count) - 1) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// GF(2) rank by straightforward elimination over word rows.
    fn gf2_rank(rows: &mut Vec<Vec<u64>>, cols: usize) -> usize {
        let mut rank = 0;
        for col in 0..cols {
            let word = col >> 6;
            let mask = 1u64 << (col & 63);
            let Some(pivot) = (rank..rows.len()).find(|&r| rows[r][word] & mask != 0) else {
                continue;
            };
            rows.swap(rank, pivot);
            for r in 0..rows.len() {
                if r != rank && rows[r][word] & mask != 0 {
                    let pivot_row = rows[rank].clone();
                    for (a, b) in rows[r].iter_mut().zip(&pivot_row) {
                        *a ^= b;
                    }
                }
            }
            rank += 1;
        }
        rank
    }

    #[test]
    fn invertibility_patch_is_full_rank() {
        for n in [2usize, 6, 14, 22, 63, 64, 65, 100] {
            let pitch = (n + 64).div_ceil(64) + 1;
            let mut matrix = vec![0u64; n * pitch];
            add_invertible_gf2_matrix(&mut matrix, pitch, 0, n);
            let mut rows: Vec<Vec<u64>> =
                (0..n).map(|r| matrix[r * pitch..(r + 1) * pitch].to_vec()).collect();
            assert_eq!(gf2_rank(&mut rows, n), n, "seeded {n}x{n} matrix not invertible");
        }
    }

    #[test]
    fn invertibility_patch_offset_matches_unshifted() {
        // The same seeded matrix must land identically at any bit offset.
        let n = 30usize;
        let pitch = 3usize;
        let mut base = vec![0u64; n * pitch];
        add_invertible_gf2_matrix(&mut base, pitch, 0, n);

        for offset in [1usize, 17, 63, 64, 70] {
            let mut shifted = vec![0u64; n * pitch];
            add_invertible_gf2_matrix(&mut shifted, pitch, offset, n);
            for row in 0..n {
                for col in 0..n {
                    let b = base[row * pitch + (col >> 6)] >> (col & 63) & 1;
                    let target = offset + col;
                    let s = shifted[row * pitch + (target >> 6)] >> (target & 63) & 1;
                    assert_eq!(b, s, "row {row} col {col} offset {offset}");
                }
            }
        }
    }

    #[test]
    fn identity_fallback_above_table() {
        let n = 512usize;
        let pitch = n.div_ceil(64);
        let mut matrix = vec![0u64; n * pitch];
        add_invertible_gf2_matrix(&mut matrix, pitch, 0, n);
        for r in 0..n {
            for c in 0..n {
                let v = matrix[r * pitch + (c >> 6)] >> (c & 63) & 1;
                assert_eq!(v, u64::from(r == c));
            }
        }
    }
}
