//! Gaussian elimination over the compressed system.
//!
//! The GE matrix is triangularized in place, binary columns first, then the
//! heavy GF(256) tail. Eliminations record themselves instead of erasing:
//! a row that absorbs a pivot keeps its bit (or byte coefficient) at that
//! pivot's column, and the substitution phase replays those records against
//! the solved column values. Pivot selection swaps indices in the pivot
//! array, never matrix rows, and heavy rows stay at the tail of the array so
//! binary rows win ties.

use freshet_gf256 as gf256;
use tracing::trace;

use crate::codec::{bit, block_pair_mut, flip_bit, Codec, Mark};
use crate::error::Error;
use crate::row::{self, RowParams};
use crate::HEAVY_ROWS;

impl Codec {
    /// Reset the pivot array to the identity over the live GE rows.
    pub(crate) fn setup_triangle(&mut self) {
        let pivot_count = self.defer_count + self.params.dense_count;
        for (i, p) in self.pivots[..usize::from(pivot_count)].iter_mut().enumerate() {
            *p = i as u16;
        }
        self.next_pivot = 0;
        self.pivot_count = pivot_count;

        if self.first_heavy_column == 0 {
            self.insert_heavy_rows();
        }
    }

    /// Convert any extra rows still in play to heavy representation and
    /// append the six heavy rows at the tail of the pivot list.
    pub(crate) fn insert_heavy_rows(&mut self) {
        let mut first_heavy_pivot = usize::from(self.pivot_count);
        let column_count = self.ge_cols();
        let first_heavy_row = usize::from(self.first_heavy_row());
        let first_heavy_column = usize::from(self.first_heavy_column);

        for pivot_j in (0..usize::from(self.pivot_count)).rev() {
            let ge_row_j = usize::from(self.pivots[pivot_j]);
            if ge_row_j < first_heavy_row {
                continue;
            }

            // Unused extras move to the back so heavy candidates stay
            // contiguous at the tail.
            if pivot_j >= usize::from(self.next_pivot) {
                first_heavy_pivot -= 1;
                self.pivots[pivot_j] = self.pivots[first_heavy_pivot];
                self.pivots[first_heavy_pivot] = ge_row_j as u16;
            }

            // Expand the row's heavy-range bits into bytes.
            for ge_column_j in first_heavy_column..column_count {
                let b = u8::from(bit(self.ge_row(ge_row_j), ge_column_j));
                self.heavy_row_mut(ge_row_j - first_heavy_row)[ge_column_j - first_heavy_column] =
                    b;
            }
        }

        self.first_heavy_pivot = first_heavy_pivot as u16;

        for heavy_i in 0..usize::from(HEAVY_ROWS) {
            self.pivots[usize::from(self.pivot_count) + heavy_i] =
                (first_heavy_row + usize::from(self.extra_count) + heavy_i) as u16;
        }
        self.pivot_count += HEAVY_ROWS;
    }

    /// Binary elimination over the columns not protected by heavy rows.
    fn triangle_non_heavy(&mut self) -> bool {
        let pivot_count = usize::from(self.pivot_count);
        let first_heavy_column = usize::from(self.first_heavy_column);

        let mut pivot_i = usize::from(self.next_pivot);
        while pivot_i < first_heavy_column {
            let mut found = false;

            for pivot_j in pivot_i..pivot_count {
                let ge_row_j = usize::from(self.pivots[pivot_j]);
                if !bit(self.ge_row(ge_row_j), pivot_i) {
                    continue;
                }

                found = true;
                self.pivots[pivot_j] = self.pivots[pivot_i];
                self.pivots[pivot_i] = ge_row_j as u16;

                for pivot_k in pivot_j + 1..pivot_count {
                    let ge_row_k = usize::from(self.pivots[pivot_k]);
                    if bit(self.ge_row(ge_row_k), pivot_i) {
                        eliminate_binary(
                            &mut self.ge_matrix,
                            self.ge_pitch,
                            ge_row_k,
                            ge_row_j,
                            pivot_i,
                        );
                    }
                }
                break;
            }

            if !found {
                self.next_pivot = pivot_i as u16;
                return false;
            }
            pivot_i += 1;
        }

        self.next_pivot = pivot_i as u16;
        self.insert_heavy_rows();
        true
    }

    /// Triangularize the GE matrix. Returns `false` when a pivot cannot be
    /// found; the codec is then positioned to resume after more rows.
    pub(crate) fn triangle(&mut self) -> bool {
        if usize::from(self.next_pivot) < usize::from(self.first_heavy_column)
            && !self.triangle_non_heavy()
        {
            return false;
        }

        let pivot_count = usize::from(self.pivot_count);
        let column_count = self.ge_cols();
        let first_heavy_row = usize::from(self.first_heavy_row());
        let first_heavy_column = usize::from(self.first_heavy_column);
        let mut first_heavy_pivot = usize::from(self.first_heavy_pivot);

        let mut pivot_i = usize::from(self.next_pivot);
        while pivot_i < column_count {
            let heavy_col_i = pivot_i - first_heavy_column;
            let mut found = false;

            // Binary rows first.
            let mut pivot_j = pivot_i;
            while pivot_j < first_heavy_pivot {
                let ge_row_j = usize::from(self.pivots[pivot_j]);
                if !bit(self.ge_row(ge_row_j), pivot_i) {
                    pivot_j += 1;
                    continue;
                }

                found = true;
                self.pivots[pivot_j] = self.pivots[pivot_i];
                self.pivots[pivot_i] = ge_row_j as u16;

                // Eliminate from the remaining binary rows.
                for pivot_k in pivot_j + 1..first_heavy_pivot {
                    let ge_row_k = usize::from(self.pivots[pivot_k]);
                    if bit(self.ge_row(ge_row_k), pivot_i) {
                        eliminate_binary(
                            &mut self.ge_matrix,
                            self.ge_pitch,
                            ge_row_k,
                            ge_row_j,
                            pivot_i,
                        );
                    }
                }

                // Eliminate from every heavy row with a nonzero byte here:
                // add the pivot's binary expansion scaled by that byte.
                for pivot_k in first_heavy_pivot..pivot_count {
                    let heavy_row_k = usize::from(self.pivots[pivot_k]) - first_heavy_row;
                    let code_value = self.heavy_row(heavy_row_k)[heavy_col_i];
                    if code_value == 0 {
                        continue;
                    }
                    for ge_column_i in pivot_i + 1..column_count {
                        if bit(self.ge_row(ge_row_j), ge_column_i) {
                            self.heavy_row_mut(heavy_row_k)
                                [ge_column_i - first_heavy_column] ^= code_value;
                        }
                    }
                }
                break;
            }

            // Fall back to the heavy rows at the tail of the pivot list.
            if !found {
                while pivot_j < pivot_count {
                    let ge_row_j = usize::from(self.pivots[pivot_j]);
                    let heavy_row_j = ge_row_j - first_heavy_row;
                    let pivot_code = self.heavy_row(heavy_row_j)[heavy_col_i];
                    if pivot_code == 0 {
                        pivot_j += 1;
                        continue;
                    }

                    found = true;
                    self.pivots[pivot_j] = self.pivots[pivot_i];
                    self.pivots[pivot_i] = ge_row_j as u16;

                    // A binary pivot slot just joined the heavy region;
                    // close the hole to keep heavy rows contiguous.
                    if pivot_i < first_heavy_pivot {
                        let temp = self.pivots[first_heavy_pivot];
                        self.pivots[first_heavy_pivot] = self.pivots[pivot_j];
                        self.pivots[pivot_j] = temp;
                        first_heavy_pivot += 1;
                    }

                    // All remaining rows are heavy.
                    for pivot_k in pivot_j + 1..pivot_count {
                        let heavy_row_k = usize::from(self.pivots[pivot_k]) - first_heavy_row;
                        let rem_value = self.heavy_row(heavy_row_k)[heavy_col_i];
                        if rem_value == 0 {
                            continue;
                        }

                        // Record the eliminator in place of the entry.
                        let x = gf256::div(rem_value, pivot_code);
                        let offset = heavy_col_i + 1;
                        let (rem, pivot_row) = self.heavy_pair_mut(heavy_row_k, heavy_row_j);
                        rem[heavy_col_i] = x;
                        gf256::ops::muladd_mem(&mut rem[offset..], x, &pivot_row[offset..]);
                    }
                    break;
                }
            }

            if !found {
                self.next_pivot = pivot_i as u16;
                self.first_heavy_pivot = first_heavy_pivot as u16;
                trace!(pivot = pivot_i, columns = column_count, "pivot not found");
                return false;
            }

            pivot_i += 1;
        }

        self.first_heavy_pivot = first_heavy_pivot as u16;
        true
    }

    /// Feed one additional row into the stalled elimination.
    ///
    /// Returns `Ok(true)` when the matrix reaches full rank, `Ok(false)`
    /// when still short.
    pub(crate) fn resume_solve_matrix(&mut self, id: u32, block: &[u8]) -> Result<bool, Error> {
        let p = self.params;
        let bb = p.block_bytes;
        let first_heavy_row = usize::from(self.first_heavy_row());
        let column_count = self.ge_cols();
        let first_heavy_column = usize::from(self.first_heavy_column);

        // Find a place for the row: a fresh slot past N, or reclaim an
        // extra row that never became a pivot.
        let (new_pivot_i, ge_row_i, row_i);
        if self.row_count >= p.block_count + self.extra_count {
            let mut reuse = None;
            for pivot_i in usize::from(self.next_pivot)..usize::from(self.pivot_count) {
                let candidate = usize::from(self.pivots[pivot_i]);
                if candidate >= first_heavy_row
                    && candidate < first_heavy_row + usize::from(self.extra_count)
                {
                    reuse = Some(pivot_i);
                    break;
                }
            }
            let Some(pivot_i) = reuse else {
                return Err(Error::ExtraRowsExhausted);
            };
            new_pivot_i = pivot_i;
            ge_row_i = usize::from(self.pivots[new_pivot_i]);
            row_i = usize::from(self.ge_row_map[ge_row_i]);
        } else {
            new_pivot_i = usize::from(self.pivot_count);
            self.pivot_count += 1;
            row_i = usize::from(self.row_count);
            self.row_count += 1;
            ge_row_i = first_heavy_row + row_i - usize::from(p.block_count);
            self.ge_row_map[ge_row_i] = row_i as u16;
            self.pivots[new_pivot_i] = ge_row_i as u16;
        }

        // Store the block value, padded like every other decoder row.
        let copy_bytes =
            if id == u32::from(p.block_count) - 1 { self.output_final_bytes } else { bb };
        if block.len() < copy_bytes {
            return Err(Error::InvalidInput);
        }
        let store = self.input.block_mut(row_i, bb);
        store[..copy_bytes].copy_from_slice(&block[..copy_bytes]);
        store[copy_bytes..].fill(0);

        // Build the row's GE representation.
        let params = RowParams::generate(id, p.p_seed, p.block_count, p.mix_count);
        {
            let row = &mut self.peel_rows[row_i];
            row.id = id;
            row.params = params;
        }

        self.ge_row_mut(ge_row_i).fill(0);
        let defer_count = self.defer_count;
        {
            let ge_new_row = self.ge_row_mut(ge_row_i);
            row::for_each_mix_column(&params, p.mix_count, p.mix_next_prime, |x| {
                flip_bit(ge_new_row, usize::from(defer_count + x));
            });
        }

        let mut peel_x = params.peel_x0;
        let mut weight = params.peel_weight;
        loop {
            let col = self.peel_cols[usize::from(peel_x)];
            if col.mark == Mark::Peel {
                let pitch = self.ge_pitch;
                let src = usize::from(col.aux) * pitch;
                let dest = ge_row_i * pitch;
                let (ge, compress) = (&mut self.ge_matrix, &self.compress_matrix);
                for (a, b) in ge[dest..dest + pitch].iter_mut().zip(&compress[src..src + pitch]) {
                    *a ^= b;
                }
            } else {
                flip_bit(self.ge_row_mut(ge_row_i), usize::from(col.aux));
            }

            weight -= 1;
            if weight == 0 {
                break;
            }
            peel_x = row::iterate_next_column(peel_x, p.block_count, p.block_next_prime, params.peel_a);
        }

        // Forward-eliminate against every established non-heavy pivot.
        let limit = usize::from(self.next_pivot).min(first_heavy_column);
        for pivot_j in 0..limit {
            if bit(self.ge_row(ge_row_i), pivot_j) {
                let ge_row_j = usize::from(self.pivots[pivot_j]);
                eliminate_binary(&mut self.ge_matrix, self.ge_pitch, ge_row_i, ge_row_j, pivot_j);
            }
        }

        let next_pivot = usize::from(self.next_pivot);
        if next_pivot < first_heavy_column {
            // The stalled column is binary: this row must carry its bit.
            if !bit(self.ge_row(ge_row_i), next_pivot) {
                return Ok(false);
            }
            self.pivots[new_pivot_i] = self.pivots[next_pivot];
            self.pivots[next_pivot] = ge_row_i as u16;
        } else {
            // The stalled column is heavy: convert this row's heavy-range
            // bits to bytes and run the byte elimination.
            let heavy_row_i = ge_row_i - first_heavy_row;
            for ge_column_j in first_heavy_column..column_count {
                let b = u8::from(bit(self.ge_row(ge_row_i), ge_column_j));
                self.heavy_row_mut(heavy_row_i)[ge_column_j - first_heavy_column] = b;
            }

            for pivot_j in first_heavy_column..next_pivot {
                let heavy_col_j = pivot_j - first_heavy_column;
                let code_value = self.heavy_row(heavy_row_i)[heavy_col_j];
                if code_value == 0 {
                    continue;
                }

                let ge_row_j = usize::from(self.pivots[pivot_j]);
                if ge_row_j >= first_heavy_row {
                    let heavy_row_j = ge_row_j - first_heavy_row;
                    let pivot_code = self.heavy_row(heavy_row_j)[heavy_col_j];
                    let start = heavy_col_j + 1;
                    if pivot_code == 1 {
                        let (rem, pivot_row) = self.heavy_pair_mut(heavy_row_i, heavy_row_j);
                        gf256::ops::muladd_mem(&mut rem[start..], code_value, &pivot_row[start..]);
                    } else {
                        let eliminator = gf256::div(code_value, pivot_code);
                        let (rem, pivot_row) = self.heavy_pair_mut(heavy_row_i, heavy_row_j);
                        rem[heavy_col_j] = eliminator;
                        gf256::ops::muladd_mem(&mut rem[start..], eliminator, &pivot_row[start..]);
                    }
                } else {
                    // Binary pivot: add its expansion scaled by the byte.
                    for ge_column_k in pivot_j + 1..column_count {
                        if bit(self.ge_row(ge_row_j), ge_column_k) {
                            self.heavy_row_mut(heavy_row_i)
                                [ge_column_k - first_heavy_column] ^= code_value;
                        }
                    }
                }
            }

            let next_heavy_col = next_pivot - first_heavy_column;
            if self.heavy_row(heavy_row_i)[next_heavy_col] == 0 {
                return Ok(false);
            }

            if next_pivot < usize::from(self.first_heavy_pivot) {
                let fhp = usize::from(self.first_heavy_pivot);
                self.pivots[new_pivot_i] = self.pivots[fhp];
                self.pivots[fhp] = self.pivots[next_pivot];
                self.first_heavy_pivot += 1;
            } else {
                self.pivots[new_pivot_i] = self.pivots[next_pivot];
            }
            self.pivots[next_pivot] = ge_row_i as u16;
        }

        self.next_pivot += 1;
        if usize::from(self.next_pivot) == first_heavy_column {
            self.insert_heavy_rows();
        }

        trace!(id, next_pivot = self.next_pivot, "resumed elimination");
        Ok(self.triangle())
    }

    /// Disjoint (dest, src) heavy rows, trimmed to the live columns.
    pub(crate) fn heavy_pair_mut(&mut self, dest: usize, src: usize) -> (&mut [u8], &[u8]) {
        let cols = usize::from(self.heavy_columns);
        let (d, s) = block_pair_mut(&mut self.heavy_matrix, self.heavy_pitch, dest, src);
        (&mut d[..cols], &s[..cols])
    }
}

/// Add pivot row `src` into `dest` for an elimination at `pivot_col`.
///
/// The first word is masked so that `dest` keeps both its own bits below the
/// pivot column (records of earlier eliminations) and the pivot bit itself
/// (the record of this one). `src`'s own sub-pivot records must not leak
/// into `dest`.
pub(crate) fn eliminate_binary(
    matrix: &mut [u64],
    pitch: usize,
    dest: usize,
    src: usize,
    pivot_col: usize,
) {
    debug_assert_ne!(dest, src);
    let word_offset = pivot_col >> 6;
    let mask = 1u64 << (pivot_col & 63);

    let (d, s) = if dest < src {
        let (lo, hi) = matrix.split_at_mut(src * pitch);
        (&mut lo[dest * pitch..][..pitch], &hi[..pitch])
    } else {
        let (lo, hi) = matrix.split_at_mut(dest * pitch);
        (&mut hi[..pitch], &lo[src * pitch..][..pitch])
    };

    let row0 = (s[word_offset] & !(mask - 1)) ^ mask;
    d[word_offset] ^= row0;
    for (a, b) in d[word_offset + 1..].iter_mut().zip(&s[word_offset + 1..]) {
        *a ^= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eliminate_binary_keeps_records() {
        let pitch = 2usize;
        let mut m = vec![0u64; 2 * pitch];
        // src row: record bits 0..3, pivot bit 5, payload bits 7 and 70.
        m[0] = 0b1010_1111 | (1 << 5);
        m[1] = 1 << 6;
        // dest row: record bit 1, pivot bit 5, payload bit 8.
        m[2] = (1 << 1) | (1 << 5) | (1 << 8);
        m[3] = 0;

        eliminate_binary(&mut m, pitch, 1, 0, 5);

        // dest keeps its own records and the pivot bit...
        assert_ne!(m[2] & (1 << 1), 0);
        assert_ne!(m[2] & (1 << 5), 0);
        // ...absorbs src's payload above the pivot...
        assert_ne!(m[2] & (1 << 7), 0);
        assert_ne!(m[2] & (1 << 8), 0);
        assert_ne!(m[3] & (1 << 6), 0);
        // ...and never sees src's sub-pivot records.
        assert_eq!(m[2] & 0b1, 0);
        assert_eq!(m[2] & (1 << 2), 0);
    }
}
