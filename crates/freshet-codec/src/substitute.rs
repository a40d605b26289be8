//! Substitution: turn the triangularized system into solved column values.
//!
//! Five passes over the recovery blocks: seed each pivot's right-hand side,
//! replay the dense Shuffle-2 value additions, sweep the recorded
//! subdiagonal operations downward, back-substitute the upper triangle, and
//! finally regenerate every peeled row to fill in the peeled columns.
//!
//! Both triangular sweeps switch to a windowed mode above a size threshold:
//! all 2^w combinations of the next w pivot blocks are precomputed and each
//! remaining row takes one table lookup per window instead of up to w block
//! additions. The lookup table lives in a dedicated scratch buffer.

use freshet_gf256::ops;

use crate::codec::{bit, block_pair_mut, Codec, LIST_TERM};
use crate::prng::{shuffle_deck16, Abyssinian};
use crate::row;

/// Forward (subdiagonal) window thresholds: the smallest remaining column
/// count that justifies a window of width 4..7. The width-4 threshold stays
/// above the heavy column count so windows never straddle the heavy range.
pub(crate) const UNDER_WIN_THRESH: [usize; 4] = [49, 70, 91, 145];

/// Backward (above-diagonal) window thresholds for widths 4..7.
pub(crate) const ABOVE_WIN_THRESH: [usize; 4] = [24, 45, 70, 135];

/// Widest window either sweep could pick for a GE matrix of `ge_cols`
/// columns; zero when neither sweep would window at all.
pub(crate) fn max_window_width(ge_cols: usize) -> u32 {
    let forward = if ge_cols >= UNDER_WIN_THRESH[3] {
        7
    } else if ge_cols >= UNDER_WIN_THRESH[2] {
        6
    } else if ge_cols >= UNDER_WIN_THRESH[1] {
        5
    } else {
        0
    };
    let pivot_i = ge_cols.saturating_sub(1);
    let backward = if pivot_i >= ABOVE_WIN_THRESH[3] {
        7
    } else if pivot_i >= ABOVE_WIN_THRESH[2] {
        6
    } else if pivot_i >= ABOVE_WIN_THRESH[1] {
        5
    } else {
        0
    };
    forward.max(backward)
}

impl Codec {
    // ─── Recovery-block micro-ops ───────────────────────────────────────

    fn add_col(&mut self, dest_col: usize, src_col: usize) {
        let (d, s) = self.recovery_pair(dest_col, src_col);
        ops::add_mem(d, s);
    }

    fn muladd_col(&mut self, dest_col: usize, code: u8, src_col: usize) {
        let (d, s) = self.recovery_pair(dest_col, src_col);
        ops::muladd_mem(d, code, s);
    }

    fn copy_col(&mut self, dest_col: usize, src_col: usize) {
        let (d, s) = self.recovery_pair(dest_col, src_col);
        d.copy_from_slice(s);
    }

    // ─── (1) Initialize column values ───────────────────────────────────

    /// Seed the right-hand side for every solved pivot.
    ///
    /// Dense and heavy rows sum to zero by construction, so their columns
    /// start at zero. A deferred row's value is its stored input block with
    /// every already-peeled column's value folded back in, walking the same
    /// peel columns the row was built from.
    pub(crate) fn initialize_column_values(&mut self) {
        let p = self.params;
        let bb = p.block_bytes;
        let first_heavy_row = self.first_heavy_row();
        let column_count = self.ge_cols();

        for pivot_i in 0..column_count {
            let dest_column_i = usize::from(self.ge_col_map[pivot_i]);
            let ge_row_i = self.pivots[pivot_i];

            // Dense rows and true heavy rows start at zero.
            if ge_row_i < p.dense_count || ge_row_i >= first_heavy_row + self.extra_count {
                self.recovery_mut(dest_column_i).fill(0);
                self.ge_row_map[usize::from(ge_row_i)] = dest_column_i as u16;
                continue;
            }

            // Deferred (or extra) row: start from the stored input block.
            let row_i = usize::from(self.ge_row_map[usize::from(ge_row_i)]);
            let row_params = self.peel_rows[row_i].params;

            // `combo` delays the initial copy so it can fuse with the first
            // add. The final input row is copied eagerly because it needs
            // zero padding.
            let mut combo = Some(row_i);
            if row_i == usize::from(p.block_count) - 1 {
                let final_bytes = self.input_final_bytes;
                let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                let dest = &mut recovery[dest_column_i * bb..][..bb];
                let src = input.block(row_i, bb);
                dest[..final_bytes].copy_from_slice(&src[..final_bytes]);
                dest[final_bytes..].fill(0);
                combo = None;
            }

            let mut column_i = row_params.peel_x0;
            let mut weight = row_params.peel_weight;
            loop {
                if self.peel_cols[usize::from(column_i)].mark == crate::codec::Mark::Peel {
                    match combo.take() {
                        Some(input_row) => {
                            let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                            let (dest, peel_value) =
                                block_pair_mut(recovery, bb, dest_column_i, usize::from(column_i));
                            ops::addset_mem(dest, peel_value, input.block(input_row, bb));
                        }
                        None => self.add_col(dest_column_i, usize::from(column_i)),
                    }
                }
                weight -= 1;
                if weight == 0 {
                    break;
                }
                column_i =
                    row::iterate_next_column(column_i, p.block_count, p.block_next_prime, row_params.peel_a);
            }

            // Row touched no peeled columns: plain copy after all.
            if let Some(input_row) = combo {
                let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                recovery[dest_column_i * bb..][..bb].copy_from_slice(input.block(input_row, bb));
            }
        }

        // Unused rows: dense and unused heavy rows must be skipped by the
        // dense value replay below.
        for pivot_i in column_count..usize::from(self.pivot_count) {
            let ge_row_i = self.pivots[pivot_i];
            if ge_row_i < p.dense_count
                || (ge_row_i >= first_heavy_row && usize::from(ge_row_i) < column_count)
            {
                self.ge_row_map[usize::from(ge_row_i)] = LIST_TERM;
            }
        }
    }

    // ─── (2) Replay dense values ────────────────────────────────────────

    /// Replay the Shuffle-2 construction over column *values*, adding each
    /// generated row's running sum into the column its dense row solved.
    ///
    /// Must consume PRNG draws in exactly the order `multiply_dense_rows`
    /// did.
    pub(crate) fn multiply_dense_values(&mut self) {
        let p = self.params;
        let dense_count = usize::from(p.dense_count);
        let mut prng = Abyssinian::new(p.d_seed);

        let mut rows = vec![0u16; dense_count];
        let mut bits = vec![0u16; dense_count];
        // The spare block past the mixing columns is the running sum.
        let temp_col = usize::from(p.block_count) + usize::from(p.mix_count);

        let mut column_i: usize = 0;
        while column_i < usize::from(p.block_count) {
            let max_x = dense_count.min(usize::from(p.block_count) - column_i);

            shuffle_deck16(&mut prng, &mut rows, p.dense_count.into());
            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());
            let set_count = (dense_count + 1) >> 1;

            // First row: sum the peeled columns of the set half, fusing the
            // first copy with the first add where possible.
            let mut combo: Option<usize> = None;
            let mut combo_in_temp = false;
            for ii in 0..set_count {
                let bit_i = usize::from(bits[ii]);
                if bit_i >= max_x {
                    continue;
                }
                let src_col = column_i + bit_i;
                if self.peel_cols[src_col].mark != crate::codec::Mark::Peel {
                    continue;
                }
                if combo_in_temp {
                    self.add_col(temp_col, src_col);
                } else if let Some(first) = combo {
                    let bb = p.block_bytes;
                    // temp = first ^ src
                    self.copy_col(temp_col, first);
                    let (d, s) = block_pair_mut(&mut self.recovery_blocks, bb, temp_col, src_col);
                    ops::add_mem(d, s);
                    combo_in_temp = true;
                } else {
                    combo = Some(src_col);
                }
            }

            let mut row_cursor = 0usize;
            if combo.is_none() {
                self.recovery_mut(temp_col).fill(0);
            } else {
                if !combo_in_temp {
                    self.copy_col(temp_col, combo.unwrap());
                }
                let dest_column_i = self.ge_row_map[usize::from(rows[row_cursor])];
                if dest_column_i != LIST_TERM {
                    self.add_col(usize::from(dest_column_i), temp_col);
                }
            }
            row_cursor += 1;

            // Two flip halves, mirroring the bit-matrix generation.
            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());
            let loop_count = dense_count >> 1;
            for ii in 0..loop_count {
                self.dense_value_flip(column_i, max_x, usize::from(bits[ii]), usize::from(bits[set_count + ii]), temp_col);
                let dest_column_i = self.ge_row_map[usize::from(rows[row_cursor])];
                row_cursor += 1;
                if dest_column_i != LIST_TERM {
                    self.add_col(usize::from(dest_column_i), temp_col);
                }
            }

            shuffle_deck16(&mut prng, &mut bits, p.dense_count.into());
            let second_loop_count = loop_count - 1 + (dense_count & 1);
            for ii in 0..second_loop_count {
                self.dense_value_flip(column_i, max_x, usize::from(bits[ii]), usize::from(bits[set_count + ii]), temp_col);
                let dest_column_i = self.ge_row_map[usize::from(rows[row_cursor])];
                row_cursor += 1;
                if dest_column_i != LIST_TERM {
                    self.add_col(usize::from(dest_column_i), temp_col);
                }
            }

            column_i += dense_count;
        }
    }

    /// Fold the peeled-column values of a flip pair into the running sum.
    fn dense_value_flip(&mut self, column_i: usize, max_x: usize, bit0: usize, bit1: usize, temp_col: usize) {
        let peeled = |codec: &Codec, b: usize| {
            b < max_x && codec.peel_cols[column_i + b].mark == crate::codec::Mark::Peel
        };
        if peeled(self, bit0) {
            self.add_col(temp_col, column_i + bit0);
        }
        if peeled(self, bit1) {
            self.add_col(temp_col, column_i + bit1);
        }
    }

    // ─── (3) Subdiagonal sweep ──────────────────────────────────────────

    /// Replay the recorded eliminations below the diagonal, top to bottom.
    pub(crate) fn add_subdiagonal_values(&mut self) {
        let column_count = self.ge_cols();
        let first_heavy_row = usize::from(self.first_heavy_row());
        let first_heavy_column = usize::from(self.first_heavy_column);
        let first_non_binary_row = first_heavy_row + usize::from(self.extra_count);

        let mut pivot_i: usize = 0;

        // Windowed mode while enough columns remain.
        if column_count >= UNDER_WIN_THRESH[1] {
            loop {
                let remaining = column_count - pivot_i;
                let w = if remaining >= UNDER_WIN_THRESH[3] {
                    7
                } else if remaining >= UNDER_WIN_THRESH[2] {
                    6
                } else if remaining >= UNDER_WIN_THRESH[1] {
                    5
                } else if remaining >= UNDER_WIN_THRESH[0] {
                    4
                } else {
                    break;
                };
                let final_i = pivot_i + w - 1;

                // Clear the small triangle below the window's own columns.
                for src_pivot_i in pivot_i..final_i {
                    let src_col = usize::from(self.ge_col_map[src_pivot_i]);
                    for dest_pivot_i in src_pivot_i + 1..=final_i {
                        let dest_row_i = usize::from(self.pivots[dest_pivot_i]);
                        if bit(self.ge_row(dest_row_i), src_pivot_i) {
                            let dest_col = usize::from(self.ge_col_map[dest_pivot_i]);
                            self.add_col(dest_col, src_col);
                        }
                    }
                }

                self.build_window_table(pivot_i, w);

                // One lookup per binary row below the window.
                for ge_below_i in final_i + 1..column_count {
                    let ge_row_i = usize::from(self.pivots[ge_below_i]);
                    if ge_row_i >= first_non_binary_row {
                        continue;
                    }
                    let win_bits = self.window_bits(ge_row_i, pivot_i, w);
                    if win_bits != 0 {
                        self.add_window_value(usize::from(self.ge_col_map[ge_below_i]), win_bits);
                    }
                }

                pivot_i += w;
            }
        }

        // Scalar remainder (and the heavy rows, whose support lives
        // entirely in the heavy range).
        for ge_column_i in pivot_i + 1..column_count {
            let column_i = usize::from(self.ge_col_map[ge_column_i]);
            let ge_row_i = usize::from(self.pivots[ge_column_i]);
            let mut ge_limit = ge_column_i;

            if ge_row_i >= first_heavy_row {
                let heavy_row_i = ge_row_i - first_heavy_row;
                for sub_i in first_heavy_column..ge_limit {
                    let code_value = self.heavy_row(heavy_row_i)[sub_i - first_heavy_column];
                    if code_value != 0 {
                        let src_col = usize::from(self.ge_col_map[sub_i]);
                        self.muladd_col(column_i, code_value, src_col);
                    }
                }

                if heavy_row_i >= usize::from(self.extra_count) {
                    continue; // purely heavy row, no binary part
                }
                ge_limit = ge_limit.min(first_heavy_column);
            }

            for ge_sub_i in pivot_i..ge_limit {
                if bit(self.ge_row(ge_row_i), ge_sub_i) {
                    let src_col = usize::from(self.ge_col_map[ge_sub_i]);
                    self.add_col(column_i, src_col);
                }
            }
        }
    }

    // ─── (4) Back-substitution above the diagonal ──────────────────────

    /// Clear the upper triangle bottom-up, normalizing heavy diagonals to 1
    /// as each pivot's value finalizes.
    pub(crate) fn back_substitute_above_diagonal(&mut self) {
        let column_count = self.ge_cols();
        let first_heavy_row = usize::from(self.first_heavy_row());
        let first_heavy_column = usize::from(self.first_heavy_column);

        let mut pivot_i: isize = column_count as isize - 1;

        if pivot_i >= ABOVE_WIN_THRESH[1] as isize {
            loop {
                let pi = pivot_i as usize;
                let w = if pi >= ABOVE_WIN_THRESH[3] {
                    7
                } else if pi >= ABOVE_WIN_THRESH[2] {
                    6
                } else if pi >= ABOVE_WIN_THRESH[1] {
                    5
                } else if pi >= ABOVE_WIN_THRESH[0] {
                    4
                } else {
                    break;
                };
                let backsub_i = pi - w + 1;

                // Diagonalize the window's own little triangle.
                for src_pivot_i in (backsub_i + 1..=pi).rev() {
                    self.normalize_heavy_diagonal(src_pivot_i, first_heavy_row, first_heavy_column);
                    let src_col = usize::from(self.ge_col_map[src_pivot_i]);

                    for dest_pivot_i in backsub_i..src_pivot_i {
                        let dest_row_i = usize::from(self.pivots[dest_pivot_i]);
                        let dest_col = usize::from(self.ge_col_map[dest_pivot_i]);
                        if dest_row_i >= first_heavy_row && src_pivot_i >= first_heavy_column {
                            let code_value = self.heavy_row(dest_row_i - first_heavy_row)
                                [src_pivot_i - first_heavy_column];
                            if code_value != 0 {
                                self.muladd_col(dest_col, code_value, src_col);
                            }
                        } else if bit(self.ge_row(dest_row_i), src_pivot_i) {
                            self.add_col(dest_col, src_col);
                        }
                    }
                }
                self.normalize_heavy_diagonal(backsub_i, first_heavy_row, first_heavy_column);

                self.build_window_table(backsub_i, w);

                // Rows above that carry heavy bytes inside the window must
                // be walked explicitly; the bit table does not know their
                // coefficients.
                if pi >= first_heavy_column {
                    for ge_above_i in 0..backsub_i {
                        let ge_row_i = usize::from(self.pivots[ge_above_i]);
                        if ge_row_i < first_heavy_row {
                            continue;
                        }
                        let dest_col = usize::from(self.ge_col_map[ge_above_i]);

                        let mut ge_column_j = backsub_i;
                        while ge_column_j < first_heavy_column && ge_column_j <= pi {
                            if bit(self.ge_row(ge_row_i), ge_column_j) {
                                let src_col = usize::from(self.ge_col_map[ge_column_j]);
                                self.add_col(dest_col, src_col);
                            }
                            ge_column_j += 1;
                        }

                        let heavy_row_i = ge_row_i - first_heavy_row;
                        while ge_column_j <= pi {
                            let code_value =
                                self.heavy_row(heavy_row_i)[ge_column_j - first_heavy_column];
                            if code_value != 0 {
                                let src_col = usize::from(self.ge_col_map[ge_column_j]);
                                self.muladd_col(dest_col, code_value, src_col);
                            }
                            ge_column_j += 1;
                        }
                    }
                }

                // Everything else above takes one window lookup.
                let window_row_limit =
                    if pi >= first_heavy_column { first_heavy_row } else { usize::MAX };
                for ge_above_i in 0..backsub_i {
                    let ge_row_i = usize::from(self.pivots[ge_above_i]);
                    if ge_row_i >= window_row_limit {
                        continue;
                    }
                    let win_bits = self.window_bits(ge_row_i, backsub_i, w);
                    if win_bits != 0 {
                        self.add_window_value(usize::from(self.ge_col_map[ge_above_i]), win_bits);
                    }
                }

                pivot_i -= w as isize;
            }
        }

        // Scalar remainder.
        while pivot_i >= 0 {
            let pi = pivot_i as usize;
            self.normalize_heavy_diagonal(pi, first_heavy_row, first_heavy_column);
            let src_col = usize::from(self.ge_col_map[pi]);

            for ge_up_i in 0..pi {
                let up_row_i = usize::from(self.pivots[ge_up_i]);
                let dest_col = usize::from(self.ge_col_map[ge_up_i]);
                if up_row_i >= first_heavy_row && ge_up_i >= first_heavy_column {
                    let code_value =
                        self.heavy_row(up_row_i - first_heavy_row)[pi - first_heavy_column];
                    if code_value != 0 {
                        self.muladd_col(dest_col, code_value, src_col);
                    }
                } else if bit(self.ge_row(up_row_i), pi) {
                    self.add_col(dest_col, src_col);
                }
            }

            pivot_i -= 1;
        }
    }

    /// Divide a heavy pivot's value by its diagonal coefficient, making the
    /// diagonal an implicit 1.
    fn normalize_heavy_diagonal(
        &mut self,
        pivot_i: usize,
        first_heavy_row: usize,
        first_heavy_column: usize,
    ) {
        let ge_row_i = usize::from(self.pivots[pivot_i]);
        if ge_row_i >= first_heavy_row && pivot_i >= first_heavy_column {
            let code_value =
                self.heavy_row(ge_row_i - first_heavy_row)[pivot_i - first_heavy_column];
            if code_value != 1 {
                let col = usize::from(self.ge_col_map[pivot_i]);
                ops::div_mem(self.recovery_mut(col), code_value);
            }
        }
    }

    // ─── Window machinery ──────────────────────────────────────────────

    /// Extract `w` bits of a GE row starting at column `base`.
    #[inline]
    fn window_bits(&self, ge_row_i: usize, base: usize, w: usize) -> usize {
        let row = self.ge_row(ge_row_i);
        let shift = base & 63;
        let word = base >> 6;
        let mut bits = row[word] >> shift;
        if shift != 0 && word + 1 < row.len() {
            bits |= row[word + 1] << (64 - shift);
        }
        (bits as usize) & ((1 << w) - 1)
    }

    /// Fill the scratch table with every XOR combination of the blocks
    /// solved by pivots `[base_pivot, base_pivot + w)`. Entry `k` is the sum
    /// over set bits of `k`; entry 0 is unused.
    fn build_window_table(&mut self, base_pivot: usize, w: usize) {
        let bb = self.params.block_bytes;
        debug_assert!(self.win_scratch.len() >= (1 << w) * bb);

        for j in 0..w {
            let col = usize::from(self.ge_col_map[base_pivot + j]);
            let slot = 1usize << j;
            let (scratch, recovery) = (&mut self.win_scratch, &self.recovery_blocks);
            scratch[slot * bb..][..bb].copy_from_slice(&recovery[col * bb..][..bb]);
        }
        for j in 1..w {
            let base = 1usize << j;
            for i in 1..base {
                let (dest, src) = block_pair_mut(&mut self.win_scratch, bb, base + i, i);
                dest.copy_from_slice(src);
                let (dest, base_block) = block_pair_mut(&mut self.win_scratch, bb, base + i, base);
                ops::add_mem(dest, base_block);
            }
        }
    }

    /// `recovery[dest_col] ^= window_table[win_bits]`.
    fn add_window_value(&mut self, dest_col: usize, win_bits: usize) {
        let bb = self.params.block_bytes;
        let (recovery, scratch) = (&mut self.recovery_blocks, &self.win_scratch);
        ops::add_mem(&mut recovery[dest_col * bb..][..bb], &scratch[win_bits * bb..][..bb]);
    }

    // ─── (5) Final peeled-row regeneration ──────────────────────────────

    /// Regenerate each peeled row in forward solution order, producing the
    /// value of the single column it solved. Every other column the row
    /// touches is already solved by the time the row comes up.
    pub(crate) fn substitute(&mut self) {
        let p = self.params;
        let bb = p.block_bytes;
        let n_minus_1 = usize::from(p.block_count) - 1;

        let mut row_i = self.peel_head_rows;
        while row_i != LIST_TERM {
            let (row_params, next, dest_column_i) = {
                let row = &self.peel_rows[usize::from(row_i)];
                (row.params, row.next, usize::from(row.peel_column))
            };

            // dest = input row + first mixing column.
            {
                let final_bytes = self.input_final_bytes;
                let (recovery, input) = (&mut self.recovery_blocks, &self.input);
                let mix0_col = usize::from(p.block_count + row_params.mix_x0);
                let (dest, mix0) = block_pair_mut(recovery, bb, dest_column_i, mix0_col);
                let input_src = input.block(usize::from(row_i), bb);
                if usize::from(row_i) != n_minus_1 {
                    ops::addset_mem(dest, mix0, input_src);
                } else {
                    ops::addset_mem(&mut dest[..final_bytes], mix0, input_src);
                    dest[final_bytes..].copy_from_slice(&mix0[final_bytes..]);
                }
            }

            // Remaining two mixing columns.
            let mut mix_x = row_params.mix_x0;
            mix_x = row::iterate_next_column(mix_x, p.mix_count, p.mix_next_prime, row_params.mix_a);
            self.add_col(dest_column_i, usize::from(p.block_count + mix_x));
            mix_x = row::iterate_next_column(mix_x, p.mix_count, p.mix_next_prime, row_params.mix_a);
            self.add_col(dest_column_i, usize::from(p.block_count + mix_x));

            // Peel columns, skipping the one this row solves.
            if row_params.peel_weight >= 2 {
                let mut weight = row_params.peel_weight - 1;
                let mut column_i = row_params.peel_x0;
                if usize::from(column_i) != dest_column_i {
                    self.add_col(dest_column_i, usize::from(column_i));
                }
                while weight > 0 {
                    column_i = row::iterate_next_column(
                        column_i,
                        p.block_count,
                        p.block_next_prime,
                        row_params.peel_a,
                    );
                    if usize::from(column_i) != dest_column_i {
                        self.add_col(dest_column_i, usize::from(column_i));
                    }
                    weight -= 1;
                }
            }

            row_i = next;
        }
    }
}
