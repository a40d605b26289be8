//! The large-regime codec object.
//!
//! One `Codec` holds all per-message state: the received/input blocks, the
//! peeling graph, the compression and GE matrices, the heavy tail, and the
//! solved recovery blocks. The solver itself is spread over the phase
//! modules ([`peel`](crate::peel), [`compress`](crate::compress),
//! [`triangle`](crate::triangle), [`substitute`](crate::substitute)), all of
//! which are `impl Codec` blocks over the state defined here.
//!
//! Buffer policy: the encoder borrows the caller's message (`Bytes`), the
//! decoder owns its input area. All workspaces are plain vectors that are
//! cleared, not freed, on reinitialization, so a reused codec only
//! reallocates when the new message is bigger.

use bytes::Bytes;
use freshet_gf256::ops;
use tracing::{debug, trace};

use crate::error::Error;
use crate::params::CodeParams;
use crate::row::RowParams;
use crate::{FeedStatus, HEAVY_MAX_COLS, HEAVY_ROWS, MAX_EXTRA_ROWS, REF_LIST_MAX};

/// Null link in the row/column index lists.
pub(crate) const LIST_TERM: u16 = u16::MAX;

/// Column state during and after peeling.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Mark {
    /// Still deciding.
    Todo,
    /// Solved by a row during peeling.
    Peel,
    /// Deferred to Gaussian elimination.
    Defer,
}

/// One row of the peeling matrix.
///
/// `unmarked` is only meaningful while the row still has exactly two
/// unmarked columns; `peel_column` and `is_copied` only after the row has
/// been peeled (or deferred, in which case `peel_column == LIST_TERM`).
#[derive(Clone, Copy)]
pub(crate) struct PeelRow {
    pub next: u16,
    pub id: u32,
    pub params: RowParams,
    pub unmarked_count: u16,
    pub unmarked: [u16; 2],
    pub peel_column: u16,
    pub is_copied: bool,
}

impl PeelRow {
    const EMPTY: PeelRow = PeelRow {
        next: LIST_TERM,
        id: 0,
        params: RowParams { peel_weight: 0, peel_a: 0, peel_x0: 0, mix_a: 0, mix_x0: 0 },
        unmarked_count: 0,
        unmarked: [0; 2],
        peel_column: LIST_TERM,
        is_copied: false,
    };
}

/// One column of the peeling matrix.
///
/// `aux` is a phase-dependent scalar: the weight-2 reference count while the
/// column is `Todo`, the solving row index once `Peel`, and the assigned GE
/// column index once `Defer`. Readers must check `mark` first.
#[derive(Clone, Copy)]
pub(crate) struct PeelColumn {
    pub next: u16,
    pub aux: u16,
    pub mark: Mark,
}

/// Bounded list of rows referencing a column.
#[derive(Clone, Copy)]
pub(crate) struct PeelRefs {
    pub count: u16,
    pub rows: [u16; REF_LIST_MAX],
}

/// Input block storage: borrowed message in encoder mode, owned area in
/// decoder mode.
pub(crate) enum InputBuffer {
    Empty,
    Borrowed(Bytes),
    Owned(Vec<u8>),
}

impl InputBuffer {
    /// Read block `row_i`. The borrowed message's final block may be short;
    /// callers pair this with the final-bytes bookkeeping.
    #[inline]
    pub(crate) fn block(&self, row_i: usize, block_bytes: usize) -> &[u8] {
        match self {
            InputBuffer::Empty => &[],
            InputBuffer::Borrowed(msg) => {
                let start = row_i * block_bytes;
                let end = (start + block_bytes).min(msg.len());
                &msg[start..end]
            }
            InputBuffer::Owned(buf) => &buf[row_i * block_bytes..][..block_bytes],
        }
    }

    #[inline]
    pub(crate) fn block_mut(&mut self, row_i: usize, block_bytes: usize) -> &mut [u8] {
        match self {
            InputBuffer::Owned(buf) => &mut buf[row_i * block_bytes..][..block_bytes],
            _ => unreachable!("writable input blocks exist only in decoder mode"),
        }
    }
}

/// Encoder/decoder combined state for `28 <= N <= 64000`.
pub(crate) struct Codec {
    // Parameters
    pub(crate) params: CodeParams,
    pub(crate) extra_count: u16,
    pub(crate) row_count: u16,
    pub(crate) input_final_bytes: usize,
    pub(crate) output_final_bytes: usize,
    pub(crate) all_original: bool,
    pub(crate) encoder_was_decoder: bool,
    /// Recovery blocks have been generated.
    pub(crate) solved: bool,
    /// Decode reached a terminal success (solved, or all-original shortcut).
    pub(crate) complete: bool,

    // Block storage
    pub(crate) recovery_blocks: Vec<u8>,
    pub(crate) input: InputBuffer,

    // Peeling state
    pub(crate) peel_rows: Vec<PeelRow>,
    pub(crate) peel_cols: Vec<PeelColumn>,
    pub(crate) peel_col_refs: Vec<PeelRefs>,
    pub(crate) peel_head_rows: u16,
    pub(crate) peel_tail_rows: u16,
    pub(crate) defer_head_columns: u16,
    pub(crate) defer_head_rows: u16,
    pub(crate) defer_count: u16,

    // Compression + GE state
    pub(crate) compress_matrix: Vec<u64>,
    pub(crate) ge_matrix: Vec<u64>,
    pub(crate) ge_pitch: usize,
    pub(crate) pivots: Vec<u16>,
    pub(crate) pivot_count: u16,
    pub(crate) ge_col_map: Vec<u16>,
    pub(crate) ge_row_map: Vec<u16>,
    pub(crate) next_pivot: u16,

    // Heavy rows
    pub(crate) heavy_matrix: Vec<u8>,
    pub(crate) heavy_pitch: usize,
    pub(crate) heavy_columns: u16,
    pub(crate) first_heavy_column: u16,
    pub(crate) first_heavy_pivot: u16,

    // Windowed substitution lookup table
    pub(crate) win_scratch: Vec<u8>,
}

impl Codec {
    pub(crate) fn new(params: CodeParams) -> Self {
        Codec {
            params,
            extra_count: 0,
            row_count: 0,
            input_final_bytes: 0,
            output_final_bytes: 0,
            all_original: false,
            encoder_was_decoder: false,
            solved: false,
            complete: false,
            recovery_blocks: Vec::new(),
            input: InputBuffer::Empty,
            peel_rows: Vec::new(),
            peel_cols: Vec::new(),
            peel_col_refs: Vec::new(),
            peel_head_rows: LIST_TERM,
            peel_tail_rows: LIST_TERM,
            defer_head_columns: LIST_TERM,
            defer_head_rows: LIST_TERM,
            defer_count: 0,
            compress_matrix: Vec::new(),
            ge_matrix: Vec::new(),
            ge_pitch: 0,
            pivots: Vec::new(),
            pivot_count: 0,
            ge_col_map: Vec::new(),
            ge_row_map: Vec::new(),
            next_pivot: 0,
            heavy_matrix: Vec::new(),
            heavy_pitch: 0,
            heavy_columns: 0,
            first_heavy_column: 0,
            first_heavy_pivot: 0,
            win_scratch: Vec::new(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Initialize encoder state, feed the message, and solve.
    pub(crate) fn start_encoder(
        &mut self,
        params: CodeParams,
        message: Bytes,
        message_bytes: usize,
    ) -> Result<(), Error> {
        self.reset(params);
        self.input_final_bytes = params.final_bytes(message_bytes);
        self.output_final_bytes = params.block_bytes;
        self.extra_count = 0;
        self.encoder_was_decoder = false;
        self.allocate_workspace()?;
        self.input = InputBuffer::Borrowed(message);

        for id in 0..self.params.block_count {
            if !self.opportunistic_peeling(id, u32::from(id)) {
                return Err(Error::BadPeelSeed);
            }
        }
        self.row_count = self.params.block_count;

        debug!(
            block_count = self.params.block_count,
            dense_count = self.params.dense_count,
            p_seed = self.params.p_seed,
            "encoder solve"
        );
        match self.solve_matrix() {
            Ok(()) => {
                self.generate_recovery_blocks();
                self.complete = true;
                Ok(())
            }
            // The compiled seed tables guarantee full rank for the first N
            // rows; falling short means the tables are damaged.
            Err(Error::NeedMoreBlocks) => Err(Error::BadPeelSeed),
            Err(e) => Err(e),
        }
    }

    /// Initialize decoder state; rows then arrive through `decode_feed`.
    pub(crate) fn start_decoder(
        &mut self,
        params: CodeParams,
        message_bytes: usize,
    ) -> Result<(), Error> {
        self.reset(params);
        self.row_count = 0;
        self.output_final_bytes = params.final_bytes(message_bytes);
        // Stored decoder rows are always padded to the full block size, so
        // the solver's final-row trimming must not trigger on them.
        self.input_final_bytes = params.block_bytes;
        self.extra_count = MAX_EXTRA_ROWS;
        self.all_original = true;
        self.encoder_was_decoder = true;
        self.allocate_input()?;
        self.allocate_workspace()?;
        Ok(())
    }

    /// Feed one received block to the decoder.
    pub(crate) fn decode_feed(&mut self, id: u32, block: &[u8]) -> Result<FeedStatus, Error> {
        if self.complete {
            return Ok(FeedStatus::Complete);
        }

        let n = self.params.block_count;
        let block_bytes = self.params.block_bytes;
        let copy_bytes = if id == u32::from(n) - 1 { self.output_final_bytes } else { block_bytes };
        if block.len() < copy_bytes {
            return Err(Error::InvalidInput);
        }

        let row_i = self.row_count;
        if row_i < n {
            if id >= u32::from(n) {
                self.all_original = false;
            }

            if !self.opportunistic_peeling(row_i, id) {
                return Err(Error::ReferenceListOverflow);
            }

            let store = self.input.block_mut(usize::from(row_i), block_bytes);
            store[..copy_bytes].copy_from_slice(&block[..copy_bytes]);
            store[copy_bytes..].fill(0);

            self.row_count += 1;
            if self.row_count < n {
                return Ok(FeedStatus::NeedMore);
            }

            // All original ids seen: the message is already on hand and the
            // solve is deferred until something actually needs the recovery
            // blocks (encode after role switch).
            if self.all_original && self.is_all_original_data() {
                trace!("decode complete without solve: all original ids");
                self.complete = true;
                return Ok(FeedStatus::Complete);
            }

            return match self.solve_matrix() {
                Ok(()) => {
                    self.generate_recovery_blocks();
                    self.complete = true;
                    Ok(FeedStatus::Complete)
                }
                Err(Error::NeedMoreBlocks) => {
                    trace!(block_count = n, "initial solve rank-deficient, entering resume");
                    Ok(FeedStatus::NeedMore)
                }
                Err(e) => Err(e),
            };
        }

        // Past N rows: feed the row straight into the stalled elimination.
        match self.resume_solve_matrix(id, block) {
            Ok(true) => {
                self.generate_recovery_blocks();
                self.complete = true;
                Ok(FeedStatus::Complete)
            }
            Ok(false) => Ok(FeedStatus::NeedMore),
            Err(e) => Err(e),
        }
    }

    /// True when every row id is one of the original `N`, all distinct.
    fn is_all_original_data(&self) -> bool {
        let n = usize::from(self.params.block_count);
        let mut seen = vec![false; n];
        let mut seen_count = 0usize;
        for row in &self.peel_rows[..usize::from(self.row_count)] {
            let id = row.id as usize;
            if id < n && !seen[id] {
                seen[id] = true;
                seen_count += 1;
            }
        }
        seen_count >= n
    }

    /// Switch a completed decoder into encoder mode.
    ///
    /// If completion came through the all-original shortcut the matrix was
    /// never solved; the deferred solve runs here. The solver does not care
    /// what order the rows were fed in, so no reordering pass is needed.
    pub(crate) fn become_encoder(&mut self) -> Result<(), Error> {
        if !self.complete {
            return Err(Error::NeedMoreBlocks);
        }
        if !self.solved {
            debug!("running deferred solve for decoder-to-encoder switch");
            match self.solve_matrix() {
                Ok(()) => self.generate_recovery_blocks(),
                Err(Error::NeedMoreBlocks) => return Err(Error::BadPeelSeed),
                Err(e) => return Err(e),
            }
        }

        // Undo the decoder's padded-input convention for encode-side copies.
        if self.input_final_bytes > self.output_final_bytes {
            std::mem::swap(&mut self.input_final_bytes, &mut self.output_final_bytes);
        }
        Ok(())
    }

    // ─── Encode / Reconstruct ───────────────────────────────────────────

    /// Produce the coded block for `id`. Returns bytes written.
    pub(crate) fn encode(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        let n = self.params.block_count;
        let block_bytes = self.params.block_bytes;

        // Original ids copy straight from the message while the encoder
        // still holds it in message order.
        if id < u32::from(n) && !self.encoder_was_decoder {
            let src = self.input.block(id as usize, block_bytes);
            let bytes =
                if id == u32::from(n) - 1 { self.input_final_bytes } else { block_bytes };
            if out.len() < bytes {
                return Err(Error::InvalidInput);
            }
            out[..bytes].copy_from_slice(&src[..bytes]);
            return Ok(bytes);
        }

        if out.len() < block_bytes {
            return Err(Error::InvalidInput);
        }
        debug_assert!(self.solved);
        self.regenerate_row(id, &mut out[..block_bytes]);
        Ok(block_bytes)
    }

    /// Fold the peel and mix columns of row `id` into `out` from the solved
    /// recovery blocks. `out` may be shorter than a full block for the
    /// final-row trims.
    pub(crate) fn regenerate_row(&self, id: u32, out: &mut [u8]) {
        let p = &self.params;
        let row = RowParams::generate(id, p.p_seed, p.block_count, p.mix_count);
        let bb = p.block_bytes;
        let recovery = |col: usize| &self.recovery_blocks[col * bb..][..bb];

        let first = recovery(usize::from(row.peel_x0));
        let mut mix_x = row.mix_x0;

        if row.peel_weight > 1 {
            let mut weight = row.peel_weight - 1;
            let mut column = crate::row::iterate_next_column(
                row.peel_x0,
                p.block_count,
                p.block_next_prime,
                row.peel_a,
            );
            ops::addset_mem(out, first, recovery(usize::from(column)));
            while weight > 1 {
                weight -= 1;
                column = crate::row::iterate_next_column(
                    column,
                    p.block_count,
                    p.block_next_prime,
                    row.peel_a,
                );
                ops::add_mem(out, recovery(usize::from(column)));
            }
            ops::add_mem(out, recovery(usize::from(p.block_count + mix_x)));
        } else {
            ops::addset_mem(out, first, recovery(usize::from(p.block_count + mix_x)));
        }

        mix_x = crate::row::iterate_next_column(mix_x, p.mix_count, p.mix_next_prime, row.mix_a);
        let mix0 = recovery(usize::from(p.block_count + mix_x));
        mix_x = crate::row::iterate_next_column(mix_x, p.mix_count, p.mix_next_prime, row.mix_a);
        let mix1 = recovery(usize::from(p.block_count + mix_x));
        ops::add2_mem(out, mix0, mix1);
    }

    /// Rebuild the whole message into `out`.
    pub(crate) fn reconstruct_into(&self, out: &mut [u8]) -> Result<(), Error> {
        if !self.complete {
            return Err(Error::NeedMoreBlocks);
        }
        let n = usize::from(self.params.block_count);
        let bb = self.params.block_bytes;
        let message_bytes = (n - 1) * bb + self.output_final_bytes;
        if out.len() < message_bytes {
            return Err(Error::InvalidInput);
        }

        // Copy every original row that arrived unmodified, then regenerate
        // only the gaps.
        let mut copied = vec![false; n];
        for (row_i, row) in self.peel_rows[..usize::from(self.row_count)].iter().enumerate() {
            let Ok(id) = usize::try_from(row.id) else { continue };
            if id < n {
                let bytes = if id == n - 1 { self.output_final_bytes } else { bb };
                let src = self.input.block(row_i, bb);
                out[id * bb..id * bb + bytes].copy_from_slice(&src[..bytes]);
                copied[id] = true;
            }
        }

        for id in 0..n {
            if copied[id] {
                continue;
            }
            debug_assert!(self.solved, "missing rows require a solved matrix");
            let bytes = if id == n - 1 { self.output_final_bytes } else { bb };
            self.regenerate_row(id as u32, &mut out[id * bb..id * bb + bytes]);
        }
        Ok(())
    }

    /// Rebuild a single original block. Returns bytes written.
    pub(crate) fn reconstruct_block(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        if !self.complete {
            return Err(Error::NeedMoreBlocks);
        }
        let n = self.params.block_count;
        if id >= u32::from(n) {
            return Err(Error::InvalidInput);
        }
        let bb = self.params.block_bytes;
        let bytes = if id == u32::from(n) - 1 { self.output_final_bytes } else { bb };
        if out.len() < bytes {
            return Err(Error::InvalidInput);
        }

        if self.solved {
            self.regenerate_row(id, &mut out[..bytes]);
            return Ok(bytes);
        }

        // All-original shortcut state: the block is sitting in the input
        // area under whatever row slot it arrived in.
        for (row_i, row) in self.peel_rows[..usize::from(self.row_count)].iter().enumerate() {
            if row.id == id {
                let src = self.input.block(row_i, bb);
                out[..bytes].copy_from_slice(&src[..bytes]);
                return Ok(bytes);
            }
        }
        Err(Error::NeedMoreBlocks)
    }

    // ─── Solve orchestration ────────────────────────────────────────────

    /// Run peeling completion, compression, and triangularization.
    ///
    /// `Err(NeedMoreBlocks)` means the GE matrix came up short of full rank
    /// and the codec is positioned for `resume_solve_matrix`.
    pub(crate) fn solve_matrix(&mut self) -> Result<(), Error> {
        self.greedy_peeling();
        self.allocate_matrix()?;

        self.set_deferred_columns();
        self.set_mixing_columns_for_deferred_rows();
        self.peel_diagonal();
        self.copy_deferred_rows();
        self.multiply_dense_rows();
        self.set_heavy_rows();
        self.add_invertibility_patch();

        self.setup_triangle();
        if self.triangle() {
            debug!(
                defer_count = self.defer_count,
                dense_count = self.params.dense_count,
                "triangularization complete"
            );
            Ok(())
        } else {
            Err(Error::NeedMoreBlocks)
        }
    }

    /// Run the four-pass substitution, filling `recovery_blocks`.
    pub(crate) fn generate_recovery_blocks(&mut self) {
        self.initialize_column_values();
        self.multiply_dense_values();
        self.add_subdiagonal_values();
        self.back_substitute_above_diagonal();
        self.substitute();
        self.solved = true;
    }

    // ─── Memory management ──────────────────────────────────────────────

    fn reset(&mut self, params: CodeParams) {
        self.params = params;
        self.row_count = 0;
        self.defer_count = 0;
        self.peel_head_rows = LIST_TERM;
        self.peel_tail_rows = LIST_TERM;
        self.defer_head_columns = LIST_TERM;
        self.defer_head_rows = LIST_TERM;
        self.next_pivot = 0;
        self.pivot_count = 0;
        self.all_original = false;
        self.solved = false;
        self.complete = false;
    }

    /// Owned input area for decoder mode, `(N + extra) * B` bytes.
    fn allocate_input(&mut self) -> Result<(), Error> {
        let size = usize::from(self.params.block_count + MAX_EXTRA_ROWS) * self.params.block_bytes;
        let mut buf = match std::mem::replace(&mut self.input, InputBuffer::Empty) {
            InputBuffer::Owned(buf) => buf,
            _ => Vec::new(),
        };
        grow_zeroed(&mut buf, size)?;
        self.input = InputBuffer::Owned(buf);
        Ok(())
    }

    /// Recovery blocks and peeling arrays. Sized before any row arrives.
    fn allocate_workspace(&mut self) -> Result<(), Error> {
        let p = &self.params;
        let recovery_size =
            usize::from(p.block_count + p.mix_count + 1) * p.block_bytes;
        let row_count = usize::from(p.block_count) + usize::from(self.extra_count);
        let column_count = usize::from(p.block_count);

        grow_zeroed(&mut self.recovery_blocks, recovery_size)?;

        self.peel_rows.clear();
        try_reserve(&mut self.peel_rows, row_count)?;
        self.peel_rows.resize(row_count, PeelRow::EMPTY);

        self.peel_cols.clear();
        try_reserve(&mut self.peel_cols, column_count)?;
        self.peel_cols.resize(column_count, PeelColumn { next: LIST_TERM, aux: 0, mark: Mark::Todo });

        self.peel_col_refs.clear();
        try_reserve(&mut self.peel_col_refs, column_count)?;
        self.peel_col_refs.resize(column_count, PeelRefs { count: 0, rows: [0; REF_LIST_MAX] });

        Ok(())
    }

    /// Compression/GE/heavy matrices and pivot maps. Sized after peeling,
    /// once the deferred counts are known.
    fn allocate_matrix(&mut self) -> Result<(), Error> {
        let p = &self.params;
        let ge_cols = usize::from(self.defer_count) + usize::from(p.mix_count);
        let ge_rows = usize::from(self.defer_count)
            + usize::from(p.dense_count)
            + usize::from(self.extra_count)
            + 1; // one scratch row for the dense generator
        let ge_pitch = ge_cols.div_ceil(64);

        let compress_rows = usize::from(p.block_count);
        let pivot_count = ge_cols + usize::from(self.extra_count);

        let heavy_rows = usize::from(HEAVY_ROWS) + usize::from(self.extra_count);
        let heavy_cols = usize::from(p.mix_count.min(HEAVY_MAX_COLS));
        // Rows padded to a multiple of 4 bytes.
        let heavy_pitch = (heavy_cols + 3 + 3) & !3;

        self.ge_pitch = ge_pitch;
        self.heavy_pitch = heavy_pitch;
        self.heavy_columns = heavy_cols as u16;
        self.first_heavy_column = (ge_cols - heavy_cols) as u16;

        grow_zeroed(&mut self.compress_matrix, compress_rows * ge_pitch)?;
        grow_zeroed(&mut self.ge_matrix, ge_rows * ge_pitch)?;
        grow_zeroed(&mut self.heavy_matrix, heavy_rows * heavy_pitch)?;

        self.pivots.clear();
        try_reserve(&mut self.pivots, pivot_count)?;
        self.pivots.resize(pivot_count, 0);

        self.ge_row_map.clear();
        try_reserve(&mut self.ge_row_map, pivot_count)?;
        self.ge_row_map.resize(pivot_count, LIST_TERM);

        self.ge_col_map.clear();
        try_reserve(&mut self.ge_col_map, ge_cols)?;
        self.ge_col_map.resize(ge_cols, 0);

        // Lookup-table scratch for the windowed substitution sweeps.
        let win_width = crate::substitute::max_window_width(ge_cols);
        let win_len =
            if win_width == 0 { 0 } else { (1usize << win_width) * self.params.block_bytes };
        grow_zeroed(&mut self.win_scratch, win_len)?;

        Ok(())
    }

    // ─── Shared small helpers ───────────────────────────────────────────

    #[inline]
    pub(crate) fn ge_cols(&self) -> usize {
        usize::from(self.defer_count) + usize::from(self.params.mix_count)
    }

    #[inline]
    pub(crate) fn first_heavy_row(&self) -> u16 {
        self.defer_count + self.params.dense_count
    }

    #[inline]
    pub(crate) fn ge_row(&self, row: usize) -> &[u64] {
        &self.ge_matrix[row * self.ge_pitch..][..self.ge_pitch]
    }

    #[inline]
    pub(crate) fn ge_row_mut(&mut self, row: usize) -> &mut [u64] {
        &mut self.ge_matrix[row * self.ge_pitch..][..self.ge_pitch]
    }

    #[inline]
    pub(crate) fn compress_row_mut(&mut self, row: usize) -> &mut [u64] {
        &mut self.compress_matrix[row * self.ge_pitch..][..self.ge_pitch]
    }

    #[inline]
    pub(crate) fn heavy_row(&self, row: usize) -> &[u8] {
        &self.heavy_matrix[row * self.heavy_pitch..][..usize::from(self.heavy_columns)]
    }

    #[inline]
    pub(crate) fn heavy_row_mut(&mut self, row: usize) -> &mut [u8] {
        &mut self.heavy_matrix[row * self.heavy_pitch..][..usize::from(self.heavy_columns)]
    }

    /// Recovery block `col` mutably.
    #[inline]
    pub(crate) fn recovery_mut(&mut self, col: usize) -> &mut [u8] {
        &mut self.recovery_blocks[col * self.params.block_bytes..][..self.params.block_bytes]
    }

    /// Disjoint (dest, src) recovery blocks.
    #[inline]
    pub(crate) fn recovery_pair(&mut self, dest: usize, src: usize) -> (&mut [u8], &[u8]) {
        block_pair_mut(&mut self.recovery_blocks, self.params.block_bytes, dest, src)
    }
}

/// Grow a byte/word vector to `len`, zero-filled, reporting allocation
/// failure instead of aborting. Shrinking keeps capacity.
pub(crate) fn grow_zeroed<T: Copy + Default>(buf: &mut Vec<T>, len: usize) -> Result<(), Error> {
    buf.clear();
    try_reserve(buf, len)?;
    buf.resize(len, T::default());
    Ok(())
}

fn try_reserve<T>(buf: &mut Vec<T>, len: usize) -> Result<(), Error> {
    if buf.capacity() < len {
        buf.try_reserve_exact(len - buf.len()).or(Err(Error::OutOfMemory))?;
    }
    Ok(())
}

/// Split one flat block buffer into a disjoint (dest, src) block pair.
#[inline]
pub(crate) fn block_pair_mut(
    buf: &mut [u8],
    bytes: usize,
    dest: usize,
    src: usize,
) -> (&mut [u8], &[u8]) {
    debug_assert_ne!(dest, src);
    if dest < src {
        let (lo, hi) = buf.split_at_mut(src * bytes);
        (&mut lo[dest * bytes..][..bytes], &hi[..bytes])
    } else {
        let (lo, hi) = buf.split_at_mut(dest * bytes);
        (&mut hi[..bytes], &lo[src * bytes..][..bytes])
    }
}

// ─── Bit-matrix primitives ──────────────────────────────────────────────

#[inline]
pub(crate) fn bit(row: &[u64], col: usize) -> bool {
    row[col >> 6] & (1u64 << (col & 63)) != 0
}

#[inline]
pub(crate) fn flip_bit(row: &mut [u64], col: usize) {
    row[col >> 6] ^= 1u64 << (col & 63);
}

#[inline]
pub(crate) fn xor_row(dest: &mut [u64], src: &[u64]) {
    for (d, s) in dest.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// XOR row `src` into row `dest` within one matrix, starting at `from_word`.
///
/// Words before `from_word` are untouched; in forward elimination both rows
/// are already zero there.
pub(crate) fn xor_row_into(
    matrix: &mut [u64],
    pitch: usize,
    dest: usize,
    src: usize,
    from_word: usize,
) {
    debug_assert_ne!(dest, src);
    let (d, s) = if dest < src {
        let (lo, hi) = matrix.split_at_mut(src * pitch);
        (&mut lo[dest * pitch..][..pitch], &hi[..pitch])
    } else {
        let (lo, hi) = matrix.split_at_mut(dest * pitch);
        (&mut hi[..pitch], &lo[src * pitch..][..pitch])
    };
    for (a, b) in d[from_word..].iter_mut().zip(&s[from_word..]) {
        *a ^= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ops_roundtrip() {
        let mut row = vec![0u64; 3];
        for col in [0usize, 1, 63, 64, 127, 128, 191] {
            assert!(!bit(&row, col));
            flip_bit(&mut row, col);
            assert!(bit(&row, col));
        }
        flip_bit(&mut row, 64);
        assert!(!bit(&row, 64));
    }

    #[test]
    fn xor_row_into_respects_from_word() {
        let mut m = vec![0u64; 6]; // 2 rows, pitch 3
        m[0] = 0xF0;
        m[1] = 0x0F;
        m[2] = 0xAA;
        m[3] = 0xFF;
        xor_row_into(&mut m, 3, 1, 0, 1);
        assert_eq!(m[3], 0xFF, "word before from_word untouched");
        assert_eq!(m[4], 0x0F);
        assert_eq!(m[5], 0xAA);
    }

    #[test]
    fn block_pair_both_orders() {
        let mut buf = vec![0u8; 30];
        buf[10..20].fill(7);
        {
            let (d, s) = block_pair_mut(&mut buf, 10, 0, 1);
            assert_eq!(s[0], 7);
            d[0] = 9;
        }
        {
            let (d, s) = block_pair_mut(&mut buf, 10, 2, 0);
            assert_eq!(s[0], 9);
            d[9] = 3;
        }
        assert_eq!(buf[0], 9);
        assert_eq!(buf[29], 3);
    }
}
