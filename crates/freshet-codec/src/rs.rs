//! Small-regime engine: a systematic Cauchy code over GF(256).
//!
//! For fewer than 28 source blocks the sparse solver's fixed overhead
//! dominates, so the codec switches to a classic MDS construction instead:
//! recovery block `r` is the Cauchy-weighted sum of all source blocks, the
//! receiver solves the received coefficient rows by dense Gaussian
//! elimination, and *any* `N` distinct blocks reconstruct the message with
//! zero overhead. At most `256 - N` distinct recovery blocks exist; higher
//! ids wrap onto that range.
//!
//! The Cauchy element for recovery row `x` and source column `y` is
//! `(y + x0) / (x + y)` with `x0 = N`, which normalizes the first recovery
//! row to all ones (a plain XOR parity block).

use bytes::Bytes;

use freshet_gf256 as gf256;
use freshet_gf256::ops;
use tracing::trace;

use crate::error::Error;
use crate::FeedStatus;

/// One received block, keyed by its position in the coefficient system:
/// `[0, N)` for originals, `[N, 256)` for recovery rows.
struct ReceivedBlock {
    index: u8,
    data: Vec<u8>,
}

/// Cauchy codec state for `2 <= N <= 27`.
pub(crate) struct CauchyCodec {
    block_count: u16,
    block_bytes: usize,
    /// Bytes of the final block that are real message payload.
    final_bytes: usize,
    /// Encoder-mode source: the caller's message, borrowed.
    message: Option<Bytes>,
    /// Received blocks, decoder mode.
    received: Vec<ReceivedBlock>,
    /// Decoded source blocks, zero-padded, once decoding completes.
    decoded: Option<Vec<u8>>,
}

impl CauchyCodec {
    pub(crate) fn new_encoder(
        message: Bytes,
        message_bytes: usize,
        block_count: u16,
        block_bytes: usize,
    ) -> Self {
        let final_bytes = final_bytes(message_bytes, block_bytes);
        CauchyCodec {
            block_count,
            block_bytes,
            final_bytes,
            message: Some(message),
            received: Vec::new(),
            decoded: None,
        }
    }

    pub(crate) fn new_decoder(message_bytes: usize, block_count: u16, block_bytes: usize) -> Self {
        let final_bytes = final_bytes(message_bytes, block_bytes);
        CauchyCodec {
            block_count,
            block_bytes,
            final_bytes,
            message: None,
            received: Vec::with_capacity(usize::from(block_count)),
            decoded: None,
        }
    }

    #[inline]
    pub(crate) fn block_count(&self) -> u16 {
        self.block_count
    }

    #[inline]
    fn recovery_count(&self) -> u32 {
        256 - u32::from(self.block_count)
    }

    /// Map a wire id onto a coefficient-system index.
    #[inline]
    fn map_index(&self, id: u32) -> u8 {
        if id < u32::from(self.block_count) {
            id as u8
        } else {
            (u32::from(self.block_count) + (id - u32::from(self.block_count)) % self.recovery_count())
                as u8
        }
    }

    /// Source block `j`, possibly short for the final block of a borrowed
    /// message; consumers treat missing bytes as zero.
    fn source_block(&self, j: usize) -> &[u8] {
        if let Some(message) = &self.message {
            let start = j * self.block_bytes;
            let end = (start + self.block_bytes).min(message.len());
            &message[start..end]
        } else {
            let decoded = self.decoded.as_ref().expect("no source data to encode from");
            &decoded[j * self.block_bytes..][..self.block_bytes]
        }
    }

    // ─── Encode ─────────────────────────────────────────────────────────

    /// Write the coded block for `id`. Returns bytes written.
    pub(crate) fn encode(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        let n = usize::from(self.block_count);
        let index = usize::from(self.map_index(id));

        if index < n {
            let src = self.source_block(index);
            let bytes = if index == n - 1 { self.final_bytes } else { self.block_bytes };
            if out.len() < bytes {
                return Err(Error::InvalidInput);
            }
            out[..bytes].copy_from_slice(&src[..bytes]);
            return Ok(bytes);
        }

        if out.len() < self.block_bytes {
            return Err(Error::InvalidInput);
        }
        let out = &mut out[..self.block_bytes];
        out.fill(0);
        for j in 0..n {
            let coeff = cauchy_element(index as u8, self.block_count as u8, j as u8);
            ops::muladd_mem(out, coeff, self.source_block(j));
        }
        Ok(self.block_bytes)
    }

    // ─── Decode ─────────────────────────────────────────────────────────

    /// Accept one received block. Completes exactly when `N` independent
    /// blocks are on hand; the Cauchy construction makes any `N` distinct
    /// indices independent.
    pub(crate) fn feed(&mut self, id: u32, block: &[u8]) -> Result<FeedStatus, Error> {
        if self.decoded.is_some() {
            return Ok(FeedStatus::Complete);
        }

        let n = usize::from(self.block_count);
        let index = self.map_index(id);
        let copy_bytes = if usize::from(index) == n - 1 && id < u32::from(self.block_count) {
            self.final_bytes
        } else {
            self.block_bytes
        };
        if block.len() < copy_bytes {
            return Err(Error::InvalidInput);
        }

        // A repeated index adds no information; wait for a fresh one.
        if self.received.iter().any(|r| r.index == index) {
            return Ok(FeedStatus::NeedMore);
        }

        let mut data = vec![0u8; self.block_bytes];
        data[..copy_bytes].copy_from_slice(&block[..copy_bytes]);
        self.received.push(ReceivedBlock { index, data });

        if self.received.len() < n {
            return Ok(FeedStatus::NeedMore);
        }

        self.solve();
        trace!(block_count = self.block_count, "cauchy decode complete");
        Ok(FeedStatus::Complete)
    }

    /// Solve the received coefficient system by Gaussian elimination.
    fn solve(&mut self) {
        let n = usize::from(self.block_count);
        let bb = self.block_bytes;

        // Build the augmented system: one coefficient row per received
        // block. Original indices are unit rows.
        let mut coeffs: Vec<Vec<u8>> = Vec::with_capacity(n);
        let mut data: Vec<Vec<u8>> = Vec::with_capacity(n);
        for r in &self.received {
            let mut row = vec![0u8; n];
            if usize::from(r.index) < n {
                row[usize::from(r.index)] = 1;
            } else {
                for (j, c) in row.iter_mut().enumerate() {
                    *c = cauchy_element(r.index, self.block_count as u8, j as u8);
                }
            }
            coeffs.push(row);
            data.push(r.data.clone());
        }

        // Forward elimination with implicit row pivoting, then normalize
        // and back-substitute in one pass per column.
        for col in 0..n {
            let pivot = (col..n)
                .find(|&r| coeffs[r][col] != 0)
                .expect("cauchy system is always full rank");
            coeffs.swap(col, pivot);
            data.swap(col, pivot);

            let pivot_value = coeffs[col][col];
            if pivot_value != 1 {
                ops::div_mem(&mut data[col], pivot_value);
                let inv = gf256::inv(pivot_value);
                for c in coeffs[col].iter_mut() {
                    *c = gf256::mul(*c, inv);
                }
            }

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = coeffs[r][col];
                if factor == 0 {
                    continue;
                }
                let pivot_coeffs = coeffs[col].clone();
                for (c, pc) in coeffs[r].iter_mut().zip(&pivot_coeffs) {
                    *c ^= gf256::mul(factor, *pc);
                }
                let (dst, src) = borrow_two(&mut data, r, col);
                ops::muladd_mem(dst, factor, src);
            }
        }

        let mut decoded = vec![0u8; n * bb];
        for col in 0..n {
            decoded[col * bb..][..bb].copy_from_slice(&data[col]);
        }
        self.decoded = Some(decoded);
    }

    // ─── Reconstruct / role switch ──────────────────────────────────────

    pub(crate) fn reconstruct_into(&self, out: &mut [u8]) -> Result<(), Error> {
        let n = usize::from(self.block_count);
        let message_bytes = (n - 1) * self.block_bytes + self.final_bytes;
        if out.len() < message_bytes {
            return Err(Error::InvalidInput);
        }

        for j in 0..n {
            let bytes = if j == n - 1 { self.final_bytes } else { self.block_bytes };
            let src = self.require_source(j)?;
            out[j * self.block_bytes..][..bytes].copy_from_slice(&src[..bytes]);
        }
        Ok(())
    }

    pub(crate) fn reconstruct_block(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        let n = usize::from(self.block_count);
        let j = id as usize;
        if j >= n {
            return Err(Error::InvalidInput);
        }
        let bytes = if j == n - 1 { self.final_bytes } else { self.block_bytes };
        if out.len() < bytes {
            return Err(Error::InvalidInput);
        }
        let src = self.require_source(j)?;
        out[..bytes].copy_from_slice(&src[..bytes]);
        Ok(bytes)
    }

    fn require_source(&self, j: usize) -> Result<&[u8], Error> {
        if self.message.is_none() && self.decoded.is_none() {
            return Err(Error::NeedMoreBlocks);
        }
        Ok(self.source_block(j))
    }

    /// A completed decoder can serve as an encoder as-is; just verify the
    /// decode actually finished.
    pub(crate) fn become_encoder(&mut self) -> Result<(), Error> {
        if self.decoded.is_none() && self.message.is_none() {
            return Err(Error::NeedMoreBlocks);
        }
        Ok(())
    }
}

fn final_bytes(message_bytes: usize, block_bytes: usize) -> usize {
    let partial = message_bytes % block_bytes;
    if partial == 0 {
        block_bytes
    } else {
        partial
    }
}

/// Cauchy matrix element for recovery row `x` over source column `y`,
/// normalized so row `x0` is all ones.
#[inline]
fn cauchy_element(x: u8, x0: u8, y: u8) -> u8 {
    gf256::div(gf256::add(y, x0), gf256::add(x, y))
}

/// Disjoint `(dest, src)` rows of a row-per-vec table.
fn borrow_two(rows: &mut [Vec<u8>], dest: usize, src: usize) -> (&mut [u8], &[u8]) {
    debug_assert_ne!(dest, src);
    if dest < src {
        let (lo, hi) = rows.split_at_mut(src);
        (&mut lo[dest], &hi[0])
    } else {
        let (lo, hi) = rows.split_at_mut(dest);
        (&mut hi[0], &lo[src])
    }
}
