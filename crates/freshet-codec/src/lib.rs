//! # freshet-codec
//!
//! Fountain erasure coding for delivering a fixed-size message over a lossy
//! packet channel. The sender splits a message into `N` blocks and emits an
//! unbounded stream of coded blocks labeled by 32-bit ids; a receiver that
//! collects any `N` blocks plus a small overhead (averaging under 4%)
//! reconstructs the message exactly, regardless of which ids were lost.
//!
//! Two regimes share one API:
//!
//! - `N < 28` — a systematic Cauchy MDS code over GF(256), zero reception
//!   overhead, at most 256 distinct blocks.
//! - `28 <= N <= 64000` — a structured sparse code whose check matrix
//!   combines peeling rows, dense binary rows, and a small GF(256) heavy
//!   tail, solved by a four-phase sparse inverter in roughly linear time.
//!
//! ## Crate structure
//!
//! - [`encoder`] / [`decoder`] — public API and regime dispatch
//! - [`params`] — code parameter selection from `(message len, block size)`
//! - `codec` — the large-regime codec object and its lifecycle
//! - `peel`, `compress`, `triangle`, `substitute` — the four solver phases
//! - `rs` — the small-regime Cauchy engine
//! - `row`, `prng`, `tables` — deterministic row generation and the
//!   compiled tables both endpoints must share byte-for-byte
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use freshet_codec::{Decoder, Encoder, FeedStatus};
//!
//! let message = Bytes::from(vec![0xA5u8; 64 * 100]);
//! let encoder = Encoder::new(message.clone(), 100).unwrap();
//! let mut decoder = Decoder::new(message.len(), 100).unwrap();
//!
//! let mut block = vec![0u8; 100];
//! // Deliver every other block, as if half the stream was lost.
//! let mut id = 0;
//! loop {
//!     let written = encoder.write(id, &mut block).unwrap();
//!     if decoder.feed(id, &block[..written]).unwrap() == FeedStatus::Complete {
//!         break;
//!     }
//!     id += 2;
//! }
//! assert_eq!(&decoder.reconstruct().unwrap()[..], &message[..]);
//! ```

mod codec;
mod compress;
pub mod decoder;
pub mod encoder;
mod error;
pub mod params;
mod peel;
mod prng;
mod row;
mod rs;
mod substitute;
mod tables;
mod triangle;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use params::CodeParams;

use codec::Codec;
use rs::CauchyCodec;

// ─── Constants ──────────────────────────────────────────────────────────

/// Wire-format version. Both endpoints must agree.
pub const VERSION: u32 = 5;

/// Smallest block count the codec accepts.
pub const MIN_BLOCK_COUNT: u16 = 2;

/// Largest block count the codec accepts.
pub const MAX_BLOCK_COUNT: u16 = 64000;

/// Block counts at or above this use the sparse peeling solver; below it,
/// the Cauchy engine.
pub const PEEL_THRESHOLD_N: u16 = 28;

/// Extra rows a decoder will accept past `N` before giving up.
pub const MAX_EXTRA_ROWS: u16 = 32;

/// Number of GF(256) heavy rows appended to the check matrix.
pub const HEAVY_ROWS: u16 = 6;

/// Widest possible heavy submatrix.
pub const HEAVY_MAX_COLS: u16 = 18;

/// Capacity of a column's row-reference list during peeling.
pub const REF_LIST_MAX: usize = 32;

// ─── Shared API types ───────────────────────────────────────────────────

/// Outcome of feeding one block to a [`Decoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not enough independent blocks yet; keep feeding.
    NeedMore,
    /// The message is fully recoverable.
    Complete,
}

/// Active regime behind an [`Encoder`] or [`Decoder`].
pub(crate) enum Backend {
    Cauchy(CauchyCodec),
    Peel(Box<Codec>),
}

/// Verify the compiled tables and field arithmetic.
///
/// The tables are part of the on-wire contract; a build whose data was
/// corrupted (bad patch, miscompile) would silently produce blocks no other
/// endpoint can use. This check is cheap enough to run at process start.
pub fn self_check() -> bool {
    // Field laws, sampled.
    let field_ok = (1u16..=255).step_by(17).all(|a| {
        let a = a as u8;
        freshet_gf256::mul(a, freshet_gf256::inv(a)) == 1
    }) && freshet_gf256::mul(0x02, 0x80) == 0x5F;

    // Table checksums.
    let sum = |t: &[u16]| t.iter().map(|&v| u64::from(v)).sum::<u64>();
    let tables_ok = sum(&tables::DENSE_SEEDS) == 0x4d6d4
        && sum(&tables::SMALL_PEEL_SEEDS) == 0x3719
        && tables::EXCEPT_TABLE.iter().fold(0u64, |acc, &v| acc ^ v) == 0xe188e26b6e726fcf
        && tables::HEAVY_MATRIX.iter().flatten().map(|&v| u64::from(v)).sum::<u64>() == 0x3b4f
        && tables::WEIGHT_DIST.iter().map(|&v| u64::from(v)).sum::<u64>() == 0x3b45905d7e
        && tables::INVERTIBLE_MATRIX_SEEDS.iter().map(|&v| u64::from(v)).sum::<u64>() == 0x504;

    // The weight distribution must be cumulative and saturating.
    let dist_ok = tables::WEIGHT_DIST.windows(2).all(|w| w[0] <= w[1])
        && *tables::WEIGHT_DIST.last().unwrap() == 0xffff_ffff;

    field_ok && tables_ok && dist_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_check_passes() {
        assert!(self_check());
    }

    #[test]
    fn constants_are_wire_contract() {
        assert_eq!(PEEL_THRESHOLD_N, 28);
        assert_eq!(MAX_EXTRA_ROWS, 32);
        assert_eq!(HEAVY_ROWS, 6);
        assert_eq!(HEAVY_MAX_COLS, 18);
        assert_eq!(freshet_gf256::POLYNOMIAL, 0x15F);
    }
}
