//! Codec error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in the codec.
///
/// Rank deficiency during decoding is *not* an error: `Decoder::feed`
/// reports it through [`FeedStatus::NeedMore`](crate::FeedStatus), and only
/// operations that require a completed decode surface [`Error::NeedMoreBlocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The message splits into fewer than 2 blocks; retransmission would
    /// serve better than coding.
    #[error("message too small: need at least 2 blocks, try a smaller block size")]
    TooSmall,

    /// The message splits into more than 64000 blocks.
    #[error("message too large: more than 64000 blocks, try a larger block size")]
    TooLarge,

    /// Zero-length message or block size, undersized output buffer, or an
    /// original-range id fed twice.
    #[error("invalid input")]
    InvalidInput,

    /// The peel seed chosen for this block count produced a degenerate
    /// peeling graph. Indicates a corrupted seed table.
    #[error("peel seed failed to produce a solvable matrix")]
    BadPeelSeed,

    /// No dense seed is available for the computed dense row count.
    /// Indicates a corrupted seed table.
    #[error("no usable dense seed for this block count")]
    BadDenseSeed,

    /// A peeled column's row-reference list exceeded its fixed capacity.
    /// Fatal for this codec instance.
    #[error("column reference list overflow")]
    ReferenceListOverflow,

    /// The operation needs a completed decode, and the decoder is still
    /// short of full rank. Feed more blocks.
    #[error("decode incomplete: more coded blocks needed")]
    NeedMoreBlocks,

    /// More blocks than the extra-row budget arrived without reaching full
    /// rank. Terminal for this decode.
    #[error("extra row budget exhausted without closing the decode")]
    ExtraRowsExhausted,

    /// A workspace buffer could not be allocated.
    #[error("out of memory allocating codec workspace")]
    OutOfMemory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            Error::NeedMoreBlocks.to_string(),
            "decode incomplete: more coded blocks needed"
        );
        assert_eq!(Error::InvalidInput.to_string(), "invalid input");
    }

    #[test]
    fn errors_are_copy_eq() {
        let e = Error::TooSmall;
        let f = e;
        assert_eq!(e, f);
    }
}
