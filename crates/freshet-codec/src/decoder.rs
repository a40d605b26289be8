//! Public decoder: regime dispatch over received blocks.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::Codec;
use crate::encoder::Encoder;
use crate::error::Error;
use crate::params::CodeParams;
use crate::rs::CauchyCodec;
use crate::{Backend, FeedStatus, PEEL_THRESHOLD_N};

/// Fountain decoder for one message.
///
/// Feed distinct coded blocks in any order; once enough independent blocks
/// arrive, [`feed`](Decoder::feed) reports [`FeedStatus::Complete`] and the
/// message can be reconstructed. The same id must not be fed twice.
pub struct Decoder {
    pub(crate) backend: Backend,
    pub(crate) params: CodeParams,
    pub(crate) message_bytes: usize,
}

impl Decoder {
    /// Create a decoder for a message of `message_bytes` bytes split into
    /// `block_bytes` blocks.
    pub fn new(message_bytes: usize, block_bytes: usize) -> Result<Self, Error> {
        let params = CodeParams::choose(message_bytes, block_bytes)?;

        let backend = if params.block_count < PEEL_THRESHOLD_N {
            debug!(block_count = params.block_count, "decoder using cauchy regime");
            Backend::Cauchy(CauchyCodec::new_decoder(
                message_bytes,
                params.block_count,
                block_bytes,
            ))
        } else {
            let mut codec = Box::new(Codec::new(params));
            codec.start_decoder(params, message_bytes)?;
            Backend::Peel(codec)
        };

        Ok(Decoder { backend, params, message_bytes })
    }

    /// Re-target an existing decoder at a new message, keeping the larger
    /// regime's workspace allocations when the new size fits.
    pub fn reinit(self, message_bytes: usize, block_bytes: usize) -> Result<Self, Error> {
        let params = CodeParams::choose(message_bytes, block_bytes)?;

        if params.block_count < PEEL_THRESHOLD_N {
            return Ok(Decoder {
                backend: Backend::Cauchy(CauchyCodec::new_decoder(
                    message_bytes,
                    params.block_count,
                    block_bytes,
                )),
                params,
                message_bytes,
            });
        }

        let mut codec = match self.backend {
            Backend::Peel(codec) => codec,
            Backend::Cauchy(_) => Box::new(Codec::new(params)),
        };
        codec.start_decoder(params, message_bytes)?;
        Ok(Decoder { backend: Backend::Peel(codec), params, message_bytes })
    }

    /// Number of source blocks `N`.
    #[inline]
    pub fn block_count(&self) -> u16 {
        self.params.block_count
    }

    /// Bytes per block `B`.
    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.params.block_bytes
    }

    /// Selected code parameters, for diagnostics or export.
    #[inline]
    pub fn params(&self) -> &CodeParams {
        &self.params
    }

    /// Feed one received coded block.
    pub fn feed(&mut self, id: u32, block: &[u8]) -> Result<FeedStatus, Error> {
        match &mut self.backend {
            Backend::Cauchy(codec) => codec.feed(id, block),
            Backend::Peel(codec) => codec.decode_feed(id, block),
        }
    }

    /// Rebuild the full message into a caller-provided buffer.
    pub fn reconstruct_into(&self, out: &mut [u8]) -> Result<(), Error> {
        match &self.backend {
            Backend::Cauchy(codec) => codec.reconstruct_into(out),
            Backend::Peel(codec) => codec.reconstruct_into(out),
        }
    }

    /// Rebuild the full message into a fresh buffer.
    pub fn reconstruct(&self) -> Result<Bytes, Error> {
        let mut out = BytesMut::zeroed(self.message_bytes);
        self.reconstruct_into(&mut out)?;
        Ok(out.freeze())
    }

    /// Rebuild a single original block. Returns bytes written (short only
    /// for the final block).
    pub fn reconstruct_block(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        match &self.backend {
            Backend::Cauchy(codec) => codec.reconstruct_block(id, out),
            Backend::Peel(codec) => codec.reconstruct_block(id, out),
        }
    }

    /// Convert a completed decoder into an encoder for the same message,
    /// without re-feeding the reconstructed data.
    pub fn into_encoder(self) -> Result<Encoder, Error> {
        let mut backend = self.backend;
        match &mut backend {
            Backend::Cauchy(codec) => codec.become_encoder()?,
            Backend::Peel(codec) => codec.become_encoder()?,
        }
        Ok(Encoder { backend, params: self.params, message_bytes: self.message_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(1)).collect::<Vec<u8>>())
    }

    fn round_trip(n: usize, bb: usize, stride: usize) {
        let msg = message(n * bb);
        let enc = Encoder::new(msg.clone(), bb).unwrap();
        let mut dec = Decoder::new(msg.len(), bb).unwrap();

        let mut block = vec![0u8; bb];
        let mut id = 0u32;
        loop {
            let written = enc.write(id, &mut block).unwrap();
            match dec.feed(id, &block[..written]).unwrap() {
                FeedStatus::Complete => break,
                FeedStatus::NeedMore => id += stride as u32,
            }
            assert!(id < (n as u32) * 8, "decoder never completed");
        }

        assert_eq!(&dec.reconstruct().unwrap()[..], &msg[..]);
    }

    #[test]
    fn round_trip_small_regime_no_loss() {
        round_trip(8, 24, 1);
    }

    #[test]
    fn round_trip_small_regime_with_loss() {
        round_trip(16, 9, 3);
    }

    #[test]
    fn round_trip_large_regime_no_loss() {
        round_trip(28, 17, 1);
    }

    #[test]
    fn round_trip_large_regime_with_loss() {
        round_trip(64, 33, 2);
        round_trip(100, 5, 3);
    }

    #[test]
    fn reconstruct_before_complete_fails() {
        let dec = Decoder::new(100 * 8, 8).unwrap();
        let mut out = vec![0u8; 100 * 8];
        assert!(matches!(dec.reconstruct_into(&mut out), Err(Error::NeedMoreBlocks)));
    }

    #[test]
    fn reinit_reuses_across_sizes() {
        let msg_a = message(40 * 8);
        let enc = Encoder::new(msg_a.clone(), 8).unwrap();
        let dec = Decoder::new(msg_a.len(), 8).unwrap();

        // Shrink into the cauchy regime and back.
        let dec = dec.reinit(10 * 8, 8).unwrap();
        assert_eq!(dec.block_count(), 10);
        let mut dec = dec.reinit(msg_a.len(), 8).unwrap();
        assert_eq!(dec.block_count(), 40);

        let mut block = vec![0u8; 8];
        for id in 0..40u32 {
            enc.write(id, &mut block).unwrap();
            dec.feed(id, &block).unwrap();
        }
        assert_eq!(&dec.reconstruct().unwrap()[..], &msg_a[..]);
    }
}
