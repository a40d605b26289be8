//! Public encoder: regime dispatch over a message.

use bytes::Bytes;
use tracing::debug;

use crate::codec::Codec;
use crate::error::Error;
use crate::params::CodeParams;
use crate::rs::CauchyCodec;
use crate::{Backend, PEEL_THRESHOLD_N};

/// Fountain encoder for one message.
///
/// Construction splits the message into `N = ceil(len / block_bytes)` source
/// blocks and prepares the recovery state; [`write`](Encoder::write) then
/// produces the coded block for any 32-bit id. Ids below `N` are the source
/// blocks themselves.
///
/// The message is held by reference (`Bytes`), not copied.
pub struct Encoder {
    pub(crate) backend: Backend,
    pub(crate) params: CodeParams,
    pub(crate) message_bytes: usize,
}

impl Encoder {
    /// Create an encoder over `message` split into `block_bytes` blocks.
    pub fn new(message: Bytes, block_bytes: usize) -> Result<Self, Error> {
        let params = CodeParams::choose(message.len(), block_bytes)?;
        let message_bytes = message.len();

        let backend = if params.block_count < PEEL_THRESHOLD_N {
            debug!(block_count = params.block_count, "encoder using cauchy regime");
            Backend::Cauchy(CauchyCodec::new_encoder(
                message,
                message_bytes,
                params.block_count,
                block_bytes,
            ))
        } else {
            let mut codec = Box::new(Codec::new(params));
            codec.start_encoder(params, message, message_bytes)?;
            Backend::Peel(codec)
        };

        Ok(Encoder { backend, params, message_bytes })
    }

    /// Re-target an existing encoder at a new message, keeping the larger
    /// regime's workspace allocations when the new size fits.
    pub fn reinit(self, message: Bytes, block_bytes: usize) -> Result<Self, Error> {
        let params = CodeParams::choose(message.len(), block_bytes)?;
        let message_bytes = message.len();

        if params.block_count < PEEL_THRESHOLD_N {
            return Ok(Encoder {
                backend: Backend::Cauchy(CauchyCodec::new_encoder(
                    message,
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
        codec.start_encoder(params, message, message_bytes)?;
        Ok(Encoder { backend: Backend::Peel(codec), params, message_bytes })
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

    /// Total message length in bytes.
    #[inline]
    pub fn message_bytes(&self) -> usize {
        self.message_bytes
    }

    /// Selected code parameters, for diagnostics or export.
    #[inline]
    pub fn params(&self) -> &CodeParams {
        &self.params
    }

    /// Write the coded block for `id` into `out`. Returns bytes written:
    /// the full block size except for the final source block's direct copy.
    pub fn write(&self, id: u32, out: &mut [u8]) -> Result<usize, Error> {
        match &self.backend {
            Backend::Cauchy(codec) => codec.encode(id, out),
            Backend::Peel(codec) => codec.encode(id, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(7)).collect::<Vec<u8>>())
    }

    #[test]
    fn small_message_uses_cauchy() {
        let enc = Encoder::new(message(100), 10).unwrap();
        assert_eq!(enc.block_count(), 10);
        assert!(matches!(enc.backend, Backend::Cauchy(_)));
    }

    #[test]
    fn large_message_uses_peel_solver() {
        let enc = Encoder::new(message(28 * 8), 8).unwrap();
        assert_eq!(enc.block_count(), 28);
        assert!(matches!(enc.backend, Backend::Peel(_)));
    }

    #[test]
    fn original_ids_copy_source_data() {
        for (n, bb) in [(10usize, 16usize), (40, 16)] {
            let msg = message(n * bb);
            let enc = Encoder::new(msg.clone(), bb).unwrap();
            let mut block = vec![0u8; bb];
            for id in 0..n as u32 {
                let written = enc.write(id, &mut block).unwrap();
                assert_eq!(written, bb);
                assert_eq!(&block[..], &msg[id as usize * bb..(id as usize + 1) * bb]);
            }
        }
    }

    #[test]
    fn final_partial_block_write_length() {
        let enc = Encoder::new(message(28 * 10 - 3), 10).unwrap();
        let mut block = vec![0u8; 10];
        assert_eq!(enc.write(27, &mut block).unwrap(), 7);
        assert_eq!(enc.write(100, &mut block).unwrap(), 10);
    }

    #[test]
    fn writes_are_deterministic() {
        let msg = message(50 * 32);
        let a = Encoder::new(msg.clone(), 32).unwrap();
        let b = Encoder::new(msg, 32).unwrap();
        let mut ba = vec![0u8; 32];
        let mut bb = vec![0u8; 32];
        for id in [0u32, 49, 50, 1000, u32::MAX] {
            a.write(id, &mut ba).unwrap();
            b.write(id, &mut bb).unwrap();
            assert_eq!(ba, bb, "id {id}");
        }
    }

    #[test]
    fn rejects_undersized_output() {
        let enc = Encoder::new(message(64 * 4), 4).unwrap();
        let mut small = [0u8; 2];
        assert!(matches!(enc.write(70, &mut small), Err(Error::InvalidInput)));
    }
}
