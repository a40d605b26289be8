//! Property-based tests for the fountain codec.
//!
//! Round-trip correctness under arbitrary loss patterns and sizes, encoder
//! determinism, and feed-order independence, across both regimes.

use bytes::Bytes;
use freshet_codec::{Decoder, Encoder, FeedStatus};
use proptest::prelude::*;

fn message_from_seed(len: usize, seed: u64) -> Bytes {
    let mut state = seed | 1;
    let buf: Vec<u8> = (0..len)
        .map(|_| {
            // splitmix-style byte stream, cheap and seedable
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect();
    Bytes::from(buf)
}

/// Deliver blocks with a pseudo-random loss pattern until complete.
fn decode_with_loss(
    enc: &Encoder,
    dec: &mut Decoder,
    loss_seed: u64,
    loss_denominator: u32,
) -> u32 {
    let mut block = vec![0u8; enc.block_bytes()];
    let mut state = loss_seed | 1;
    let mut delivered = 0u32;
    let limit = u32::from(enc.block_count()) * 8 + 256;
    for id in 0..limit {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(12345);
        // Drop roughly 1/loss_denominator of blocks (0 = lossless).
        if loss_denominator > 0 && (state >> 33) as u32 % loss_denominator == 0 {
            continue;
        }
        let written = enc.write(id, &mut block).unwrap();
        delivered += 1;
        if dec.feed(id, &block[..written]).unwrap() == FeedStatus::Complete {
            return delivered;
        }
    }
    panic!("decoder never completed within {limit} ids");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any message, any block size, any loss pattern: the decoder either
    /// waits or reconstructs the exact message.
    #[test]
    fn round_trip_arbitrary_loss(
        block_count in 2usize..200,
        block_bytes in 1usize..96,
        tail_trim in 0usize..64,
        msg_seed in any::<u64>(),
        loss_seed in any::<u64>(),
        // Drop 1 in k blocks; 0 disables loss entirely.
        loss_denominator in prop_oneof![Just(0u32), 2u32..6],
    ) {
        let len = (block_count * block_bytes).saturating_sub(tail_trim.min(block_bytes - 1));
        prop_assume!(len > block_bytes); // keep at least 2 blocks
        let message = message_from_seed(len, msg_seed);

        let enc = Encoder::new(message.clone(), block_bytes).unwrap();
        let mut dec = Decoder::new(len, block_bytes).unwrap();
        let delivered = decode_with_loss(&enc, &mut dec, loss_seed, loss_denominator);
        prop_assert!(delivered >= u32::from(enc.block_count()));

        prop_assert_eq!(&dec.reconstruct().unwrap()[..], &message[..]);
    }

    /// The block for an id is a pure function of the message and parameters.
    #[test]
    fn encoder_is_deterministic(
        block_count in 2usize..120,
        block_bytes in 1usize..64,
        msg_seed in any::<u64>(),
        id in any::<u32>(),
    ) {
        let len = block_count * block_bytes;
        let message = message_from_seed(len, msg_seed);
        let a = Encoder::new(message.clone(), block_bytes).unwrap();
        let b = Encoder::new(message, block_bytes).unwrap();

        let mut out_a = vec![0u8; block_bytes];
        let mut out_b = vec![0u8; block_bytes];
        let wa = a.write(id, &mut out_a).unwrap();
        let wb = b.write(id, &mut out_b).unwrap();
        prop_assert_eq!(wa, wb);
        prop_assert_eq!(&out_a[..wa], &out_b[..wb]);
    }

    /// Feeding the same set of blocks in any order reaches the same result.
    #[test]
    fn feed_order_does_not_matter(
        block_count in 28usize..100,
        block_bytes in 1usize..32,
        msg_seed in any::<u64>(),
        order_seed in any::<u64>(),
    ) {
        let len = block_count * block_bytes;
        let message = message_from_seed(len, msg_seed);
        let enc = Encoder::new(message.clone(), block_bytes).unwrap();

        // A fixed set of ids with some originals missing, enough to close
        // the decode with margin.
        let mut ids: Vec<u32> = (0..(block_count as u32 * 2)).filter(|id| id % 5 != 0).collect();

        // Shuffle by the seed.
        let mut state = order_seed | 1;
        for i in (1..ids.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(99);
            ids.swap(i, ((state >> 33) as usize) % (i + 1));
        }

        let mut dec = Decoder::new(len, block_bytes).unwrap();
        let mut block = vec![0u8; block_bytes];
        let mut complete = false;
        for &id in &ids {
            let written = enc.write(id, &mut block).unwrap();
            if dec.feed(id, &block[..written]).unwrap() == FeedStatus::Complete {
                complete = true;
                break;
            }
        }

        if complete {
            prop_assert_eq!(&dec.reconstruct().unwrap()[..], &message[..]);
        }
    }

    /// After a successful decode the codec regenerates every source block
    /// the encoder would produce.
    #[test]
    fn decoder_blocks_match_encoder(
        block_count in 2usize..80,
        block_bytes in 1usize..48,
        msg_seed in any::<u64>(),
    ) {
        let len = block_count * block_bytes;
        let message = message_from_seed(len, msg_seed);
        let enc = Encoder::new(message.clone(), block_bytes).unwrap();
        let mut dec = Decoder::new(len, block_bytes).unwrap();
        decode_with_loss(&enc, &mut dec, msg_seed ^ 0xABCD, 2);

        let mut from_enc = vec![0u8; block_bytes];
        let mut from_dec = vec![0u8; block_bytes];
        for id in 0..block_count as u32 {
            let we = enc.write(id, &mut from_enc).unwrap();
            let wd = dec.reconstruct_block(id, &mut from_dec).unwrap();
            prop_assert_eq!(we, wd);
            prop_assert_eq!(&from_enc[..we], &from_dec[..wd]);
        }
    }
}
