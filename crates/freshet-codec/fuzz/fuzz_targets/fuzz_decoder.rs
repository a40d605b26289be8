#![no_main]

use libfuzzer_sys::fuzz_target;

use freshet_codec::Decoder;

/// Fuzz the decoder with arbitrary ids and block payloads.
///
/// This target exercises:
/// - Parameter selection from fuzzer-chosen sizes
/// - Peeling with adversarial (duplicate, out-of-range) ids
/// - The resume path once more than N rows arrive
/// - Reconstruction in incomplete and complete states
///
/// The decoder must never panic, whatever arrives on the wire.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // First bytes choose the code point, the rest feed blocks.
    let block_bytes = usize::from(data[0] % 32) + 1;
    let block_count = usize::from(u16::from_le_bytes([data[1], data[2]]) % 300) + 2;
    let message_bytes = block_count * block_bytes - usize::from(data[3]) % block_bytes;

    let Ok(mut dec) = Decoder::new(message_bytes, block_bytes) else {
        return;
    };

    let mut out = vec![0u8; message_bytes];
    let mut block_out = vec![0u8; block_bytes];
    let mut rest = &data[4..];
    while rest.len() >= 5 {
        let id = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3] & 1]);
        let take = usize::from(rest[4]).min(rest.len() - 5);
        let block = &rest[5..5 + take];
        let _ = dec.feed(id, block);
        rest = &rest[5 + take..];

        // Poke the read paths in whatever state the decoder is in.
        let _ = dec.reconstruct_into(&mut out);
        let _ = dec.reconstruct_block(id % (block_count as u32 + 2), &mut block_out);
    }
});
