#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::config::MAX_PACKET_SIZE;
use peerlink::utils::compression::{compress, decompress, CompressionKind};

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        // Roundtrip must hold for anything within the packet limit
        if data.len() <= MAX_PACKET_SIZE {
            if let Ok(compressed) = compress(data, kind, 3) {
                let out = decompress(&compressed, kind, MAX_PACKET_SIZE);
                assert_eq!(out.ok().as_deref(), Some(data));
            }
        }

        // Raw input must never panic or exceed the limit
        if let Ok(out) = decompress(data, kind, MAX_PACKET_SIZE) {
            assert!(out.len() <= MAX_PACKET_SIZE);
        }
    }
});
