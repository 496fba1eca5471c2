#![no_main]

use std::sync::Arc;

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use peerlink::config::TransportConfig;
use peerlink::core::codec::PacketCodec;
use peerlink::PacketRegistry;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as they would arrive on a channel
    let mut codec = PacketCodec::new(Arc::new(PacketRegistry::new()), &TransportConfig::default());
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
