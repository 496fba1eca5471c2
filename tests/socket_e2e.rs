//! End-to-end tests over loopback TCP
//!
//! Every test drives its sockets from the test thread, the way an application
//! control loop would.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use common::{
    fast_liveness_config, registry, take_performed, test_config, wait_until, Ping, Probe, WAIT,
};
use peerlink::config::{NetworkConfig, MAX_FRAME_LEN};
use peerlink::core::codec::PacketCodec;
use peerlink::protocol::Text;
use peerlink::{ConnectTarget, PacketRegistry, PeerId, ProtocolError, Socket};
use tokio_util::codec::Decoder;

fn server() -> Socket {
    let mut socket = Socket::new(test_config(), registry()).unwrap();
    socket.start(0).unwrap();
    socket
}

fn remote_of(server: &Socket) -> Socket {
    let mut socket = Socket::new(test_config(), registry()).unwrap();
    socket
        .connect(ConnectTarget::from(server.local_addr().unwrap()))
        .unwrap();
    socket
}

fn wait_for_peers(server: &Socket, count: usize) {
    assert!(
        wait_until(WAIT, || server.peer_count() == count),
        "expected {count} peers, have {}",
        server.peer_count()
    );
}

#[test]
fn test_short_payload_reaches_server_tagged_with_channel_id() {
    let mut server = server();
    let remote = remote_of(&server);
    wait_for_peers(&server, 1);
    let channel_peer = server.peers()[0];
    assert!(!channel_peer.is_nil());

    remote.send_to_server(&Probe::new(1, b"abc".to_vec())).unwrap();

    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        server.tick();
        performed.extend(take_performed());
        !performed.is_empty()
    }));

    assert_eq!(performed.len(), 1);
    let (sender, probe) = &performed[0];
    assert_eq!(*sender, channel_peer);
    assert_eq!(probe.payload, b"abc");
}

#[test]
fn test_builtin_text_is_performed() {
    let mut server = server();
    let remote = remote_of(&server);

    remote.send_to_server(&Text::new("hey")).unwrap();
    let mut count = 0;
    assert!(wait_until(WAIT, || {
        count += server.tick();
        count == 1
    }));
}

#[test]
fn test_packets_from_one_channel_keep_their_order() {
    let mut server = server();
    let remote = remote_of(&server);

    for seq in 0..100 {
        remote
            .send_to_server(&Probe::new(seq, seq.to_le_bytes().to_vec()))
            .unwrap();
    }

    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        server.tick();
        performed.extend(take_performed());
        performed.len() == 100
    }));
    let seqs: Vec<u32> = performed.iter().map(|(_, p)| p.seq).collect();
    assert_eq!(seqs, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_fan_out_reaches_every_remote() {
    let server = server();
    let mut a = remote_of(&server);
    let mut b = remote_of(&server);
    wait_for_peers(&server, 2);

    server.send_to_remotes(&Probe::new(7, b"all".to_vec())).unwrap();

    let (mut got_a, mut got_b) = (0, 0);
    assert!(wait_until(WAIT, || {
        got_a += a.tick();
        got_b += b.tick();
        got_a == 1 && got_b == 1
    }));

    let performed = take_performed();
    assert_eq!(performed.len(), 2);
    assert!(performed
        .iter()
        .all(|(sender, probe)| sender.is_nil() && probe.seq == 7));
}

#[test]
fn test_targeted_fan_out_skips_unlisted_and_unknown_peers() {
    let server = server();
    let mut a = remote_of(&server);
    let mut b = remote_of(&server);
    wait_for_peers(&server, 2);

    let peers = server.peers();
    server
        .send_to_remotes_in(&[peers[0], PeerId::random()], &Probe::new(1, Vec::new()))
        .unwrap();

    let mut total = 0;
    assert!(wait_until(WAIT, || {
        total += a.tick() + b.tick();
        total == 1
    }));
    // Nothing else shows up afterwards
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(a.tick() + b.tick(), 0);
}

#[test]
fn test_send_to_unknown_peer_is_a_no_op() {
    let server = server();
    assert!(server
        .send_to_remote(PeerId::random(), &Probe::new(1, Vec::new()))
        .is_ok());
    assert_eq!(server.metrics().packets_sent, 0);
}

#[test]
fn test_perform_can_reply_through_context() {
    let mut server = server();
    let mut remote = remote_of(&server);

    remote.send_to_server(&Ping { seq: 42 }).unwrap();

    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        server.tick();
        remote.tick();
        performed.extend(take_performed());
        !performed.is_empty()
    }));
    let (sender, probe) = &performed[0];
    assert!(sender.is_nil(), "reply should come from the server channel");
    assert_eq!(probe.seq, 42);
    assert_eq!(probe.payload, b"pong");
}

#[test]
fn test_lifecycle_errors() {
    let mut server = server();
    assert!(matches!(server.start(0), Err(ProtocolError::AlreadyRunning)));

    let mut remote = Socket::new(test_config(), registry()).unwrap();
    assert!(matches!(
        remote.send_to_server(&Probe::default()),
        Err(ProtocolError::NotConnected)
    ));

    let addr = server.local_addr().unwrap();
    remote.connect(ConnectTarget::from(addr)).unwrap();
    assert!(matches!(
        remote.connect(ConnectTarget::from(addr)),
        Err(ProtocolError::AlreadyConnected)
    ));
    assert_eq!(remote.server_addr(), Some(addr));

    // Both are idempotent
    remote.disconnect();
    remote.disconnect();
    server.stop();
    server.stop();
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
}

#[test]
fn test_encode_errors_surface_at_call_site() {
    let server = server();
    let remote = remote_of(&server);
    wait_for_peers(&server, 1);

    // 12 bytes of type id, seq and blob length leave 32755 for the payload
    assert!(remote
        .send_to_server(&Probe::new(0, vec![0u8; 32755]))
        .is_ok());
    assert!(matches!(
        remote.send_to_server(&Probe::new(0, vec![0u8; 32756])),
        Err(ProtocolError::OversizedPacket(32768))
    ));

    #[derive(Debug, Default)]
    struct Stranger;
    impl peerlink::Packet for Stranger {
        fn name(&self) -> &'static str {
            "test.stranger"
        }
        fn write(&self, _buf: &mut bytes::BytesMut) -> peerlink::Result<()> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut bytes::Bytes) -> peerlink::Result<()> {
            Ok(())
        }
    }
    assert!(matches!(
        server.send_to_remotes(&Stranger),
        Err(ProtocolError::UnregisteredPacket(_))
    ));
    assert_eq!(remote.metrics().packets_sent, 1);
}

#[test]
fn test_disconnect_is_noticed_by_server() {
    let server = server();
    let mut remote = remote_of(&server);
    wait_for_peers(&server, 1);

    remote.disconnect();
    assert!(!remote.is_connected());
    wait_for_peers(&server, 0);
}

#[test]
fn test_stop_closes_every_remote() {
    let mut server = server();
    let a = remote_of(&server);
    let b = remote_of(&server);
    wait_for_peers(&server, 2);

    server.stop();
    assert_eq!(server.peer_count(), 0);
    assert!(wait_until(WAIT, || !a.is_connected() && !b.is_connected()));
    assert!(matches!(
        a.send_to_server(&Probe::default()),
        Err(ProtocolError::NotConnected)
    ));
}

#[test]
fn test_silent_remote_is_evicted_and_heartbeating_one_is_kept() {
    let mut server = Socket::new(fast_liveness_config(), registry()).unwrap();
    let addr = server.start(0).unwrap();

    let mut alive = Socket::new(fast_liveness_config(), registry()).unwrap();
    alive.connect(ConnectTarget::from(addr)).unwrap();
    let silent = {
        let mut socket = Socket::new(fast_liveness_config(), registry()).unwrap();
        socket.connect(ConnectTarget::from(addr)).unwrap();
        socket
    };
    wait_for_peers(&server, 2);

    // `silent` never ticks, so it never heartbeats
    assert!(wait_until(WAIT, || {
        server.tick();
        alive.tick();
        server.peer_count() == 1
    }));
    assert!(wait_until(WAIT, || !silent.is_connected()));

    // Survive well past several liveness windows
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_millis(1500) {
        server.tick();
        alive.tick();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.peer_count(), 1);
    assert!(alive.is_connected());

    let metrics = server.metrics();
    assert_eq!(metrics.evictions, 1);
    assert!(alive.metrics().heartbeats_sent >= 10);
}

#[test]
fn test_one_socket_can_host_and_join_its_own_server() {
    let mut socket = Socket::new(test_config(), registry()).unwrap();
    let local = socket.start(0).unwrap();
    let connected = socket.connect(ConnectTarget::Integrated).unwrap();
    assert_eq!(connected.port(), local.port());
    wait_for_peers(&socket, 1);

    socket.send_to_server(&Probe::new(5, b"self".to_vec())).unwrap();
    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        socket.tick();
        performed.extend(take_performed());
        !performed.is_empty()
    }));
    assert_eq!(performed[0].0, socket.peers()[0]);
}

#[test]
fn test_malformed_frame_closes_only_that_connection() {
    let server = server();
    let good = remote_of(&server);
    wait_for_peers(&server, 1);

    let mut raw = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();
    wait_for_peers(&server, 2);
    raw.write_all(&(-5i32).to_le_bytes()).unwrap();

    wait_for_peers(&server, 1);
    assert!(good.is_connected());
    assert_eq!(server.metrics().protocol_errors, 1);
}

#[test]
fn test_registry_mismatch_is_detected() {
    let mut server =
        Socket::new(test_config(), std::sync::Arc::new(PacketRegistry::new())).unwrap();
    let addr = server.start(0).unwrap();

    // The remote knows `Probe`; the server does not
    let mut remote = Socket::new(test_config(), registry()).unwrap();
    remote.connect(ConnectTarget::from(addr)).unwrap();
    wait_for_peers(&server, 1);

    remote.send_to_server(&Probe::new(1, Vec::new())).unwrap();
    wait_for_peers(&server, 0);
    assert_eq!(server.metrics().protocol_errors, 1);
    assert_eq!(server.tick(), 0);
}

fn random_text(len: usize) -> String {
    rand::Rng::sample_iter(rand::rng(), &rand::distr::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[test]
fn test_evicted_peer_that_stopped_reading_is_cut_off() {
    let mut server = Socket::new(fast_liveness_config(), registry()).unwrap();
    let addr = server.start(0).unwrap();

    // Never reads and never heartbeats
    let mut stalled = std::net::TcpStream::connect(addr).unwrap();
    wait_for_peers(&server, 1);

    let text = Text::new(random_text(22_000));
    for _ in 0..800 {
        server.send_to_remotes(&text).unwrap();
    }
    let queued = server.metrics().packets_sent;
    assert_eq!(queued, 800);

    assert!(wait_until(WAIT, || {
        server.tick();
        server.peer_count() == 0
    }));
    let at_eviction = server.metrics().bytes_sent;

    stalled
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = vec![0u8; 64 * 1024];
    let mut read = 0u64;
    loop {
        let n = stalled.read(&mut buf).expect("evicted stream reaches EOF");
        if n == 0 {
            break;
        }
        read += n as u64;
    }

    // Only what was already in flight at eviction may still arrive
    let slack = 2 * (MAX_FRAME_LEN as u64 + 4);
    let after = server.metrics().bytes_sent;
    assert!(after <= at_eviction + slack, "at eviction {at_eviction}, after {after}");
    assert!(read <= after + slack, "read {read}, sent {after}");
    assert_eq!(server.metrics().evictions, 1);
    assert_eq!(server.metrics().connections_active, 0);
}

fn bounded_config(limit: usize) -> NetworkConfig {
    let mut config = test_config();
    config.transport.send_queue_limit = limit;
    config
}

#[test]
fn test_bounded_queue_delivers_in_order_from_plain_thread() {
    let mut server = Socket::new(bounded_config(2), registry()).unwrap();
    let addr = server.start(0).unwrap();
    let mut remote = Socket::new(bounded_config(2), registry()).unwrap();
    remote.connect(ConnectTarget::from(addr)).unwrap();
    wait_for_peers(&server, 1);
    let peer = server.peers()[0];

    for seq in 0..200 {
        remote.send_to_server(&Probe::new(seq, vec![1; 256])).unwrap();
    }
    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        server.tick();
        performed.extend(take_performed());
        performed.len() == 200
    }));
    let seqs: Vec<u32> = performed.iter().map(|(_, p)| p.seq).collect();
    assert_eq!(seqs, (0..200).collect::<Vec<_>>());

    for seq in 0..200 {
        server
            .send_to_remote(peer, &Probe::new(seq, vec![2; 256]))
            .unwrap();
    }
    let mut performed = Vec::new();
    assert!(wait_until(WAIT, || {
        remote.tick();
        performed.extend(take_performed());
        performed.len() == 200
    }));
    assert!(performed.iter().all(|(sender, _)| sender.is_nil()));
    let seqs: Vec<u32> = performed.iter().map(|(_, p)| p.seq).collect();
    assert_eq!(seqs, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_full_bounded_queue_blocks_until_writer_drains() {
    const COUNT: u32 = 600;
    const READ_DELAY: Duration = Duration::from_millis(500);

    let server = {
        let mut socket = Socket::new(bounded_config(1), registry()).unwrap();
        socket.start(0).unwrap();
        socket
    };
    let stream = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();
    wait_for_peers(&server, 1);
    let peer = server.peers()[0];

    // Starts reading only after the sender has had time to fill every buffer
    let reader = std::thread::spawn(move || {
        let mut stream = stream;
        std::thread::sleep(READ_DELAY);
        let mut codec = PacketCodec::new(registry(), &bounded_config(1).transport);
        let mut pending = BytesMut::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut seqs = Vec::new();
        while seqs.len() < COUNT as usize {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "stream closed early");
            pending.extend_from_slice(&chunk[..n]);
            while let Some(packet) = codec.decode(&mut pending).unwrap() {
                seqs.push(packet.downcast_ref::<Probe>().unwrap().seq);
            }
        }
        seqs
    });

    // Incompressible, so ~20 MB has to pass through a one-frame queue
    let payload: Vec<u8> = (0..32_000).map(|_| rand::random::<u8>()).collect();
    let started = Instant::now();
    for seq in 0..COUNT {
        server
            .send_to_remote(peer, &Probe::new(seq, payload.clone()))
            .unwrap();
    }
    let blocked_for = started.elapsed();

    let seqs = reader.join().unwrap();
    assert_eq!(seqs, (0..COUNT).collect::<Vec<_>>());
    assert!(
        blocked_for >= READ_DELAY / 2,
        "sends finished after {blocked_for:?} without the peer reading"
    );
    assert_eq!(server.metrics().packets_sent, u64::from(COUNT));
}
