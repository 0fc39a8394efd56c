use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use etherparse::PacketBuilder;
use pcap_exporter::labels::{extract_labels, LabelKey, LabelKeys, LabelSet};
use pcap_exporter::listener::{Listener, ListenerConfig};
use pcap_exporter::metrics::Metrics;
use pcap_exporter::models::domain::{DecodedPacket, Endpoint, Flow};
use pcap_exporter::parser::{decode, LinkKind, IPV4, IPV6, TCP, UDP};
use pcap_exporter::worker::WorkerConfig;

fn tcp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(src, dst, 64)
        .tcp(src_port, dst_port, 1, 65535);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

fn flow_packet(src: &str, dst_port: u16, network_v6: bool, length: usize) -> DecodedPacket {
    DecodedPacket {
        network: Some(if network_v6 { IPV6 } else { IPV4 }),
        transport: Some(UDP),
        network_flow: Some(Flow::new(Endpoint::present(src), Endpoint::present("192.0.2.1"))),
        transport_flow: Some(Flow::new(Endpoint::present(40000), Endpoint::present(dst_port))),
        length,
        ..Default::default()
    }
}

fn start_pool(workers: usize, keys: &LabelKeys, metrics: &Arc<Metrics>) -> Listener {
    Listener::start(
        ListenerConfig {
            workers,
            queue_capacity: 16,
            stop_timeout: Duration::from_millis(200),
        },
        WorkerConfig {
            label_keys: keys.clone(),
            resolve_dns: false,
        },
        None,
        Arc::clone(metrics),
    )
    .unwrap()
}

#[test]
fn decoded_frame_matches_documented_example() {
    let mut frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1234, 80, &[]);
    frame.resize(512, 0);
    let packet = decode(LinkKind::Ethernet, &frame);
    assert_eq!(packet.length, 512);
    assert_eq!(packet.transport, Some(TCP));

    let keys = LabelKeys::new([
        LabelKey::SourceAddress,
        LabelKey::DestinationPort,
        LabelKey::NetworkProtocol,
    ]);
    let metrics = Arc::new(Metrics::new(&keys).unwrap());
    let mut pool = start_pool(2, &keys, &metrics);
    pool.feeder().run(std::iter::once(packet)).unwrap();

    let expected: LabelSet = [
        ("SourceAddress", "10.0.0.1"),
        ("DestinationPort", "80"),
        ("NetworkProtocol", "IPv4"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while metrics.bytes(&expected) < 512.0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(metrics.bytes(&expected), 512.0);
    assert_eq!(metrics.packets_seen.get(), 1.0);
    assert_eq!(pool.stop(), vec![true, true]);
}

#[test]
fn aggregation_is_independent_of_worker_assignment() {
    let keys = LabelKeys::new([
        LabelKey::SourceAddress,
        LabelKey::DestinationPort,
        LabelKey::NetworkProtocol,
    ]);

    let sources = ["10.0.0.1", "10.0.0.2", "2001:db8::1"];
    let ports = [53u16, 80, 443, 8080];
    let packets: Vec<DecodedPacket> = (0..2_000usize)
        .map(|i| {
            let src = sources[i % sources.len()];
            flow_packet(src, ports[i % ports.len()], src.contains(':'), 40 + i % 200)
        })
        .collect();

    let mut expected: HashMap<Vec<(String, String)>, (LabelSet, f64)> = HashMap::new();
    for packet in &packets {
        let labels = extract_labels(packet, &keys, None);
        let mut sorted: Vec<(String, String)> = labels.clone().into_iter().collect();
        sorted.sort();
        expected.entry(sorted).or_insert_with(|| (labels, 0.0)).1 += packet.length as f64;
    }
    let total: f64 = packets.iter().map(|p| p.length as f64).sum();

    let metrics = Arc::new(Metrics::new(&keys).unwrap());
    let mut pool = start_pool(8, &keys, &metrics);
    pool.feeder().run(packets.into_iter()).unwrap();

    let observed = |metrics: &Metrics| -> f64 {
        expected.values().map(|(labels, _)| metrics.bytes(labels)).sum()
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while observed(&metrics) < total && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    for (labels, bytes) in expected.values() {
        assert_eq!(metrics.bytes(labels), *bytes, "labels {labels:?}");
    }
    assert_eq!(metrics.packets_seen.get(), 2_000.0);
    assert_eq!(pool.stop(), vec![true; 8]);
}

#[test]
fn unknown_label_keys_do_not_stop_processing() {
    let keys = LabelKeys::parse(["DestinationPort", "NotARealKey"]);
    assert_eq!(keys.names(), vec!["DestinationPort"]);

    let metrics = Arc::new(Metrics::new(&keys).unwrap());
    let mut pool = start_pool(2, &keys, &metrics);
    let packets = (0..10).map(|_| flow_packet("10.0.0.1", 80, false, 100));
    pool.feeder().run(packets).unwrap();

    let labels: LabelSet = [("DestinationPort".to_string(), "80".to_string())].into();
    let deadline = Instant::now() + Duration::from_secs(5);
    while metrics.bytes(&labels) < 1000.0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(metrics.bytes(&labels), 1000.0);
    assert_eq!(pool.stop(), vec![true, true]);
}

#[test]
fn idle_pool_stops_within_handshake_timeout() {
    let keys = LabelKeys::new([LabelKey::SourceAddress]);
    let metrics = Arc::new(Metrics::new(&keys).unwrap());
    let mut pool = start_pool(6, &keys, &metrics);

    let start = Instant::now();
    let results = pool.stop();
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|ok| *ok));
    assert!(start.elapsed() < Duration::from_millis(200) * 6);
}
