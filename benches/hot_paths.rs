use criterion::{black_box, criterion_group, criterion_main, Criterion};
use etherparse::PacketBuilder;
use pcap_exporter::labels::{extract_labels, LabelKey, LabelKeys};
use pcap_exporter::parser::{decode, LinkKind};

fn udp_frame() -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .udp(40000, 53);
    let payload = [0u8; 64];
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload).unwrap();
    frame
}

fn bench_decode(c: &mut Criterion) {
    let frame = udp_frame();
    c.bench_function("decode_ethernet_udp", |b| {
        b.iter(|| decode(LinkKind::Ethernet, black_box(&frame)))
    });
}

fn bench_extract_labels(c: &mut Criterion) {
    let packet = decode(LinkKind::Ethernet, &udp_frame());
    let keys = LabelKeys::new(LabelKey::ALL);
    c.bench_function("extract_all_labels", |b| {
        b.iter(|| extract_labels(black_box(&packet), &keys, None))
    });
}

criterion_group!(benches, bench_decode, bench_extract_labels);
criterion_main!(benches);
