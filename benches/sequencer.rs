// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use criterion::{criterion_group, criterion_main, Criterion};
use rtp_sequencer::datagram::Datagram;
use rtp_sequencer::rtp;
use rtp_sequencer::{Sequencer, SequencerConfig};

fn remote() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5004))
}

fn raw_packet(seq: u16, marker: bool) -> Vec<u8> {
    let mut bytes = vec![0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    bytes[1] |= if marker { 0x80 } else { 0 };
    bytes[2..4].copy_from_slice(&seq.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 1200]);
    bytes
}

fn bench_parse(c: &mut Criterion) {
    let bytes = raw_packet(0, false);
    c.bench_function("rtp::parse", |b| {
        b.iter(|| {
            let size = bytes.len();
            let datagram = Datagram::new(bytes.clone(), size, remote());
            rtp::parse(datagram).unwrap()
        })
    });
}

fn bench_sequence_in_order(c: &mut Criterion) {
    c.bench_function("sequence 1000 in-order packets", |b| {
        b.iter(|| {
            let sequencer = Sequencer::new(SequencerConfig::default());
            sequencer.start_listening().unwrap();
            for seq in 0..1000u16 {
                let bytes = raw_packet(seq, seq == 999);
                let size = bytes.len();
                let datagram = Datagram::new(bytes, size, remote());
                sequencer.on_datagram(datagram);
            }
            while sequencer.marker_count() == 0 {
                std::thread::yield_now();
            }
            sequencer.stop_listening().unwrap();
        })
    });
}

criterion_group!(benches, bench_parse, bench_sequence_in_order);
criterion_main!(benches);
