// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component D (discrete surface): marker-delimited frame extraction over
//! the sequencing engine's sequenced queue.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::rtp::RtpPacket;
use crate::sequencer::Sequencer;

/// Removes and returns the earliest sequenced packet's payload, or `None`
/// if the sequenced queue is empty.
pub fn next_payload(sequencer: &Sequencer) -> Option<Bytes> {
    sequencer.with_seq_queue(|queue, marker_count| {
        let packet = queue.pop_front()?;
        if packet.marker {
            *marker_count -= 1;
        }
        Some(packet.payload())
    })
}

/// Removes and concatenates packets from the front of `queue` up to and
/// including the first marker packet, or returns `None` if `marker_count`
/// is zero. Factored out so [`crate::sequencer::Sequencer`] can call it
/// while already holding the sequencing lock (see
/// `Sequencer::blocking_next_frame`), rather than checking and waiting
/// across two separate lock acquisitions.
pub(crate) fn take_frame(queue: &mut VecDeque<RtpPacket>, marker_count: &mut usize) -> Option<Bytes> {
    if *marker_count == 0 {
        return None;
    }

    let mut frame_len = 0;
    let mut boundary = 0;
    for (i, packet) in queue.iter().enumerate() {
        frame_len += packet.payload().len();
        if packet.marker {
            boundary = i + 1;
            break;
        }
    }

    let mut out = BytesMut::with_capacity(frame_len);
    for _ in 0..boundary {
        let packet = queue.pop_front().expect("boundary within queue length");
        out.extend_from_slice(&packet.payload());
    }
    *marker_count -= 1;
    Some(out.freeze())
}

/// Returns the next complete frame: the ordered concatenation of payloads
/// from the front of the sequenced queue up to and including the first
/// marker packet. Returns `None` if no complete frame is available yet
/// (`marker_count == 0`).
pub fn next_frame(sequencer: &Sequencer) -> Option<Bytes> {
    sequencer.with_seq_queue(take_frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::Datagram;
    use crate::rtp;
    use crate::sequencer::{Sequencer, SequencerConfig};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn packet(seq: u16, marker: bool, payload: &[u8]) -> crate::rtp::RtpPacket {
        let mut bytes = vec![0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[1] |= if marker { 0x80 } else { 0 };
        bytes[2..4].copy_from_slice(&seq.to_be_bytes());
        bytes.extend_from_slice(payload);
        let remote = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5004));
        let size = bytes.len();
        rtp::parse(Datagram::new(bytes, size, remote)).unwrap()
    }

    #[test]
    fn next_payload_pops_in_order() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        sequencer.with_seq_queue(|queue, marker_count| {
            queue.push_back(packet(10, false, b"A"));
            queue.push_back(packet(11, true, b"B"));
            *marker_count = 1;
        });

        assert_eq!(next_payload(&sequencer).unwrap(), Bytes::from_static(b"A"));
        assert_eq!(next_payload(&sequencer).unwrap(), Bytes::from_static(b"B"));
        assert_eq!(sequencer.marker_count(), 0);
        assert!(next_payload(&sequencer).is_none());
    }

    #[test]
    fn next_frame_requires_a_marker() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        sequencer.with_seq_queue(|queue, _| {
            queue.push_back(packet(10, false, b"A"));
        });
        assert!(next_frame(&sequencer).is_none());
    }

    #[test]
    fn next_frame_concatenates_up_to_marker() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        sequencer.with_seq_queue(|queue, marker_count| {
            queue.push_back(packet(10, false, b"A"));
            queue.push_back(packet(11, false, b"B"));
            queue.push_back(packet(12, true, b"C"));
            queue.push_back(packet(13, false, b"D"));
            *marker_count = 1;
        });

        let frame = next_frame(&sequencer).unwrap();
        assert_eq!(frame, Bytes::from_static(b"ABC"));
        assert_eq!(sequencer.marker_count(), 0);
        assert!(next_frame(&sequencer).is_none());
        assert_eq!(next_payload(&sequencer).unwrap(), Bytes::from_static(b"D"));
    }
}
