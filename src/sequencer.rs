// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component C: the packet-sequencing engine.
//!
//! Two mutexes — one over the reception side (`recv`, its condvar) and one
//! over the sequencing side (`seq`) — let the receive callback enqueue
//! without ever blocking on the lock that frame/stream consumers use. They
//! are never acquired in reverse order: code that needs both always takes
//! `recv` first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use log::{debug, warn};

use crate::datagram::Datagram;
use crate::events::{Event, EventBus, Listener};
use crate::rtp::{self, RtpPacket};

/// Tunables for the sequencing engine; see section 6 of the design for
/// defaults.
#[derive(Debug, Clone, Copy)]
pub struct SequencerConfig {
    /// When true, packets whose payload type differs from the first-seen
    /// reference are dropped and reported via `invalid_packet` instead of
    /// being sequenced.
    pub verify_payload_type: bool,
    /// Upper bound on the number of packets held in the reception queue
    /// before the next expected sequence number is declared lost.
    pub max_buffered: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            verify_payload_type: true,
            max_buffered: 25,
        }
    }
}

/// A point-in-time snapshot of the engine's observable state.
#[derive(Debug, Clone)]
pub struct ListenerState {
    pub running: bool,
    pub expected_seq: u16,
    pub reference_payload_type: u8,
    pub verify_payload_type: bool,
    pub max_buffered: usize,
    pub marker_count: usize,
}

pub(crate) struct SequencedSide {
    queue: VecDeque<RtpPacket>,
    marker_count: usize,
}

/// Accepts parsed packets, reorders them by sequence number, and exposes
/// the resulting sequenced queue. See [`crate::frame`] and
/// [`crate::stream`] for the consumer-facing surfaces built on top of it.
pub struct Sequencer {
    config: SequencerConfig,
    events: Arc<EventBus>,

    recv: Mutex<Vec<RtpPacket>>,
    recv_condvar: Condvar,

    seq: Mutex<SequencedSide>,
    /// Signalled whenever a packet is pushed onto `seq`, so the streaming
    /// facade's blocking `read` can wake up without polling.
    pub(crate) seq_condvar: Condvar,

    running: AtomicBool,
    bootstrapped: AtomicBool,
    expected_seq: AtomicU16,
    reference_payload_type: AtomicU8,

    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Sequencer {
    pub fn new(config: SequencerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            events: Arc::new(EventBus::new()),
            recv: Mutex::new(Vec::new()),
            recv_condvar: Condvar::new(),
            seq: Mutex::new(SequencedSide {
                queue: VecDeque::new(),
                marker_count: 0,
            }),
            seq_condvar: Condvar::new(),
            running: AtomicBool::new(false),
            bootstrapped: AtomicBool::new(false),
            expected_seq: AtomicU16::new(0),
            reference_payload_type: AtomicU8::new(0),
            worker: Mutex::new(None),
        })
    }

    pub fn register_listener(&self, listener: Listener) {
        self.events.register(listener);
    }

    pub fn state(&self) -> ListenerState {
        ListenerState {
            running: self.running.load(Ordering::SeqCst),
            expected_seq: self.expected_seq.load(Ordering::SeqCst),
            reference_payload_type: self.reference_payload_type.load(Ordering::SeqCst),
            verify_payload_type: self.config.verify_payload_type,
            max_buffered: self.config.max_buffered,
            marker_count: self.seq.lock().unwrap().marker_count,
        }
    }

    pub fn marker_count(&self) -> usize {
        self.seq.lock().unwrap().marker_count
    }

    /// Starts the dedicated sequencing worker. Idempotent calls are an
    /// error (see [`crate::error::Error::InvalidState`]).
    pub fn start_listening(self: &Arc<Self>) -> Result<(), crate::error::Error> {
        let mut worker_guard = self.worker.lock().unwrap();
        if worker_guard.is_some() {
            return Err(crate::error::Error::InvalidState(
                "sequencer is already listening".into(),
            ));
        }
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("rtp-sequencer".into())
            .spawn(move || this.worker_loop())
            .map_err(crate::error::Error::Io)?;
        *worker_guard = Some(handle);
        Ok(())
    }

    /// Stops the worker and wakes it so it can observe the flag. Calling
    /// this twice is an error.
    pub fn stop_listening(&self) -> Result<(), crate::error::Error> {
        let handle = self
            .worker
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| crate::error::Error::InvalidState("sequencer is not listening".into()))?;
        self.running.store(false, Ordering::SeqCst);
        self.recv_condvar.notify_all();
        let _ = handle.join();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Entry point for the receive path (4.A + 4.B): parse the datagram and
    /// enqueue it, or raise `invalid_data` on a malformed header.
    pub fn on_datagram(&self, datagram: Datagram) {
        match rtp::parse(datagram) {
            Ok(packet) => self.on_packet(packet),
            Err(parse_error) => {
                warn!(
                    "invalid RTP datagram from {}: {}",
                    parse_error.datagram.remote(),
                    parse_error.error
                );
                self.events.emit(Event::InvalidData(parse_error.datagram));
            }
        }
    }

    /// Pushes an already-parsed packet into the reception queue. Exposed
    /// separately from [`Self::on_datagram`] so tests (and callers with
    /// their own transport) can feed packets directly.
    pub fn on_packet(&self, packet: RtpPacket) {
        let mut guard = self.recv.lock().unwrap();
        guard.push(packet);
        self.recv_condvar.notify_all();
    }

    fn worker_loop(self: Arc<Self>) {
        if !self.bootstrap() {
            return;
        }

        while self.running.load(Ordering::SeqCst) {
            let expected = self.expected_seq.load(Ordering::SeqCst);
            let found = {
                let mut guard = self.recv.lock().unwrap();
                loop {
                    if let Some(pos) = guard.iter().position(|p| p.sequence_number == expected) {
                        break Some(guard.remove(pos));
                    }
                    if guard.len() >= self.config.max_buffered {
                        break None;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    guard = self.recv_condvar.wait(guard).unwrap();
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                }
            };

            match found {
                Some(packet) => self.emit(packet),
                None => {
                    self.expected_seq.store(expected.wrapping_add(1), Ordering::SeqCst);
                    warn!("packet loss: expected sequence number {:#06x}", expected);
                    self.events.emit(Event::PacketLoss(expected));
                }
            }
        }
    }

    /// Phase 1: waits for the first packet to arrive and adopts its
    /// sequence number and payload type as the starting point. Leaves the
    /// packet in `recv` for phase 2 to pick up normally. Returns false if
    /// shutdown was requested before any packet arrived.
    fn bootstrap(&self) -> bool {
        let mut guard = self.recv.lock().unwrap();
        while guard.is_empty() {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            guard = self.recv_condvar.wait(guard).unwrap();
        }
        let first = &guard[0];
        self.expected_seq.store(first.sequence_number, Ordering::SeqCst);
        self.reference_payload_type
            .store(first.payload_type, Ordering::SeqCst);
        self.bootstrapped.store(true, Ordering::SeqCst);
        debug!(
            "sequencer bootstrapped: expected_seq={:#06x} reference_payload_type={:#04x}",
            first.sequence_number, first.payload_type
        );
        true
    }

    /// Step 5 of the steady-state loop: advances `expected_seq`, applies
    /// payload-type verification, and — on success — places the packet on
    /// the sequenced queue before raising events outside both locks (a
    /// deliberate deviation from invoking listeners under the sequencing
    /// lock; see the design notes on event fan-out).
    fn emit(&self, packet: RtpPacket) {
        let expected = self.expected_seq.load(Ordering::SeqCst);
        self.expected_seq
            .store(expected.wrapping_add(1), Ordering::SeqCst);

        if self.config.verify_payload_type {
            let reference = self.reference_payload_type.load(Ordering::SeqCst);
            if packet.payload_type != reference {
                warn!(
                    "invalid payload type {:#04x} (expected {:#04x}) at seq {:#06x}",
                    packet.payload_type, reference, packet.sequence_number
                );
                self.events.emit(Event::InvalidPacket(packet));
                return;
            }
        }

        let sequenced = packet.clone();
        let marker = packet.marker;
        {
            let mut seq_guard = self.seq.lock().unwrap();
            if marker {
                seq_guard.marker_count += 1;
            }
            seq_guard.queue.push_back(packet);
        }
        self.seq_condvar.notify_all();

        self.events
            .emit(Event::SequencedPacketReceived(sequenced.clone()));
        if marker {
            self.events
                .emit(Event::SequencedMarkerReceived(sequenced.clone()));
        }
        self.events.emit(Event::PacketReceived(sequenced.clone()));
        if marker {
            self.events.emit(Event::MarkerReceived(sequenced));
        }
    }

    /// Access to the sequenced queue for the frame consumer API. Exposed
    /// crate-internally only; [`crate::frame`] is the public surface.
    pub(crate) fn with_seq_queue<R>(&self, f: impl FnOnce(&mut VecDeque<RtpPacket>, &mut usize) -> R) -> R {
        let mut guard = self.seq.lock().unwrap();
        let SequencedSide { queue, marker_count } = &mut *guard;
        f(queue, marker_count)
    }

    /// Blocks until a complete frame is available, holding the sequencing
    /// lock continuously across the check-and-wait. Checking
    /// `take_frame` and calling `wait` under the same guard (rather than
    /// releasing the lock between them, as a naive `next_frame`-then-wait
    /// loop would) avoids missing a `notify_all` that lands in the gap —
    /// the same pattern `worker_loop` uses for its own condvar wait.
    pub(crate) fn blocking_next_frame(&self) -> Bytes {
        let mut guard = self.seq.lock().unwrap();
        loop {
            if let Some(frame) = crate::frame::take_frame(&mut guard.queue, &mut guard.marker_count) {
                return frame;
            }
            guard = self.seq_condvar.wait(guard).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::sync::mpsc;

    fn packet(seq: u16, marker: bool, payload_type: u8, payload: &[u8]) -> RtpPacket {
        let mut bytes = vec![0x80, payload_type & 0x7F, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[1] |= if marker { 0x80 } else { 0 };
        bytes[2..4].copy_from_slice(&seq.to_be_bytes());
        bytes.extend_from_slice(payload);
        let remote = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5004));
        let size = bytes.len();
        rtp::parse(Datagram::new(bytes, size, remote)).unwrap()
    }

    fn drain_frames(seq: &Arc<Sequencer>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        loop {
            let frame = crate::frame::next_frame(seq);
            match frame {
                Some(bytes) => frames.push(bytes.to_vec()),
                None => break,
            }
        }
        frames
    }

    #[test]
    fn sequences_out_of_order_packets() {
        let seq = Sequencer::new(SequencerConfig::default());
        seq.start_listening().unwrap();
        seq.on_packet(packet(10, false, 96, b"A"));
        seq.on_packet(packet(12, true, 96, b"C"));
        seq.on_packet(packet(11, false, 96, b"B"));

        // Busy-wait briefly for the worker thread to catch up.
        for _ in 0..1000 {
            if seq.marker_count() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let frames = drain_frames(&seq);
        assert_eq!(frames, vec![b"ABC".to_vec()]);
        seq.stop_listening().unwrap();
    }

    #[test]
    fn declares_loss_under_buffer_pressure() {
        let mut config = SequencerConfig::default();
        config.max_buffered = 25;
        let seq = Sequencer::new(config);
        let (tx, rx) = mpsc::channel();
        seq.register_listener(Box::new(move |event| {
            if let Event::PacketLoss(s) = event {
                tx.send(*s).unwrap();
            }
        }));
        seq.start_listening().unwrap();
        seq.on_packet(packet(10, false, 96, b"A"));
        seq.on_packet(packet(12, true, 96, b"C"));
        for i in 0..25 {
            seq.on_packet(packet(100 + i, false, 96, b"X"));
        }

        let lost = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(lost, 11);
        seq.stop_listening().unwrap();
    }

    #[test]
    fn drops_invalid_payload_type_when_verifying() {
        let seq = Sequencer::new(SequencerConfig::default());
        let (tx, rx) = mpsc::channel();
        seq.register_listener(Box::new(move |event| {
            if let Event::InvalidPacket(summary) = event {
                tx.send(summary.sequence_number).unwrap();
            }
        }));
        seq.start_listening().unwrap();
        seq.on_packet(packet(10, false, 96, b"A"));
        seq.on_packet(packet(11, false, 97, b"B"));
        seq.on_packet(packet(12, true, 96, b"C"));

        let invalid_seq = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(invalid_seq, 11);

        for _ in 0..1000 {
            if seq.marker_count() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let frames = drain_frames(&seq);
        assert_eq!(frames, vec![b"AC".to_vec()]);
        seq.stop_listening().unwrap();
    }

    #[test]
    fn skips_verification_when_disabled() {
        let config = SequencerConfig {
            verify_payload_type: false,
            ..SequencerConfig::default()
        };
        let seq = Sequencer::new(config);
        seq.start_listening().unwrap();
        seq.on_packet(packet(10, false, 96, b"A"));
        seq.on_packet(packet(11, false, 97, b"B"));
        seq.on_packet(packet(12, true, 96, b"C"));

        for _ in 0..1000 {
            if seq.marker_count() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let frames = drain_frames(&seq);
        assert_eq!(frames, vec![b"ABC".to_vec()]);
        seq.stop_listening().unwrap();
    }

    #[test]
    fn wraps_sequence_numbers_modulo_2_16() {
        let seq = Sequencer::new(SequencerConfig::default());
        seq.start_listening().unwrap();
        seq.on_packet(packet(65534, false, 96, b"A"));
        seq.on_packet(packet(65535, false, 96, b"B"));
        seq.on_packet(packet(0, true, 96, b"C"));

        for _ in 0..1000 {
            if seq.marker_count() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let frames = drain_frames(&seq);
        assert_eq!(frames, vec![b"ABC".to_vec()]);
        assert_eq!(seq.state().expected_seq, 1);
        seq.stop_listening().unwrap();
    }

    #[test]
    fn stop_listening_twice_is_an_error() {
        let seq = Sequencer::new(SequencerConfig::default());
        seq.start_listening().unwrap();
        seq.stop_listening().unwrap();
        assert!(seq.stop_listening().is_err());
    }
}
