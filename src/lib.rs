// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP-over-UDP packet sequencing and frame reassembly.
//!
//! See [`listener::Listener`] for the main entry point: it binds a UDP
//! endpoint (or parses a `udp://` URI via [`uri`]), sequences incoming RTP
//! packets by sequence number, and exposes the result as discrete frames
//! ([`frame`]) or a streaming byte view ([`stream`]).

pub mod datagram;
pub mod error;
pub mod events;
pub mod frame;
pub mod listener;
pub mod rtp;
pub mod sequencer;
pub mod socket;
pub mod stream;
pub mod uri;

pub use error::{Error, Result};
pub use events::{Event, Listener as EventListener};
pub use listener::{Listener, ListenerConfig};
pub use rtp::RtpPacket;
pub use sequencer::{ListenerState, Sequencer, SequencerConfig};
pub use stream::{FrameStream, StreamConfig};
