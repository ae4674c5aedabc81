// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level façade tying the datagram source, parser, sequencing engine,
//! and frame/stream consumer surfaces into one handle.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::info;

use crate::error::Error;
use crate::events::Listener as EventListener;
use crate::frame;
use crate::sequencer::{ListenerState, Sequencer, SequencerConfig};
use crate::socket::{DatagramSource, SocketConfig};
use crate::stream::{FrameStream, StreamConfig};
use crate::uri;

/// Construction-time configuration, mirroring the defaults in section 6:
/// `verify_payload_type = true`, `max_buffered = 25`, `buffer_size = 1400`,
/// `receive_buffer = 1400 * 1024`.
#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    pub verify_payload_type: bool,
    pub max_buffered: usize,
    pub buffer_size: usize,
    pub receive_buffer: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            verify_payload_type: true,
            max_buffered: 25,
            buffer_size: 1400,
            receive_buffer: 1400 * 1024,
        }
    }
}

/// A bound, running (once started) RTP listener: receives datagrams,
/// sequences them, and exposes both the discrete frame API and a
/// streaming byte view.
pub struct Listener {
    source: DatagramSource,
    sequencer: Arc<Sequencer>,
    stream: Arc<FrameStream>,
}

impl Listener {
    /// Binds a UDP endpoint and constructs the sequencing engine, but does
    /// not start receiving; call [`Self::start_listening`] for that.
    pub fn bind(local_addr: SocketAddr, config: ListenerConfig) -> Result<Self, Error> {
        let source = DatagramSource::with_config(
            local_addr,
            SocketConfig {
                buffer_size: config.buffer_size,
                receive_buffer: config.receive_buffer,
            },
        )?;
        let sequencer = Sequencer::new(SequencerConfig {
            verify_payload_type: config.verify_payload_type,
            max_buffered: config.max_buffered,
        });
        let stream = Arc::new(FrameStream::new(Arc::clone(&sequencer), StreamConfig::default()));
        Ok(Self {
            source,
            sequencer,
            stream,
        })
    }

    /// Resolves a `udp://[bind_ip]@[join_ip][:port]` URI (see
    /// [`crate::uri`]), binds, starts receiving, and joins the multicast
    /// group implied by `join_ip` if one is present.
    pub fn open(endpoint: &str) -> Result<Self, Error> {
        let parsed = uri::parse(endpoint)?;
        let local_addr = SocketAddr::new(IpAddr::V4(parsed.bind_ip), parsed.port);
        let listener = Self::bind(local_addr, ListenerConfig::default())?;
        listener.start_listening()?;
        if parsed.is_multicast() {
            listener
                .source
                .join_multicast(IpAddr::V4(parsed.join_ip), None)?;
        }
        info!(
            "listener opened {} (bind={} join={} multicast={})",
            endpoint, local_addr, parsed.join_ip, parsed.is_multicast()
        );
        Ok(listener)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.source.local_addr()
    }

    pub fn register_listener(&self, listener: EventListener) {
        self.sequencer.register_listener(listener);
    }

    pub fn start_listening(&self) -> Result<(), Error> {
        self.sequencer.start_listening()?;
        let sequencer = Arc::clone(&self.sequencer);
        self.source.start(move |datagram| sequencer.on_datagram(datagram))
    }

    pub fn stop_listening(&self) -> Result<(), Error> {
        self.source.stop()?;
        self.sequencer.stop_listening()
    }

    /// Idempotent best-effort teardown: stops the source and worker if
    /// running, swallowing `InvalidState` from a component that was
    /// already stopped.
    pub fn dispose(&self) {
        let _ = self.source.stop();
        let _ = self.sequencer.stop_listening();
    }

    pub fn state(&self) -> ListenerState {
        self.sequencer.state()
    }

    pub fn next_payload(&self) -> Option<bytes::Bytes> {
        frame::next_payload(&self.sequencer)
    }

    pub fn next_frame(&self) -> Option<bytes::Bytes> {
        frame::next_frame(&self.sequencer)
    }

    pub fn stream(&self) -> &FrameStream {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_before_start_is_a_noop() {
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            ListenerConfig::default(),
        )
        .unwrap();
        listener.dispose();
        listener.dispose();
    }

    #[test]
    fn stop_listening_before_start_is_an_error() {
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            ListenerConfig::default(),
        )
        .unwrap();
        assert!(listener.stop_listening().is_err());
    }
}
