// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component D (streaming surface): an auto-flushing readable byte view
//! over the sequencing engine, backed by
//! [`crate::sequencer::Sequencer::blocking_next_frame`].
//!
//! There is no read timeout: a `read` call blocks until enough bytes are
//! available, or forever if the stream stalls. The original carried a
//! documented-but-unimplemented 1000ms timeout; this is an explicit choice
//! to specify an infinite wait rather than leave that gap unresolved.

use std::sync::{Arc, Mutex};

use bytes::BytesMut;

use crate::error::Error;
use crate::sequencer::Sequencer;

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub auto_flush: bool,
    pub auto_flush_threshold: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_flush: true,
            auto_flush_threshold: 1400 * 1024 * 15,
        }
    }
}

struct StreamState {
    data: BytesMut,
    read_position: usize,
}

/// A readable, non-seekable, non-writable byte stream over a
/// [`Sequencer`]'s frames. `can_read` is always `true`; `can_seek` and
/// `can_write` are always `false`.
pub struct FrameStream {
    sequencer: Arc<Sequencer>,
    config: StreamConfig,
    state: Mutex<StreamState>,
}

impl FrameStream {
    pub fn new(sequencer: Arc<Sequencer>, config: StreamConfig) -> Self {
        Self {
            sequencer,
            config,
            state: Mutex::new(StreamState {
                data: BytesMut::new(),
                read_position: 0,
            }),
        }
    }

    pub fn can_read(&self) -> bool {
        true
    }

    pub fn can_seek(&self) -> bool {
        false
    }

    pub fn can_write(&self) -> bool {
        false
    }

    /// Blocks until `count` bytes are available and copies them into
    /// `dst[offset..offset + count]`. Never returns a partial read.
    pub fn read(&self, dst: &mut [u8], offset: usize, count: usize) -> Result<usize, Error> {
        let mut guard = self.state.lock().unwrap();

        if self.config.auto_flush && guard.data.len() > self.config.auto_flush_threshold {
            flush_locked(&mut guard);
        }

        loop {
            let available = guard.data.len() - guard.read_position;
            if available >= count {
                break;
            }
            // Release the state lock while pulling the next frame:
            // `blocking_next_frame` does its own check-then-wait under the
            // sequencer's lock in one critical section, so no notification
            // can land in the gap the way it would if we checked here and
            // waited separately.
            drop(guard);
            let frame = self.sequencer.blocking_next_frame();
            guard = self.state.lock().unwrap();
            guard.data.extend_from_slice(&frame);
        }

        let start = guard.read_position;
        dst[offset..offset + count].copy_from_slice(&guard.data[start..start + count]);
        guard.read_position += count;
        Ok(count)
    }

    /// Discards the already-read prefix of the internal buffer.
    pub fn flush(&self) {
        let mut guard = self.state.lock().unwrap();
        flush_locked(&mut guard);
    }

    pub fn seek(&self, _position: u64) -> Result<u64, Error> {
        Err(Error::NotSupported("seek"))
    }

    pub fn set_length(&self, _length: u64) -> Result<(), Error> {
        Err(Error::NotSupported("set_length"))
    }

    pub fn write(&self, _src: &[u8]) -> Result<usize, Error> {
        Err(Error::NotSupported("write"))
    }

    pub fn length(&self) -> Result<u64, Error> {
        Err(Error::NotSupported("length"))
    }

    pub fn position(&self) -> Result<u64, Error> {
        Err(Error::NotSupported("position"))
    }
}

fn flush_locked(state: &mut StreamState) {
    let _ = state.data.split_to(state.read_position);
    state.read_position = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::Datagram;
    use crate::rtp;
    use crate::sequencer::SequencerConfig;
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
    fn read_blocks_until_a_frame_is_available() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        let stream = Arc::new(FrameStream::new(Arc::clone(&sequencer), StreamConfig::default()));

        let reader = {
            let stream = Arc::clone(&stream);
            std::thread::spawn(move || {
                let mut buf = [0u8; 3];
                stream.read(&mut buf, 0, 3).unwrap();
                buf
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        sequencer.with_seq_queue(|queue, marker_count| {
            queue.push_back(packet(10, false, b"A"));
            queue.push_back(packet(11, false, b"B"));
            queue.push_back(packet(12, true, b"C"));
            *marker_count = 1;
        });
        sequencer.seq_condvar.notify_all();

        let result = reader.join().unwrap();
        assert_eq!(&result, b"ABC");
    }

    #[test]
    fn flush_discards_consumed_prefix() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        sequencer.with_seq_queue(|queue, marker_count| {
            queue.push_back(packet(10, true, b"AB"));
            *marker_count = 1;
        });
        let stream = FrameStream::new(sequencer, StreamConfig::default());
        let mut buf = [0u8; 1];
        stream.read(&mut buf, 0, 1).unwrap();
        assert_eq!(&buf, b"A");
        stream.flush();
        let mut buf2 = [0u8; 1];
        stream.read(&mut buf2, 0, 1).unwrap();
        assert_eq!(&buf2, b"B");
    }

    #[test]
    fn unsupported_operations_fail() {
        let sequencer = Sequencer::new(SequencerConfig::default());
        let stream = FrameStream::new(sequencer, StreamConfig::default());
        assert!(stream.seek(0).is_err());
        assert!(stream.set_length(0).is_err());
        assert!(stream.write(b"x").is_err());
        assert!(stream.length().is_err());
        assert!(stream.position().is_err());
    }
}
