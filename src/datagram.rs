// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The raw unit of I/O: a received UDP datagram and its remote endpoint.

use std::net::SocketAddr;

use bytes::Bytes;

/// A captured UDP packet, owned until it's handed to the parser.
///
/// `buf` may be larger than `size` — receive buffers are reused at a fixed
/// [`crate::socket::SocketConfig::buffer_size`] capacity, and only the
/// leading `size` bytes were actually filled by the kernel.
#[derive(Debug, Clone)]
pub struct Datagram {
    buf: Vec<u8>,
    size: usize,
    remote: SocketAddr,
}

impl Datagram {
    pub fn new(buf: Vec<u8>, size: usize, remote: SocketAddr) -> Self {
        assert!(size <= buf.len(), "datagram size exceeds buffer capacity");
        Self { buf, size, remote }
    }

    /// The bytes actually received, excluding any unused buffer tail.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Consumes the datagram, yielding its payload as a zero-copy [`Bytes`]
    /// handle truncated to the bytes actually received.
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.truncate(self.size);
        Bytes::from(self.buf)
    }
}
