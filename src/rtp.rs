// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP packet parsing; see [RFC 3550](https://datatracker.ietf.org/doc/html/rfc3550).
//!
//! Decoding is bit-exact per the fixed header layout in section 5.1 of the
//! RFC. Header extensions are not supported: a packet with the extension
//! bit set is rejected rather than silently misparsed.

use std::net::SocketAddr;
use std::ops::Range;

use bytes::Bytes;
use pretty_hex::PrettyHex;

use crate::datagram::Datagram;
use crate::error::Error;

/// Fixed (non-CSRC) header length in bytes.
const FIXED_HEADER_LEN: usize = 12;
const CSRC_ENTRY_LEN: usize = 4;

/// A parsed RTP packet: the fixed header fields plus a zero-copy view onto
/// the payload within the original datagram.
#[derive(Clone)]
pub struct RtpPacket {
    pub remote: SocketAddr,
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub payload_offset: usize,
    pub payload_length: usize,
    data: Bytes,
}

impl RtpPacket {
    /// Zero-copy view of the payload bytes.
    #[inline]
    pub fn payload(&self) -> Bytes {
        self.data
            .slice(self.payload_offset..self.payload_offset + self.payload_length)
    }

    /// The full datagram this packet was parsed from, including the header.
    #[inline]
    pub fn datagram(&self) -> &Bytes {
        &self.data
    }
}

impl std::fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpPacket")
            .field("remote", &self.remote)
            .field("marker", &self.marker)
            .field("payload_type", &self.payload_type)
            .field("sequence_number", &self.sequence_number)
            .field("timestamp", &self.timestamp)
            .field("ssrc", &self.ssrc)
            .field("csrc", &self.csrc)
            .field("payload", &self.payload().hex_dump())
            .finish()
    }
}

/// Computes the byte range of `needle` within `haystack`, if `needle` is a
/// subslice of it. Used to turn the payload slice returned while parsing
/// into indices that survive past the parse call.
fn as_range(haystack: &[u8], needle: &[u8]) -> Option<Range<usize>> {
    let haystack_start = haystack.as_ptr() as usize;
    let needle_start = needle.as_ptr() as usize;
    if needle_start < haystack_start {
        return None;
    }
    let start = needle_start - haystack_start;
    let end = start + needle.len();
    if end > haystack.len() {
        return None;
    }
    Some(start..end)
}

/// A failed parse, still holding the offending [`Datagram`] so the caller
/// can raise an `invalid_data` event with it (see
/// [`crate::sequencer::Sequencer::on_datagram`]).
#[derive(Debug)]
pub struct ParseError {
    pub error: Error,
    pub datagram: Datagram,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Validates the fixed header of `bytes`, returning the fields needed to
/// build an [`RtpPacket`] once the caller has decided to consume the
/// datagram. Kept separate from [`parse`] so validation can run against a
/// borrow before anything is moved.
fn validate(bytes: &[u8]) -> Result<(), Error> {
    let len = bytes.len();
    if len < FIXED_HEADER_LEN {
        return Err(Error::InvalidHeader {
            len,
            description: format!("datagram shorter than fixed header ({} bytes)", len),
        });
    }

    let first = bytes[0];
    let version = first >> 6;
    let extension = (first >> 4) & 0b1 == 1;
    // Bits 3-0: the correct mask is 0x0F. A mask such as 0x1F (as seen in
    // one buggy source variant) would bleed into the extension bit.
    let csrc_count = first & 0x0F;

    if version != 2 {
        return Err(Error::InvalidHeader {
            len,
            description: format!("unsupported RTP version {}", version),
        });
    }
    if extension {
        return Err(Error::InvalidHeader {
            len,
            description: "header extensions are not supported".into(),
        });
    }

    let payload_offset = FIXED_HEADER_LEN + CSRC_ENTRY_LEN * usize::from(csrc_count);
    if payload_offset > len {
        return Err(Error::InvalidHeader {
            len,
            description: format!(
                "csrc_count {} implies header of {} bytes, datagram is {} bytes",
                csrc_count, payload_offset, len
            ),
        });
    }
    Ok(())
}

/// Parses a received [`Datagram`] as an RTP packet.
///
/// On failure, the datagram is returned inside [`ParseError`] so the caller
/// can still raise an `invalid_data` event with it.
pub fn parse(datagram: Datagram) -> Result<RtpPacket, ParseError> {
    if let Err(error) = validate(datagram.bytes()) {
        return Err(ParseError { error, datagram });
    }

    let remote = datagram.remote();
    let data = datagram.into_bytes();

    let first = data[0];
    let version = first >> 6;
    let padding = (first >> 5) & 0b1 == 1;
    let extension = (first >> 4) & 0b1 == 1;
    let csrc_count = first & 0x0F;

    let second = data[1];
    let marker = second >> 7 == 1;
    let payload_type = second & 0x7F;
    let sequence_number = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let mut csrc = Vec::with_capacity(usize::from(csrc_count));
    for i in 0..usize::from(csrc_count) {
        let off = FIXED_HEADER_LEN + i * CSRC_ENTRY_LEN;
        csrc.push(u32::from_be_bytes([
            data[off],
            data[off + 1],
            data[off + 2],
            data[off + 3],
        ]));
    }

    let payload_offset = FIXED_HEADER_LEN + CSRC_ENTRY_LEN * usize::from(csrc_count);
    let payload_length = data.len() - payload_offset;
    // Sanity check mirroring the invariant in the data model: the payload
    // slice we computed must really land inside `data`.
    debug_assert_eq!(
        as_range(&data, &data[payload_offset..]),
        Some(payload_offset..data.len())
    );

    Ok(RtpPacket {
        remote,
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        csrc,
        payload_offset,
        payload_length,
        data,
    })
}
