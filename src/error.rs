// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the sequencing engine and its surrounding control surfaces.
//!
//! Per-packet problems (a malformed header, a payload-type mismatch, a
//! declared loss) are never returned as `Err` from the hot path; they are
//! reported as events (see [`crate::events`]) so the receive and sequencing
//! threads never have to propagate a `Result` across a callback boundary.
//! This type is for the control surfaces: [`crate::socket::DatagramSource`],
//! [`crate::listener::Listener`], and the streaming facade.

use thiserror::Error;

/// Errors surfaced to callers of the control-path API.
#[derive(Debug, Error)]
pub enum Error {
    /// The RTP fixed header was malformed or used an unsupported feature
    /// (wrong version, header extension present, or truncated datagram).
    #[error("invalid RTP header in {len}-byte datagram: {description}")]
    InvalidHeader { len: usize, description: String },

    /// A URI, endpoint, or multicast address was malformed or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted in a state that doesn't allow it (e.g.
    /// `start_listening` while already running, or `stop_listening` while
    /// not running).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The streaming facade doesn't support this operation.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A lower-level OS error (bind, socket option, join).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
