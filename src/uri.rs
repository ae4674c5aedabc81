// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component E: parsing the `udp://[bind_ip]@[join_ip][:port]` URI scheme
//! accepted by [`crate::listener::Listener::open`].
//!
//! This is a thin, purpose-built surface, not a general URI library: it
//! borrows the `url` crate's generic parser and then layers the
//! scheme-specific defaulting and multicast-detection rules on top.

use std::net::Ipv4Addr;

use url::Url;

use crate::error::Error;

/// Default port used when the URI omits one.
pub const DEFAULT_PORT: u16 = 1234;

/// A parsed `udp://` endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpUri {
    pub bind_ip: Ipv4Addr,
    pub join_ip: Ipv4Addr,
    pub port: u16,
}

impl UdpUri {
    /// True when `join_ip` falls in `224.0.0.0/4` and so should be
    /// auto-joined as a multicast group.
    pub fn is_multicast(&self) -> bool {
        let first_octet = self.join_ip.octets()[0];
        first_octet & 0xE0 == 0xE0
    }
}

/// Parses `udp://[bind_ip]@[join_ip][:port]`.
///
/// `bind_ip` and `join_ip` each default to `0.0.0.0` (`ANY`) when omitted;
/// `port` defaults to [`DEFAULT_PORT`]. The scheme must be `udp`.
pub fn parse(uri: &str) -> Result<UdpUri, Error> {
    let url = Url::parse(uri).map_err(|e| Error::InvalidArgument(format!("malformed URI: {}", e)))?;

    if url.scheme() != "udp" {
        return Err(Error::InvalidArgument(format!(
            "unsupported scheme {:?}, expected \"udp\"",
            url.scheme()
        )));
    }

    let bind_ip = match url.username() {
        "" => Ipv4Addr::UNSPECIFIED,
        s => parse_ipv4(s)?,
    };

    let join_ip = match url.host_str() {
        None | Some("") => Ipv4Addr::UNSPECIFIED,
        Some(s) => parse_ipv4(s)?,
    };

    let port = url.port().unwrap_or(DEFAULT_PORT);

    Ok(UdpUri {
        bind_ip,
        join_ip,
        port,
    })
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr, Error> {
    s.parse()
        .map_err(|_| Error::InvalidArgument(format!("not an IPv4 address: {:?}", s)))
}
