// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use rtp_sequencer::rtp;

fuzz_target!(|data: &[u8]| {
    let remote = "127.0.0.1:5004".parse().unwrap();
    let size = data.len();
    let datagram = rtp_sequencer::datagram::Datagram::new(data.to_vec(), size, remote);
    let _ = rtp::parse(datagram);
});
