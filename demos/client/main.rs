// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A thin CLI that opens a `udp://` RTP endpoint and prints frame sizes
//! and loss counters as they arrive, standing in for a GUI recording
//! application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use rtp_sequencer::{Event, Listener};
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opts {
    /// `udp://[bind_ip]@[join_ip][:port]`, e.g. `udp://@239.1.1.1:5004`.
    #[structopt(long)]
    url: String,
}

fn init_logging() {
    let logger = simplelog::TermLogger::new(
        std::env::var("RTP_SEQUENCER_LOG")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(simplelog::LevelFilter::Info),
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![logger]).ok();
}

fn main() {
    init_logging();
    if let Err(e) = main_inner() {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
    info!("Done");
}

fn main_inner() -> Result<()> {
    let opts = Opts::from_args();
    let listener = Listener::open(&opts.url).with_context(|| format!("opening {}", opts.url))?;

    let lost = Arc::new(AtomicU64::new(0));
    {
        let lost = Arc::clone(&lost);
        listener.register_listener(Box::new(move |event| {
            if let Event::PacketLoss(seq) = event {
                let total = lost.fetch_add(1, Ordering::Relaxed) + 1;
                info!("packet loss at sequence {:#06x} (total lost: {})", seq, total);
            }
        }));
    }

    info!("listening on {}", listener.local_addr());
    loop {
        match listener.next_frame() {
            Some(frame) => info!("frame: {} bytes", frame.len()),
            None => std::thread::sleep(std::time::Duration::from_millis(10)),
        }
    }
}
