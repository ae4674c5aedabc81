// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component A: binds a UDP endpoint and runs a background receive loop,
//! delivering each datagram to a callback.
//!
//! The receive loop is a dedicated OS thread rather than an async task: the
//! rest of the engine is built on [`std::sync::Mutex`]/[`std::sync::Condvar`]
//! (see [`crate::sequencer`]), and a blocking thread keeps the whole stack on
//! one concurrency model instead of mixing a runtime in for this one socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::datagram::Datagram;
use crate::error::Error;

/// How often the receive loop wakes up to check whether it's been told to
/// stop. Small relative to any human-observable latency, large relative to
/// the cost of the syscall.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Size of each receive buffer; large enough for one MTU-sized RTP
    /// packet. Default 1400 bytes.
    pub buffer_size: usize,
    /// Requested kernel socket receive buffer (`SO_RCVBUF`). Default
    /// `1400 * 1024`.
    pub receive_buffer: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1400,
            receive_buffer: 1400 * 1024,
        }
    }
}

struct Running {
    socket: Arc<UdpSocket>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A bound UDP endpoint that can be started, stopped, and re-started, and
/// optionally joined to multicast groups while running.
pub struct DatagramSource {
    local_addr: SocketAddr,
    config: SocketConfig,
    running: Mutex<Option<Running>>,
    ttl: Mutex<u32>,
    broadcast: Mutex<bool>,
}

impl DatagramSource {
    /// Opens a UDP socket with `SO_REUSEADDR` set and binds `local_addr`.
    /// Does not start receiving; call [`Self::start`] for that.
    pub fn bind(local_addr: SocketAddr) -> Result<Self, Error> {
        // Only used to validate bind/reuseaddr at construction time; the
        // actual receiving socket is (re-)created in `start` so that `stop`
        // can fully release the port.
        let probe = new_socket(local_addr, &SocketConfig::default())?;
        drop(probe);
        Ok(Self {
            local_addr,
            config: SocketConfig::default(),
            running: Mutex::new(None),
            ttl: Mutex::new(1),
            broadcast: Mutex::new(false),
        })
    }

    pub fn with_config(local_addr: SocketAddr, config: SocketConfig) -> Result<Self, Error> {
        let probe = new_socket(local_addr, &config)?;
        drop(probe);
        Ok(Self {
            local_addr,
            config,
            running: Mutex::new(None),
            ttl: Mutex::new(1),
            broadcast: Mutex::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn receive_buffer(&self) -> usize {
        self.config.receive_buffer
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// Begins an asynchronous receive loop. Each received datagram is
    /// delivered to `callback` exactly once. Socket errors during receive
    /// are logged and terminate the loop without retry.
    pub fn start<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(Datagram) + Send + 'static,
    {
        let mut guard = self.running.lock().unwrap();
        if guard.is_some() {
            return Err(Error::InvalidState("source is already started".into()));
        }

        let socket = new_socket(self.local_addr, &self.config)?;
        socket.set_ttl(*self.ttl.lock().unwrap())?;
        socket.set_broadcast(*self.broadcast.lock().unwrap())?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let socket = Arc::new(socket);

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let socket = Arc::clone(&socket);
            let stop = Arc::clone(&stop);
            let buffer_size = self.config.buffer_size;
            std::thread::Builder::new()
                .name("rtp-datagram-source".into())
                .spawn(move || receive_loop(socket, stop, buffer_size, callback))
                .map_err(Error::Io)?
        };

        *guard = Some(Running {
            socket,
            stop,
            thread,
        });
        debug!("datagram source started on {}", self.local_addr);
        Ok(())
    }

    /// Stops receiving and closes the socket. A subsequent [`Self::start`]
    /// re-opens it.
    pub fn stop(&self) -> Result<(), Error> {
        let running = self
            .running
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::InvalidState("source is not started".into()))?;
        running.stop.store(true, Ordering::SeqCst);
        // The receive thread wakes up within POLL_INTERVAL and exits; the
        // socket itself is dropped with `running`, releasing the port.
        let _ = running.thread.join();
        debug!("datagram source stopped on {}", self.local_addr);
        Ok(())
    }

    /// Joins a multicast group. Fails if the source is not started, or if
    /// `addr`'s address family doesn't match the bound endpoint.
    pub fn join_multicast(&self, addr: IpAddr, ttl: Option<u32>) -> Result<(), Error> {
        let guard = self.running.lock().unwrap();
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("join_multicast before start".into()))?;
        match (addr, self.local_addr.ip()) {
            (IpAddr::V4(group), IpAddr::V4(local)) => {
                // `local` is the interface to join on; passing `0.0.0.0`
                // (the bound-to-ANY case) lets the OS pick the default
                // interface, so no separate ANY-specific arm is needed.
                running.socket.join_multicast_v4(&group, &local)?;
                if let Some(ttl) = ttl {
                    running.socket.set_multicast_ttl_v4(ttl)?;
                }
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "multicast group address family does not match bound endpoint".into(),
            )),
        }
    }

    pub fn drop_multicast(&self, addr: IpAddr) -> Result<(), Error> {
        let guard = self.running.lock().unwrap();
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("drop_multicast before start".into()))?;
        match (addr, self.local_addr.ip()) {
            (IpAddr::V4(group), local) => {
                let iface = match local {
                    IpAddr::V4(v4) => v4,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                running.socket.leave_multicast_v4(&group, &iface)?;
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "multicast group address family does not match bound endpoint".into(),
            )),
        }
    }

    pub fn set_ttl(&self, ttl: u32) -> Result<(), Error> {
        *self.ttl.lock().unwrap() = ttl;
        if let Some(running) = self.running.lock().unwrap().as_ref() {
            running.socket.set_ttl(ttl)?;
        }
        Ok(())
    }

    pub fn ttl(&self) -> u32 {
        *self.ttl.lock().unwrap()
    }

    pub fn set_broadcast(&self, enabled: bool) -> Result<(), Error> {
        *self.broadcast.lock().unwrap() = enabled;
        if let Some(running) = self.running.lock().unwrap().as_ref() {
            running.socket.set_broadcast(enabled)?;
        }
        Ok(())
    }

    pub fn broadcast(&self) -> bool {
        *self.broadcast.lock().unwrap()
    }
}

fn new_socket(local_addr: SocketAddr, config: &SocketConfig) -> Result<UdpSocket, Error> {
    let domain = match local_addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(config.receive_buffer)?;
    socket.bind(&local_addr.into())?;
    Ok(socket.into())
}

fn receive_loop<F>(socket: Arc<UdpSocket>, stop: Arc<AtomicBool>, buffer_size: usize, callback: F)
where
    F: Fn(Datagram),
{
    while !stop.load(Ordering::SeqCst) {
        let mut buf = vec![0u8; buffer_size];
        match socket.recv_from(&mut buf) {
            Ok((size, remote)) => {
                let datagram = Datagram::new(buf, size, remote);
                callback(datagram);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("datagram source recv error, stopping receive loop: {}", e);
                return;
            }
        }
    }
}
