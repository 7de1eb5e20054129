/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! A reliable connection to an OpenFlow switch.
//!
//! An `Rconn` keeps trying to connect to its target, with exponential
//! backoff, and reconnects after the connection drops.  Messages queue in
//! call order and go out FIFO once the connection is up; inbound bytes are
//! reframed into whole messages by header length.  The connection sequence
//! number increments on every successful connection, which is how a caller
//! that holds state about the peer notices that the peer has forgotten it.

use crate::msgs::{self, Header, OFPT_HELLO, OFP_HEADER_LEN};
use crate::poll_loop;
use crate::protocol::{Version, Versions};

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub const DSCP_DEFAULT: u8 = 0;

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const RX_CHUNK: usize = 4096;

enum ConnState {
    /// No target, or disconnected on purpose.
    Void,
    /// Waiting to (re)try connecting.
    Backoff { retry_at: Instant },
    /// Connected.
    Active { stream: UnixStream },
}

pub struct Rconn {
    name: String,
    target: String,
    probe_interval: i32,
    max_backoff: Duration,
    backoff: Duration,
    dscp: u8,
    versions: Versions,
    state: ConnState,
    seqno: u64,
    txq: VecDeque<Vec<u8>>,
    tx_offset: usize,
    rxbuf: Vec<u8>,
    rxq: VecDeque<Vec<u8>>,
    last_activity: Instant,
    probe_sent: bool,
}

impl Rconn {
    /// Creates a new, unconnected `Rconn`.
    ///
    /// `probe_interval` is the idle time in seconds after which an echo
    /// request probes the connection (0 disables probing); `max_backoff`
    /// caps the reconnection delay in seconds (0 means the 8 s default).
    /// `dscp` is retained for API parity; a Unix socket carries no DSCP.
    pub fn new(probe_interval: i32, max_backoff: i32, dscp: u8, versions: Versions) -> Rconn {
        let max_backoff = if max_backoff > 0 {
            Duration::from_secs(max_backoff as u64)
        } else {
            Duration::from_secs(8)
        };
        Rconn {
            name: String::new(),
            target: String::new(),
            probe_interval,
            max_backoff,
            backoff: BACKOFF_MIN,
            dscp,
            versions,
            state: ConnState::Void,
            seqno: 0,
            txq: VecDeque::new(),
            tx_offset: 0,
            rxbuf: Vec::new(),
            rxq: VecDeque::new(),
            last_activity: Instant::now(),
            probe_sent: false,
        }
    }

    pub fn dscp(&self) -> u8 {
        self.dscp
    }
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
    pub fn probe_interval(&self) -> i32 {
        self.probe_interval
    }
    pub fn versions(&self) -> Versions {
        self.versions
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Starts connecting to `target`, of the form `unix:<path>`.  Drops any
    /// current connection first.  `name` is used in log messages and
    /// defaults to the target.
    pub fn connect(&mut self, target: &str, name: Option<&str>) {
        self.disconnect();
        self.target = target.to_string();
        self.name = name.unwrap_or(target).to_string();
        self.backoff = BACKOFF_MIN;
        self.state = ConnState::Backoff {
            retry_at: Instant::now(),
        };
    }

    pub fn disconnect(&mut self) {
        if matches!(self.state, ConnState::Active { .. }) {
            info!("{}: disconnecting", self.name);
        }
        self.state = ConnState::Void;
        self.txq.clear();
        self.tx_offset = 0;
        self.rxbuf.clear();
        self.rxq.clear();
    }

    pub fn connected(&self) -> bool {
        matches!(self.state, ConnState::Active { .. })
    }

    pub fn connection_seqno(&self) -> u64 {
        self.seqno
    }

    /// Number of queued messages not yet handed to the kernel.
    pub fn txqlen(&self) -> usize {
        self.txq.len()
    }

    /// Performs connection maintenance: connects or reconnects when due,
    /// flushes the transmit queue, reads and reframes inbound messages.
    pub fn run(&mut self) {
        match &self.state {
            ConnState::Void => (),
            ConnState::Backoff { retry_at } => {
                let retry_at = *retry_at;
                if Instant::now() >= retry_at {
                    self.try_connect();
                }
            }
            ConnState::Active { .. } => {
                if let Err(error) = self.service_active() {
                    warn!("{}: connection dropped ({})", self.name, error);
                    self.schedule_retry();
                }
                self.run_probe();
            }
        }
    }

    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.rxq.pop_front()
    }

    /// Queues `msg` for transmission, trying to flush immediately.  Fails
    /// when the connection is down; the message is dropped in that case,
    /// the same way a lost connection drops it.
    pub fn send(&mut self, msg: Vec<u8>) -> io::Result<()> {
        if !self.connected() {
            return Err(io::Error::from(ErrorKind::NotConnected));
        }
        self.txq.push_back(msg);
        if let Err(error) = self.flush() {
            warn!("{}: send failed ({})", self.name, error);
            self.schedule_retry();
        }
        Ok(())
    }

    /// Registers a wakeup for connection maintenance.
    pub fn run_wait(&self) {
        match &self.state {
            ConnState::Void => (),
            ConnState::Backoff { retry_at } => poll_loop::timer_wait_until(*retry_at),
            ConnState::Active { stream } => {
                if !self.txq.is_empty() {
                    poll_loop::fd_wait(stream.as_raw_fd(), libc::POLLOUT);
                }
                if self.probe_interval > 0 {
                    let idle = Duration::from_secs(self.probe_interval as u64);
                    poll_loop::timer_wait_until(self.last_activity + idle);
                }
            }
        }
    }

    /// Registers a wakeup for inbound data.
    pub fn recv_wait(&self) {
        if !self.rxq.is_empty() {
            poll_loop::immediate_wake();
        } else if let ConnState::Active { stream } = &self.state {
            poll_loop::fd_wait(stream.as_raw_fd(), libc::POLLIN);
        }
    }

    fn try_connect(&mut self) {
        let path = match self.target.strip_prefix("unix:") {
            Some(path) => path,
            None => {
                warn!("{}: unsupported connection target", self.target);
                self.state = ConnState::Void;
                return;
            }
        };
        match UnixStream::connect(path).and_then(|stream| {
            stream.set_nonblocking(true)?;
            Ok(stream)
        }) {
            Ok(stream) => {
                info!("{}: connected", self.name);
                self.state = ConnState::Active { stream };
                self.seqno += 1;
                self.backoff = BACKOFF_MIN;
                self.last_activity = Instant::now();
                self.probe_sent = false;
                let version = self.versions.max_version().unwrap_or(Version::OFP13);
                self.txq.push_back(msgs::encode_hello(version.as_wire()));
                if let Err(error) = self.flush() {
                    warn!("{}: send failed ({})", self.name, error);
                    self.schedule_retry();
                }
            }
            Err(error) => {
                debug!(
                    "{}: connection failed ({}), retrying in {:?}",
                    self.name, error, self.backoff
                );
                self.state = ConnState::Backoff {
                    retry_at: Instant::now() + self.backoff,
                };
                self.backoff = (self.backoff * 2).min(self.max_backoff);
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.state = ConnState::Backoff {
            retry_at: Instant::now() + self.backoff,
        };
        self.backoff = (self.backoff * 2).min(self.max_backoff);
        self.txq.clear();
        self.tx_offset = 0;
        self.rxbuf.clear();
    }

    /// Writes out as much of the transmit queue as the socket accepts.
    fn flush(&mut self) -> io::Result<()> {
        let stream = match &mut self.state {
            ConnState::Active { stream } => stream,
            _ => return Ok(()),
        };
        while let Some(msg) = self.txq.front() {
            match stream.write(&msg[self.tx_offset..]) {
                Ok(n) => {
                    self.tx_offset += n;
                    if self.tx_offset == msg.len() {
                        self.txq.pop_front();
                        self.tx_offset = 0;
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn service_active(&mut self) -> io::Result<()> {
        self.flush()?;

        let stream = match &mut self.state {
            ConnState::Active { stream } => stream,
            _ => return Ok(()),
        };
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(io::Error::from(ErrorKind::ConnectionReset)),
                Ok(n) => {
                    self.rxbuf.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                    self.probe_sent = false;
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }

        while let Ok(header) = Header::decode(&self.rxbuf) {
            let length = (header.length as usize).max(OFP_HEADER_LEN);
            if self.rxbuf.len() < length {
                break;
            }
            let rest = self.rxbuf.split_off(length);
            let msg = std::mem::replace(&mut self.rxbuf, rest);
            if header.type_ == OFPT_HELLO {
                // Version handshake is handled here, not by the caller.
                debug!("{}: hello from peer, version 0x{:02x}", self.name, msg[0]);
            } else {
                self.rxq.push_back(msg);
            }
        }
        Ok(())
    }

    fn run_probe(&mut self) {
        if self.probe_interval <= 0 || !self.connected() {
            return;
        }
        let idle = Duration::from_secs(self.probe_interval as u64);
        if self.last_activity.elapsed() < idle {
            return;
        }
        if !self.probe_sent {
            debug!("{}: idle {:?}, sending inactivity probe", self.name, idle);
            self.probe_sent = true;
            self.last_activity = Instant::now();
            let _ = self.send(msgs::encode_echo_request());
        } else {
            warn!("{}: no response to inactivity probe, disconnecting", self.name);
            self.schedule_retry();
        }
    }
}
