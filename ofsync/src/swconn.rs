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

use openflow::rconn::Rconn;

use std::io;

/// The capabilities the engine needs from its connection to the switch.
///
/// The production implementation is [`Rconn`]; tests substitute a scripted
/// mock.  Whatever the implementation, it must deliver queued messages in
/// call order (FIFO) once connected, and bump the connection sequence number
/// on every new connection so the engine can tell that the switch has lost
/// its state.
pub trait SwitchLink {
    fn connect(&mut self, target: &str);
    fn disconnect(&mut self);

    /// Performs connection maintenance and I/O.  Non-blocking.
    fn run(&mut self);
    /// Registers connection-maintenance wakeups with the poll loop.
    fn run_wait(&self);

    fn recv(&mut self) -> Option<Vec<u8>>;
    /// Registers an inbound-data wakeup with the poll loop.
    fn recv_wait(&self);

    /// Queues `msg` for in-order transmission.
    fn send(&mut self, msg: Vec<u8>) -> io::Result<()>;
    /// Number of messages queued but not yet handed to the switch.
    fn in_flight(&self) -> usize;

    fn is_connected(&self) -> bool;
    fn connection_seqno(&self) -> u64;
    fn target(&self) -> &str;
}

impl SwitchLink for Rconn {
    fn connect(&mut self, target: &str) {
        Rconn::connect(self, target, None)
    }
    fn disconnect(&mut self) {
        Rconn::disconnect(self)
    }
    fn run(&mut self) {
        Rconn::run(self)
    }
    fn run_wait(&self) {
        Rconn::run_wait(self)
    }
    fn recv(&mut self) -> Option<Vec<u8>> {
        Rconn::recv(self)
    }
    fn recv_wait(&self) {
        Rconn::recv_wait(self)
    }
    fn send(&mut self, msg: Vec<u8>) -> io::Result<()> {
        Rconn::send(self, msg)
    }
    fn in_flight(&self) -> usize {
        self.txqlen()
    }
    fn is_connected(&self) -> bool {
        self.connected()
    }
    fn connection_seqno(&self) -> u64 {
        Rconn::connection_seqno(self)
    }
    fn target(&self) -> &str {
        Rconn::target(self)
    }
}
