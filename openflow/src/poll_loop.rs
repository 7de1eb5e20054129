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

//! Cooperative poll loop.
//!
//! A single-threaded event loop runs each of its components, lets every
//! component register the events it wants to wake up for, and then blocks in
//! `poll(2)` until one of them fires.  Registrations accumulate in
//! thread-local state and are consumed by [`block`].

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

thread_local! {
    static LOOP: RefCell<PollLoop> = RefCell::new(PollLoop::default());
}

#[derive(Default)]
struct PollLoop {
    fds: Vec<libc::pollfd>,
    deadline: Option<Instant>,
    immediate: bool,
}

/// Wakes up when `fd` becomes ready for any of `events` (`POLLIN`,
/// `POLLOUT`, ...).
pub fn fd_wait(fd: RawFd, events: libc::c_short) {
    LOOP.with(|l| {
        l.borrow_mut().fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        })
    });
}

pub fn timer_wait(duration: Duration) {
    timer_wait_until(Instant::now() + duration);
}

pub fn timer_wait_until(when: Instant) {
    LOOP.with(|l| {
        let mut l = l.borrow_mut();
        l.deadline = Some(match l.deadline {
            Some(deadline) => deadline.min(when),
            None => when,
        });
    });
}

/// Causes the next [`block`] to return without sleeping.
pub fn immediate_wake() {
    LOOP.with(|l| l.borrow_mut().immediate = true);
}

/// Blocks until a registered event fires, then clears all registrations.
/// With nothing registered, returns immediately rather than sleeping
/// forever.
pub fn block() {
    let (mut fds, deadline, immediate) = LOOP.with(|l| {
        let mut l = l.borrow_mut();
        (
            std::mem::take(&mut l.fds),
            l.deadline.take(),
            std::mem::replace(&mut l.immediate, false),
        )
    });

    let timeout_ms: libc::c_int = if immediate {
        0
    } else {
        match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .as_millis()
                .min(libc::c_int::MAX as u128) as libc::c_int,
            None if fds.is_empty() => 0,
            None => -1,
        }
    };

    unsafe {
        libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expires() {
        let start = Instant::now();
        timer_wait(Duration::from_millis(20));
        block();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn immediate_wake_overrides_timer() {
        timer_wait(Duration::from_secs(60));
        immediate_wake();
        let start = Instant::now();
        block();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
