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

//! Token-bucket rate limiting for log messages.

use std::time::{Duration, Instant};

/// Allows up to `burst` messages per `interval`, refilling one token every
/// `interval / burst`.
pub struct RateLimit {
    burst: u32,
    interval: Duration,
    tokens: u32,
    last_fill: Instant,
    dropped: u64,
}

impl RateLimit {
    pub fn new(burst: u32, interval: Duration) -> RateLimit {
        RateLimit {
            burst: burst.max(1),
            interval,
            tokens: burst.max(1),
            last_fill: Instant::now(),
            dropped: 0,
        }
    }

    /// Returns true if the caller should skip logging this message.
    pub fn should_drop(&mut self) -> bool {
        let now = Instant::now();
        if self.tokens == self.burst {
            self.last_fill = now;
        } else {
            let period = self.interval / self.burst;
            if !period.is_zero() {
                while self.tokens < self.burst
                    && now.duration_since(self.last_fill) >= period
                {
                    self.last_fill += period;
                    self.tokens += 1;
                }
            } else {
                self.tokens = self.burst;
            }
        }
        if self.tokens == 0 {
            self.dropped += 1;
            true
        } else {
            self.tokens -= 1;
            false
        }
    }

    /// Messages suppressed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
