// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delimiter framing for the serial byte stream.
//!
//! The serial protocol has no length prefix: a packet is a run of bytes
//! terminated by a single delimiter byte. A packet whose delimiter never
//! arrives is cut off once it has been assembling for longer than the
//! configured timeout, so a lost delimiter costs one truncated packet
//! instead of stalling the stream.
//!
//! The framer never blocks and never reads a clock on its own; callers pass
//! the arrival instant with every chunk and call [`Framer::poll`] while idle
//! so that an expired packet is emitted even when no further byte arrives.

use crate::queue::Packet;
use std::time::{Duration, Instant};

/// Default packet delimiter.
pub const DEFAULT_DELIMITER: u8 = b'*';

/// Default packet assembly timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Splits a serial byte stream into packets.
#[derive(Debug)]
pub struct Framer {
    delimiter: u8,
    timeout: Duration,
    state: Option<FramingState>,
}

/// The packet currently being assembled.
///
/// Only exists while at least one payload byte has been buffered.
#[derive(Debug)]
struct FramingState {
    buffer: Vec<u8>,
    started: Instant,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_TIMEOUT)
    }
}

impl Framer {
    /// Create a framer for the given delimiter byte and assembly timeout.
    pub fn new(delimiter: u8, timeout: Duration) -> Self {
        Self {
            delimiter,
            timeout,
            state: None,
        }
    }

    /// Delimiter byte.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Packet assembly timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the assembly timeout. Applies to the packet in progress too.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Number of bytes buffered for the packet in progress.
    pub fn pending(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.buffer.len())
    }

    /// Instant at which the packet in progress times out, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.as_ref().map(|s| s.started + self.timeout)
    }

    /// Feed a chunk of bytes that arrived at `now`.
    ///
    /// Returns the packets completed by this chunk, oldest first. A packet
    /// that had already expired is emitted before the new bytes are
    /// consumed, and the first new byte starts a fresh packet.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<Packet> {
        let mut packets = Vec::new();

        for &byte in data {
            packets.extend(self.poll(now));

            if byte == self.delimiter {
                match self.state.take() {
                    Some(state) => packets.push(decode(state.buffer)),
                    None => tracing::trace!("Discarding lone delimiter"),
                }
            } else {
                self.state
                    .get_or_insert_with(|| FramingState {
                        buffer: Vec::new(),
                        started: now,
                    })
                    .buffer
                    .push(byte);
            }
        }

        packets
    }

    /// Emit the packet in progress if its timeout has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Packet> {
        let expired = match &self.state {
            Some(state) => now.saturating_duration_since(state.started) >= self.timeout,
            None => false,
        };
        if !expired {
            return None;
        }

        let state = self.state.take()?;
        tracing::debug!(
            "Serial packet timed out after {:?} with {} bytes",
            self.timeout,
            state.buffer.len()
        );
        Some(decode(state.buffer))
    }

    /// Emit whatever is buffered, regardless of the timeout.
    pub fn flush(&mut self) -> Option<Packet> {
        self.state.take().map(|s| decode(s.buffer))
    }
}

fn decode(bytes: Vec<u8>) -> Packet {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
