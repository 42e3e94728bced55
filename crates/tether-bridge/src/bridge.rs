// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unidirectional relay between two endpoints.
//!
//! A bridge forwards every packet its producer yields to its consumer, one
//! at a time and in order, with no filtering or batching. Two bridges in
//! opposite directions make a bidirectional relay.

use crate::endpoint::Endpoint;
use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, trace};

/// Relays packets from `producer` to `consumer` until shutdown.
#[derive(Debug)]
pub struct Bridge {
    producer: Endpoint,
    consumer: Endpoint,
    stats: Arc<BridgeStats>,
}

impl Bridge {
    /// Create a bridge.
    pub fn new(producer: Endpoint, consumer: Endpoint) -> Self {
        let stats = Arc::new(BridgeStats::new(producer.name(), consumer.name()));
        Self {
            producer,
            consumer,
            stats,
        }
    }

    /// Shared statistics handle.
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Relay until `shutdown` fires.
    ///
    /// A receive interrupted by shutdown forwards nothing.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!("Bridge {} -> {} started", self.stats.from, self.stats.to);

        loop {
            let packet = tokio::select! {
                packet = self.producer.receive() => packet,
                _ = shutdown.triggered() => break,
            };

            let len = packet.len() as u64;
            trace!("{} -> {}: {:?}", self.stats.from, self.stats.to, packet);
            if self.consumer.send(packet) {
                self.stats.record_relayed(len);
            } else {
                self.stats.record_dropped();
            }
        }

        info!("Bridge {} -> {} stopped", self.stats.from, self.stats.to);
    }

    /// Run on a new task.
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Statistics for one bridge direction.
#[derive(Debug)]
pub struct BridgeStats {
    /// Producer label.
    pub from: String,

    /// Consumer label.
    pub to: String,

    /// Packets handed to the consumer.
    pub packets_relayed: AtomicU64,

    /// Payload bytes handed to the consumer.
    pub bytes_relayed: AtomicU64,

    /// Packets dropped because the consumer had no connection.
    pub packets_dropped: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl BridgeStats {
    /// Create zeroed stats.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            packets_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record a relayed packet.
    pub fn record_relayed(&self, bytes: u64) {
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a dropped packet.
    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            from: self.from.clone(),
            to: self.to.clone(),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of bridge statistics.
#[derive(Debug, Clone)]
pub struct BridgeStatsSnapshot {
    pub from: String,
    pub to: String,
    pub packets_relayed: u64,
    pub bytes_relayed: u64,
    pub packets_dropped: u64,
    pub uptime_secs: u64,
}

impl BridgeStatsSnapshot {
    /// Calculate packets per second.
    pub fn packets_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.packets_relayed as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Calculate bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes_relayed as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
