// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound packet queue owned by each endpoint.

use tokio::sync::{mpsc, Mutex};

/// A unit of relayed text. Never contains the serial delimiter.
pub type Packet = String;

/// Unbounded FIFO of packets with a single consumer.
///
/// Producers hold [`PacketSender`] handles and never block. The consumer
/// suspends in [`PacketQueue::take`] until a packet is available.
#[derive(Debug)]
pub struct PacketQueue {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
}

/// Producer handle for a [`PacketQueue`].
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::UnboundedSender<Packet>,
}

impl PacketSender {
    /// Append a packet. Returns `false` if the queue no longer exists.
    pub fn put(&self, packet: Packet) -> bool {
        self.tx.send(packet).is_ok()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Get a producer handle.
    pub fn sender(&self) -> PacketSender {
        PacketSender {
            tx: self.tx.clone(),
        }
    }

    /// Append a packet.
    pub fn put(&self, packet: Packet) {
        // The queue holds its own sender, so the receiver is alive.
        let _ = self.tx.send(packet);
    }

    /// Remove and return the oldest packet, waiting until one is queued.
    ///
    /// Cancel safe: a packet is only removed when the future completes.
    pub async fn take(&self) -> Packet {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(packet) => packet,
            // Unreachable while `self.tx` is alive; wait like an empty queue.
            None => std::future::pending().await,
        }
    }

    /// Remove the oldest packet without waiting.
    pub fn try_take(&self) -> Option<Packet> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}
