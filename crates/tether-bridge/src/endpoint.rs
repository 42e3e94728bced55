// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The packet endpoints a [`Bridge`](crate::Bridge) connects.

use crate::config::ConfigError;
use crate::queue::Packet;
use crate::serial::SerialEndpoint;
use crate::server::{BroadcastServer, SingleClientServer};
use std::net::SocketAddr;
use thiserror::Error;

/// Endpoint errors.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Serial port {path}: {source}")]
    Serial {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that produces packets and accepts packets to emit.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Serial device.
    Serial(SerialEndpoint),
    /// TCP server with one live client at a time.
    SingleClient(SingleClientServer),
    /// TCP server broadcasting to every client.
    Broadcast(BroadcastServer),
}

impl Endpoint {
    /// Wait for the next inbound packet and remove it from the queue.
    pub async fn receive(&self) -> Packet {
        match self {
            Self::Serial(e) => e.receive().await,
            Self::SingleClient(e) => e.receive().await,
            Self::Broadcast(e) => e.receive().await,
        }
    }

    /// Best-effort write to the live connection(s).
    ///
    /// Never waits for a connection. Returns `false` if the packet was
    /// dropped because nothing was connected.
    pub fn send(&self, packet: Packet) -> bool {
        match self {
            Self::Serial(e) => e.send(packet),
            Self::SingleClient(e) => e.send(packet),
            Self::Broadcast(e) => e.send(packet),
        }
    }

    /// Whether the endpoint currently has a live connection.
    pub fn is_connected(&self) -> bool {
        match self {
            Self::Serial(e) => e.is_connected(),
            Self::SingleClient(e) => e.is_connected(),
            Self::Broadcast(e) => e.is_connected(),
        }
    }

    /// Short label for logs and statistics.
    pub fn name(&self) -> String {
        match self {
            Self::Serial(e) => format!("serial {}", e.path()),
            Self::SingleClient(e) => format!("tcp {}", e.local_addr()),
            Self::Broadcast(e) => format!("broadcast {}", e.local_addr()),
        }
    }
}

impl From<SerialEndpoint> for Endpoint {
    fn from(endpoint: SerialEndpoint) -> Self {
        Self::Serial(endpoint)
    }
}

impl From<SingleClientServer> for Endpoint {
    fn from(endpoint: SingleClientServer) -> Self {
        Self::SingleClient(endpoint)
    }
}

impl From<BroadcastServer> for Endpoint {
    fn from(endpoint: BroadcastServer) -> Self {
        Self::Broadcast(endpoint)
    }
}
