// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-client TCP endpoint.
//!
//! Every accepted client gets its own reader task. All clients feed one
//! shared inbound queue, and [`BroadcastServer::send`] writes each packet to
//! every registered client.

use super::connection::{ClientConnection, ClientHandle};
use crate::config::{ServerConfig, DEFAULT_GREETING};
use crate::endpoint::EndpointError;
use crate::queue::{Packet, PacketQueue};
use crate::shutdown::Shutdown;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Write handles of the connected clients.
///
/// Appends come from accept-spawned tasks while broadcasts iterate, so
/// [`ClientSet::broadcast`] works on a snapshot taken under the read lock.
/// A client registered during a broadcast may miss that one packet.
#[derive(Debug, Default)]
pub struct ClientSet {
    clients: RwLock<Vec<ClientHandle>>,
}

impl ClientSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client.
    pub fn insert(&self, client: ClientHandle) {
        self.clients.write().push(client);
    }

    /// Unregister a client by id. Returns `true` if it was present.
    pub fn remove(&self, id: u64) -> bool {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|c| c.id() != id);
        clients.len() != before
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.read().clone()
    }

    /// Send `packet` to every registered client.
    ///
    /// Clients whose writer has stopped are pruned. Returns the number of
    /// clients the packet was handed to.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for client in self.snapshot() {
            if client.send(packet.clone()) {
                delivered += 1;
            } else {
                debug!("Pruning dead client {}", client.peer_addr());
                dead.push(client.id());
            }
        }

        if !dead.is_empty() {
            self.clients.write().retain(|c| !dead.contains(&c.id()));
        }
        delivered
    }
}

/// TCP endpoint serving any number of clients.
#[derive(Debug, Clone)]
pub struct BroadcastServer {
    inner: Arc<BroadcastInner>,
}

#[derive(Debug)]
struct BroadcastInner {
    local_addr: SocketAddr,
    greeting: String,
    queue: PacketQueue,
    clients: Arc<ClientSet>,
    listener: Mutex<Option<TcpListener>>,
}

impl BroadcastServer {
    /// Bind the listener described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self, EndpointError> {
        Self::bind_addr(config.listen_addr(), &config.greeting).await
    }

    /// Bind to `addr` with the given greeting line.
    pub async fn bind_addr(addr: SocketAddr, greeting: &str) -> Result<Self, EndpointError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EndpointError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            inner: Arc::new(BroadcastInner {
                local_addr,
                greeting: greeting.to_string(),
                queue: PacketQueue::new(),
                clients: Arc::new(ClientSet::new()),
                listener: Mutex::new(Some(listener)),
            }),
        })
    }

    /// Bind to `addr` with the default greeting.
    pub async fn bind_default_greeting(addr: SocketAddr) -> Result<Self, EndpointError> {
        Self::bind_addr(addr, DEFAULT_GREETING).await
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Whether at least one client is connected.
    pub fn is_connected(&self) -> bool {
        !self.inner.clients.is_empty()
    }

    /// Next line received from any client, in arrival order.
    pub async fn receive(&self) -> Packet {
        self.inner.queue.take().await
    }

    /// Send a line to every connected client.
    pub fn send(&self, packet: Packet) -> bool {
        let delivered = self.inner.clients.broadcast(&packet);
        if delivered == 0 {
            debug!("No clients on {}, dropping packet", self.inner.local_addr);
        }
        delivered > 0
    }

    /// Run the accept loop until shutdown.
    pub async fn serve(&self, mut shutdown: Shutdown) {
        let Some(listener) = self.inner.listener.lock().take() else {
            warn!("Server on {} is already serving", self.inner.local_addr);
            return;
        };
        info!(
            "Listening on {} and waiting for multiple clients",
            self.inner.local_addr
        );

        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = shutdown.triggered() => break,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    let inner = Arc::clone(&self.inner);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        serve_client(inner, stream, peer_addr, shutdown).await;
                    });
                }
                Err(e) => warn!("Accept error on {}: {}", self.inner.local_addr, e),
            }
        }

        debug!("Accept loop on {} stopped", self.inner.local_addr);
    }
}

async fn serve_client(
    inner: Arc<BroadcastInner>,
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    mut shutdown: Shutdown,
) {
    let (mut conn, handle) = ClientConnection::accept(stream, peer_addr);
    let id = handle.id();

    // Greeting goes first so it precedes any broadcast this client sees.
    handle.send(inner.greeting.clone());
    inner.clients.insert(handle);
    info!(
        "Client connected: {} ({} connected)",
        peer_addr,
        inner.clients.len()
    );

    match conn.pump_lines(&inner.queue.sender(), &mut shutdown).await {
        Ok(lines) => debug!("Client {} sent {} lines", peer_addr, lines),
        Err(e) => warn!("Read error from {}: {}", peer_addr, e),
    }

    inner.clients.remove(id);
    info!(
        "Client disconnected: {} ({} connected)",
        peer_addr,
        inner.clients.len()
    );
}
