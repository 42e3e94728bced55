// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-client TCP endpoint.
//!
//! Serves one client at a time and never stops accepting: when the live
//! client disconnects, the next connection takes its place.

use super::connection::{ClientConnection, ClientHandle};
use crate::config::{ServerConfig, DEFAULT_GREETING};
use crate::endpoint::EndpointError;
use crate::queue::{Packet, PacketQueue};
use crate::shutdown::Shutdown;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// TCP endpoint with at most one live client.
#[derive(Debug, Clone)]
pub struct SingleClientServer {
    inner: Arc<SingleInner>,
}

#[derive(Debug)]
struct SingleInner {
    local_addr: SocketAddr,
    greeting: String,
    queue: PacketQueue,
    client: Mutex<Option<ClientHandle>>,
    listener: Mutex<Option<TcpListener>>,
}

impl SingleClientServer {
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
            inner: Arc::new(SingleInner {
                local_addr,
                greeting: greeting.to_string(),
                queue: PacketQueue::new(),
                client: Mutex::new(None),
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

    /// Whether a client is currently connected.
    pub fn is_connected(&self) -> bool {
        self.inner
            .client
            .lock()
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Next line received from any client, in arrival order.
    pub async fn receive(&self) -> Packet {
        self.inner.queue.take().await
    }

    /// Send a line to the live client. Dropped if nobody is connected.
    pub fn send(&self, packet: Packet) -> bool {
        let client = self.inner.client.lock().clone();
        match client {
            Some(client) if client.send(packet) => true,
            _ => {
                debug!("No client on {}, dropping packet", self.inner.local_addr);
                false
            }
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn serve(&self, mut shutdown: Shutdown) {
        let Some(listener) = self.inner.listener.lock().take() else {
            warn!("Server on {} is already serving", self.inner.local_addr);
            return;
        };
        let sender = self.inner.queue.sender();

        while !shutdown.is_triggered() {
            info!("Listening on {} and waiting for a client", self.inner.local_addr);

            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = shutdown.triggered() => break,
            };
            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Accept error on {}: {}", self.inner.local_addr, e);
                    continue;
                }
            };

            info!("Client connected: {}", peer_addr);
            let (mut conn, handle) = ClientConnection::accept(stream, peer_addr);
            handle.send(self.inner.greeting.clone());
            *self.inner.client.lock() = Some(handle);

            match conn.pump_lines(&sender, &mut shutdown).await {
                Ok(lines) => info!("Client {} disconnected after {} lines", peer_addr, lines),
                Err(e) => warn!("Read error from {}: {}", peer_addr, e),
            }
            self.inner.client.lock().take();
        }

        debug!("Accept loop on {} stopped", self.inner.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn server() -> SingleClientServer {
        SingleClientServer::bind_default_greeting("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_not_connected_before_first_client() {
        let server = server().await;
        assert!(!server.is_connected());
        assert!(!server.send("nobody".into()));
    }

    #[tokio::test]
    async fn test_greeting_then_relay_both_ways() {
        let server = server().await;
        let (trigger, shutdown) = shutdown::channel();
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(shutdown).await })
        };

        let stream = TcpStream::connect(server.local_addr()).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let greeting = lines.next_line().await.expect("read").expect("line");
        assert_eq!(greeting, "Hi, you are connected");
        assert!(server.is_connected());

        write_half.write_all(b"ping\n").await.expect("write");
        let packet = tokio::time::timeout(Duration::from_secs(2), server.receive())
            .await
            .expect("packet");
        assert_eq!(packet, "ping");

        assert!(server.send("pong".into()));
        let reply = lines.next_line().await.expect("read").expect("line");
        assert_eq!(reply, "pong");

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve stops")
            .expect("task joins");
    }

    #[tokio::test]
    async fn test_accepts_next_client_after_disconnect() {
        let server = server().await;
        let (trigger, shutdown) = shutdown::channel();
        {
            let server = server.clone();
            tokio::spawn(async move { server.serve(shutdown).await });
        }

        let mut first = TcpStream::connect(server.local_addr()).await.expect("connect");
        first.write_all(b"from-first\n").await.expect("write");
        wait_until(|| server.is_connected()).await;
        drop(first);
        wait_until(|| !server.is_connected()).await;

        let second = TcpStream::connect(server.local_addr()).await.expect("connect");
        let (read_half, mut write_half) = second.into_split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(
            lines.next_line().await.expect("read").as_deref(),
            Some("Hi, you are connected")
        );
        write_half.write_all(b"from-second\n").await.expect("write");

        assert_eq!(server.receive().await, "from-first");
        assert_eq!(server.receive().await, "from-second");
        trigger.trigger();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = server().await;
        let second = SingleClientServer::bind_default_greeting(first.local_addr()).await;
        assert!(matches!(second, Err(EndpointError::Bind { .. })));
    }
}
