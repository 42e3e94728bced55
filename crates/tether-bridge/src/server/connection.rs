// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client connection handling.
//!
//! A TCP client is split in two: the read half stays with the task that
//! pumps inbound lines, the write half moves into a writer task fed through
//! an unbounded channel. [`ClientHandle`] is the sending side of that
//! channel, so writing to a client never waits on the socket.

use crate::queue::{Packet, PacketSender};
use crate::shutdown::Shutdown;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Longest accepted inbound line, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Write side of a connected client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,
    peer_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Packet>,
}

impl ClientHandle {
    pub(crate) fn new(peer_addr: SocketAddr, tx: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            tx,
        }
    }

    /// Process-unique client id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a line for this client. Returns `false` if its writer is gone.
    pub fn send(&self, line: Packet) -> bool {
        self.tx.send(line).is_ok()
    }

    /// Whether the writer has stopped (write failure or shutdown).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side of a connected client.
pub struct ClientConnection {
    peer_addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
}

impl ClientConnection {
    /// Split an accepted stream and start its writer task.
    pub fn accept(stream: TcpStream, peer_addr: SocketAddr) -> (Self, ClientHandle) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(write_half, rx, peer_addr));

        let conn = Self {
            peer_addr,
            reader: BufReader::new(read_half),
            line: Vec::with_capacity(256),
        };
        (conn, ClientHandle::new(peer_addr, tx))
    }

    /// Read one line, without its terminator.
    ///
    /// Returns `Ok(None)` once the client has closed the connection. A final
    /// line without a terminator is still returned. A line longer than
    /// [`MAX_LINE_LEN`] is an `InvalidData` error.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Packet>> {
        self.line.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut self.line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.line.len() > MAX_LINE_LEN && self.line.last() != Some(&b'\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", MAX_LINE_LEN),
            ));
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.line).into_owned()))
    }

    /// Push every line into `sender` until the client disconnects or
    /// shutdown fires. Returns the number of lines read.
    pub async fn pump_lines(
        &mut self,
        sender: &PacketSender,
        shutdown: &mut Shutdown,
    ) -> std::io::Result<u64> {
        let mut count = 0;
        loop {
            tokio::select! {
                line = self.read_line() => match line? {
                    Some(line) => {
                        debug!("Client {} sent {:?}", self.peer_addr, line);
                        sender.put(line);
                        count += 1;
                    }
                    None => return Ok(count),
                },
                _ = shutdown.triggered() => return Ok(count),
            }
        }
    }
}

async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    peer_addr: SocketAddr,
) {
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Write to {} failed: {}", peer_addr, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}
