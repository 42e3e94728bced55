// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-level wiring.
//!
//! The supervisor opens the serial device, binds the client-facing socket
//! and runs one bridge per direction between them.

use crate::bridge::{Bridge, BridgeStats, BridgeStatsSnapshot};
use crate::config::{BridgeConfig, ServerMode};
use crate::endpoint::{Endpoint, EndpointError};
use crate::serial::SerialEndpoint;
use crate::server::{BroadcastServer, SingleClientServer};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Supervisor already running")]
    AlreadyRunning,
}

/// Serial-to-TCP relay.
#[derive(Debug)]
pub struct Supervisor {
    config: BridgeConfig,
    started: bool,
}

impl Supervisor {
    /// Create a supervisor from configuration.
    pub fn new(config: BridgeConfig) -> Result<Self, SupervisorError> {
        config.validate()?;
        Ok(Self {
            config,
            started: false,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open the configured serial device and start relaying.
    ///
    /// A serial device that cannot be opened is logged and the relay runs
    /// with a disconnected serial side. Failing to bind the socket is an
    /// error.
    pub async fn start(&mut self) -> Result<SupervisorHandle, SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyRunning);
        }
        let serial = SerialEndpoint::open(&self.config.serial);
        self.start_with_serial(serial).await
    }

    /// Start relaying against an already constructed serial endpoint.
    pub async fn start_with_serial(
        &mut self,
        serial: SerialEndpoint,
    ) -> Result<SupervisorHandle, SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyRunning);
        }

        let (trigger, shutdown) = shutdown::channel();
        let server_config = &self.config.server;

        let (socket, serve_task) = match server_config.mode {
            ServerMode::Single => {
                let server = SingleClientServer::bind(server_config).await?;
                let task = spawn_serve(server.clone().into(), shutdown.clone());
                (Endpoint::from(server), task)
            }
            ServerMode::Broadcast => {
                let server = BroadcastServer::bind(server_config).await?;
                let task = spawn_serve(server.clone().into(), shutdown.clone());
                (Endpoint::from(server), task)
            }
        };
        let local_addr = match &socket {
            Endpoint::SingleClient(s) => s.local_addr(),
            Endpoint::Broadcast(b) => b.local_addr(),
            Endpoint::Serial(_) => server_config.listen_addr(),
        };
        self.started = true;

        let inbound = Bridge::new(serial.clone().into(), socket.clone());
        let outbound = Bridge::new(socket.clone(), serial.clone().into());
        let stats = vec![inbound.stats(), outbound.stats()];

        let tasks = vec![
            serve_task,
            inbound.spawn(shutdown.clone()),
            outbound.spawn(shutdown.clone()),
        ];

        info!(
            "{}: relaying {} <-> {} ({} mode)",
            self.config.name,
            serial.path(),
            local_addr,
            server_config.mode
        );

        Ok(SupervisorHandle {
            local_addr,
            serial,
            socket,
            trigger,
            shutdown,
            stats,
            tasks,
        })
    }
}

fn spawn_serve(endpoint: Endpoint, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        match endpoint {
            Endpoint::SingleClient(server) => server.serve(shutdown).await,
            Endpoint::Broadcast(server) => server.serve(shutdown).await,
            Endpoint::Serial(_) => {}
        }
    })
}

/// Handle to a running relay.
///
/// Tasks keep running until [`SupervisorHandle::stop`] is called.
#[derive(Debug)]
pub struct SupervisorHandle {
    local_addr: SocketAddr,
    serial: SerialEndpoint,
    socket: Endpoint,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    stats: Vec<Arc<BridgeStats>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Address the socket listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serial side of the relay.
    pub fn serial(&self) -> &SerialEndpoint {
        &self.serial
    }

    /// Client-facing side of the relay.
    pub fn socket(&self) -> &Endpoint {
        &self.socket
    }

    /// Shutdown signal shared by the relay tasks.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Check if the relay is running.
    pub fn is_running(&self) -> bool {
        !self.trigger.is_triggered()
    }

    /// Statistics for both directions, serial-to-socket first.
    pub fn stats(&self) -> Vec<BridgeStatsSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Shared statistics handles, serial-to-socket first.
    pub fn stats_handles(&self) -> Vec<Arc<BridgeStats>> {
        self.stats.clone()
    }

    /// Request every task to stop and release the serial device.
    pub fn stop(&self) {
        self.trigger.trigger();
        self.serial.close();
    }

    /// Wait for every task to finish. Call [`stop`](Self::stop) first.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Relay task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SerialConfig, ServerConfig};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn loopback_config(mode: ServerMode) -> BridgeConfig {
        BridgeConfig {
            serial: SerialConfig::new("/dev/tether-bridge-missing"),
            server: ServerConfig {
                mode,
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
                ..ServerConfig::default()
            },
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = loopback_config(ServerMode::Single);
        config.serial.baud_rate = 0;
        assert!(matches!(
            Supervisor::new(config),
            Err(SupervisorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_serial_device_keeps_relay_up() {
        let mut supervisor =
            Supervisor::new(loopback_config(ServerMode::Single)).expect("config");
        let handle = supervisor.start().await.expect("start");

        assert!(handle.is_running());
        assert!(!handle.serial().is_connected());
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.stats().len(), 2);

        handle.stop();
        assert!(!handle.is_running());
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("tasks stop");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut supervisor =
            Supervisor::new(loopback_config(ServerMode::Broadcast)).expect("config");
        let handle = supervisor
            .start_with_serial(SerialEndpoint::disconnected("none"))
            .await
            .expect("start");
        assert!(matches!(handle.socket(), Endpoint::Broadcast(_)));

        let again = supervisor
            .start_with_serial(SerialEndpoint::disconnected("none"))
            .await;
        assert!(matches!(again, Err(SupervisorError::AlreadyRunning)));
        handle.stop();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let mut config = loopback_config(ServerMode::Single);
        config.server.port = taken.local_addr().expect("addr").port();

        let mut supervisor = Supervisor::new(config).expect("config");
        let result = supervisor
            .start_with_serial(SerialEndpoint::disconnected("none"))
            .await;
        assert!(matches!(
            result,
            Err(SupervisorError::Endpoint(EndpointError::Bind { .. }))
        ));
    }
}
