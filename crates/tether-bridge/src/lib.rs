// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tether Bridge
//!
//! Relays packets between a serial device and TCP clients.
//!
//! # Features
//!
//! - **Packet framing**: Splits the serial byte stream on a delimiter, with a
//!   timeout that flushes partial packets
//! - **Single-client mode**: One TCP client at a time, the next one is
//!   accepted after a disconnect
//! - **Broadcast mode**: Any number of clients; serial packets go to all of
//!   them and their lines are merged toward the device
//! - **Resilient serial side**: A missing device is logged and the relay keeps
//!   serving clients
//!
//! # Quick Start
//!
//! ```bash
//! # Default device and port
//! tether-bridge
//!
//! # Custom device, broadcast to every client
//! tether-bridge --device /dev/ttyUSB0 --baud 115200 --mode broadcast
//!
//! # Using config file
//! tether-bridge --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "bench-rig"
//!
//! [serial]
//! path = "/dev/ttyACM0"
//! baud_rate = 9600
//! delimiter = "*"
//! timeout_ms = 10
//!
//! [server]
//! mode = "broadcast"
//! port = 8088
//! ```

pub mod bridge;
pub mod config;
pub mod endpoint;
pub mod framer;
pub mod queue;
pub mod serial;
pub mod server;
pub mod shutdown;
pub mod supervisor;

pub use bridge::{Bridge, BridgeStats, BridgeStatsSnapshot};
pub use config::{BridgeConfig, ConfigError, Parity, SerialConfig, ServerConfig, ServerMode};
pub use endpoint::{Endpoint, EndpointError};
pub use framer::Framer;
pub use queue::{Packet, PacketQueue, PacketSender};
pub use serial::{list_ports, ControlLines, PortInfo, SerialEndpoint, SerialIo};
pub use server::{BroadcastServer, ClientSet, SingleClientServer};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle};
