// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP side of the bridge.
//!
//! Clients speak newline-delimited UTF-8 lines, one packet per line. Each
//! client receives the greeting line before any relayed traffic.

pub mod broadcast;
pub mod connection;
pub mod single;

pub use broadcast::{BroadcastServer, ClientSet};
pub use connection::{ClientConnection, ClientHandle};
pub use single::SingleClientServer;
