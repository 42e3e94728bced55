// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tether Bridge CLI
//!
//! Relays packets between a serial device and TCP clients.
//!
//! # Usage
//!
//! ```bash
//! # Default device (/dev/ttyACM0) on port 8088
//! tether-bridge
//!
//! # Custom device and framing
//! tether-bridge --device /dev/ttyUSB0 --baud 115200 --delimiter '#' --timeout-ms 50
//!
//! # Serve every client at once
//! tether-bridge --mode broadcast --port 8089
//!
//! # Using configuration file
//! tether-bridge --config bridge.toml
//!
//! # Show available devices
//! tether-bridge list-ports
//! ```

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tether_bridge::{BridgeConfig, BridgeStatsSnapshot, ServerMode, Supervisor, SupervisorError};
use tracing_subscriber::EnvFilter;

/// Serial-to-TCP packet relay
#[derive(Parser, Debug)]
#[command(name = "tether-bridge")]
#[command(about = "Serial-to-TCP packet relay for tethered devices")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path
    #[arg(short, long, conflicts_with = "config")]
    device: Option<String>,

    /// Serial baud rate
    #[arg(short, long, conflicts_with = "config")]
    baud: Option<u32>,

    /// Packet delimiter (single ASCII character)
    #[arg(long, conflicts_with = "config")]
    delimiter: Option<char>,

    /// Packet assembly timeout (milliseconds)
    #[arg(long, conflicts_with = "config")]
    timeout_ms: Option<u64>,

    /// Client mode (single, broadcast)
    #[arg(short, long, conflicts_with = "config")]
    mode: Option<ServerMode>,

    /// Address to bind the TCP server to
    #[arg(long, conflicts_with = "config")]
    bind: Option<IpAddr>,

    /// TCP port to listen on
    #[arg(short, long, conflicts_with = "config")]
    port: Option<u16>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "10")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List available serial ports
    ListPorts,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Handle subcommands
    if let Some(cmd) = args.command {
        let level = args.log_level.as_deref().unwrap_or("info");
        init_logging(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::ListPorts => cmd_list_ports(),
        };
    }

    let config = build_config(&args)?;
    init_logging(config.env_filter());
    let stats_interval = config.stats_interval_secs;
    let mut supervisor = Supervisor::new(config)?;

    println!("Tether Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Serial: {}", supervisor.config().serial.path);
    println!(
        "Server: {} ({} mode)",
        supervisor.config().server.listen_addr(),
        supervisor.config().server.mode
    );
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let handle = supervisor.start().await?;

    // Stats reporting task
    if stats_interval > 0 {
        let stats = handle.stats_handles();
        let mut shutdown = handle.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.triggered() => break,
                }
                let snapshots: Vec<_> = stats.iter().map(|s| s.snapshot()).collect();
                print_stats(&snapshots);
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    handle.stop();

    println!("\nFinal Statistics:");
    print_stats(&handle.stats());
    handle.join().await;

    Ok(())
}

fn init_logging(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<BridgeConfig, SupervisorError> {
    // Load from file if specified
    if let Some(ref config_path) = args.config {
        let mut config = BridgeConfig::from_file(config_path).map_err(SupervisorError::Config)?;
        if let Some(ref level) = args.log_level {
            config.log_level = level.clone();
        }
        return Ok(config);
    }

    // Build from command line arguments
    let mut config = BridgeConfig::default();
    if let Some(ref device) = args.device {
        config.serial.path = device.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(delimiter) = args.delimiter {
        config.serial.delimiter = delimiter;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.serial.timeout_ms = timeout_ms;
    }
    if let Some(mode) = args.mode {
        config.server.mode = mode;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.stats_interval_secs = args.stats_interval;
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate().map_err(SupervisorError::Config)?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BridgeConfig {
        name: "example-bridge".into(),
        ..BridgeConfig::default()
    };
    config.serial.baud_rate = 115_200;
    config.server.mode = ServerMode::Broadcast;

    let toml_str = toml::to_string_pretty(&config)?;

    // Add comments
    let content = format!(
        r#"# Tether Bridge Configuration
# Generated by tether-bridge gen-config
#
# server.mode: "single" serves one client at a time,
# "broadcast" serves every client at once.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.name);
            println!(
                "Serial: {} at {} baud, delimiter {:?}, timeout {} ms",
                config.serial.path,
                config.serial.baud_rate,
                config.serial.delimiter,
                config.serial.timeout_ms
            );
            println!(
                "Server: {} ({} mode)",
                config.server.listen_addr(),
                config.server.mode
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = tether_bridge::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        match port.description {
            Some(description) => println!("{}  {}  {}", port.name, port.kind, description),
            None => println!("{}  {}", port.name, port.kind),
        }
    }
    Ok(())
}

fn print_stats(stats: &[BridgeStatsSnapshot]) {
    println!("--- Bridge Statistics ---");
    for stat in stats {
        println!(
            "  {} -> {}: {} packets ({:.1} pkt/s), {}, {} dropped",
            stat.from,
            stat.to,
            stat.packets_relayed,
            stat.packets_per_second(),
            format_bytes(stat.bytes_relayed),
            stat.packets_dropped
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::filter::LevelFilter;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_log_level_from_config_file() {
        let file = config_file("log_level = \"debug\"\n");
        let path = file.path().to_str().expect("utf-8 path");
        let args = Args::parse_from(["tether-bridge", "--config", path]);

        let config = build_config(&args).expect("config");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_log_level_flag_overrides_config_file() {
        let file = config_file("log_level = \"debug\"\n");
        let path = file.path().to_str().expect("utf-8 path");
        let args = Args::parse_from(["tether-bridge", "--config", path, "--log-level", "warn"]);

        let config = build_config(&args).expect("config");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_flags_build_config() {
        let args = Args::parse_from([
            "tether-bridge",
            "--device",
            "/dev/ttyUSB3",
            "--mode",
            "broadcast",
            "--port",
            "9000",
        ]);

        let config = build_config(&args).expect("config");
        assert_eq!(config.serial.path, "/dev/ttyUSB3");
        assert_eq!(config.server.mode, ServerMode::Broadcast);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.log_level, "info");
    }
}
