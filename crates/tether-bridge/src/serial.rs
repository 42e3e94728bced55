// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial endpoint.
//!
//! A dedicated OS thread owns the port. Each iteration of its loop writes
//! any queued outbound data, samples the control lines, reads with a short
//! timeout and feeds the bytes to the [`Framer`]. The framer deadline is
//! polled on every iteration, so a packet whose delimiter never shows up is
//! emitted within one poll interval of its timeout.

use crate::config::{Parity, SerialConfig};
use crate::endpoint::EndpointError;
use crate::framer::Framer;
use crate::queue::{Packet, PacketQueue, PacketSender};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Byte-level access to a serial device.
///
/// Implemented for the boxed ports returned by the `serialport` crate. Any
/// other `Read + Write` device can implement it to be driven by a
/// [`SerialEndpoint`]; reads are expected to time out rather than block
/// indefinitely.
pub trait SerialIo: Read + Write + Send {
    /// Current state of the CTS and DSR input lines, if the device has them.
    fn control_lines(&mut self) -> Option<ControlLines> {
        None
    }
}

impl SerialIo for Box<dyn serialport::SerialPort> {
    fn control_lines(&mut self) -> Option<ControlLines> {
        let cts = self.read_clear_to_send().ok()?;
        let dsr = self.read_data_set_ready().ok()?;
        Some(ControlLines { cts, dsr })
    }
}

/// Snapshot of the modem control input lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLines {
    pub cts: bool,
    pub dsr: bool,
}

/// An available serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

/// List the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>, EndpointError> {
    let ports = serialport::available_ports().map_err(|source| EndpointError::Serial {
        path: "<enumerate>".into(),
        source,
    })?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, description) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    let description = match (info.manufacturer, info.product) {
                        (Some(m), Some(p)) => Some(format!("{} {}", m, p)),
                        (m, p) => m.or(p),
                    };
                    (format!("USB {:04x}:{:04x}", info.vid, info.pid), description)
                }
                serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None),
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None),
            };
            PortInfo {
                name: p.port_name,
                kind,
                description,
            }
        })
        .collect())
}

fn to_serialport_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn to_serialport_data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: u8) -> serialport::StopBits {
    match bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    }
}

/// Endpoint backed by a serial device.
#[derive(Debug, Clone)]
pub struct SerialEndpoint {
    inner: Arc<SerialInner>,
}

#[derive(Debug)]
struct SerialInner {
    path: String,
    queue: PacketQueue,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl Drop for SerialInner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl SerialEndpoint {
    /// Open the configured port.
    ///
    /// A port that cannot be opened is logged and yields a disconnected
    /// endpoint: sends are dropped and `receive` never completes.
    pub fn open(config: &SerialConfig) -> Self {
        match Self::try_open(config) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("{}", e);
                Self::disconnected(&config.path)
            }
        }
    }

    /// Open the configured port, reporting failure to the caller.
    pub fn try_open(config: &SerialConfig) -> Result<Self, EndpointError> {
        config.validate()?;

        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .parity(to_serialport_parity(config.parity))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .timeout(config.poll_interval())
            .open()
            .map_err(|source| EndpointError::Serial {
                path: config.path.clone(),
                source,
            })?;

        info!(
            "Opened serial port {} at {} baud ({}-{}-{})",
            config.path,
            config.baud_rate,
            config.data_bits,
            match config.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            config.stop_bits
        );

        let framer = Framer::new(config.delimiter_byte()?, config.timeout());
        Self::with_port(&config.path, Box::new(port), framer, config.poll_interval())
    }

    /// Drive an already opened device.
    pub fn with_port(
        path: &str,
        port: Box<dyn SerialIo>,
        framer: Framer,
        poll_interval: Duration,
    ) -> Result<Self, EndpointError> {
        let queue = PacketQueue::new();
        let sender = queue.sender();
        let connected = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let io = SerialIoLoop {
            path: path.to_string(),
            port,
            framer,
            sender,
            outbound: outbound_rx,
            connected: Arc::clone(&connected),
            running: Arc::clone(&running),
            poll_interval,
        };

        std::thread::Builder::new()
            .name(format!("serial-io {}", path))
            .spawn(move || io.run())?;

        Ok(Self {
            inner: Arc::new(SerialInner {
                path: path.to_string(),
                queue,
                connected,
                running,
                outbound: Some(outbound_tx),
            }),
        })
    }

    /// An endpoint without a device.
    pub fn disconnected(path: &str) -> Self {
        Self {
            inner: Arc::new(SerialInner {
                path: path.to_string(),
                queue: PacketQueue::new(),
                connected: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicBool::new(false)),
                outbound: None,
            }),
        }
    }

    /// Device path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Whether the port is open and readable.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Next packet framed from the serial stream.
    pub async fn receive(&self) -> Packet {
        self.inner.queue.take().await
    }

    /// Write a packet to the port as-is.
    ///
    /// The delimiter is not appended: the peer protocol decides whether the
    /// payload carries one. Returns `false` if the packet was dropped.
    pub fn send(&self, packet: Packet) -> bool {
        if !self.is_connected() {
            debug!("Serial {} not connected, dropping {:?}", self.inner.path, packet);
            return false;
        }
        match &self.inner.outbound {
            Some(tx) => tx.send(packet.into_bytes()).is_ok(),
            None => false,
        }
    }

    /// Stop the I/O thread and release the port.
    pub fn close(&self) {
        if self.inner.running.swap(false, Ordering::Relaxed) {
            info!("Closing serial port {}", self.inner.path);
        }
    }
}

struct SerialIoLoop {
    path: String,
    port: Box<dyn SerialIo>,
    framer: Framer,
    sender: PacketSender,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SerialIoLoop {
    fn run(mut self) {
        let mut buf = [0u8; 256];
        let mut lines: Option<ControlLines> = None;

        while self.running.load(Ordering::Relaxed) {
            while let Ok(data) = self.outbound.try_recv() {
                if let Err(e) = self.port.write_all(&data).and_then(|()| self.port.flush()) {
                    warn!("Serial write to {} failed: {}", self.path, e);
                }
            }

            if let Some(current) = self.port.control_lines() {
                log_control_lines(lines, current);
                lines = Some(current);
            }

            match self.port.read(&mut buf) {
                Ok(0) => std::thread::sleep(self.poll_interval),
                Ok(n) => {
                    for packet in self.framer.feed(&buf[..n], Instant::now()) {
                        self.enqueue(packet);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    error!("Serial read from {} failed: {}", self.path, e);
                    break;
                }
            }

            if let Some(packet) = self.framer.poll(Instant::now()) {
                self.enqueue(packet);
            }
        }

        if let Some(packet) = self.framer.flush() {
            self.enqueue(packet);
        }
        self.connected.store(false, Ordering::Relaxed);
        info!("Serial I/O on {} stopped", self.path);
    }

    fn enqueue(&self, packet: Packet) {
        trace!("Serial {} received {:?}", self.path, packet);
        if !self.sender.put(packet) {
            debug!("Serial {} queue closed, packet dropped", self.path);
        }
    }
}

fn log_control_lines(previous: Option<ControlLines>, current: ControlLines) {
    let on_off = |v: bool| if v { "ON" } else { "OFF" };
    match previous {
        None => debug!(
            "Control lines: CTS {}, DSR {}",
            on_off(current.cts),
            on_off(current.dsr)
        ),
        Some(prev) => {
            if prev.cts != current.cts {
                info!("CTS - {}", on_off(current.cts));
            }
            if prev.dsr != current.dsr {
                info!("DSR - {}", on_off(current.dsr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// In-memory port: reads drain `incoming`, writes land in `written`.
    #[derive(Clone, Default)]
    struct MemoryPort {
        incoming: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
        fail_reads: Arc<AtomicBool>,
    }

    impl MemoryPort {
        fn push(&self, data: &[u8]) {
            self.incoming.lock().extend(data.iter().copied());
        }
    }

    impl Read for MemoryPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.fail_reads.load(Ordering::Relaxed) {
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"));
            }
            let mut incoming = self.incoming.lock();
            if incoming.is_empty() {
                drop(incoming);
                std::thread::sleep(Duration::from_millis(1));
                return Err(ErrorKind::TimedOut.into());
            }
            let n = buf.len().min(incoming.len());
            for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MemoryPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SerialIo for MemoryPort {}

    fn endpoint(port: &MemoryPort, timeout: Duration) -> SerialEndpoint {
        SerialEndpoint::with_port(
            "mem0",
            Box::new(port.clone()),
            Framer::new(b'*', timeout),
            Duration::from_millis(1),
        )
        .expect("spawn serial thread")
    }

    async fn receive(endpoint: &SerialEndpoint) -> Packet {
        tokio::time::timeout(Duration::from_secs(2), endpoint.receive())
            .await
            .expect("packet within 2s")
    }

    #[tokio::test]
    async fn test_frames_incoming_bytes() {
        let port = MemoryPort::default();
        let serial = endpoint(&port, Duration::from_millis(500));
        assert!(serial.is_connected());

        port.push(b"ab*cd*");
        assert_eq!(receive(&serial).await, "ab");
        assert_eq!(receive(&serial).await, "cd");
        serial.close();
    }

    #[tokio::test]
    async fn test_lone_delimiter_produces_nothing() {
        let port = MemoryPort::default();
        let serial = endpoint(&port, Duration::from_millis(500));

        port.push(b"*");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(serial.inner.queue.try_take().is_none());
        serial.close();
    }

    #[tokio::test]
    async fn test_timeout_without_further_bytes() {
        let port = MemoryPort::default();
        let serial = endpoint(&port, Duration::from_millis(10));

        port.push(b"partial");
        assert_eq!(receive(&serial).await, "partial");
        serial.close();
    }

    #[tokio::test]
    async fn test_send_writes_without_delimiter() {
        let port = MemoryPort::default();
        let serial = endpoint(&port, Duration::from_millis(10));

        assert!(serial.send("ping".into()));
        for _ in 0..200 {
            if !port.written.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(port.written.lock().as_slice(), b"ping");
        serial.close();
    }

    #[tokio::test]
    async fn test_read_failure_disconnects() {
        let port = MemoryPort::default();
        let serial = endpoint(&port, Duration::from_millis(500));

        port.push(b"half");
        tokio::time::sleep(Duration::from_millis(20)).await;
        port.fail_reads.store(true, Ordering::Relaxed);

        // Pending bytes are flushed when the reader stops.
        assert_eq!(receive(&serial).await, "half");
        for _ in 0..200 {
            if !serial.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!serial.is_connected());
        assert!(!serial.send("dropped".into()));
    }

    #[tokio::test]
    async fn test_disconnected_endpoint_drops_sends() {
        let serial = SerialEndpoint::disconnected("/dev/missing");
        assert!(!serial.is_connected());
        assert!(!serial.send("x*".into()));
        let waited =
            tokio::time::timeout(Duration::from_millis(20), serial.receive()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_open_missing_port_is_disconnected() {
        let serial = SerialEndpoint::open(&SerialConfig::new("/dev/tether-bridge-missing"));
        assert!(!serial.is_connected());
        assert_eq!(serial.path(), "/dev/tether-bridge-missing");
    }

    #[test]
    fn test_serialport_conversions() {
        assert_eq!(to_serialport_data_bits(7), serialport::DataBits::Seven);
        assert_eq!(to_serialport_data_bits(8), serialport::DataBits::Eight);
        assert_eq!(to_serialport_stop_bits(2), serialport::StopBits::Two);
        assert_eq!(to_serialport_parity(Parity::Odd), serialport::Parity::Odd);
    }
}
