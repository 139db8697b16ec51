//! UDP datagram receiver.
//!
//! Binds a UDP socket on the well-known fragment port and forwards every
//! datagram, together with its sender address and a receive timestamp, to the
//! ingest workers over a bounded channel.
//!
//! * `SO_RCVBUFFORCE` (Linux) bypasses `net.core.rmem_max`; falls back to
//!   `SO_RCVBUF` with a warning if not running as root.
//! * A short read timeout lets the loop notice shutdown without a wake-up datagram.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use crate::clock;
use crate::ingest_metrics::IngestMetrics;

/// Largest datagram the transport can carry.
pub const MAX_DATAGRAM: usize = 65_535;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// One datagram as it came off the wire.
#[derive(Debug, Clone)]
pub struct RawDatagram {
    pub data: Vec<u8>,
    /// Sender address; acknowledgments go back here.
    pub peer: SocketAddr,
    pub recv_timestamp_ns: u64,
}

pub struct DatagramReceiver {
    socket: Arc<UdpSocket>,
    tx: Sender<RawDatagram>,
    metrics: Arc<IngestMetrics>,
    running: Arc<AtomicBool>,
}

/// Bind the listening socket. Failure here is fatal for the service.
pub fn bind_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create UDP socket")?;
    socket.set_reuse_address(true)?;

    if recv_buffer_bytes > 0 {
        set_recv_buffer(&socket, recv_buffer_bytes);
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind UDP socket on {}", addr))?;
    socket.set_read_timeout(Some(POLL_TIMEOUT))?;
    Ok(socket.into())
}

#[cfg(target_os = "linux")]
fn set_recv_buffer(socket: &Socket, bytes: usize) {
    use std::mem::size_of;
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let buf_val = bytes.min(i32::MAX as usize) as libc::c_int;
    // SAFETY: fd is a live socket owned by `socket`; the option value is a c_int.
    let force_ok = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUFFORCE,
            &buf_val as *const _ as _,
            size_of::<libc::c_int>() as _,
        ) == 0
    };
    if !force_ok {
        socket.set_recv_buffer_size(bytes).ok();
        if let Ok(actual) = socket.recv_buffer_size() {
            if actual < bytes / 2 {
                tracing::warn!(
                    "recv buffer is {}KB (wanted {}KB); \
                     run as root or: sysctl -w net.core.rmem_max={}",
                    actual / 1024,
                    bytes / 1024,
                    bytes * 2
                );
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_recv_buffer(socket: &Socket, bytes: usize) {
    if let Err(e) = socket.set_recv_buffer_size(bytes) {
        tracing::warn!(err = %e, "failed to set recv buffer size");
    }
}

impl DatagramReceiver {
    pub fn new(
        socket: Arc<UdpSocket>,
        tx: Sender<RawDatagram>,
        metrics: Arc<IngestMetrics>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self { socket, tx, metrics, running }
    }

    /// Receive loop. Returns once `running` is cleared; dropping `self` then
    /// disconnects the channel so workers drain and exit.
    pub fn run(self) -> Result<()> {
        tracing::info!(addr = ?self.socket.local_addr().ok(), "datagram receiver started");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while self.running.load(Ordering::SeqCst) {
            let (n, peer) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. ICMP port-unreachable from an earlier ack, surfaced as ECONNREFUSED.
                    self.metrics.recv_errors.fetch_add(1, Relaxed);
                    tracing::warn!(err = %e, "recv_from failed");
                    continue;
                }
            };
            let ts = clock::now_ns();

            self.metrics.datagrams_received.fetch_add(1, Relaxed);
            self.metrics.bytes_received.fetch_add(n as u64, Relaxed);

            if self
                .tx
                .try_send(RawDatagram { data: buf[..n].to_vec(), peer, recv_timestamp_ns: ts })
                .is_err()
            {
                self.metrics.datagrams_dropped.fetch_add(1, Relaxed);
                tracing::debug!(%peer, len = n, "ingest channel full, datagram dropped");
            }
        }

        tracing::info!("datagram receiver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let sock = bind_socket("127.0.0.1:0".parse().unwrap(), 256 * 1024).unwrap();
        let addr = sock.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_receiver_forwards_with_peer_and_stops() {
        let sock = Arc::new(bind_socket("127.0.0.1:0".parse().unwrap(), 0).unwrap());
        let addr = sock.local_addr().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(16);
        let metrics = IngestMetrics::new();
        let running = Arc::new(AtomicBool::new(true));
        let receiver = DatagramReceiver::new(sock, tx, metrics.clone(), running.clone());
        let handle = std::thread::spawn(move || receiver.run());

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"ping", addr).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.data, b"ping");
        assert_eq!(got.peer, client.local_addr().unwrap());

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
        assert!(rx.recv().is_err(), "channel disconnects after shutdown");
        assert_eq!(metrics.datagrams_received.load(Relaxed), 1);
    }
}
