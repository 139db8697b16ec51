//! `fragd send` — fragment a message and send it to a running fragd.
//!
//! Handy for smoke-testing a deployment: every fragment should be acknowledged
//! and the daemon should print the reassembled text once.

use anyhow::{Context, Result};
use frag_ingest::encode_fragments;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::color::{paint, Tone};

/// How many fragments went out and how many were acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub total: usize,
    pub acked: usize,
}

pub fn run(
    target: &str,
    id: i64,
    text: &str,
    chunk_size: usize,
    reverse: bool,
    ack_timeout_secs: u64,
) -> Result<()> {
    let report = send_message(target, id, text, chunk_size, reverse, ack_timeout_secs)?;
    if report.acked == report.total {
        println!("{}", paint(Tone::Success, &format!("all {} fragment(s) acknowledged", report.total)));
    } else {
        println!(
            "{}",
            paint(Tone::Bad, &format!("{} of {} fragment(s) acknowledged", report.acked, report.total))
        );
    }
    Ok(())
}

/// Fragment `text`, send each piece to `target` and wait for its acknowledgment.
fn send_message(
    target: &str,
    id: i64,
    text: &str,
    chunk_size: usize,
    reverse: bool,
    ack_timeout_secs: u64,
) -> Result<SendReport> {
    let target: SocketAddr = target
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", target))?
        .next()
        .with_context(|| format!("no address for {}", target))?;

    let bind: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).context("failed to bind client socket")?;
    socket.set_read_timeout(Some(Duration::from_secs(ack_timeout_secs.max(1))))?;

    let mut datagrams: Vec<(usize, Vec<u8>)> =
        encode_fragments(id, text, chunk_size).into_iter().enumerate().collect();
    let total = datagrams.len();
    if reverse {
        datagrams.reverse();
    }

    println!(
        "sending message {} ({} bytes) as {} fragment(s) to {}",
        id,
        text.len(),
        total,
        target
    );

    let mut acked = 0usize;
    let mut buf = [0u8; 1024];
    for (index, datagram) in &datagrams {
        socket
            .send_to(datagram, target)
            .with_context(|| format!("failed to send fragment {}", index))?;

        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                acked += 1;
                println!(
                    "  {} fragment {}/{}  {}",
                    paint(Tone::Good, "ack"),
                    index,
                    total,
                    paint(Tone::Muted, &format!("{} from {}", String::from_utf8_lossy(&buf[..n]), from))
                );
            }
            Err(e) => {
                println!("  {} fragment {}/{}  ({})", paint(Tone::Warn, "no ack"), index, total, e);
            }
        }
    }

    Ok(SendReport { total, acked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use frag_ingest::{start_service, CompletedMessage, MessageSink, ServiceConfig};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collect(Mutex<Vec<CompletedMessage>>);

    impl MessageSink for Collect {
        fn deliver(&self, msg: &CompletedMessage) {
            self.0.lock().unwrap().push(msg.clone());
        }
    }

    fn loopback_service(ack: Option<&str>) -> (frag_ingest::ServiceHandle, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let cfg = ServiceConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            recv_buffer_bytes: 0,
            ack: ack.map(String::from),
            ..ServiceConfig::default()
        };
        let svc = start_service(cfg, sink.clone()).unwrap();
        (svc, sink)
    }

    #[test]
    fn test_send_reverse_is_reassembled_and_acked() {
        let (svc, sink) = loopback_service(Some("ok"));
        let target = svc.local_addr.to_string();

        let report = send_message(&target, 11, "out of order over udp", 4, true, 5).unwrap();
        assert_eq!(report, SendReport { total: 6, acked: 6 });

        let delivered = sink.0.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message_id, 11);
        assert_eq!(delivered[0].payload, b"out of order over udp");
        svc.shutdown();
    }

    #[test]
    fn test_send_without_acks_reports_missing() {
        let (svc, _sink) = loopback_service(None);
        let target = svc.local_addr.to_string();

        let report = send_message(&target, 12, "hi", 8, false, 1).unwrap();
        assert_eq!(report, SendReport { total: 1, acked: 0 });
        svc.shutdown();
    }

    #[test]
    fn test_send_unresolvable_target() {
        assert!(send_message("not a host", 1, "x", 8, false, 1).is_err());
    }
}
