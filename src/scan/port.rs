use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ScanError;
use crate::scanner::Prober;
use crate::services;
use crate::types::ProbeResult;

/// TCP connect prober: a bare handshake, nothing is sent or read.
#[derive(Debug, Clone, Default)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for TcpProber {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn probe(&self, ip: IpAddr, port: u16, tcp_timeout: Duration) -> ProbeResult {
        let socket_addr = SocketAddr::new(ip, port);
        let start_time = Instant::now();

        // The stream is dropped (and the socket closed) on every arm.
        match timeout(tcp_timeout, TcpStream::connect(socket_addr)).await {
            Ok(Ok(_stream)) => {
                let service = services::lookup(port);
                log::trace!("[scan::port] open: addr={} service={} response_time={}ms",
                    socket_addr, service, start_time.elapsed().as_millis());
                ProbeResult::open(port, service)
            }
            Ok(Err(e)) => classify_connect_error(port, e).unwrap_or_else(|err| {
                log::warn!("[scan::port] probe_error: addr={} error={}", socket_addr, err);
                ProbeResult::error(port, err.to_string())
            }),
            Err(_) => {
                log::trace!("[scan::port] timed_out: addr={} timeout={}ms",
                    socket_addr, tcp_timeout.as_millis());
                ProbeResult::closed(port)
            }
        }
    }
}

/// Refusals and OS-level timeouts mean closed; anything else is a
/// per-port transport failure.
fn classify_connect_error(port: u16, e: io::Error) -> Result<ProbeResult, ScanError> {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut => Ok(ProbeResult::closed(port)),
        kind => Err(ScanError::Probe {
            port,
            reason: format!("{} ({:?})", e, kind),
        }),
    }
}
