use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::ScanError;

const DEFAULT_PING_TIMEOUT_SECS: u64 = 2;
const DEFAULT_PING_PACKET_COUNT: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    pub latency: Duration,
    pub ttl: Option<u8>,
    pub packets_sent: u32,
    pub packets_received: u32,
}

impl PingResult {
    pub fn packet_loss(&self) -> f32 {
        if self.packets_sent == 0 {
            return 1.0;
        }
        1.0 - self.packets_received as f32 / self.packets_sent as f32
    }
}

/// Host liveness pre-check run before a scan when `--ping` is given.
///
/// Shells out to the system `ping`, which already carries the privileges
/// raw ICMP needs.
pub struct PingCheck {
    timeout: Duration,
    packet_count: u8,
}

impl PingCheck {
    pub fn new(timeout: Duration, packet_count: u8) -> Self {
        log::debug!("[scan::ping] new: timeout={}ms packet_count={}",
            timeout.as_millis(), packet_count);
        Self {
            timeout,
            packet_count: packet_count.max(1),
        }
    }

    /// Fails with `ScanError::HostDown` when no echo reply comes back.
    pub async fn check(&self, ip: IpAddr) -> Result<PingResult, ScanError> {
        let host_down = |reason: String| ScanError::HostDown {
            target: ip.to_string(),
            reason,
        };

        // ping's -W takes whole seconds
        let wait_secs = self.timeout.as_secs_f64().ceil().max(1.0) as u64;
        let ping_start = Instant::now();
        let output = Command::new("ping")
            .args([
                "-c", &self.packet_count.to_string(),
                "-W", &wait_secs.to_string(),
                &ip.to_string(),
            ])
            .output()
            .await
            .map_err(|e| {
                log::error!("[scan::ping] ping_command_failed: ip={} error={}", ip, e);
                host_down(format!("could not run ping: {}", e))
            })?;

        log::trace!("[scan::ping] ping_command_completed: ip={} duration={}ms status={}",
            ip, ping_start.elapsed().as_millis(), output.status);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("[scan::ping] no_reply: ip={} status={} stderr={}",
                ip, output.status, stderr.trim());
            return Err(host_down("no echo reply".to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = parse_ping_output(&stdout, self.packet_count).ok_or_else(|| {
            log::trace!("[scan::ping] ping_output_content: ip={} stdout={}", ip, stdout);
            host_down("could not parse ping output".to_string())
        })?;

        log::info!("[scan::ping] host_up: ip={} latency={}ms ttl={:?}",
            ip, result.latency.as_millis(), result.ttl);
        Ok(result)
    }
}

impl Default for PingCheck {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS), DEFAULT_PING_PACKET_COUNT)
    }
}

/// Parses the first reply line, e.g.
/// `64 bytes from 8.8.8.8: icmp_seq=1 ttl=118 time=15.2 ms`, and the
/// `N packets transmitted, M received` summary when present.
fn parse_ping_output(output: &str, packets_sent: u8) -> Option<PingResult> {
    let reply = output.lines().find(|line| line.contains("time="))?;

    let latency_ms = field_after(reply, "time=")?.parse::<f64>().ok()?;
    let ttl = field_after(reply, "ttl=").and_then(|t| t.parse::<u8>().ok());

    let packets_received = output
        .lines()
        .find(|line| line.contains("packets transmitted"))
        .and_then(|line| line.split(',').nth(1))
        .and_then(|part| part.split_whitespace().next())
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(1);

    Some(PingResult {
        latency: Duration::from_millis(latency_ms.round() as u64),
        ttl,
        packets_sent: u32::from(packets_sent),
        packets_received,
    })
}

fn field_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(key).nth(1)?.split_whitespace().next()
}
