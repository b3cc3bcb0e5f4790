use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::ScanError;
use crate::target::Target;

pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.0;
pub const DEFAULT_GRACE_MS: u64 = 500;

/// Inclusive range of TCP ports, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ScanError> {
        if start == 0 || end == 0 {
            return Err(ScanError::Argument(format!(
                "ports must be between 1 and 65535 (got {}-{})",
                start, end
            )));
        }
        if start > end {
            return Err(ScanError::Argument(format!(
                "start port {} is greater than end port {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    // A validated range always holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Error,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Error => "error",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing a single port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub state: PortState,
    /// Only set for open ports.
    pub service: Option<String>,
    /// Transport error text, only set for `PortState::Error`.
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn open(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            state: PortState::Open,
            service: Some(service.into()),
            error: None,
        }
    }

    pub fn closed(port: u16) -> Self {
        Self {
            port,
            state: PortState::Closed,
            service: None,
            error: None,
        }
    }

    pub fn error(port: u16, reason: impl Into<String>) -> Self {
        Self {
            port,
            state: PortState::Error,
            service: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Scan-wide settings, fixed for the duration of a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub range: PortRange,
    pub concurrency: usize,
    pub timeout: Duration,
    pub grace: Duration,
}

impl ScanConfig {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            grace: Duration::from_millis(DEFAULT_GRACE_MS),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ScanError> {
        if concurrency == 0 {
            return Err(ScanError::Argument("--threads must be at least 1".into()));
        }
        if concurrency > Semaphore::MAX_PERMITS {
            return Err(ScanError::Argument(format!(
                "--threads must be at most {} (got {})",
                Semaphore::MAX_PERMITS, concurrency
            )));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn with_timeout_secs(mut self, secs: f64) -> Result<Self, ScanError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ScanError::Argument(format!(
                "--timeout must be a positive number of seconds (got {})",
                secs
            )));
        }
        self.timeout = Duration::try_from_secs_f64(secs)
            .map_err(|e| ScanError::Argument(format!("--timeout {}: {}", secs, e)))?;
        Ok(self)
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// Aggregated outcome of a scan.
///
/// Holds exactly one `ProbeResult` per probed port. Iteration is always in
/// ascending port order, whatever order the probes completed in.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub target: Target,
    pub range: PortRange,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    results: BTreeMap<u16, ProbeResult>,
}

impl ScanReport {
    pub fn new(target: Target, range: PortRange) -> Self {
        Self {
            target,
            range,
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            results: BTreeMap::new(),
        }
    }

    /// Records a probe outcome. Returns `false` and keeps the existing entry
    /// if the port was already recorded or lies outside the scanned range.
    pub fn record(&mut self, result: ProbeResult) -> bool {
        if !self.range.contains(result.port) {
            log::warn!("[types] record_out_of_range: port={} range={}", result.port, self.range);
            return false;
        }
        if self.results.contains_key(&result.port) {
            log::warn!("[types] record_duplicate: port={}", result.port);
            return false;
        }
        self.results.insert(result.port, result);
        true
    }

    pub fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn get(&self, port: u16) -> Option<&ProbeResult> {
        self.results.get(&port)
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.values()
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.values().filter(|r| r.is_open())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.values().filter(|r| r.state == PortState::Error)
    }

    pub fn probed(&self) -> usize {
        self.results.len()
    }

    pub fn open_count(&self) -> usize {
        self.open_ports().count()
    }

    pub fn closed_count(&self) -> usize {
        self.results.values().filter(|r| r.state == PortState::Closed).count()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Ports in the range that never got a result.
    pub fn unscanned(&self) -> usize {
        self.range.len() - self.probed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> Target {
        Target::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn test_port_range_validation() {
        assert!(PortRange::new(1, 65535).is_ok());
        assert!(PortRange::new(5000, 5000).is_ok());
        assert!(matches!(PortRange::new(0, 10), Err(ScanError::Argument(_))));
        assert!(matches!(PortRange::new(100, 10), Err(ScanError::Argument(_))));
    }

    #[test]
    fn test_port_range_len() {
        assert_eq!(PortRange::new(1, 100).unwrap().len(), 100);
        assert_eq!(PortRange::new(5000, 5000).unwrap().len(), 1);
        assert_eq!(PortRange::new(1, 65535).unwrap().len(), 65535);
        assert_eq!(PortRange::new(1, 65535).unwrap().ports().count(), 65535);
    }

    #[test]
    fn test_scan_config_validation() {
        let range = PortRange::new(1, 10).unwrap();
        let config = ScanConfig::new(range);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.timeout, Duration::from_secs(1));

        assert!(ScanConfig::new(range).with_concurrency(0).is_err());
        assert!(matches!(
            ScanConfig::new(range).with_concurrency(usize::MAX),
            Err(ScanError::Argument(_))
        ));
        assert!(ScanConfig::new(range).with_concurrency(Semaphore::MAX_PERMITS).is_ok());
        assert!(ScanConfig::new(range).with_timeout_secs(0.0).is_err());
        assert!(ScanConfig::new(range).with_timeout_secs(f64::NAN).is_err());

        let config = ScanConfig::new(range).with_timeout_secs(0.25).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_report_rejects_duplicates() {
        let mut report = ScanReport::new(localhost(), PortRange::new(1, 100).unwrap());
        assert!(report.record(ProbeResult::open(22, "ssh")));
        assert!(!report.record(ProbeResult::closed(22)));
        assert!(!report.record(ProbeResult::closed(101)));

        assert_eq!(report.probed(), 1);
        assert_eq!(report.get(22).unwrap().state, PortState::Open);
    }

    #[test]
    fn test_report_orders_by_port() {
        let mut report = ScanReport::new(localhost(), PortRange::new(1, 100).unwrap());
        report.record(ProbeResult::open(80, "http"));
        report.record(ProbeResult::closed(50));
        report.record(ProbeResult::open(22, "ssh"));
        report.record(ProbeResult::error(7, "network unreachable"));

        let open: Vec<u16> = report.open_ports().map(|r| r.port).collect();
        assert_eq!(open, vec![22, 80]);
        assert_eq!(report.closed_count(), 1);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.unscanned(), 96);
    }
}
