use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

use crate::types::ProbeResult;

/// One connection attempt against one (ip, port) pair.
///
/// Implementations classify every failure into the returned
/// [`ProbeResult`]; a probe never aborts the scan it belongs to.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Prober identifier for logging
    fn name(&self) -> &'static str;

    async fn probe(&self, ip: IpAddr, port: u16, timeout: Duration) -> ProbeResult;
}
