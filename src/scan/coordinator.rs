use futures::FutureExt;
use indicatif::ProgressBar;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::scanner::Prober;
use crate::target::Target;
use crate::types::{ProbeResult, ScanConfig, ScanReport};

/// Fans probes out over a port range and folds the results into one report.
///
/// At most `config.concurrency` probes are in flight at once. The dispatcher
/// waits for a free slot before starting the next port, so nothing is dropped
/// and nothing queues beyond the budget.
pub struct Coordinator {
    prober: Arc<dyn Prober>,
    config: ScanConfig,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl Coordinator {
    pub fn new(prober: Arc<dyn Prober>, config: ScanConfig) -> Self {
        log::debug!("[scan::coordinator] new: prober={} range={} concurrency={} timeout={}ms grace={}ms",
            prober.name(), config.range, config.concurrency,
            config.timeout.as_millis(), config.grace.as_millis());
        Self {
            prober,
            config,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress bar ticked once per completed probe; open ports are printed
    /// above it as they are found.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Probes every port of the configured range against `target`.
    ///
    /// Never fails: per-port errors are recorded on the port, and a
    /// cancellation returns whatever had completed with `cancelled` set.
    pub async fn scan(&self, target: Target) -> ScanReport {
        let range = self.config.range;
        let ip = target.ip;
        log::info!("[scan::coordinator] scan_starting: target={} range={} ports={}",
            target, range, range.len());

        let scan_start = Instant::now();
        let report = Arc::new(Mutex::new(ScanReport::new(target, range)));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        for port in range.ports() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log::info!("[scan::coordinator] dispatch_stopped: dispatched={} remaining={}",
                        dispatched, range.len() - dispatched);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            dispatched += 1;

            let prober = Arc::clone(&self.prober);
            let report = Arc::clone(&report);
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            let tcp_timeout = self.config.timeout;
            let grace = self.config.grace;

            tasks.spawn(async move {
                let _permit = permit;
                let probe = AssertUnwindSafe(prober.probe(ip, port, tcp_timeout))
                    .catch_unwind()
                    .map(|outcome| outcome.unwrap_or_else(|_| {
                        log::error!("[scan::coordinator] probe_panicked: port={}", port);
                        ProbeResult::error(port, "probe panicked")
                    }));

                // After a stop request, in-flight probes get `grace` to finish.
                let result = tokio::select! {
                    result = probe => result,
                    _ = async { cancel.cancelled().await; sleep(grace).await } => {
                        log::debug!("[scan::coordinator] probe_abandoned: port={}", port);
                        return;
                    }
                };

                if let Some(progress) = &progress {
                    if let Some(service) = result.service.as_deref().filter(|_| result.is_open()) {
                        progress.println(format!("Port {}: Open ({})", port, service));
                    }
                    progress.inc(1);
                }
                report.lock().await.record(result);
            });

            // Reap finished tasks so the set stays around the budget size
            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }

        let mut report = match Arc::try_unwrap(report) {
            Ok(report) => report.into_inner(),
            Err(shared) => {
                let guard = shared.lock().await;
                guard.clone()
            }
        };
        report.finish(self.cancel.is_cancelled() && report.unscanned() > 0);

        log::info!("[scan::coordinator] scan_completed: duration={}ms probed={} open={} closed={} errors={} cancelled={}",
            scan_start.elapsed().as_millis(), report.probed(), report.open_count(),
            report.closed_count(), report.error_count(), report.cancelled);
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        report
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        log::error!("[scan::coordinator] probe_task_failed: error={}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::port::TcpProber;
    use crate::types::{PortRange, PortState};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Prober that answers from a fixed set of open ports and records how
    /// many probes overlap.
    struct MockProber {
        open: HashSet<u16>,
        errors: HashSet<u16>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: StdMutex<Vec<u16>>,
    }

    impl MockProber {
        fn new(open: &[u16], delay: Duration) -> Self {
            Self {
                open: open.iter().copied().collect(),
                errors: HashSet::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn with_errors(mut self, errors: &[u16]) -> Self {
            self.errors = errors.iter().copied().collect();
            self
        }

        fn calls(&self) -> Vec<u16> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn probe(&self, _ip: IpAddr, port: u16, _timeout: Duration) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(port);

            // Vary completion order across ports
            let jitter = Duration::from_micros(u64::from(port % 7) * 300);
            sleep(self.delay + jitter).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.open.contains(&port) {
                ProbeResult::open(port, crate::services::lookup(port))
            } else if self.errors.contains(&port) {
                ProbeResult::error(port, "network unreachable")
            } else {
                ProbeResult::closed(port)
            }
        }
    }

    fn config(start: u16, end: u16, concurrency: usize) -> ScanConfig {
        ScanConfig::new(PortRange::new(start, end).unwrap())
            .with_concurrency(concurrency)
            .unwrap()
            .with_grace(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_every_port_probed_exactly_once() {
        let prober = Arc::new(MockProber::new(&[22, 80], Duration::from_millis(1)));
        let coordinator = Coordinator::new(prober.clone(), config(1, 100, 16));

        let report = coordinator.scan(Target::from_ip(LOCALHOST)).await;

        let mut calls = prober.calls();
        assert_eq!(calls.len(), 100);
        calls.sort_unstable();
        calls.dedup();
        assert_eq!(calls.len(), 100);

        assert_eq!(report.probed(), 100);
        assert_eq!(report.unscanned(), 0);
        assert!(!report.cancelled);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_open_ports_reported_in_order() {
        let prober = Arc::new(MockProber::new(&[80, 22], Duration::from_millis(1)));
        let report = Coordinator::new(prober, config(1, 100, 32))
            .scan(Target::from_ip(LOCALHOST))
            .await;

        let open: Vec<(u16, &str)> = report
            .open_ports()
            .map(|r| (r.port, r.service.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(open, vec![(22, "ssh"), (80, "http")]);
        assert_eq!(report.closed_count(), 98);
    }

    #[tokio::test]
    async fn test_concurrency_budget_respected() {
        let prober = Arc::new(MockProber::new(&[], Duration::from_millis(5)));
        Coordinator::new(prober.clone(), config(1, 200, 10))
            .scan(Target::from_ip(LOCALHOST))
            .await;

        let max = prober.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 10, "max in flight was {}", max);
        assert!(max > 1, "probes never overlapped");
    }

    #[tokio::test]
    async fn test_budget_of_one_serializes_probes() {
        let prober = Arc::new(MockProber::new(&[], Duration::from_millis(1)));
        let report = Coordinator::new(prober.clone(), config(1000, 1049, 1))
            .scan(Target::from_ip(LOCALHOST))
            .await;

        assert_eq!(prober.calls().len(), 50);
        assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), 1);
        // Strictly one at a time also means strictly in dispatch order
        assert_eq!(prober.calls(), (1000..=1049).collect::<Vec<_>>());
        assert_eq!(report.probed(), 50);
    }

    #[tokio::test]
    async fn test_probe_errors_are_isolated() {
        let prober = Arc::new(MockProber::new(&[22], Duration::ZERO).with_errors(&[5, 6]));
        let report = Coordinator::new(prober, config(1, 30, 8))
            .scan(Target::from_ip(LOCALHOST))
            .await;

        assert_eq!(report.probed(), 30);
        assert_eq!(report.error_count(), 2);
        assert_eq!(report.get(5).unwrap().state, PortState::Error);
        assert_eq!(report.open_count(), 1);
    }

    #[tokio::test]
    async fn test_results_identical_across_completion_orders() {
        let open = [3, 17, 42, 99];
        let mut rendered = Vec::new();
        for concurrency in [1, 4, 64] {
            let prober = Arc::new(MockProber::new(&open, Duration::from_millis(1)));
            let report = Coordinator::new(prober, config(1, 100, concurrency))
                .scan(Target::from_ip(LOCALHOST))
                .await;
            rendered.push(report.open_ports().cloned().collect::<Vec<_>>());
        }
        assert!(rendered.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_cancel_before_start_probes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let prober = Arc::new(MockProber::new(&[22], Duration::from_millis(1)));
        let report = Coordinator::new(prober.clone(), config(1, 100, 10))
            .with_cancellation(cancel)
            .scan(Target::from_ip(LOCALHOST))
            .await;

        assert!(prober.calls().is_empty());
        assert_eq!(report.probed(), 0);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_mid_scan_returns_partial_report() {
        let cancel = CancellationToken::new();
        let prober = Arc::new(MockProber::new(&[2, 500], Duration::from_millis(20)));
        let coordinator = Coordinator::new(prober.clone(), config(1, 1000, 4))
            .with_cancellation(cancel.clone());

        let trigger = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let report = coordinator.scan(Target::from_ip(LOCALHOST)).await;
        trigger.await.unwrap();

        assert!(report.cancelled);
        assert!(report.probed() > 0);
        assert!(report.probed() < 1000);
        assert_eq!(report.probed() + report.unscanned(), 1000);
        // Only ports whose probes finished are in the report
        assert!(report.results().all(|r| prober.calls().contains(&r.port)));
        assert!(report.get(500).is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_bounded_by_grace_for_slow_probes() {
        let cancel = CancellationToken::new();
        let prober = Arc::new(MockProber::new(&[], Duration::from_secs(30)));
        let coordinator = Coordinator::new(prober.clone(), config(1, 10, 10))
            .with_cancellation(cancel.clone());

        let trigger = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let report = coordinator.scan(Target::from_ip(LOCALHOST)).await;
        trigger.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.probed(), 0);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_scan_loopback_with_tcp_prober() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let start = open_port.saturating_sub(2).max(1);
        let end = open_port.saturating_add(2);

        let config = config(start, end, 5).with_timeout_secs(0.5).unwrap();
        let report = Coordinator::new(Arc::new(TcpProber::new()), config)
            .scan(Target::from_ip(LOCALHOST))
            .await;

        assert_eq!(report.probed(), usize::from(end - start) + 1);
        assert!(report.open_ports().any(|r| r.port == open_port));
    }
}
