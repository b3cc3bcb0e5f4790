use eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::sync::Arc;
use tcpscan::cli::Cli;
use tcpscan::{report, Coordinator, PingCheck, ScanError, TcpProber, Target};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = tcpscan::cli::parse();

    // Initialize logging first
    if let Err(e) = tcpscan::init_logging(cli.verbose) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    log::info!("================================================================================");
    log::info!("NEW SCAN SESSION STARTING: target={} ports={}-{}",
        cli.target, cli.start_port, cli.end_port);
    log::info!("================================================================================");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[main] fatal: {:?}", e);
            eprintln!("Error: {:?}", e);
            let code = e.downcast_ref::<ScanError>().map(ScanError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.scan_config()?;

    let target = Target::resolve(&cli.target).await?;
    if cli.show_progress() {
        eprintln!("Scanning {} ports {} ({} probes in flight max)",
            target, config.range, config.concurrency);
    }

    if cli.ping {
        PingCheck::default()
            .check(target.ip)
            .await
            .wrap_err("Liveness check failed, not scanning")?;
    }

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nScan interrupted, waiting for in-flight probes...");
            log::warn!("[main] interrupt_received");
            cancel_for_signal.cancel();
        }
    });

    let port_count = config.range.len();
    let mut coordinator = Coordinator::new(Arc::new(TcpProber::new()), config)
        .with_cancellation(cancel);
    if cli.show_progress() {
        coordinator = coordinator.with_progress(progress_bar(port_count));
    }

    let scan_report = coordinator.scan(target).await;

    let rendered = report::render(&scan_report, cli.output_format())
        .wrap_err("Failed to render scan report")?;
    match &cli.output {
        Some(path) => report::write_report(path, &rendered)?,
        None => print!("{}", rendered),
    }

    Ok(())
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ports ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}
