use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScanError;
use crate::report::OutputFormat;
use crate::types::{PortRange, ScanConfig, DEFAULT_CONCURRENCY, DEFAULT_GRACE_MS, DEFAULT_TIMEOUT_SECS};

#[derive(Parser, Debug)]
#[command(name = "tcpscan")]
#[command(about = "Concurrent TCP connect port scanner")]
#[command(version)]
pub struct Cli {
    /// Target to scan (hostname, IP address, or URL)
    pub target: String,

    /// First port of the range (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub start_port: u16,

    /// Last port of the range, inclusive (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub end_port: u16,

    /// Maximum number of probes in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub threads: usize,

    /// Per-probe connect timeout in seconds (fractions allowed)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,

    /// Milliseconds in-flight probes may keep running after Ctrl+C
    #[arg(long, default_value_t = DEFAULT_GRACE_MS)]
    pub grace: u64,

    /// Check the host answers ping before scanning
    #[arg(long)]
    pub ping: bool,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// No progress bar or live open-port lines
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn scan_config(&self) -> Result<ScanConfig, ScanError> {
        let range = PortRange::new(self.start_port, self.end_port)?;
        Ok(ScanConfig::new(range)
            .with_concurrency(self.threads)?
            .with_timeout_secs(self.timeout)?
            .with_grace(Duration::from_millis(self.grace)))
    }

    pub fn output_format(&self) -> OutputFormat {
        if self.json { OutputFormat::Json } else { OutputFormat::Text }
    }

    /// Live progress only makes sense for text on a terminal-facing run.
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
