use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ScanError;
use crate::types::{PortState, ScanReport};

const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn render(report: &ScanReport, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => render_json(report),
    }
}

pub fn render_text(report: &ScanReport) -> String {
    TextReport(report).to_string()
}

/// Human-readable rendering of a report, ascending by port.
pub struct TextReport<'a>(pub &'a ScanReport);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let separator = "-".repeat(SEPARATOR_WIDTH);

        writeln!(f, "{}", separator)?;
        writeln!(f, "Scan report for {}", report.target)?;
        writeln!(f, "Port range: {}", report.range)?;
        writeln!(f, "Started: {}   Completed: {}",
            format_time(Some(report.started_at)), format_time(report.finished_at))?;
        writeln!(f, "{}", separator)?;

        if report.cancelled {
            writeln!(f, "Scan cancelled: partial results ({} of {} ports probed)",
                report.probed(), report.range.len())?;
        }
        writeln!(f, "Found {} open ports", report.open_count())?;
        if report.error_count() > 0 {
            writeln!(f, "Errors: {} ports could not be probed", report.error_count())?;
        }

        if report.open_count() == 0 {
            return writeln!(f, "No open ports found");
        }
        writeln!(f, "\nOpen Ports:")?;
        for result in report.open_ports() {
            let service = result.service.as_deref().unwrap_or(crate::services::UNKNOWN_SERVICE);
            writeln!(f, "  {}/tcp  {}", result.port, service)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    target: &'a str,
    ip: String,
    start_port: u16,
    end_port: u16,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    cancelled: bool,
    summary: JsonSummary,
    open_ports: Vec<JsonPort<'a>>,
    errors: Vec<JsonError<'a>>,
}

#[derive(Serialize)]
struct JsonSummary {
    probed: usize,
    open: usize,
    closed: usize,
    errors: usize,
    unscanned: usize,
}

#[derive(Serialize)]
struct JsonPort<'a> {
    port: u16,
    service: &'a str,
    state: PortState,
}

#[derive(Serialize)]
struct JsonError<'a> {
    port: u16,
    state: PortState,
    error: &'a str,
}

pub fn render_json(report: &ScanReport) -> serde_json::Result<String> {
    let doc = JsonReport {
        target: &report.target.original,
        ip: report.target.ip.to_string(),
        start_port: report.range.start(),
        end_port: report.range.end(),
        started_at: report.started_at,
        finished_at: report.finished_at,
        cancelled: report.cancelled,
        summary: JsonSummary {
            probed: report.probed(),
            open: report.open_count(),
            closed: report.closed_count(),
            errors: report.error_count(),
            unscanned: report.unscanned(),
        },
        open_ports: report
            .open_ports()
            .map(|r| JsonPort {
                port: r.port,
                service: r.service.as_deref().unwrap_or(crate::services::UNKNOWN_SERVICE),
                state: r.state,
            })
            .collect(),
        errors: report
            .errors()
            .map(|r| JsonError {
                port: r.port,
                state: r.state,
                error: r.error.as_deref().unwrap_or_default(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).map(|json| json + "\n")
}

/// Writes a rendered report to `path`, replacing any existing file.
pub fn write_report(path: &Path, rendered: &str) -> Result<(), ScanError> {
    fs::write(path, rendered).map_err(|source| ScanError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("[report] written: path={} bytes={}", path.display(), rendered.len());
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}
