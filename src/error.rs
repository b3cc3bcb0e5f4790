use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the scanner library.
///
/// Only `Argument`, `Resolution` and `HostDown` are fatal to a run. `Probe`
/// describes a single port and is recorded on that port's result instead of
/// being propagated.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("could not resolve {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("probe of port {port} failed: {reason}")]
    Probe { port: u16, reason: String },

    #[error("host {target} appears to be down: {reason}")]
    HostDown { target: String, reason: String },

    #[error("could not write report to {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ScanError::Argument(_) => 2,
            _ => 1,
        }
    }
}
