pub mod cli;
pub mod error;
pub mod logging;
pub mod report;
pub mod scan;
pub mod scanner;
pub mod services;
pub mod target;
pub mod types;

// Re-export key types and functions at the crate root
pub use error::ScanError;
pub use logging::{init_logging, get_log_file_path};
pub use report::{render, OutputFormat};
pub use scan::{Coordinator, PingCheck, TcpProber};
pub use scanner::Prober;
pub use target::Target;
pub use types::{PortRange, PortState, ProbeResult, ScanConfig, ScanReport};
