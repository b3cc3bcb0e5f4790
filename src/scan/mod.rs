pub mod coordinator;
pub mod ping;
pub mod port;

pub use coordinator::Coordinator;
pub use ping::{PingCheck, PingResult};
pub use port::TcpProber;
