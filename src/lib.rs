pub mod archive;
pub mod config;
pub mod errors;
pub mod output;
pub mod pool;
pub mod rpath;
pub mod session;
pub mod shell;
pub mod telemetry;
pub mod tools;
pub mod transfer;
pub mod transport;

pub use errors::{GatewayError, Result};
pub use session::Session;
