//! Park Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other park crates:
//! - Client configuration (backend URL, endpoint candidates, reconnect policy)
//! - A single error type covering probe, transport, parse and send failures
//! - Structured logging with tracing
//! - Platform directory lookup and common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{ParkError, ParkResult};
pub use logging::init_logging;
