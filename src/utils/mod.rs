//! Utility modules

pub mod logger;
pub mod pidfile;
pub mod signal;

pub use logger::{init_logger, LogLevel};
pub use pidfile::{PidFile, PidFileError};
pub use signal::wait_for_shutdown;
