pub mod alerts;
pub mod api;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod watch;

pub use config::Config;
pub use error::{RemoteScanError, Result};
