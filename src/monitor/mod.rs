//! Event coalescing: filter raw changes, fold them into one pending record
//! per scan, and release records under the quiet-period / global-interval
//! throttle.

pub mod aggregator;
pub mod filter;
pub mod scheduler;

pub use aggregator::{
    display_folder, AddOutcome, ChangeEvent, Effect, Monitor, MonitorPath, PendingRecord, Selection,
};
pub use filter::{normalize_extension, EventFilter};
pub use scheduler::{Dispatch, Scheduler, POLL_INTERVAL};
