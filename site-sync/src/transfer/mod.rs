//! Transfer progress reporting.

pub mod progress;

pub use progress::{format_bytes, ProgressTracker, TransferProgress};
