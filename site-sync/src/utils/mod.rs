//! Utility modules for the sync engine.

pub mod errors;
pub mod logger;
pub mod shell;

pub use errors::{Result, SyncError};
