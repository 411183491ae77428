//! Site Sync Library
//!
//! Pulls hosted web applications into local site directories and pushes
//! them back, trying several remote identities, paths and transports in a
//! fixed order until one works.

pub mod config;
pub mod database;
pub mod engine;
pub mod fs;
pub mod guard;
pub mod remote;
pub mod resolver;
pub mod site;
pub mod transfer;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::{PullOptions, PullReport, PushOptions, PushReport, SyncEngine};
pub use utils::errors::{Result, SyncError};
