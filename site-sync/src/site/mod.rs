//! Local site directories and the state kept inside them.
//!
//! ```text
//! <site>/
//!   .cw/meta.json      manifest
//!   .cw/db.sql[.gz]    last database dump
//!   wp/                synchronized file tree
//! ```

pub mod layout;
pub mod manifest;

pub use layout::{read_env_file, remove_site, resolve_site_arg, site_slug, slugify, SiteLayout};
pub use manifest::{AppRef, ServerRef, SiteManifest, TransferRecord};

pub const STATE_DIR: &str = ".cw";
pub const FILES_DIR: &str = "wp";
pub const MANIFEST_FILE: &str = "meta.json";
pub const DUMP_FILE: &str = "db.sql";
pub const DUMP_GZ_FILE: &str = "db.sql.gz";
pub const PUSH_DUMP_FILE: &str = "tmp_push.sql";
pub const ENV_FILE: &str = ".env";
