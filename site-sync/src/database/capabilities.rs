//! Feature detection for the remote `mysqldump`.

/// Flags every dump uses. Each table is dropped and recreated on import, so
/// restoring the same dump twice leaves the same data.
pub const BASE_DUMP_FLAGS: &[&str] = &[
    "--single-transaction",
    "--quick",
    "--add-drop-table",
    "--default-character-set=utf8mb4",
];

/// Optional flags the remote dump tool advertises in its `--help` text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpCapabilities {
    pub set_gtid_purged: bool,
    pub column_statistics: bool,
}

impl DumpCapabilities {
    pub fn from_help(help: &str) -> Self {
        let help = help.to_lowercase();
        Self {
            set_gtid_purged: help.contains("set-gtid-purged"),
            column_statistics: help.contains("column-statistics"),
        }
    }

    pub fn dump_flags(&self) -> Vec<&'static str> {
        let mut flags = BASE_DUMP_FLAGS.to_vec();
        if self.set_gtid_purged {
            flags.push("--set-gtid-purged=OFF");
        }
        if self.column_statistics {
            flags.push("--column-statistics=0");
        }
        flags
    }
}
