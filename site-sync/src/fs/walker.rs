//! Local tree traversal for uploads.
//!
//! Entries come out parents-first, so directories can be created remotely
//! before their contents are written.

use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::transport::ExclusionSet;

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Report directories as well as files
    pub include_dirs: bool,

    /// Excluded subtrees are pruned, not just filtered
    pub exclusions: ExclusionSet,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes (0 for directories)
    pub size: u64,

    pub is_dir: bool,

    pub is_symlink: bool,
}

impl FileInfo {
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None if the symlink target is a directory or cannot be resolved.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let is_symlink = raw_metadata.is_symlink();

        let (size, is_dir) = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => (resolved.len(), false),
                Err(_) => return Ok(None),
            }
        } else if raw_metadata.is_dir() {
            (0, true)
        } else {
            (raw_metadata.len(), false)
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
            is_dir,
            is_symlink,
        }))
    }

    /// The relative path with `/` separators, as used on the remote side.
    pub fn remote_relative(&self) -> String {
        slash_path(&self.relative_path)
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree, skipping the root itself and excluded entries.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            !options.exclusions.is_excluded(&slash_path(relative))
        });

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() && !options.include_dirs {
            continue;
        }

        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            entries.push(info);
        }
    }

    Ok(entries)
}

/// Total size of the files in a walk result
pub fn calculate_total_size(entries: &[FileInfo]) -> u64 {
    entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum()
}
