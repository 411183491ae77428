//! Recursive SFTP copy with a password identity.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Sftp;

use super::{AttemptFailure, Direction, ExclusionSet, FailureKind, TransferJob, TransferMethod, Transport};
use crate::fs::walker::{calculate_total_size, walk_directory, WalkOptions};
use crate::remote::session;
use crate::resolver::PathCandidate;
use crate::transfer::{format_bytes, ProgressTracker};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct SecureCopyTransport;

impl SecureCopyTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SecureCopyTransport {
    fn method(&self) -> TransferMethod {
        TransferMethod::SecureCopy
    }

    async fn transfer(
        &self,
        job: &TransferJob,
        candidate: &PathCandidate,
    ) -> Result<(), AttemptFailure> {
        let Some(password) = candidate.identity.password.clone() else {
            return Err(AttemptFailure::new(FailureKind::Access, "no password for sftp"));
        };

        let job = job.clone();
        let user = candidate.identity.user.clone();
        let remote_root = session::sftp_path(&candidate.remote_path);

        tracing::info!(user = %user, path = %candidate.remote_path, direction = ?job.direction, "Copying over sftp");

        tokio::task::spawn_blocking(move || {
            let session = session::open(&job.endpoint, &user, &password)?;
            let sftp = session.sftp().map_err(|e| {
                // Accounts without the sftp subsystem land here.
                AttemptFailure::new(FailureKind::Access, e.to_string())
            })?;

            ensure_remote_dir(&sftp, &remote_root)?;
            match job.direction {
                Direction::Pull => download(&sftp, &remote_root, &job.local_root, &job.exclusions),
                Direction::Push => upload(&sftp, &job.local_root, &remote_root, &job.exclusions),
            }
        })
        .await
        .map_err(|e| AttemptFailure::new(FailureKind::Other, e.to_string()))?
    }
}

fn ensure_remote_dir(sftp: &Sftp, remote_root: &str) -> Result<(), AttemptFailure> {
    match sftp.stat(Path::new(remote_root)) {
        Ok(stat) if stat.is_dir() => Ok(()),
        Ok(_) => Err(AttemptFailure::new(
            FailureKind::Missing,
            format!("{remote_root}: not a directory"),
        )),
        Err(e) => Err(AttemptFailure::new(
            FailureKind::Missing,
            format!("{remote_root}: {e}"),
        )),
    }
}

fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() || base == "." {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn download(
    sftp: &Sftp,
    remote_root: &str,
    local_root: &Path,
    exclusions: &ExclusionSet,
) -> Result<(), AttemptFailure> {
    std::fs::create_dir_all(local_root)?;
    let mut tracker = ProgressTracker::new(None, REPORT_INTERVAL);

    // Explicit stack: (remote dir, relative prefix)
    let mut pending = vec![(remote_root.to_string(), String::new())];
    while let Some((remote_dir, prefix)) = pending.pop() {
        let entries = sftp
            .readdir(Path::new(&remote_dir))
            .map_err(|e| AttemptFailure::new(FailureKind::Other, format!("{remote_dir}: {e}")))?;

        for (path, stat) in entries {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            let relative = join_relative(&prefix, &name);
            if exclusions.is_excluded(&relative) {
                tracing::trace!(path = %relative, "Excluded");
                continue;
            }

            let remote_path = join_remote(&remote_dir, &name);
            let local_path = local_root.join(&relative);

            let stat = if stat.file_type().is_symlink() {
                match sftp.stat(Path::new(&remote_path)) {
                    // Linked directories are skipped to avoid cycles.
                    Ok(target) if target.is_dir() => continue,
                    Ok(target) => target,
                    Err(_) => continue,
                }
            } else {
                stat
            };

            if stat.is_dir() {
                std::fs::create_dir_all(&local_path)?;
                pending.push((remote_path, relative));
            } else if stat.is_file() {
                let mut remote_file = sftp.open(Path::new(&remote_path)).map_err(|e| {
                    AttemptFailure::new(FailureKind::Other, format!("{remote_path}: {e}"))
                })?;
                let mut local_file = File::create(&local_path)?;
                let bytes = io::copy(&mut remote_file, &mut local_file)?;

                if let Some(progress) = tracker.file_done(bytes) {
                    tracing::info!("sftp download: {}", progress.summary());
                }
            }
        }
    }

    let done = tracker.finish();
    tracing::info!(
        files = done.files_done,
        bytes = %format_bytes(done.transferred_bytes),
        "sftp download complete"
    );
    Ok(())
}

fn upload(
    sftp: &Sftp,
    local_root: &Path,
    remote_root: &str,
    exclusions: &ExclusionSet,
) -> Result<(), AttemptFailure> {
    let entries = walk_directory(
        local_root,
        &WalkOptions {
            include_dirs: true,
            exclusions: exclusions.clone(),
            ..WalkOptions::default()
        },
    )?;
    let mut tracker = ProgressTracker::new(Some(calculate_total_size(&entries)), REPORT_INTERVAL);

    for entry in &entries {
        let remote_path = PathBuf::from(join_remote(remote_root, &entry.remote_relative()));

        if entry.is_dir {
            if sftp.stat(&remote_path).is_err() {
                sftp.mkdir(&remote_path, 0o755).map_err(|e| {
                    AttemptFailure::new(FailureKind::Access, format!("{}: {e}", remote_path.display()))
                })?;
            }
            continue;
        }

        let mut local_file = File::open(&entry.path)?;
        let mut remote_file = sftp.create(&remote_path).map_err(|e| {
            AttemptFailure::new(FailureKind::Access, format!("{}: {e}", remote_path.display()))
        })?;
        let bytes = io::copy(&mut local_file, &mut remote_file)?;

        if let Some(progress) = tracker.file_done(bytes) {
            tracing::info!("sftp upload: {}", progress.summary());
        }
    }

    let done = tracker.finish();
    tracing::info!(
        files = done.files_done,
        bytes = %format_bytes(done.transferred_bytes),
        "sftp upload complete"
    );
    Ok(())
}
