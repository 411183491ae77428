//! Incremental mirroring with rsync over SSH.

use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::{AttemptFailure, Direction, TransferJob, TransferMethod, Transport};
use crate::resolver::PathCandidate;

static RSYNC_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rsync\s+version\s+v?(\d+)\.(\d+)(?:\.(\d+))?").expect("rsync version regex is valid")
});

/// First release with `--info=progress2`.
const PROGRESS2_SINCE: (u32, u32, u32) = (3, 1, 0);

pub fn parse_rsync_version(text: &str) -> Option<(u32, u32, u32)> {
    let caps = RSYNC_VERSION.captures(text)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok());
    Some((part(1)?, part(2)?, part(3).unwrap_or(0)))
}

/// Whole-transfer progress on newer rsync, per-file progress otherwise.
pub fn progress_flag(version: Option<(u32, u32, u32)>) -> &'static str {
    match version {
        Some(v) if v >= PROGRESS2_SINCE => "--info=progress2",
        _ => "--progress",
    }
}

#[derive(Default)]
pub struct MirrorTransport {
    progress: OnceCell<&'static str>,
}

impl MirrorTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn progress_flag(&self) -> &'static str {
        *self
            .progress
            .get_or_init(|| async {
                let version = match Command::new("rsync").arg("--version").output().await {
                    Ok(out) => parse_rsync_version(&String::from_utf8_lossy(&out.stdout)),
                    Err(e) => {
                        tracing::debug!(error = %e, "rsync --version failed");
                        None
                    }
                };
                tracing::debug!(?version, "Detected rsync version");
                progress_flag(version)
            })
            .await
    }

    fn remote_target(job: &TransferJob, candidate: &PathCandidate) -> String {
        let path = if candidate.remote_path.ends_with('/') {
            candidate.remote_path.clone()
        } else {
            format!("{}/", candidate.remote_path)
        };
        format!("{}:{}", job.endpoint.login(&candidate.identity.user), path)
    }

    /// Arguments after the program name.
    pub fn build_args(
        job: &TransferJob,
        candidate: &PathCandidate,
        progress: &str,
        batch: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "-az".to_string(),
            "-h".to_string(),
            progress.to_string(),
            "-e".to_string(),
            job.endpoint.ssh_command(batch),
            "--delete".to_string(),
        ];
        args.extend(job.exclusions.rsync_args());

        let local = format!("{}/", job.local_root.display());
        let remote = Self::remote_target(job, candidate);
        match job.direction {
            Direction::Pull => {
                args.push(remote);
                args.push(local);
            }
            Direction::Push => {
                args.push(local);
                args.push(remote);
            }
        }
        args
    }

    /// Run rsync, through `sshpass` when the identity has a password.
    async fn rsync(
        &self,
        candidate: &PathCandidate,
        args_for: impl Fn(bool) -> Vec<String>,
        inherit_stdout: bool,
    ) -> Result<(), AttemptFailure> {
        let stdout = || {
            if inherit_stdout {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        if let Some(password) = &candidate.identity.password {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e")
                .arg("rsync")
                .args(args_for(false))
                .env("SSHPASS", password.expose())
                .stdin(Stdio::null())
                .stdout(stdout())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match cmd.output().await {
                Ok(out) if out.status.success() => return Ok(()),
                Ok(out) => {
                    return Err(AttemptFailure::from_sshpass_exit(
                        "rsync",
                        out.status.code(),
                        &String::from_utf8_lossy(&out.stderr),
                    ))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("sshpass not installed, falling back to key authentication");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let out = Command::new("rsync")
            .args(args_for(true))
            .stdin(Stdio::null())
            .stdout(stdout())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AttemptFailure::from_spawn("rsync", e))?;

        if out.status.success() {
            Ok(())
        } else {
            Err(AttemptFailure::from_exit(
                "rsync",
                out.status.code(),
                &String::from_utf8_lossy(&out.stderr),
            ))
        }
    }
}

#[async_trait]
impl Transport for MirrorTransport {
    fn method(&self) -> TransferMethod {
        TransferMethod::Sync
    }

    async fn transfer(
        &self,
        job: &TransferJob,
        candidate: &PathCandidate,
    ) -> Result<(), AttemptFailure> {
        if job.direction == Direction::Push {
            // A read-only listing first, so a wrong candidate is never created remotely.
            let remote = Self::remote_target(job, candidate);
            self.rsync(
                candidate,
                |batch| {
                    vec![
                        "--list-only".to_string(),
                        "-e".to_string(),
                        job.endpoint.ssh_command(batch),
                        remote.clone(),
                    ]
                },
                false,
            )
            .await?;
        } else {
            tokio::fs::create_dir_all(&job.local_root).await?;
        }

        let progress = self.progress_flag().await;
        tracing::info!(
            user = %candidate.identity.user,
            path = %candidate.remote_path,
            direction = ?job.direction,
            "Mirroring with rsync"
        );
        self.rsync(
            candidate,
            |batch| Self::build_args(job, candidate, progress, batch),
            true,
        )
        .await
    }
}
