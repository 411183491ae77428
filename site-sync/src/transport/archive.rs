//! Single-stream tar.gz download over a remote shell.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{AttemptFailure, Direction, FailureKind, TransferJob, TransferMethod, Transport};
use crate::remote::shell_for;
use crate::resolver::PathCandidate;
use crate::utils::shell::{quote, quote_path, split_dir};

const PART_FILE: &str = "files.tar.gz.part";

#[derive(Debug, Default)]
pub struct ArchiveTransport;

impl ArchiveTransport {
    pub fn new() -> Self {
        Self
    }

    /// Remote command writing a gzip'd tar of the candidate to stdout.
    ///
    /// The archive holds one top-level entry (the candidate's leaf directory).
    pub fn remote_command(job: &TransferJob, remote_path: &str) -> String {
        let (base, leaf) = split_dir(remote_path);
        let base_q = quote_path(&base);
        let leaf_q = quote(&leaf);
        let excludes = job
            .exclusions
            .tar_args(&leaf)
            .iter()
            .map(|a| quote(a))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "test -d {base_q}/{leaf_q} || {{ echo {leaf_q}': No such file or directory' >&2; exit 2; }}; \
             tar -C {base_q} {excludes} -czf - {leaf_q}"
        )
    }

    async fn extract(job: &TransferJob, archive: &std::path::Path) -> Result<(), AttemptFailure> {
        tokio::fs::create_dir_all(&job.local_root).await?;

        let out = Command::new("tar")
            .arg("-xzf")
            .arg(archive)
            .arg("-C")
            .arg(&job.local_root)
            .arg("--strip-components=1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AttemptFailure::from_spawn("tar", e))?;

        if out.status.success() {
            Ok(())
        } else {
            // Anything going wrong while unpacking is on this side.
            let failure = AttemptFailure::from_exit(
                "tar",
                out.status.code(),
                &String::from_utf8_lossy(&out.stderr),
            );
            Err(AttemptFailure::new(FailureKind::Local, failure.detail))
        }
    }
}

#[async_trait]
impl Transport for ArchiveTransport {
    fn method(&self) -> TransferMethod {
        TransferMethod::Archive
    }

    async fn transfer(
        &self,
        job: &TransferJob,
        candidate: &PathCandidate,
    ) -> Result<(), AttemptFailure> {
        if job.direction == Direction::Push {
            return Err(AttemptFailure::new(
                FailureKind::Other,
                "archive transfer only downloads",
            ));
        }

        tokio::fs::create_dir_all(&job.staging_dir).await?;
        let part = job.staging_dir.join(PART_FILE);
        let shell = shell_for(&job.endpoint, &candidate.identity);

        tracing::info!(
            user = %candidate.identity.user,
            path = %candidate.remote_path,
            "Streaming archive"
        );

        let result = async {
            let output = shell
                .run_to_file(&Self::remote_command(job, &candidate.remote_path), &part)
                .await?;
            if !output.success() {
                return Err(AttemptFailure::from_exit(
                    "tar",
                    Some(output.code),
                    &output.stderr,
                ));
            }
            Self::extract(job, &part).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %part.display(), error = %e, "Failed to remove partial archive");
            }
        }
        result
    }
}
