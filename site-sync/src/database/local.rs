//! The site's local database container, driven through `docker compose`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_compression::tokio::bufread::GzipDecoder;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

use super::capabilities::BASE_DUMP_FLAGS;
use super::{DatabaseDump, DumpEncoding};
use crate::config::DatabaseConfig;
use crate::utils::shell::quote;
use crate::utils::{Result, SyncError};

const WP_CLI_COMMON: &[&str] = &[
    "--allow-root",
    "--skip-plugins",
    "--skip-themes",
    "--path=/var/www/html",
];

/// Call `check` up to `attempts` times, `delay` apart, until it returns true.
pub async fn poll_ready<F, Fut>(attempts: u32, delay: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=attempts {
        if check().await {
            tracing::debug!(attempt, "Database ready");
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(SyncError::DatabaseNotReady { attempts })
}

/// Stream a dump into `child`'s stdin and wait for it to exit.
///
/// If the dump cannot be read to the end the child is killed while its
/// stdin is still open, so a client never sees a clean end of input after
/// a partial read. Stderr is drained while the input is written.
async fn feed_dump(
    program: &str,
    mut child: Child,
    file: tokio::fs::File,
    encoding: DumpEncoding,
) -> Result<u64> {
    let stderr = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "Could not read client stderr");
            }
        }
        buf
    });

    let mut stdin = child.stdin.take();
    let copied = match stdin.as_mut() {
        Some(stdin) => {
            let mut reader = BufReader::new(file);
            match encoding {
                DumpEncoding::Plain => tokio::io::copy(&mut reader, stdin).await,
                DumpEncoding::Gzip => {
                    let mut decoder = GzipDecoder::new(reader);
                    decoder.multiple_members(true);
                    tokio::io::copy(&mut decoder, stdin).await
                }
            }
        }
        None => Ok(0),
    };

    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(program, error = %e, "Dump unreadable, aborting import");
            if let Err(kill) = child.kill().await {
                tracing::debug!(error = %kill, "Could not kill {program}");
            }
            drop(stdin);
            let _ = drain.await;
            return Err(e.into());
        }
    };

    drop(stdin);
    let status = child.wait().await?;
    let stderr = drain.await.unwrap_or_default();
    if !status.success() {
        return Err(LocalDatabase::failure(program, &stderr));
    }
    Ok(bytes)
}

pub struct LocalDatabase {
    site_dir: PathBuf,
    settings: DatabaseConfig,
}

impl LocalDatabase {
    pub fn new(site_dir: impl Into<PathBuf>, settings: DatabaseConfig) -> Self {
        Self {
            site_dir: site_dir.into(),
            settings,
        }
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose").current_dir(&self.site_dir).kill_on_drop(true);
        cmd
    }

    /// `sh -lc` payload run inside the `db` service.
    fn client_command(&self, program: &str, extra: &[&str], db_name: Option<&str>) -> String {
        let mut parts = vec![program.to_string()];
        parts.extend(extra.iter().map(|s| s.to_string()));
        parts.push("-h127.0.0.1".into());
        parts.push("-uroot".into());
        parts.push(format!("-p{}", quote(&self.settings.local_root_password)));
        if let Some(db) = db_name {
            parts.push(quote(db));
        }
        parts.join(" ")
    }

    fn failure(program: &str, stderr: &[u8]) -> SyncError {
        SyncError::LocalCommand {
            program: program.to_string(),
            detail: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    pub async fn ping(&self) -> bool {
        let probe = self.client_command("mysqladmin", &[], None) + " ping --silent";
        self.compose()
            .args(["exec", "-T", "db", "sh", "-lc", &probe])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub async fn wait_until_ready(&self) -> Result<()> {
        tracing::info!("Waiting for local database");
        poll_ready(
            self.settings.ready_attempts,
            self.settings.ready_delay(),
            || self.ping(),
        )
        .await
    }

    /// Restore a dump into `dump.db_name`, decompressing on the fly.
    pub async fn import(&self, dump: &DatabaseDump) -> Result<()> {
        let file = tokio::fs::File::open(&dump.path).await?;
        let command = self.client_command("mysql", &[], Some(&dump.db_name));
        let child = self
            .compose()
            .args(["exec", "-T", "db", "sh", "-lc", &command])
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(database = %dump.db_name, path = %dump.path.display(), "Importing dump into local database");
        let bytes = feed_dump("mysql", child, file, dump.encoding).await?;
        tracing::info!(bytes, "Local import finished");
        Ok(())
    }

    /// Dump the local database to `dest` (plain SQL).
    pub async fn export(&self, db_name: &str, dest: &Path) -> Result<()> {
        let command = self.client_command("mysqldump", BASE_DUMP_FLAGS, Some(db_name));
        let file = std::fs::File::create(dest)?;

        tracing::info!(database = %db_name, "Exporting local database");
        let output = self
            .compose()
            .args(["exec", "-T", "db", "sh", "-lc", &command])
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(Self::failure("mysqldump", &output.stderr));
        }
        Ok(())
    }

    async fn wp(&self, args: &[&str], inherit_stdout: bool) -> Result<String> {
        let output = self
            .compose()
            .args(["run", "--rm", "wpcli", "wp"])
            .args(args)
            .args(WP_CLI_COMMON)
            .stdin(Stdio::null())
            .stdout(if inherit_stdout { Stdio::inherit() } else { Stdio::piped() })
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Self::failure("wp", &output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Point the restored site at `new_url`. Returns the replaced URL, if any.
    pub async fn rewrite_site_url(&self, new_url: &str) -> Result<Option<String>> {
        let old_url = self.wp(&["option", "get", "siteurl"], false).await?;
        if old_url.is_empty() || old_url == new_url {
            return Ok(None);
        }

        tracing::info!(from = %old_url, to = %new_url, "Replacing URLs");
        self.wp(
            &[
                "search-replace",
                &old_url,
                new_url,
                "--all-tables",
                "--precise",
                "--skip-columns=guid",
            ],
            true,
        )
        .await?;
        Ok(Some(old_url))
    }
}
