//! `mysqldump` / `mysql` executed on the remote host.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DatabaseDump, DbCredentials, DumpCapabilities, DumpEncoding, RemoteDatabase};
use crate::remote::{shell_for, Endpoint, RemoteOutput, RemoteShell};
use crate::resolver::Identity;
use crate::site::{DUMP_FILE, DUMP_GZ_FILE};
use crate::utils::shell::{quote, quote_path};
use crate::utils::{Result, SyncError};

#[derive(Debug, Default)]
pub struct MysqlOverSsh;

impl MysqlOverSsh {
    pub fn new() -> Self {
        Self
    }

    async fn capabilities(shell: &dyn RemoteShell) -> DumpCapabilities {
        match shell.run("mysqldump --help").await {
            Ok(output) => DumpCapabilities::from_help(&output.stdout),
            Err(e) => {
                tracing::debug!(error = %e, "mysqldump --help failed, using base flags");
                DumpCapabilities::default()
            }
        }
    }
}

fn credential_args(creds: &DbCredentials) -> String {
    format!(
        "-u{} -p{}",
        quote(&creds.user),
        quote(creds.password.expose())
    )
}

/// Remote dump command. Master logins compress on the server side.
pub fn dump_command(caps: &DumpCapabilities, creds: &DbCredentials, encoding: DumpEncoding) -> String {
    let dump = format!(
        "mysqldump {} {} {}",
        caps.dump_flags().join(" "),
        credential_args(creds),
        quote(&creds.name)
    );
    match encoding {
        DumpEncoding::Plain => dump,
        DumpEncoding::Gzip => format!("bash -o pipefail -c {}", quote(&format!("{dump} | gzip -c"))),
    }
}

fn remote_failure(program: &str, output: &RemoteOutput) -> SyncError {
    SyncError::RemoteCommand {
        program: program.to_string(),
        code: output.code,
        stderr: output
            .stderr
            .lines()
            .filter(|l| !l.contains("Using a password on the command line"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl RemoteDatabase for MysqlOverSsh {
    async fn export(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        creds: &DbCredentials,
        state_dir: &Path,
    ) -> Result<DatabaseDump> {
        let shell = shell_for(endpoint, identity);
        let caps = Self::capabilities(shell.as_ref()).await;

        let (encoding, file, stale) = if identity.is_master() {
            (DumpEncoding::Gzip, DUMP_GZ_FILE, DUMP_FILE)
        } else {
            (DumpEncoding::Plain, DUMP_FILE, DUMP_GZ_FILE)
        };
        let dest = state_dir.join(file);
        let part = part_path(&dest);

        tracing::info!(
            user = %identity.user,
            database = %creds.name,
            compressed = encoding == DumpEncoding::Gzip,
            "Dumping remote database"
        );

        let output = match shell
            .run_to_file(&dump_command(&caps, creds, encoding), &part)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };
        if !output.success() {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(remote_failure("mysqldump", &output));
        }

        tokio::fs::rename(&part, &dest).await?;
        match tokio::fs::remove_file(state_dir.join(stale)).await {
            Ok(()) => tracing::debug!(file = stale, "Removed stale dump"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(DatabaseDump {
            path: dest,
            encoding,
            db_name: creds.name.clone(),
        })
    }

    async fn import(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        creds: &DbCredentials,
        dump: &Path,
    ) -> Result<()> {
        let shell = shell_for(endpoint, identity);
        let command = format!("mysql {} {}", credential_args(creds), quote(&creds.name));

        tracing::info!(user = %identity.user, database = %creds.name, "Importing database on remote");
        let output = shell.run_with_input(&command, dump).await?;
        if !output.success() {
            return Err(remote_failure("mysql", &output));
        }
        Ok(())
    }

    async fn rewrite_urls(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        remote_path: &str,
        from: &str,
        to: Option<&str>,
    ) -> Result<()> {
        let shell = shell_for(endpoint, identity);
        let cd = format!("cd {}", quote_path(remote_path));

        let target = match to {
            Some(url) => url.trim().to_string(),
            None => {
                let output = shell.run(&format!("{cd} && wp option get siteurl")).await?;
                if !output.success() {
                    return Err(remote_failure("wp", &output));
                }
                output.stdout.trim().to_string()
            }
        };
        if target.is_empty() || target == from {
            tracing::debug!("No URL rewrite needed");
            return Ok(());
        }

        tracing::info!(from = %from, to = %target, "Rewriting URLs on remote");
        let output = shell
            .run(&format!(
                "{cd} && wp search-replace {} {} --all-tables --precise",
                quote(from),
                quote(&target)
            ))
            .await?;
        if !output.success() {
            return Err(remote_failure("wp", &output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_directory::Secret;

    fn creds() -> DbCredentials {
        DbCredentials {
            user: "shop".into(),
            password: Secret::new("p@ss word"),
            name: "shopdb".into(),
        }
    }

    #[test]
    fn test_plain_dump_command() {
        let caps = DumpCapabilities {
            set_gtid_purged: true,
            column_statistics: false,
        };
        assert_eq!(
            dump_command(&caps, &creds(), DumpEncoding::Plain),
            "mysqldump --single-transaction --quick --add-drop-table --default-character-set=utf8mb4 \
             --set-gtid-purged=OFF -ushop -p'p@ss word' shopdb"
        );
    }

    #[test]
    fn test_gzip_dump_command_uses_pipefail() {
        let cmd = dump_command(&DumpCapabilities::default(), &creds(), DumpEncoding::Gzip);
        assert!(cmd.starts_with("bash -o pipefail -c '"));
        assert!(cmd.contains("| gzip -c"));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/s/.cw/db.sql.gz")),
            PathBuf::from("/s/.cw/db.sql.gz.part")
        );
    }

    #[test]
    fn test_remote_failure_drops_password_warning() {
        let output = RemoteOutput {
            code: 2,
            stdout: String::new(),
            stderr: "mysqldump: [Warning] Using a password on the command line interface can be insecure.\n\
                     mysqldump: Got error: 1045: Access denied for user 'shop'\n"
                .into(),
        };
        match remote_failure("mysqldump", &output) {
            SyncError::RemoteCommand { program, code, stderr } => {
                assert_eq!(program, "mysqldump");
                assert_eq!(code, 2);
                assert_eq!(stderr, "mysqldump: Got error: 1045: Access denied for user 'shop'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
