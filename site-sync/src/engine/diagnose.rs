//! SSH and SFTP connectivity checks for one application.

use std::fmt;

use app_directory::Secret;

use super::SyncEngine;
use crate::remote::{session, Endpoint, OpenSshShell, RemoteShell};
use crate::resolver::{application_identity, master_identity, Identity};
use crate::transport::{AttemptFailure, FailureKind};
use crate::utils::Result;

/// One attempted login method.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub result: std::result::Result<(), AttemptFailure>,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "- {}: OK", self.name),
            Err(failure) => write!(f, "- {}: NO ({failure})", self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    /// `Err` carries the probe failure message.
    pub reachable: std::result::Result<(), String>,
    pub checks: Vec<CheckResult>,
}

impl DiagnosticReport {
    pub fn any_success(&self) -> bool {
        self.checks.iter().any(|c| c.result.is_ok())
    }

    /// 1 when the port is unreachable, 2 when no method worked, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.reachable.is_err() {
            1
        } else if !self.any_success() {
            2
        } else {
            0
        }
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reachable {
            Ok(()) => writeln!(f, "- TCP {}: OK", self.port)?,
            Err(e) => {
                writeln!(f, "- TCP {}: FAIL ({e})", self.port)?;
                return writeln!(
                    f,
                    "  Whitelist your IP in the server's security settings."
                );
            }
        }
        for check in &self.checks {
            writeln!(f, "{check}")?;
        }
        if !self.any_success() {
            writeln!(f, "\nNo method worked. Add your SSH public key to the server's master")?;
            writeln!(f, "credentials, or expect SFTP-only access for the application user.")?;
        }
        Ok(())
    }
}

async fn key_check(endpoint: &Endpoint, identity: &Identity) -> CheckResult {
    let shell = OpenSshShell::new(endpoint.clone(), identity.user.clone());
    let result = match shell.run("echo ok").await {
        Ok(output) if output.success() && output.stdout.trim() == "ok" => Ok(()),
        Ok(output) => Err(AttemptFailure::from_exit(
            "ssh",
            Some(output.code),
            &output.stderr,
        )),
        Err(e) => Err(AttemptFailure::from(e)),
    };
    CheckResult {
        name: format!("SSH key as {} '{}'", kind_name(identity), identity.user),
        result,
    }
}

async fn password_check(endpoint: &Endpoint, identity: &Identity, password: Secret) -> CheckResult {
    let endpoint = endpoint.clone();
    let user = identity.user.clone();

    let result = tokio::task::spawn_blocking(move || -> std::result::Result<(), AttemptFailure> {
        let session = session::open(&endpoint, &user, &password)?;
        let sftp = session
            .sftp()
            .map_err(|e| AttemptFailure::new(FailureKind::Access, e.to_string()))?;
        sftp.stat(std::path::Path::new("."))
            .map_err(|e| AttemptFailure::new(FailureKind::Missing, e.to_string()))?;
        Ok(())
    })
    .await
    .unwrap_or_else(|e| Err(AttemptFailure::new(FailureKind::Other, e.to_string())));

    CheckResult {
        name: format!("SFTP as {} '{}'", kind_name(identity), identity.user),
        result,
    }
}

fn kind_name(identity: &Identity) -> &'static str {
    if identity.is_master() {
        "master"
    } else {
        "application user"
    }
}

impl SyncEngine {
    /// Try every login method for `app_id` and report which ones work.
    pub async fn diagnose(&self, app_id: &str) -> Result<DiagnosticReport> {
        let deployed = self.directory.find_application(app_id).await?;
        let bundle = self.directory.application_credentials(&deployed.app.id).await?;
        let endpoint = self.endpoint(&deployed)?;

        tracing::info!(
            app = %deployed.app.label,
            server = %deployed.server.label,
            host = %endpoint.host,
            "Testing connectivity"
        );

        let mut report = DiagnosticReport {
            host: endpoint.host.clone(),
            port: endpoint.port(),
            reachable: Ok(()),
            checks: Vec::new(),
        };
        if let Err(e) = self.probe.probe(&endpoint.host, endpoint.port()).await {
            report.reachable = Err(e.to_string());
            return Ok(report);
        }

        let identities = application_identity(&deployed.app, &bundle)
            .into_iter()
            .chain(std::iter::once(master_identity(&deployed.server)));
        for identity in identities {
            report.checks.push(key_check(&endpoint, &identity).await);
            if let Some(password) = identity.password.clone() {
                report
                    .checks
                    .push(password_check(&endpoint, &identity, password).await);
            }
        }
        Ok(report)
    }
}
