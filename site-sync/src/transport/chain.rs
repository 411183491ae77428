//! Ordered trial of transports over candidate tiers.
//!
//! One reachability probe, then for each tier (application, master), each
//! method in priority order, each candidate in resolver order. The first
//! success ends the run. The master tier is only tried when every
//! application-tier failure was access-class. A method that cannot run on
//! this machine is dropped for the rest of the run without blocking
//! escalation.

use std::collections::HashSet;
use std::sync::Arc;

use super::{
    AttemptFailure, Direction, FailureKind, TransferJob, TransferMethod, TransferOutcome,
    Transport,
};
use crate::remote::Reachability;
use crate::resolver::{CandidatePlan, IdentityKind, PathCandidate};
use crate::utils::{Result, SyncError};

pub struct TransportChain {
    probe: Arc<dyn Reachability>,
    transports: Vec<Arc<dyn Transport>>,
}

/// Bookkeeping for one run.
#[derive(Debug, Default)]
struct Attempts {
    count: usize,
    failures: Vec<AttemptFailure>,
    unavailable: HashSet<TransferMethod>,
}

impl TransportChain {
    pub fn new(probe: Arc<dyn Reachability>, transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { probe, transports }
    }

    /// Methods in priority order for a direction.
    pub fn methods(direction: Direction, archive: bool) -> Vec<TransferMethod> {
        let mut methods = Vec::with_capacity(3);
        if archive && direction == Direction::Pull {
            methods.push(TransferMethod::Archive);
        }
        methods.push(TransferMethod::Sync);
        methods.push(TransferMethod::SecureCopy);
        methods
    }

    pub async fn run(
        &self,
        job: &TransferJob,
        plan: &CandidatePlan,
        archive: bool,
    ) -> Result<TransferOutcome> {
        self.probe
            .probe(&job.endpoint.host, job.endpoint.port())
            .await?;

        let methods = Self::methods(job.direction, archive);
        let mut attempts = Attempts::default();

        let tiers = [
            (IdentityKind::Application, &plan.application),
            (IdentityKind::Master, &plan.master),
        ];
        for (kind, tier) in tiers {
            let failed_before = attempts.failures.len();

            if let Some(outcome) = self.run_tier(job, tier, &methods, &mut attempts).await {
                tracing::info!(
                    method = %outcome.method,
                    user = %outcome.candidate.identity.user,
                    path = %outcome.candidate.remote_path,
                    "Transfer succeeded"
                );
                return Ok(outcome);
            }

            let tier_failures = &attempts.failures[failed_before..];
            if kind == IdentityKind::Master {
                break;
            }
            if tier_failures.iter().any(|f| f.kind.vetoes_escalation()) {
                tracing::warn!(
                    "Application identity failed for a reason other than access; not escalating to master identity"
                );
                break;
            }
            if !plan.master.is_empty() {
                tracing::debug!("Escalating to master identity");
            }
        }

        let summary = attempts
            .failures
            .last()
            .map(ToString::to_string)
            .unwrap_or_else(|| "no usable candidate".to_string());

        Err(SyncError::TransportExhausted {
            attempts: attempts.count,
            summary,
        })
    }

    async fn run_tier(
        &self,
        job: &TransferJob,
        tier: &[PathCandidate],
        methods: &[TransferMethod],
        attempts: &mut Attempts,
    ) -> Option<TransferOutcome> {
        for &method in methods {
            if attempts.unavailable.contains(&method) {
                continue;
            }
            let Some(transport) = self.transports.iter().find(|t| t.method() == method) else {
                continue;
            };

            for candidate in tier {
                if method == TransferMethod::SecureCopy && candidate.identity.password.is_none() {
                    tracing::trace!(user = %candidate.identity.user, "No password, skipping sftp");
                    continue;
                }

                attempts.count += 1;
                tracing::debug!(
                    method = %method,
                    user = %candidate.identity.user,
                    path = %candidate.remote_path,
                    "Trying candidate"
                );

                match transport.transfer(job, candidate).await {
                    Ok(()) => {
                        return Some(TransferOutcome {
                            method,
                            candidate: candidate.clone(),
                        })
                    }
                    Err(failure) if failure.kind == FailureKind::Unavailable => {
                        tracing::warn!(method = %method, failure = %failure, "Method unavailable, skipping it");
                        attempts.unavailable.insert(method);
                        attempts.failures.push(failure);
                        break;
                    }
                    Err(failure) => {
                        tracing::trace!(
                            method = %method,
                            path = %candidate.remote_path,
                            failure = %failure,
                            "Candidate failed"
                        );
                        attempts.failures.push(failure);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::remote::Endpoint;
    use crate::resolver::Identity;
    use crate::transport::ExclusionSet;
    use app_directory::Secret;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct StubProbe {
        reachable: bool,
    }

    #[async_trait]
    impl Reachability for StubProbe {
        async fn probe(&self, host: &str, port: u16) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(SyncError::Connectivity {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }

    /// Succeeds on listed paths, fails elsewhere as scripted, records every call.
    struct ScriptedTransport {
        method: TransferMethod,
        succeed_on: Vec<String>,
        failures: HashMap<String, AttemptFailure>,
        calls: Mutex<Vec<(TransferMethod, String)>>,
    }

    impl ScriptedTransport {
        fn new(method: TransferMethod) -> Self {
            Self {
                method,
                succeed_on: Vec::new(),
                failures: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn succeeding_on(mut self, path: &str) -> Self {
            self.succeed_on.push(path.to_string());
            self
        }

        fn failing_with(self, path: &str, kind: FailureKind) -> Self {
            self.rejecting(path, AttemptFailure::new(kind, "scripted"))
        }

        fn rejecting(mut self, path: &str, failure: AttemptFailure) -> Self {
            self.failures.insert(path.to_string(), failure);
            self
        }

        fn calls(&self) -> Vec<(TransferMethod, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn method(&self) -> TransferMethod {
            self.method
        }

        async fn transfer(
            &self,
            _job: &TransferJob,
            candidate: &PathCandidate,
        ) -> std::result::Result<(), AttemptFailure> {
            let path = candidate.remote_path.clone();
            self.calls.lock().unwrap().push((self.method, path.clone()));
            if self.succeed_on.contains(&path) {
                return Ok(());
            }
            Err(self
                .failures
                .get(&path)
                .cloned()
                .unwrap_or_else(|| AttemptFailure::new(FailureKind::Access, "scripted")))
        }
    }

    fn job() -> TransferJob {
        TransferJob {
            endpoint: Endpoint::new("198.51.100.4", RemoteConfig::default()),
            direction: Direction::Pull,
            local_root: PathBuf::from("/tmp/site/wp"),
            staging_dir: PathBuf::from("/tmp/site/.cw"),
            exclusions: ExclusionSet::default(),
        }
    }

    fn candidate(user: &str, kind: IdentityKind, password: Option<&str>, path: &str) -> PathCandidate {
        PathCandidate {
            identity: Identity {
                user: user.to_string(),
                kind,
                password: password.map(Secret::new),
            },
            remote_path: path.to_string(),
        }
    }

    fn plan(app_password: Option<&str>) -> CandidatePlan {
        CandidatePlan {
            application: vec![
                candidate("acme", IdentityKind::Application, app_password, "~/public_html/"),
                candidate("acme", IdentityKind::Application, app_password, "/home/acme/public_html/"),
            ],
            master: vec![
                candidate("master", IdentityKind::Master, None, "/home/55.x/acme/public_html/"),
                candidate("master", IdentityKind::Master, None, "/home/55.x/applications/1/public_html/"),
            ],
        }
    }

    fn chain(reachable: bool, transports: &[Arc<ScriptedTransport>]) -> TransportChain {
        TransportChain::new(
            Arc::new(StubProbe { reachable }),
            transports
                .iter()
                .map(|t| t.clone() as Arc<dyn Transport>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_unreachable_host_attempts_nothing() {
        let sync = Arc::new(ScriptedTransport::new(TransferMethod::Sync));
        let sftp = Arc::new(ScriptedTransport::new(TransferMethod::SecureCopy));

        let err = chain(false, &[sync.clone(), sftp.clone()])
            .run(&job(), &plan(Some("pw")), true)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Connectivity { port: 22, .. }));
        assert!(sync.calls().is_empty());
        assert!(sftp.calls().is_empty());
    }

    #[tokio::test]
    async fn test_first_success_halts_chain() {
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync).succeeding_on("/home/acme/public_html/"),
        );
        let sftp = Arc::new(ScriptedTransport::new(TransferMethod::SecureCopy));

        let outcome = chain(true, &[sync.clone(), sftp.clone()])
            .run(&job(), &plan(Some("pw")), false)
            .await
            .unwrap();

        assert_eq!(outcome.method, TransferMethod::Sync);
        assert_eq!(outcome.candidate.remote_path, "/home/acme/public_html/");
        assert_eq!(sync.calls().len(), 2);
        assert!(sftp.calls().is_empty());
    }

    #[tokio::test]
    async fn test_access_failures_escalate_to_master() {
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync)
                .failing_with("/home/acme/public_html/", FailureKind::Missing)
                .succeeding_on("/home/55.x/acme/public_html/"),
        );

        let outcome = chain(true, &[sync.clone()])
            .run(&job(), &plan(None), false)
            .await
            .unwrap();

        assert!(outcome.candidate.identity.is_master());
        assert_eq!(
            sync.calls().iter().map(|(_, p)| p.as_str()).collect::<Vec<_>>(),
            vec![
                "~/public_html/",
                "/home/acme/public_html/",
                "/home/55.x/acme/public_html/"
            ]
        );
    }

    #[tokio::test]
    async fn test_local_failure_does_not_escalate() {
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync)
                .failing_with("~/public_html/", FailureKind::Local)
                .succeeding_on("/home/55.x/acme/public_html/"),
        );

        let err = chain(true, &[sync.clone()])
            .run(&job(), &plan(None), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TransportExhausted { attempts: 2, .. }));
        assert!(sync.calls().iter().all(|(_, p)| !p.starts_with("/home/55.x")));
    }

    #[tokio::test]
    async fn test_rejected_password_escalates_to_master() {
        let rejected = AttemptFailure::from_sshpass_exit("rsync", Some(5), "");
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync)
                .rejecting("~/public_html/", rejected.clone())
                .rejecting("/home/acme/public_html/", rejected)
                .succeeding_on("/home/55.x/acme/public_html/"),
        );

        let outcome = chain(true, &[sync.clone()])
            .run(&job(), &plan(Some("stale")), false)
            .await
            .unwrap();

        assert!(outcome.candidate.identity.is_master());
        assert_eq!(outcome.candidate.remote_path, "/home/55.x/acme/public_html/");
    }

    #[tokio::test]
    async fn test_unavailable_method_is_dropped_and_does_not_block_escalation() {
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync)
                .rejecting("~/public_html/", AttemptFailure::unavailable("rsync")),
        );
        let sftp = Arc::new(
            ScriptedTransport::new(TransferMethod::SecureCopy)
                .succeeding_on("/home/55.x/acme/public_html/"),
        );
        let mut plan = plan(None);
        for candidate in &mut plan.master {
            candidate.identity.password = Some(Secret::new("master-pw"));
        }

        let outcome = chain(true, &[sync.clone(), sftp.clone()])
            .run(&job(), &plan, false)
            .await
            .unwrap();

        assert_eq!(outcome.method, TransferMethod::SecureCopy);
        assert!(outcome.candidate.identity.is_master());
        assert_eq!(sync.calls().len(), 1);
        assert_eq!(sftp.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_secure_copy_needs_password() {
        let sync = Arc::new(ScriptedTransport::new(TransferMethod::Sync));
        let sftp = Arc::new(
            ScriptedTransport::new(TransferMethod::SecureCopy).succeeding_on("~/public_html/"),
        );

        // Master identities have no password here, application ones do.
        let outcome = chain(true, &[sync.clone(), sftp.clone()])
            .run(&job(), &plan(Some("pw")), false)
            .await
            .unwrap();
        assert_eq!(outcome.method, TransferMethod::SecureCopy);

        let sftp_without = Arc::new(
            ScriptedTransport::new(TransferMethod::SecureCopy).succeeding_on("~/public_html/"),
        );
        let err = chain(true, &[sync.clone(), sftp_without.clone()])
            .run(&job(), &plan(None), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TransportExhausted { .. }));
        assert!(sftp_without.calls().is_empty());
    }

    #[tokio::test]
    async fn test_archive_only_when_requested() {
        let archive = Arc::new(
            ScriptedTransport::new(TransferMethod::Archive).succeeding_on("~/public_html/"),
        );
        let sync = Arc::new(
            ScriptedTransport::new(TransferMethod::Sync).succeeding_on("~/public_html/"),
        );

        let outcome = chain(true, &[archive.clone(), sync.clone()])
            .run(&job(), &plan(None), false)
            .await
            .unwrap();
        assert_eq!(outcome.method, TransferMethod::Sync);
        assert!(archive.calls().is_empty());

        let outcome = chain(true, &[archive.clone(), sync.clone()])
            .run(&job(), &plan(None), true)
            .await
            .unwrap();
        assert_eq!(outcome.method, TransferMethod::Archive);
    }

    #[test]
    fn test_push_never_uses_archive() {
        assert_eq!(
            TransportChain::methods(Direction::Push, true),
            vec![TransferMethod::Sync, TransferMethod::SecureCopy]
        );
    }
}
