//! File-tree transports and the strategy chain that drives them.

pub mod archive;
pub mod chain;
pub mod exclusions;
pub mod mirror;
pub mod secure_copy;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::remote::Endpoint;
use crate::resolver::PathCandidate;
use crate::utils::SyncError;

pub use archive::ArchiveTransport;
pub use chain::TransportChain;
pub use exclusions::ExclusionSet;
pub use mirror::MirrorTransport;
pub use secure_copy::SecureCopyTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferMethod {
    /// Compressed tar streamed over a remote shell
    Archive,
    /// Incremental rsync mirror
    Sync,
    /// Recursive SFTP copy
    SecureCopy,
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferMethod::Archive => "archive",
            TransferMethod::Sync => "rsync",
            TransferMethod::SecureCopy => "sftp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote to local
    Pull,
    /// Local to remote
    Push,
}

/// How a synchronization succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub method: TransferMethod,
    pub candidate: PathCandidate,
}

/// Everything a transport needs besides the candidate.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub endpoint: Endpoint,
    pub direction: Direction,
    /// Local file tree root (`<site>/wp`)
    pub local_root: PathBuf,
    /// Scratch space for partial downloads (`<site>/.cw`)
    pub staging_dir: PathBuf,
    pub exclusions: ExclusionSet,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Authentication or authorization rejected, or no shell for this login
    Access,
    /// Candidate path does not exist
    Missing,
    Unreachable,
    /// Local disk or filesystem problem
    Local,
    /// The method cannot run on this machine, e.g. its program is not installed
    Unavailable,
    Other,
}

impl FailureKind {
    /// Failures that a broader identity may fix.
    pub fn is_access_class(self) -> bool {
        matches!(self, FailureKind::Access | FailureKind::Missing)
    }

    /// Failures that rule out trying a broader identity. A method that
    /// cannot run here says nothing about the identity.
    pub fn vetoes_escalation(self) -> bool {
        !self.is_access_class() && self != FailureKind::Unavailable
    }

    pub fn describe(self) -> &'static str {
        match self {
            FailureKind::Access => "access denied",
            FailureKind::Missing => "path missing",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Local => "local error",
            FailureKind::Unavailable => "unavailable here",
            FailureKind::Other => "failed",
        }
    }
}

const ACCESS_PATTERNS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "all configured authentication methods failed",
    "host key verification failed",
    "sftp connections only",
    "allows sftp only",
    "sftp-only",
    "shell request failed",
    "not enabled",
    "this account is currently not available",
];

const MISSING_PATTERNS: &[&str] = &[
    "no such file",
    "change_dir",
    "not a directory",
    "does not exist",
];

const UNREACHABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timed out",
    "no route to host",
    "could not resolve",
    "name or service not known",
    "connection reset",
    "connection closed",
    "broken pipe",
];

const LOCAL_PATTERNS: &[&str] = &[
    "no space left on device",
    "read-only file system",
    "disk quota exceeded",
];

/// sshpass exit codes for a rejected password and an unknown host key.
/// sshpass prints nothing for either.
const SSHPASS_ACCESS_CODES: &[i32] = &[5, 6];

/// Classify a failed command from its exit code and stderr.
///
/// Local disk problems win over everything else. A bare exit 255 is the
/// OpenSSH client's own failure and counts as access.
pub fn classify(code: Option<i32>, stderr: &str) -> FailureKind {
    let text = stderr.to_lowercase();
    let any = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    if any(LOCAL_PATTERNS) {
        FailureKind::Local
    } else if any(ACCESS_PATTERNS) {
        FailureKind::Access
    } else if any(MISSING_PATTERNS) {
        FailureKind::Missing
    } else if any(UNREACHABLE_PATTERNS) {
        FailureKind::Unreachable
    } else if code == Some(255) {
        FailureKind::Access
    } else {
        FailureKind::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn from_exit(program: &str, code: Option<i32>, stderr: &str) -> Self {
        let detail = match (code, last_line(stderr)) {
            (Some(code), Some(line)) => format!("{program} exited with {code}: {line}"),
            (Some(code), None) => format!("{program} exited with {code}"),
            (None, Some(line)) => format!("{program} terminated: {line}"),
            (None, None) => format!("{program} terminated by signal"),
        };
        Self::new(classify(code, stderr), detail)
    }

    /// Like [`from_exit`](Self::from_exit) for a program run under `sshpass`.
    pub fn from_sshpass_exit(program: &str, code: Option<i32>, stderr: &str) -> Self {
        let mut failure = Self::from_exit(program, code, stderr);
        if failure.kind == FailureKind::Other
            && code.is_some_and(|c| SSHPASS_ACCESS_CODES.contains(&c))
        {
            failure.kind = FailureKind::Access;
        }
        failure
    }

    /// `program` could not be started because it is not installed.
    pub fn unavailable(program: &str) -> Self {
        Self::new(FailureKind::Unavailable, format!("{program} is not installed"))
    }

    /// Map a spawn error, treating a missing executable as unavailable.
    pub fn from_spawn(program: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::unavailable(program)
        } else {
            e.into()
        }
    }
}

impl From<std::io::Error> for AttemptFailure {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match e.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe => FailureKind::Unreachable,
            ErrorKind::PermissionDenied => FailureKind::Local,
            ErrorKind::NotFound => FailureKind::Local,
            _ => classify(None, &e.to_string()),
        };
        let kind = if kind == FailureKind::Other {
            FailureKind::Local
        } else {
            kind
        };
        Self::new(kind, e.to_string())
    }
}

impl From<SyncError> for AttemptFailure {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Io(io) => io.into(),
            SyncError::CredentialMissing(what) => Self::new(FailureKind::Access, what),
            SyncError::NotFound(what) => Self::new(FailureKind::Unreachable, what),
            SyncError::Connectivity { host, port } => {
                Self::new(FailureKind::Unreachable, format!("{host}:{port} unreachable"))
            }
            other => {
                let detail = other.to_string();
                Self::new(classify(None, &detail), detail)
            }
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.kind.describe())
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn method(&self) -> TransferMethod;

    async fn transfer(
        &self,
        job: &TransferJob,
        candidate: &PathCandidate,
    ) -> std::result::Result<(), AttemptFailure>;
}
