//! Remote command execution.
//!
//! Two implementations share one trait: the system OpenSSH client (key or
//! agent authentication) and libssh2 with a password.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use app_directory::Secret;
use async_trait::async_trait;
use tokio::process::Command;

use super::{session, Endpoint};
use crate::resolver::Identity;
use crate::utils::{Result, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, command: &str) -> Result<RemoteOutput>;

    /// Stream stdout into `dest`; the returned `stdout` is empty.
    async fn run_to_file(&self, command: &str, dest: &Path) -> Result<RemoteOutput>;

    /// Feed the contents of `input` to the command's stdin.
    async fn run_with_input(&self, command: &str, input: &Path) -> Result<RemoteOutput>;
}

/// Password identities go through libssh2; the rest through `ssh`.
pub fn shell_for(endpoint: &Endpoint, identity: &Identity) -> Box<dyn RemoteShell> {
    match &identity.password {
        Some(password) => Box::new(Ssh2Shell::new(
            endpoint.clone(),
            identity.user.clone(),
            password.clone(),
        )),
        None => Box::new(OpenSshShell::new(endpoint.clone(), identity.user.clone())),
    }
}

pub struct OpenSshShell {
    endpoint: Endpoint,
    user: String,
}

impl OpenSshShell {
    pub fn new(endpoint: Endpoint, user: String) -> Self {
        Self { endpoint, user }
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.endpoint.ssh_options(true))
            .arg("-T")
            .arg(self.endpoint.login(&self.user))
            .arg(remote_command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(mut cmd: Command) -> Result<RemoteOutput> {
        let output = cmd.output().await.map_err(|e| SyncError::LocalCommand {
            program: "ssh".into(),
            detail: e.to_string(),
        })?;
        Ok(RemoteOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn run(&self, command: &str) -> Result<RemoteOutput> {
        Self::execute(self.command(command)).await
    }

    async fn run_to_file(&self, command: &str, dest: &Path) -> Result<RemoteOutput> {
        let file = std::fs::File::create(dest)?;
        let mut cmd = self.command(command);
        cmd.stdout(Stdio::from(file));
        Self::execute(cmd).await
    }

    async fn run_with_input(&self, command: &str, input: &Path) -> Result<RemoteOutput> {
        let file = std::fs::File::open(input)?;
        let mut cmd = self.command(command);
        cmd.stdin(Stdio::from(file));
        Self::execute(cmd).await
    }
}

pub struct Ssh2Shell {
    endpoint: Endpoint,
    user: String,
    password: Secret,
}

enum Sink {
    Capture,
    File(PathBuf),
}

impl Ssh2Shell {
    pub fn new(endpoint: Endpoint, user: String, password: Secret) -> Self {
        Self {
            endpoint,
            user,
            password,
        }
    }

    async fn execute(&self, command: &str, input: Option<PathBuf>, sink: Sink) -> Result<RemoteOutput> {
        let endpoint = self.endpoint.clone();
        let user = self.user.clone();
        let password = self.password.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || {
            exec_blocking(&endpoint, &user, &password, &command, input.as_deref(), sink)
        })
        .await?
    }
}

fn exec_blocking(
    endpoint: &Endpoint,
    user: &str,
    password: &Secret,
    command: &str,
    input: Option<&Path>,
    sink: Sink,
) -> Result<RemoteOutput> {
    let session = session::open(endpoint, user, password)?;
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    if let Some(input) = input {
        let mut file = std::fs::File::open(input)?;
        std::io::copy(&mut file, &mut channel)?;
        channel.flush()?;
    }
    channel.send_eof()?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    session.set_blocking(false);
    let drained = match sink {
        Sink::Capture => drain_streams(channel.stream(0), channel.stderr(), &mut stdout, &mut stderr),
        Sink::File(dest) => {
            let mut file = std::fs::File::create(&dest)?;
            drain_streams(channel.stream(0), channel.stderr(), &mut file, &mut stderr)
                .and_then(|()| file.flush())
        }
    };
    session.set_blocking(true);
    drained?;
    channel.wait_close()?;

    Ok(RemoteOutput {
        code: channel.exit_status()?,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

const DRAIN_IDLE: std::time::Duration = std::time::Duration::from_millis(5);

/// Read two non-blocking streams in turn until both reach end of file.
///
/// The remote side stalls once either stream fills its window, so neither
/// may be read to the end before the other.
fn drain_streams(
    mut out: impl Read,
    mut err: impl Read,
    out_sink: &mut impl Write,
    err_sink: &mut Vec<u8>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 32 * 1024];
    let (mut out_done, mut err_done) = (false, false);

    while !(out_done && err_done) {
        let mut progressed = false;
        if !out_done {
            match out.read(&mut buf) {
                Ok(0) => out_done = true,
                Ok(n) => {
                    out_sink.write_all(&buf[..n])?;
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !err_done {
            match err.read(&mut buf) {
                Ok(0) => err_done = true,
                Ok(n) => {
                    err_sink.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !progressed {
            std::thread::sleep(DRAIN_IDLE);
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteShell for Ssh2Shell {
    async fn run(&self, command: &str) -> Result<RemoteOutput> {
        self.execute(command, None, Sink::Capture).await
    }

    async fn run_to_file(&self, command: &str, dest: &Path) -> Result<RemoteOutput> {
        self.execute(command, None, Sink::File(dest.to_path_buf())).await
    }

    async fn run_with_input(&self, command: &str, input: &Path) -> Result<RemoteOutput> {
        self.execute(command, Some(input.to_path_buf()), Sink::Capture).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Stdout that stays blocked until stderr has been read dry, like a
    /// remote command stuck on a full stderr window.
    struct StalledOut {
        stderr_left: Rc<Cell<usize>>,
        sent: bool,
    }

    impl Read for StalledOut {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stderr_left.get() > 0 {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            if self.sent {
                return Ok(0);
            }
            self.sent = true;
            buf[..3].copy_from_slice(b"ok\n");
            Ok(3)
        }
    }

    struct ChattyErr {
        left: Rc<Cell<usize>>,
    }

    impl Read for ChattyErr {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.left.get().min(buf.len()).min(1000);
            buf[..n].fill(b'e');
            self.left.set(self.left.get() - n);
            Ok(n)
        }
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_waits() {
        let left = Rc::new(Cell::new(100_000));
        let out = StalledOut {
            stderr_left: left.clone(),
            sent: false,
        };
        let err = ChattyErr { left };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        drain_streams(out, err, &mut stdout, &mut stderr).unwrap();

        assert_eq!(stdout, b"ok\n");
        assert_eq!(stderr.len(), 100_000);
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::ConnectionReset.into())
            }
        }

        let err = drain_streams(Broken, std::io::empty(), &mut Vec::<u8>::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }
}
