//! Remote host access: reachability, SSH sessions and command shells.

pub mod probe;
pub mod session;
pub mod shell;

use crate::config::RemoteConfig;

pub use probe::{Reachability, TcpProbe};
pub use shell::{shell_for, OpenSshShell, RemoteOutput, RemoteShell, Ssh2Shell};

/// A remote host together with the connection settings used for it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub settings: RemoteConfig,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, settings: RemoteConfig) -> Self {
        Self {
            host: host.into(),
            settings,
        }
    }

    pub fn port(&self) -> u16 {
        self.settings.ssh_port
    }

    pub fn login(&self, user: &str) -> String {
        format!("{user}@{}", self.host)
    }

    /// OpenSSH client options. `batch` forbids interactive password prompts.
    pub fn ssh_options(&self, batch: bool) -> Vec<String> {
        let s = &self.settings;
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ];
        if batch {
            opts.push("-o".into());
            opts.push("BatchMode=yes".into());
        }
        for option in [
            format!("ConnectTimeout={}", s.connect_timeout_secs),
            format!("ServerAliveInterval={}", s.server_alive_interval_secs),
            format!("ServerAliveCountMax={}", s.server_alive_count_max),
            "TCPKeepAlive=yes".to_string(),
        ] {
            opts.push("-o".into());
            opts.push(option);
        }
        opts.push("-p".into());
        opts.push(s.ssh_port.to_string());
        opts
    }

    /// The `ssh ...` remote-shell string handed to rsync's `-e`.
    pub fn ssh_command(&self, batch: bool) -> String {
        let mut command = String::from("ssh");
        for opt in self.ssh_options(batch) {
            command.push(' ');
            command.push_str(&opt);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_command_carries_keepalives() {
        let endpoint = Endpoint::new("203.0.113.7", RemoteConfig::default());
        assert_eq!(
            endpoint.ssh_command(true),
            "ssh -o StrictHostKeyChecking=no -o BatchMode=yes -o ConnectTimeout=15 \
             -o ServerAliveInterval=30 -o ServerAliveCountMax=10 -o TCPKeepAlive=yes -p 22"
        );
        assert!(!endpoint.ssh_command(false).contains("BatchMode"));
        assert_eq!(endpoint.login("acme"), "acme@203.0.113.7");
    }
}
