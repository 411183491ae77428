//! Password-authenticated libssh2 sessions.
//!
//! Everything here blocks; callers run it inside `spawn_blocking`.

use std::net::{TcpStream, ToSocketAddrs};

use app_directory::Secret;
use ssh2::{ErrorCode, Session};

use super::Endpoint;
use crate::utils::{Result, SyncError};

/// libssh2's `LIBSSH2_ERROR_AUTHENTICATION_FAILED`.
const AUTHENTICATION_FAILED: i32 = -18;

pub fn open(endpoint: &Endpoint, user: &str, password: &Secret) -> Result<Session> {
    let settings = &endpoint.settings;
    let addr = (endpoint.host.as_str(), settings.ssh_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| SyncError::NotFound(format!("address for host {}", endpoint.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout())?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(settings.session_timeout().as_millis().min(u32::MAX as u128) as u32);
    session.handshake()?;

    session.userauth_password(user, password.expose())?;
    if !session.authenticated() {
        return Err(SyncError::Ssh(ssh2::Error::new(
            ErrorCode::Session(AUTHENTICATION_FAILED),
            "Authentication failed",
        )));
    }

    session.set_keepalive(true, settings.keepalive_interval_secs);
    tracing::debug!(host = %endpoint.host, user = %user, "SSH session established");
    Ok(session)
}

/// SFTP paths are relative to the login's home: `~/x` becomes `x`.
pub fn sftp_path(remote_path: &str) -> String {
    match remote_path {
        "~" | "~/" => ".".to_string(),
        other => match other.strip_prefix("~/") {
            Some(rest) => rest.to_string(),
            None => other.to_string(),
        },
    }
}
