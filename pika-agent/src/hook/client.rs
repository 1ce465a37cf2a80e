//! Hook side: runs inside the short-lived process PAM spawns for each
//! session and reports the login to the monitor.
//!
//! Delivery is at most once. There is no retry and no reply, so a stopped
//! monitor costs one failed `connect` and never delays the login.

use crate::config::DEFAULT_SOCKET_PATH;
use crate::event::{LoginEvent, STATUS_SUCCESS, UNKNOWN, UNKNOWN_HOST, UNKNOWN_USER};
use crate::util::{epoch_millis, parse_ssh_connection};
use std::env;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::Duration;

/// `PAM_TYPE` value for the session-open phase.
pub const PAM_OPEN_SESSION: &str = "open_session";

/// Upper bound on a send to a monitor whose receive queue is full.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Report the current PAM session to the monitor at the well-known socket.
///
/// Does nothing unless PAM invoked us for `open_session`.
pub fn send_event_from_env() -> io::Result<()> {
    send_event_from(env_lookup, Path::new(DEFAULT_SOCKET_PATH))
}

/// [`send_event_from_env`] with an explicit variable source and socket.
pub fn send_event_from<F>(lookup: F, socket: &Path) -> io::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if lookup("PAM_TYPE").as_deref() != Some(PAM_OPEN_SESSION) {
        return Ok(());
    }
    let event = build_event_from(lookup);
    send_event_to(socket, &event)
}

/// Build the login event from the PAM environment of this process.
pub fn build_event_from_env() -> LoginEvent {
    build_event_from(env_lookup)
}

/// Build a login event from `PAM_USER`, `PAM_RHOST`, `PAM_TTY` and
/// `SSH_CONNECTION` as returned by `lookup`.
pub fn build_event_from<F>(lookup: F) -> LoginEvent
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

    let connection = var("SSH_CONNECTION").unwrap_or_default();
    let (conn_addr, conn_port) = parse_ssh_connection(&connection);

    let source_ip = var("PAM_RHOST")
        .or_else(|| conn_addr.map(str::to_owned))
        .unwrap_or_else(|| UNKNOWN_HOST.to_string());

    LoginEvent {
        username: var("PAM_USER").unwrap_or_else(|| UNKNOWN_USER.to_string()),
        source_ip,
        source_port: conn_port.map(str::to_owned),
        timestamp_millis: epoch_millis(),
        status: STATUS_SUCCESS.to_string(),
        auth_method: Some(UNKNOWN.to_string()),
        tty: Some(var("PAM_TTY").unwrap_or_else(|| UNKNOWN.to_string())),
        session_id: std::process::id().to_string(),
    }
}

/// Send one event to the monitor at the well-known socket.
pub fn send_event(event: &LoginEvent) -> io::Result<()> {
    send_event_to(Path::new(DEFAULT_SOCKET_PATH), event)
}

/// Send one event as a single datagram to the socket at `path`.
pub fn send_event_to(path: &Path, event: &LoginEvent) -> io::Result<()> {
    let payload = event.encode()?;
    let socket = UnixDatagram::unbound()?;
    socket.set_write_timeout(Some(SEND_TIMEOUT))?;
    socket.connect(path)?;
    socket.send(&payload)?;
    Ok(())
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}
