//! Common utility functions shared across modules.

use std::fs;
use std::path::Path;

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether the process runs with an effective uid of root.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Whether `path` is a symbolic link (without following it).
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Split an `SSH_CONNECTION` value into (remote address, remote port).
///
/// The value has the form "client_ip client_port server_ip server_port".
pub fn parse_ssh_connection(value: &str) -> (Option<&str>, Option<&str>) {
    let mut fields = value.split_whitespace();
    let addr = fields.next();
    let port = fields.next();
    (addr, port)
}
