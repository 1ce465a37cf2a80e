//! Hook client behaviour when the monitor is absent or the phase is wrong.

use super::fixtures::TestHost;
use pika_agent::hook::client;
use std::fs;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::time::{Duration, Instant};

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |name| {
        pairs
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }
}

#[test]
fn test_close_session_sends_nothing() {
    let host = TestHost::new();
    let socket = host.path("login.sock");
    let receiver = UnixDatagram::bind(&socket).unwrap();
    receiver.set_nonblocking(true).unwrap();

    client::send_event_from(lookup(&[("PAM_TYPE", "close_session"), ("PAM_USER", "alice")]), &socket)
        .unwrap();

    let mut buf = [0u8; 64];
    let err = receiver.recv(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
}

#[test]
fn test_missing_monitor_fails_fast() {
    let host = TestHost::new();
    let socket = host.path("run/pika/ssh_login.sock");

    let start = Instant::now();
    let result = client::send_event_from(lookup(&[("PAM_TYPE", "open_session")]), &socket);

    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_stale_socket_file_fails_fast() {
    let host = TestHost::new();
    let socket = host.path("stale.sock");
    drop(UnixDatagram::bind(&socket).unwrap());
    assert!(fs::symlink_metadata(&socket).is_ok());

    let start = Instant::now();
    let result = client::send_event_from(lookup(&[("PAM_TYPE", "open_session")]), &socket);

    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(1));
}
