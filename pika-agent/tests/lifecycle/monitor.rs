//! Monitor start/stop, decode loop and queue behaviour.

use super::fixtures::{collect, event_for, send_raw, wait_until, TestHost, PAM_SSHD, SSHD_CONFIG};
use pika_agent::error::MonitorError;
use pika_agent::hook::client;
use pika_agent::monitors::MonitorStats;
use std::fs;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_disabled_config_touches_nothing() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let mut cfg = host.config();
    cfg.enabled = false;

    monitor.start(&cfg, &CancellationToken::new()).unwrap();

    assert!(!monitor.is_running());
    assert!(!host.socket_path().exists());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
    assert_eq!(host.read("etc/ssh/sshd_config"), SSHD_CONFIG);
}

#[test]
fn test_start_installs_and_stop_removes_hook() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let hook_line = host.manager().hook_line();

    monitor.start(&host.config(), &CancellationToken::new()).unwrap();

    assert!(monitor.is_running());
    assert_eq!(monitor.socket_path(), Some(host.socket_path()));
    assert!(host.read("etc/pam.d/sshd").contains(&hook_line));
    assert!(host.read("etc/ssh/sshd_config").contains("\nUsePAM yes\nMatch User backup\n"));

    monitor.stop();

    assert!(!monitor.is_running());
    assert!(!host.socket_path().exists());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
    assert!(!host.path("usr/local/bin/pika-agent").exists());
}

#[test]
fn test_malformed_datagram_does_not_stop_listener() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let mut rx = monitor.take_events().unwrap();
    monitor.start(&host.config(), &CancellationToken::new()).unwrap();

    send_raw(&host.socket_path(), b"{not json");
    send_raw(&host.socket_path(), br#"{"username":"alice","ip":"10.0.0.5"}"#);

    let events = collect(&mut rx, 1, WAIT);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].username, "alice");
    assert_eq!(events[0].source_ip, "10.0.0.5");
    assert_eq!(events[0].status, "success");
    assert!(events[0].timestamp_millis > 0);
    assert_eq!(monitor.stats().decode_errors, 1);
}

#[test]
fn test_full_queue_drops_newest() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let mut rx = monitor.take_events().unwrap();
    monitor.start(&host.config(), &CancellationToken::new()).unwrap();

    for i in 0..150 {
        client::send_event_to(&host.socket_path(), &event_for(&format!("user-{i}"))).unwrap();
    }

    // Each drop is counted alongside its warning; the listener unit tests
    // check the warning lines themselves.
    assert!(wait_until(WAIT, || {
        let stats = monitor.stats();
        stats.received + stats.dropped == 150
    }));
    assert_eq!(
        monitor.stats(),
        MonitorStats {
            received: 100,
            dropped: 50,
            decode_errors: 0
        }
    );

    let events = collect(&mut rx, 150, Duration::from_millis(200));
    let users: Vec<String> = events.into_iter().map(|e| e.username).collect();
    let expected: Vec<String> = (0..100).map(|i| format!("user-{i}")).collect();
    assert_eq!(users, expected);
}

#[test]
fn test_hook_client_round_trip() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let mut rx = monitor.take_events().unwrap();
    monitor.start(&host.config(), &CancellationToken::new()).unwrap();

    let env = |name: &str| {
        let value = match name {
            "PAM_TYPE" => "open_session",
            "PAM_USER" => "alice",
            "PAM_TTY" => "ssh",
            "SSH_CONNECTION" => "10.0.0.5 54321 10.0.0.1 22",
            _ => return None,
        };
        Some(value.to_string())
    };
    client::send_event_from(env, &host.socket_path()).unwrap();

    let events = collect(&mut rx, 1, WAIT);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.username, "alice");
    assert_eq!(event.source_ip, "10.0.0.5");
    assert_eq!(event.source_port.as_deref(), Some("54321"));
    assert_eq!(event.status, "success");
    assert_eq!(event.tty.as_deref(), Some("ssh"));
    assert_eq!(event.session_id, std::process::id().to_string());
}

#[test]
fn test_restart_keeps_delivering() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let mut rx = monitor.take_events().unwrap();
    let token = CancellationToken::new();

    monitor.start(&host.config(), &token).unwrap();
    monitor.start(&host.config(), &token).unwrap();

    assert!(monitor.is_running());
    client::send_event_to(&host.socket_path(), &event_for("bob")).unwrap();
    assert_eq!(collect(&mut rx, 1, WAIT)[0].username, "bob");

    // Exactly one hook directive after the reinstall
    let hook_line = host.manager().hook_line();
    assert_eq!(host.read("etc/pam.d/sshd").matches(&hook_line).count(), 1);
}

#[test]
fn test_restart_with_disabled_config_stops() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let token = CancellationToken::new();

    monitor.start(&host.config(), &token).unwrap();
    let mut cfg = host.config();
    cfg.enabled = false;
    monitor.start(&cfg, &token).unwrap();

    assert!(!monitor.is_running());
    assert!(!host.socket_path().exists());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
}

#[test]
fn test_unprivileged_start_keeps_listening() {
    let host = TestHost::new();
    let monitor = host.unprivileged_monitor(100);
    let mut rx = monitor.take_events().unwrap();

    monitor.start(&host.config(), &CancellationToken::new()).unwrap();

    assert!(monitor.is_running());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
    assert_eq!(host.read("etc/ssh/sshd_config"), SSHD_CONFIG);

    client::send_event_to(&host.socket_path(), &event_for("carol")).unwrap();
    assert_eq!(collect(&mut rx, 1, WAIT).len(), 1);
}

#[test]
fn test_install_failure_stops_monitor() {
    let host = TestHost::new();
    fs::remove_file(host.path("etc/pam.d/sshd")).unwrap();
    let monitor = host.monitor(100);

    let err = monitor
        .start(&host.config(), &CancellationToken::new())
        .unwrap_err();

    assert!(matches!(err, MonitorError::Hook(_)));
    assert!(!monitor.is_running());
    assert!(!host.socket_path().exists());
    assert!(!host.path("usr/local/bin/pika-agent").exists());
}

#[test]
fn test_parent_cancellation_then_stop() {
    let host = TestHost::new();
    let monitor = host.monitor(100);
    let parent = CancellationToken::new();

    monitor.start(&host.config(), &parent).unwrap();
    parent.cancel();

    // Listener is done, socket and hook wait for stop
    assert!(!monitor.is_running());
    assert!(host.socket_path().exists());
    assert!(host.read("etc/pam.d/sshd").contains(&host.manager().hook_line()));

    monitor.stop();

    assert!(!monitor.is_running());
    assert!(!host.socket_path().exists());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
}

#[test]
fn test_drop_cleans_up() {
    let host = TestHost::new();
    {
        let monitor = host.monitor(100);
        monitor.start(&host.config(), &CancellationToken::new()).unwrap();
        assert!(host.socket_path().exists());
    }
    assert!(!host.socket_path().exists());
    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
}
