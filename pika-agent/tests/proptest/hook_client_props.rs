//! Property-based tests for hook event construction and the wire format.

use pika_agent::event::{LoginEvent, UNKNOWN_HOST, UNKNOWN_USER};
use pika_agent::hook::client::build_event_from;
use proptest::prelude::*;
use std::collections::HashMap;

fn env_of(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
    move |name| vars.get(name).cloned()
}

proptest! {
    /// Whatever the environment holds, the event has a user, a source and a
    /// success status
    #[test]
    fn event_always_complete(
        user in proptest::option::of("[a-z_][a-z0-9_-]{0,15}"),
        rhost in proptest::option::of("[a-z0-9.:-]{0,30}"),
        connection in proptest::option::of(".{0,40}"),
    ) {
        let mut vars = HashMap::new();
        if let Some(u) = user.clone() { vars.insert("PAM_USER", u); }
        if let Some(r) = rhost.clone() { vars.insert("PAM_RHOST", r); }
        if let Some(c) = connection { vars.insert("SSH_CONNECTION", c); }

        let event = build_event_from(env_of(vars));

        prop_assert!(!event.username.is_empty());
        prop_assert!(!event.source_ip.is_empty());
        prop_assert_eq!(event.status.as_str(), "success");
        prop_assert!(event.timestamp_millis > 0);

        match user.filter(|u| !u.is_empty()) {
            Some(u) => prop_assert_eq!(&event.username, &u),
            None => prop_assert_eq!(event.username.as_str(), UNKNOWN_USER),
        }
        if let Some(r) = rhost.filter(|r| !r.is_empty()) {
            prop_assert_eq!(&event.source_ip, &r);
        }
    }

    /// SSH_CONNECTION supplies address and port when PAM_RHOST is absent
    #[test]
    fn connection_fallback(
        a in 1u8..=254, b in 0u8..=255, port in 1024u16..=65535,
    ) {
        let mut vars = HashMap::new();
        vars.insert("SSH_CONNECTION", format!("10.{a}.{b}.1 {port} 10.0.0.1 22"));

        let event = build_event_from(env_of(vars));

        prop_assert_eq!(event.source_ip, format!("10.{a}.{b}.1"));
        prop_assert_eq!(event.source_port, Some(port.to_string()));
    }

    /// What the hook sends is what the monitor decodes
    #[test]
    fn built_event_survives_the_wire(
        user in "[a-z]{1,12}",
        tty in "(ssh|pts/[0-9]{1,3})",
    ) {
        let mut vars = HashMap::new();
        vars.insert("PAM_USER", user);
        vars.insert("PAM_TTY", tty);

        let event = build_event_from(env_of(vars));
        let decoded = LoginEvent::decode(&event.encode().unwrap()).unwrap();

        prop_assert_eq!(decoded, event);
    }
}

#[test]
fn empty_environment_uses_localhost() {
    let event = build_event_from(|_: &str| None);
    assert_eq!(event.source_ip, UNKNOWN_HOST);
    assert_eq!(event.source_port, None);
}
