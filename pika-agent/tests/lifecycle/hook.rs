//! Hook installation against a scratch host tree.

use super::fixtures::{TestHost, PAM_SSHD, SSHD_CONFIG};
use pika_agent::hook::pam_config::LEGACY_HOOK_LINE;
use pika_agent::hook::HookStatus;
use std::fs;
use std::os::unix::fs::PermissionsExt;

#[test]
fn test_install_inserts_use_pam_before_match() {
    let host = TestHost::new();

    host.manager().install().unwrap();

    assert_eq!(
        host.read("etc/ssh/sshd_config"),
        "Port 22\n#UsePAM no\nPasswordAuthentication no\n\nUsePAM yes\nMatch User backup\n    ForceCommand /usr/bin/rsync\n"
    );
    assert_eq!(host.read("etc/ssh/sshd_config.bak"), SSHD_CONFIG);
}

#[test]
fn test_install_keeps_file_modes() {
    let host = TestHost::new();
    let pam = host.path("etc/pam.d/sshd");
    fs::set_permissions(&pam, fs::Permissions::from_mode(0o640)).unwrap();

    host.manager().install().unwrap();

    assert_eq!(fs::metadata(&pam).unwrap().permissions().mode() & 0o777, 0o640);
}

#[test]
fn test_status_follows_install_and_uninstall() {
    let host = TestHost::new();
    let manager = host.manager();

    assert_eq!(
        manager.status(),
        HookStatus {
            pam_hook_installed: false,
            use_pam_enabled: false,
            hook_binary_present: false,
        }
    );

    manager.install().unwrap();
    assert_eq!(
        manager.status(),
        HookStatus {
            pam_hook_installed: true,
            use_pam_enabled: true,
            hook_binary_present: true,
        }
    );

    manager.uninstall();
    let status = manager.status();
    assert!(!status.pam_hook_installed);
    // UsePAM stays on; other PAM modules may rely on it
    assert!(status.use_pam_enabled);
    assert!(!status.hook_binary_present);
}

#[test]
fn test_install_uninstall_round_trip_restores_pam() {
    let host = TestHost::new();
    let manager = host.manager();

    for _ in 0..3 {
        manager.install().unwrap();
        manager.uninstall();
        assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
    }
}

#[test]
fn test_legacy_line_removed_on_uninstall() {
    let host = TestHost::new();
    fs::write(
        host.path("etc/pam.d/sshd"),
        format!("{PAM_SSHD}{LEGACY_HOOK_LINE}\n"),
    )
    .unwrap();

    host.manager().uninstall();

    assert_eq!(host.read("etc/pam.d/sshd"), PAM_SSHD);
}

#[test]
fn test_status_serializes_for_cli() {
    let host = TestHost::new();
    let json = serde_json::to_value(host.manager().status()).unwrap();
    assert_eq!(json["pam_hook_installed"], false);
    assert_eq!(json["use_pam_enabled"], false);
}
