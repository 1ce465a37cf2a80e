//! The pam_exec directive in the sshd PAM service file.

use std::path::Path;

/// Subcommand PAM passes to the agent binary.
pub const HOOK_COMMAND: &str = "ssh-login-hook";

/// Directive written by the shell-script hook of earlier releases.
pub const LEGACY_HOOK_LINE: &str = "session optional pam_exec.so /usr/local/bin/pika_ssh_hook.sh";

/// The exact directive registering `hook_binary` as the session hook.
pub fn hook_line(hook_binary: &Path) -> String {
    format!(
        "session optional pam_exec.so {} {}",
        hook_binary.display(),
        HOOK_COMMAND
    )
}

/// Whether the service file registers the hook.
pub fn contains_hook(lines: &[Vec<u8>], hook_line: &str) -> bool {
    lines.iter().any(|l| is_directive(l, hook_line))
}

/// Whitespace-insensitive match of a raw line against a directive.
fn is_directive(line: &[u8], directive: &str) -> bool {
    String::from_utf8_lossy(line).trim() == directive
}

/// Result of editing the PAM service file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PamEdit {
    pub lines: Vec<Vec<u8>>,
    /// The hook directive was present before the edit
    pub found: bool,
    /// The edited lines differ from the input
    pub changed: bool,
}

/// Add (`add = true`) or remove the hook directive.
///
/// Legacy directives are dropped either way. All other lines keep their
/// content and order.
pub fn edit(lines: &[Vec<u8>], hook_line: &str, add: bool) -> PamEdit {
    let mut out = Vec::with_capacity(lines.len() + 1);
    let mut found = false;
    let mut changed = false;

    for line in lines {
        if is_directive(line, LEGACY_HOOK_LINE) {
            changed = true;
            continue;
        }

        if is_directive(line, hook_line) {
            found = true;
            if add {
                out.push(line.clone());
            } else {
                changed = true;
            }
            continue;
        }

        out.push(line.clone());
    }

    if add && !found {
        out.push(hook_line.as_bytes().to_vec());
        changed = true;
    }

    PamEdit {
        lines: out,
        found,
        changed,
    }
}
