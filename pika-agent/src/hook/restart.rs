//! Restarting sshd after its configuration changed.

use crate::error::HookError;
use std::process::Command;
use tracing::{debug, info};

/// Something that can make a running sshd pick up new configuration.
pub trait ServiceRestarter: Send + Sync {
    /// Restart sshd, returning a description of the method that worked.
    fn restart_sshd(&self) -> Result<String, HookError>;
}

/// Tries a list of commands in order; the first that exits successfully wins.
#[derive(Debug, Clone)]
pub struct CommandRestarter {
    commands: Vec<Vec<String>>,
}

impl CommandRestarter {
    /// Use a custom ordered list of commands (program followed by arguments).
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }
}

impl Default for CommandRestarter {
    /// systemd units first (`sshd` on RHEL-likes, `ssh` on Debian-likes),
    /// then the SysV init scripts under the same two names.
    fn default() -> Self {
        let cmd = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| s.to_string()).collect() };
        Self::new(vec![
            cmd(&["systemctl", "restart", "sshd"]),
            cmd(&["systemctl", "restart", "ssh"]),
            cmd(&["service", "sshd", "restart"]),
            cmd(&["service", "ssh", "restart"]),
        ])
    }
}

impl ServiceRestarter for CommandRestarter {
    fn restart_sshd(&self) -> Result<String, HookError> {
        let mut failures = Vec::new();

        for parts in &self.commands {
            let Some((program, args)) = parts.split_first() else {
                continue;
            };
            let label = parts.join(" ");

            match Command::new(program).args(args).output() {
                Ok(output) if output.status.success() => {
                    info!("Restarted sshd via `{}`", label);
                    return Ok(label);
                }
                Ok(output) => {
                    debug!("`{}` exited with {}", label, output.status);
                    failures.push(format!("`{}`: {}", label, output.status));
                }
                Err(e) => {
                    debug!("`{}` could not run: {}", label, e);
                    failures.push(format!("`{}`: {}", label, e));
                }
            }
        }

        Err(HookError::Restart(failures.join("; ")))
    }
}

/// Leaves sshd alone; the operator restarts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRestart;

impl ServiceRestarter for NoRestart {
    fn restart_sshd(&self) -> Result<String, HookError> {
        info!("sshd restart disabled, restart it manually to apply UsePAM");
        Ok("skipped".to_string())
    }
}
