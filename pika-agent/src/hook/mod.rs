//! PAM exec hook management.
//!
//! Installing the hook means three things on the host:
//! - sshd runs with `UsePAM yes`
//! - the agent binary is reachable at the path PAM executes
//! - `/etc/pam.d/sshd` carries the `pam_exec.so` session directive
//!
//! Installed state is never cached. It is derived from the PAM file on every
//! call, which is what makes [`HookManager::install`] safe to repeat.

pub mod client;
pub mod pam_config;
pub mod restart;
pub mod sshd_config;

mod rewrite;

pub use restart::{CommandRestarter, NoRestart, ServiceRestarter};

use crate::config::SshLoginConfig;
use crate::error::HookError;
use crate::metrics::PAM_HOOK_INSTALLED;
use crate::util;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filesystem locations the hook touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPaths {
    pub pam_config: PathBuf,
    pub sshd_config: PathBuf,
    pub hook_binary: PathBuf,
}

impl HookPaths {
    pub fn from_config(config: &SshLoginConfig) -> Self {
        Self {
            pam_config: config.pam_config.clone(),
            sshd_config: config.sshd_config.clone(),
            hook_binary: config.hook_binary.clone(),
        }
    }
}

impl Default for HookPaths {
    fn default() -> Self {
        Self::from_config(&SshLoginConfig::default())
    }
}

/// Point-in-time view of the hook's installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HookStatus {
    pub pam_hook_installed: bool,
    pub use_pam_enabled: bool,
    pub hook_binary_present: bool,
}

/// How the hook binary came to be at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookBinary {
    AlreadyPresent,
    Linked,
    Copied,
}

pub struct HookManager {
    paths: HookPaths,
    restarter: Box<dyn ServiceRestarter>,
    privileged: fn() -> bool,
    agent_binary: Option<PathBuf>,
}

impl HookManager {
    pub fn new(paths: HookPaths) -> Self {
        Self {
            paths,
            restarter: Box::new(CommandRestarter::default()),
            privileged: util::is_root,
            agent_binary: None,
        }
    }

    pub fn from_config(config: &SshLoginConfig) -> Self {
        let manager = Self::new(HookPaths::from_config(config));
        if config.restart_sshd {
            manager
        } else {
            manager.with_restarter(NoRestart)
        }
    }

    /// Replace how sshd is restarted after `UsePAM` was enabled.
    pub fn with_restarter(mut self, restarter: impl ServiceRestarter + 'static) -> Self {
        self.restarter = Box::new(restarter);
        self
    }

    /// Replace the privilege check (defaults to "effective uid is 0").
    pub fn with_privilege_check(mut self, check: fn() -> bool) -> Self {
        self.privileged = check;
        self
    }

    /// Link this binary instead of the running executable.
    pub fn with_agent_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_binary = Some(path.into());
        self
    }

    pub fn paths(&self) -> &HookPaths {
        &self.paths
    }

    /// The directive this manager writes into the PAM file.
    pub fn hook_line(&self) -> String {
        pam_config::hook_line(&self.paths.hook_binary)
    }

    /// Whether the PAM file carries the hook directive right now.
    pub fn is_installed(&self) -> bool {
        rewrite::read_lines(&self.paths.pam_config)
            .map(|lines| pam_config::contains_hook(&lines, &self.hook_line()))
            .unwrap_or(false)
    }

    pub fn status(&self) -> HookStatus {
        HookStatus {
            pam_hook_installed: self.is_installed(),
            use_pam_enabled: rewrite::read_lines(&self.paths.sshd_config)
                .map(|lines| sshd_config::use_pam_enabled(&lines))
                .unwrap_or(false),
            hook_binary_present: fs::symlink_metadata(&self.paths.hook_binary).is_ok(),
        }
    }

    /// Make the host report SSH logins to the agent.
    pub fn install(&self) -> Result<(), HookError> {
        if !(self.privileged)() {
            return Err(HookError::PermissionDenied(
                "installing the PAM hook requires root".to_string(),
            ));
        }

        if self.is_installed() {
            info!("PAM hook already installed, skipping");
            PAM_HOOK_INSTALLED.set(1);
            return Ok(());
        }

        self.ensure_use_pam()?;

        let binary = self.ensure_hook_binary()?;

        if let Err(e) = self.modify_pam_config(true) {
            if binary != HookBinary::AlreadyPresent {
                remove_quietly(&self.paths.hook_binary);
            }
            return Err(e);
        }

        PAM_HOOK_INSTALLED.set(1);
        info!(pam = %self.paths.pam_config.display(), "PAM hook installed");
        Ok(())
    }

    /// Remove the hook. Best effort: failures are logged, never returned.
    pub fn uninstall(&self) {
        if let Err(e) = self.modify_pam_config(false) {
            warn!("Failed to remove PAM hook directive: {}", e);
        }

        self.remove_hook_binary();

        PAM_HOOK_INSTALLED.set(0);
        info!("PAM hook uninstalled");
    }

    /// Returns whether sshd_config was changed.
    fn ensure_use_pam(&self) -> Result<bool, HookError> {
        let path = &self.paths.sshd_config;
        let lines = rewrite::read_lines(path)?;

        let Some(edited) = sshd_config::enable_use_pam(&lines) else {
            info!("sshd already uses PAM, skipping");
            return Ok(false);
        };

        rewrite::rewrite_lines(path, &edited)?;
        info!(path = %path.display(), "Enabled UsePAM in sshd config");

        if let Err(e) = self.restarter.restart_sshd() {
            warn!("Failed to restart sshd, restart it manually: {}", e);
        }

        Ok(true)
    }

    fn ensure_hook_binary(&self) -> Result<HookBinary, HookError> {
        let target = &self.paths.hook_binary;
        let exe = match &self.agent_binary {
            Some(path) => path.clone(),
            None => std::env::current_exe()
                .map_err(|e| HookError::io("resolving", "/proc/self/exe", e))?,
        };

        if exe == *target {
            return Ok(HookBinary::AlreadyPresent);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| HookError::io("creating", parent, e))?;
        }

        if util::is_symlink(target) && fs::read_link(target).is_ok_and(|current| current == exe) {
            debug!(path = %target.display(), "Hook binary link already in place");
            return Ok(HookBinary::AlreadyPresent);
        }

        match fs::remove_file(target) {
            Ok(()) => debug!(path = %target.display(), "Removed stale hook binary"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(HookError::io("removing", target, e)),
        }

        match std::os::unix::fs::symlink(&exe, target) {
            Ok(()) => {
                debug!(link = %target.display(), exe = %exe.display(), "Linked hook binary");
                return Ok(HookBinary::Linked);
            }
            Err(e) => debug!("Symlink failed ({}), copying binary instead", e),
        }

        copy_hook_binary(&exe, target, |from, to| fs::copy(from, to).map(drop))?;
        debug!(path = %target.display(), "Copied hook binary");
        Ok(HookBinary::Copied)
    }

    /// Only links are removed: a regular file here may be the agent itself.
    fn remove_hook_binary(&self) {
        if util::is_symlink(&self.paths.hook_binary) {
            remove_quietly(&self.paths.hook_binary);
        }
    }

    fn modify_pam_config(&self, add: bool) -> Result<(), HookError> {
        let path = &self.paths.pam_config;
        let lines = rewrite::read_lines(path)?;
        let edit = pam_config::edit(&lines, &self.hook_line(), add);

        if !edit.changed {
            debug!(path = %path.display(), add, "PAM config already up to date");
            return Ok(());
        }

        rewrite::rewrite_lines(path, &edit.lines)?;
        info!(path = %path.display(), add, "Updated PAM config");
        Ok(())
    }
}

/// Copy `exe` to `target` with `copy` and make it executable.
///
/// Whatever `copy` left behind is removed on failure: uninstall only removes
/// links, so a partial copy would otherwise stay at the hook path for good.
fn copy_hook_binary<F>(exe: &Path, target: &Path, copy: F) -> Result<(), HookError>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    if let Err(e) = copy(exe, target) {
        remove_quietly(target);
        return Err(HookError::io("copying", target, e));
    }
    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(0o755)) {
        remove_quietly(target);
        return Err(HookError::io("setting permissions on", target, e));
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove hook binary: {}", e);
        }
    }
}
