//! Error types for hook installation and the login monitor.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while installing or removing the PAM exec hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The caller lacks the privilege to touch system configuration.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An I/O failure on a specific path.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// None of the known service managers could restart sshd.
    #[error("could not restart sshd: {0}")]
    Restart(String),
}

impl HookError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// True when the failure is due to insufficient privilege, either
    /// detected up front or reported by the OS during a file operation.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::PermissionDenied(_) => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            Self::Restart(_) => false,
        }
    }
}

/// Failures starting the login monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("SSH login monitoring is only supported on Linux")]
    UnsupportedPlatform,

    #[error("{action} {}: {source}", path.display())]
    Socket {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("PAM hook installation failed: {0}")]
    Hook(#[from] HookError),
}

impl MonitorError {
    pub(crate) fn socket(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Socket {
            action,
            path: path.into(),
            source,
        }
    }
}
