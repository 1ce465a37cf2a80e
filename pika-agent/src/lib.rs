//! Pika agent - SSH login surveillance
//!
//! Reports every SSH session opened on the host. sshd runs a PAM exec hook
//! (this same binary, `ssh-login-hook` subcommand) which sends one datagram
//! per login to the agent's monitor socket.
//!
//! This library provides the hook management, the monitor and the hook
//! client. The binary in main.rs uses this library to run the daemon.

pub mod config;
pub mod config_broadcast;
pub mod error;
pub mod event;
pub mod hook;
pub mod metrics;
pub mod monitors;
pub mod response;
pub mod util;

// Re-export commonly used types
pub use config::{Config, SshLoginConfig};
pub use error::{HookError, MonitorError};
pub use event::LoginEvent;
pub use hook::{HookManager, HookPaths, HookStatus};
pub use monitors::SshLoginMonitor;
