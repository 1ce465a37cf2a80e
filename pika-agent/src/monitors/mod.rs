//! Monitor modules
//!
//! Each monitor watches a specific aspect of the host and publishes events
//! for the response handler.

pub mod ssh_login;

pub use ssh_login::{MonitorStats, SshLoginMonitor};
