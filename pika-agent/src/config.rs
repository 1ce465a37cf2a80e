//! TOML-based configuration for the agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pika/agent.toml";

pub const DEFAULT_PAM_CONFIG: &str = "/etc/pam.d/sshd";
pub const DEFAULT_SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
pub const DEFAULT_HOOK_BINARY: &str = "/usr/local/bin/pika-agent";
pub const DEFAULT_SOCKET_PATH: &str = "/run/pika/ssh_login.sock";
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ssh_login: SshLoginConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String { "info".to_string() }

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// SSH login monitoring, as toggled from the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshLoginConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Datagram socket the PAM hook reports to
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Events held for the consumer before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Restart sshd after enabling UsePAM
    #[serde(default = "default_true")]
    pub restart_sshd: bool,
    #[serde(default = "default_pam_config")]
    pub pam_config: PathBuf,
    #[serde(default = "default_sshd_config")]
    pub sshd_config: PathBuf,
    /// Where PAM executes the agent from
    #[serde(default = "default_hook_binary")]
    pub hook_binary: PathBuf,
}

fn default_true() -> bool { true }
fn default_socket_path() -> PathBuf { PathBuf::from(DEFAULT_SOCKET_PATH) }
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_pam_config() -> PathBuf { PathBuf::from(DEFAULT_PAM_CONFIG) }
fn default_sshd_config() -> PathBuf { PathBuf::from(DEFAULT_SSHD_CONFIG) }
fn default_hook_binary() -> PathBuf { PathBuf::from(DEFAULT_HOOK_BINARY) }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

impl Default for SshLoginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_path: default_socket_path(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            restart_sshd: true,
            pam_config: default_pam_config(),
            sshd_config: default_sshd_config(),
            hook_binary: default_hook_binary(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_or_default(path: &std::path::Path) -> Self {
        Self::load(path).unwrap_or_default()
    }
}
