//! Configuration broadcast for hot-reloading.
//!
//! Configuration changes (SIGHUP reload, console push) are published here and
//! picked up by whatever owns the login monitor.

use crate::config::Config;
use std::sync::Arc;
use tokio::sync::watch;

/// Broadcasts configuration updates to all subscribers.
pub struct ConfigBroadcaster {
    sender: watch::Sender<Arc<Config>>,
    current: Arc<Config>,
}

impl ConfigBroadcaster {
    /// Create a new config broadcaster with the initial configuration.
    pub fn new(config: Config) -> (Self, watch::Receiver<Arc<Config>>) {
        let config = Arc::new(config);
        let (sender, receiver) = watch::channel(Arc::clone(&config));

        let broadcaster = Self {
            sender,
            current: config,
        };

        (broadcaster, receiver)
    }

    /// Publish a new configuration.
    ///
    /// Returns `false` when the configuration is identical to the current one,
    /// in which case subscribers are not woken.
    pub fn update(&mut self, config: Config) -> bool {
        if *self.current == config {
            return false;
        }
        let config = Arc::new(config);
        self.current = Arc::clone(&config);
        self.sender.send_replace(config);
        true
    }

    /// Get the current configuration.
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current)
    }
}
