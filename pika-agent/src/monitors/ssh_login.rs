//! SSH Login Monitor
//!
//! Owns the receiving end of the hook socket. While running, one dedicated
//! thread receives datagrams from PAM hook processes, decodes them into
//! [`LoginEvent`]s and publishes them into a bounded queue. A full queue
//! drops the event: the listener never waits for the consumer.
//!
//! Starting the monitor installs the PAM hook, stopping it removes the hook.

use crate::config::{SshLoginConfig, DEFAULT_QUEUE_CAPACITY};
use crate::error::MonitorError;
use crate::event::LoginEvent;
use crate::hook::HookManager;
use crate::metrics::{DECODE_ERRORS, LOGIN_EVENTS, LOGIN_EVENTS_DROPPED, MONITOR_RUNNING};
use crate::util::epoch_millis;
use std::fs;
use std::io;
use std::net::Shutdown;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest datagram the listener reads; longer payloads are truncated and
/// fail to decode.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// How often a blocked receive wakes up to look at the cancellation token.
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Pause after an unexpected receive error so a persistent one cannot spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

type HookBuilder = Box<dyn Fn(&SshLoginConfig) -> HookManager + Send + Sync>;

/// Counters kept by the listener thread.
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    dropped: AtomicU64,
    decode_errors: AtomicU64,
}

/// Snapshot of [`ListenerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorStats {
    /// Events published to the queue
    pub received: u64,
    /// Decoded events dropped because the queue was full or closed
    pub dropped: u64,
    /// Datagrams that were not valid login events
    pub decode_errors: u64,
}

impl ListenerStats {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Everything that exists only while the monitor is running.
#[derive(Default)]
struct RuntimeState {
    enabled: bool,
    socket_path: Option<PathBuf>,
    /// Second handle on the listener socket, used to shut it down
    listener: Option<UnixDatagram>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
    hooks: Option<HookManager>,
}

pub struct SshLoginMonitor {
    state: Mutex<RuntimeState>,
    events_tx: mpsc::Sender<LoginEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<LoginEvent>>>,
    stats: Arc<ListenerStats>,
    hook_builder: HookBuilder,
}

impl SshLoginMonitor {
    /// Create a stopped monitor whose queue holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        Self {
            state: Mutex::new(RuntimeState::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            stats: Arc::new(ListenerStats::default()),
            hook_builder: Box::new(HookManager::from_config),
        }
    }

    /// Build the hook manager for each start with `builder` instead of
    /// [`HookManager::from_config`].
    pub fn with_hook_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&SshLoginConfig) -> HookManager + Send + Sync + 'static,
    {
        self.hook_builder = Box::new(builder);
        self
    }

    /// Take the read side of the event queue.
    ///
    /// There is exactly one consumer; later calls return `None`.
    pub fn take_events(&self) -> Option<mpsc::Receiver<LoginEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether the listener is serving the socket.
    ///
    /// Cancelling the `parent` token passed to [`start`](Self::start) ends
    /// the listener, so this turns false right away. The socket file and the
    /// hook stay in place until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        let state = self.lock_state();
        state.enabled && state.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
    }

    /// Socket the listener is bound to, while running.
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.lock_state().socket_path.clone()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.snapshot()
    }

    /// Apply `config`: stop if running, then start again if enabled.
    ///
    /// The listener shuts down when either [`stop`](Self::stop) is called or
    /// `parent` is cancelled. After a parent cancellation the owner still
    /// calls `stop` to unbind the socket and remove the hook.
    pub fn start(
        &self,
        config: &SshLoginConfig,
        parent: &CancellationToken,
    ) -> Result<(), MonitorError> {
        if !cfg!(target_os = "linux") {
            return Err(MonitorError::UnsupportedPlatform);
        }

        let mut state = self.lock_state();

        if state.enabled {
            self.stop_locked(&mut state);
        }

        if !config.enabled {
            info!("SSH login monitoring disabled");
            return Ok(());
        }

        self.start_listener(&mut state, &config.socket_path, parent)?;

        let hooks = (self.hook_builder)(config);
        let installed = hooks.install();
        state.hooks = Some(hooks);

        match installed {
            Ok(()) => {}
            Err(e) if e.is_permission_denied() => {
                warn!("Cannot install PAM hook automatically: {}", e);
                info!("Run `pika-agent install-hook` as root to enable SSH login reporting");
            }
            Err(e) => {
                error!("Failed to install PAM hook: {}", e);
                self.stop_locked(&mut state);
                return Err(e.into());
            }
        }

        info!(socket = %config.socket_path.display(), "SSH login monitor started");
        Ok(())
    }

    /// Stop listening and remove the PAM hook. Does nothing when stopped.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        self.stop_locked(&mut state);
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_listener(
        &self,
        state: &mut RuntimeState,
        path: &Path,
        parent: &CancellationToken,
    ) -> Result<(), MonitorError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| MonitorError::socket("creating socket directory", dir, e))?;
        }

        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(MonitorError::socket("removing stale socket", path, e)),
        }

        let socket = UnixDatagram::bind(path).map_err(|e| MonitorError::socket("binding", path, e))?;

        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), "Failed to restrict socket permissions: {}", e);
        }

        let handle = socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .and_then(|()| socket.try_clone())
            .map_err(|e| {
                remove_socket_file(path);
                MonitorError::socket("configuring", path, e)
            })?;

        let cancel = parent.child_token();
        let listener = Listener {
            socket,
            cancel: cancel.clone(),
            events: self.events_tx.clone(),
            stats: Arc::clone(&self.stats),
        };

        let worker = thread::Builder::new()
            .name("ssh-login-listener".to_string())
            .spawn(move || listener.run())
            .map_err(|e| {
                remove_socket_file(path);
                MonitorError::Spawn(e)
            })?;

        state.enabled = true;
        state.socket_path = Some(path.to_path_buf());
        state.listener = Some(handle);
        state.cancel = Some(cancel);
        state.worker = Some(worker);
        MONITOR_RUNNING.set(1);

        info!(path = %path.display(), "SSH login socket listening");
        Ok(())
    }

    fn stop_locked(&self, state: &mut RuntimeState) {
        if !state.enabled {
            return;
        }

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }

        if let Some(listener) = state.listener.take() {
            // Wakes the blocked receive
            let _ = listener.shutdown(Shutdown::Both);
        }

        if let Some(worker) = state.worker.take() {
            if worker.join().is_err() {
                error!("SSH login listener thread panicked");
            }
        }

        if let Some(path) = state.socket_path.take() {
            remove_socket_file(&path);
        }

        if let Some(hooks) = state.hooks.take() {
            hooks.uninstall();
        }

        state.enabled = false;
        MONITOR_RUNNING.set(0);
        info!("SSH login monitor stopped");
    }
}

impl Default for SshLoginMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Drop for SshLoginMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn remove_socket_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove socket: {}", e),
    }
}

/// The decode loop, owned by the listener thread.
struct Listener {
    socket: UnixDatagram,
    cancel: CancellationToken,
    events: mpsc::Sender<LoginEvent>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    fn run(self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    if self.cancel.is_cancelled() || is_closed(&e) {
                        break;
                    }
                    warn!("Failed to read SSH login event: {}", e);
                    thread::sleep(ERROR_BACKOFF);
                    continue;
                }
            };

            // Also what a shut-down socket returns; the loop head sorts it out
            if n == 0 {
                continue;
            }

            self.handle_datagram(&buf[..n]);
        }

        debug!("SSH login listener exited");
    }

    fn handle_datagram(&self, payload: &[u8]) {
        let mut event = match LoginEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                DECODE_ERRORS.inc();
                warn!(len = payload.len(), "Failed to decode SSH login event: {}", e);
                return;
            }
        };

        event.backfill(epoch_millis());

        match self.events.try_reserve() {
            Ok(permit) => {
                info!(
                    user = %event.username,
                    ip = %event.source_ip,
                    status = %event.status,
                    "SSH login detected"
                );
                permit.send(event);
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                LOGIN_EVENTS.inc();
            }
            Err(TrySendError::Full(())) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                LOGIN_EVENTS_DROPPED.inc();
                warn!(
                    user = %event.username,
                    ip = %event.source_ip,
                    "Login event queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(())) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                LOGIN_EVENTS_DROPPED.inc();
                warn!(user = %event.username, "Login event consumer gone, dropping event");
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn is_closed(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EBADF as i32)
        || e.kind() == io::ErrorKind::NotConnected
}
