//! Prometheus metrics and health/metrics HTTP endpoints

#[cfg(feature = "metrics")]
mod inner {
    use axum::{routing::get, Router};
    use once_cell::sync::Lazy;
    use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
    use std::net::SocketAddr;
    use tokio::sync::watch;
    use tracing::{error, info};

    pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

    fn counter(name: &str, help: &str) -> IntCounter {
        let counter = IntCounter::new(name, help).unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    }

    fn gauge(name: &str, help: &str) -> IntGauge {
        let gauge = IntGauge::new(name, help).unwrap();
        REGISTRY.register(Box::new(gauge.clone())).unwrap();
        gauge
    }

    pub static LOGIN_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
        counter("pika_ssh_login_events_total", "SSH login events published to the queue")
    });

    pub static LOGIN_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
        counter("pika_ssh_login_dropped_total", "SSH login events dropped on a full queue")
    });

    pub static DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
        counter("pika_ssh_login_decode_errors_total", "Datagrams that were not valid login events")
    });

    pub static EVENTS_PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
        counter("pika_ssh_login_events_processed_total", "SSH login events dispatched to sinks")
    });

    pub static SINK_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
        counter("pika_ssh_login_sink_failures_total", "Login event sink errors")
    });

    pub static MONITOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
        gauge("pika_ssh_monitor_running", "1 while the SSH login listener is running")
    });

    pub static PAM_HOOK_INSTALLED: Lazy<IntGauge> = Lazy::new(|| {
        gauge("pika_pam_hook_installed", "1 after the PAM hook was installed by this agent")
    });

    pub static START_TIME: Lazy<IntGauge> = Lazy::new(|| {
        let gauge = gauge("pika_start_time_seconds", "Unix timestamp when the agent started");
        gauge.set(chrono::Utc::now().timestamp());
        gauge
    });

    async fn health_handler() -> &'static str { "OK" }

    async fn metrics_handler() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    async fn ready_handler(ready: axum::extract::State<watch::Receiver<bool>>) -> (axum::http::StatusCode, &'static str) {
        if *ready.borrow() {
            (axum::http::StatusCode::OK, "READY")
        } else {
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    pub async fn start_server(addr: SocketAddr, ready_rx: watch::Receiver<bool>) {
        let _ = &*START_TIME;
        let _ = &*MONITOR_RUNNING;
        let _ = &*PAM_HOOK_INSTALLED;

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(ready_rx);

        info!("Metrics server listening on {}", addr);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server to {}: {}", addr, e);
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }
}

#[cfg(feature = "metrics")]
pub use inner::*;

// Stub implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub mod stubs {
    use std::net::SocketAddr;
    use tokio::sync::watch;

    pub struct NoOpCounter;
    impl NoOpCounter {
        pub fn inc(&self) {}
    }

    pub struct NoOpGauge;
    impl NoOpGauge {
        pub fn set(&self, _: i64) {}
    }

    pub static LOGIN_EVENTS: NoOpCounter = NoOpCounter;
    pub static LOGIN_EVENTS_DROPPED: NoOpCounter = NoOpCounter;
    pub static DECODE_ERRORS: NoOpCounter = NoOpCounter;
    pub static EVENTS_PROCESSED: NoOpCounter = NoOpCounter;
    pub static SINK_FAILURES: NoOpCounter = NoOpCounter;
    pub static MONITOR_RUNNING: NoOpGauge = NoOpGauge;
    pub static PAM_HOOK_INSTALLED: NoOpGauge = NoOpGauge;

    pub async fn start_server(_addr: SocketAddr, _ready_rx: watch::Receiver<bool>) {
        // No-op when metrics disabled
    }
}

#[cfg(not(feature = "metrics"))]
pub use stubs::*;
