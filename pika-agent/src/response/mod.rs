//! Response handling: drains the login event queue and hands each event to
//! the registered sinks.

use crate::config::LogFormat;
use crate::event::LoginEvent;
use crate::metrics::{EVENTS_PROCESSED, SINK_FAILURES};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumer of login events: alerting, persistence, forwarding.
pub trait LoginEventSink: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &LoginEvent) -> anyhow::Result<()>;
}

/// Prints every login on stdout, one line per event.
pub struct LogSink {
    format: LogFormat,
}

impl LogSink {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    /// The line printed for `event`.
    pub fn format_event(&self, event: &LoginEvent) -> anyhow::Result<String> {
        match self.format {
            LogFormat::Json => Ok(serde_json::to_string(event)?),
            LogFormat::Text => {
                let when = DateTime::<Utc>::from_timestamp_millis(event.timestamp_millis)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| event.timestamp_millis.to_string());
                let from = match &event.source_port {
                    Some(port) => format!("{}:{}", event.source_ip, port),
                    None => event.source_ip.clone(),
                };
                Ok(format!(
                    "[{}] ssh login {} - user={} from={} tty={}",
                    when,
                    event.status,
                    event.username,
                    from,
                    event.tty.as_deref().unwrap_or("-"),
                ))
            }
        }
    }
}

impl LoginEventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, event: &LoginEvent) -> anyhow::Result<()> {
        println!("{}", self.format_event(event)?);
        Ok(())
    }
}

pub struct ResponseHandler {
    sinks: Vec<Box<dyn LoginEventSink>>,
}

impl ResponseHandler {
    /// A handler with the built-in [`LogSink`].
    pub fn new(log_format: LogFormat) -> Self {
        Self::empty().with_sink(LogSink::new(log_format))
    }

    /// A handler without any sink.
    pub fn empty() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl LoginEventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Consume events until every sender is gone.
    pub async fn run(&self, mut rx: mpsc::Receiver<LoginEvent>) {
        info!(sinks = self.sinks.len(), "Response handler started");
        while let Some(event) = rx.recv().await {
            self.handle_event(&event);
        }
        debug!("Response handler stopped");
    }

    /// Dispatch one event. A failing sink does not stop the others.
    pub fn handle_event(&self, event: &LoginEvent) {
        EVENTS_PROCESSED.inc();

        for sink in &self.sinks {
            if let Err(e) = sink.handle(event) {
                SINK_FAILURES.inc();
                warn!(sink = sink.name(), user = %event.username, "Login event sink failed: {:#}", e);
            }
        }
    }
}
