use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::{
    runtime::{Builder, Handle, RuntimeFlavor},
    task,
};

/// Builder for pipeline telemetry sinks.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the log path when one is configured.
    #[must_use]
    pub fn maybe_log_path(self, path: Option<impl Into<PathBuf>>) -> Self {
        match path {
            Some(path) => self.log_path(path),
            None => self,
        }
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        Ok(PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the induction stages and the control loop.
///
/// Every record is mirrored to `tracing` so that a subscriber installed by the
/// binary sees the same dotted keys as the JSON log.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger.as_ref().map(JsonLogger::path))
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

impl Default for PipelineTelemetry {
    fn default() -> Self {
        Self::disabled("induction")
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle with no sinks; records only reach `tracing`.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                publisher: None,
            }),
        }
    }

    /// Component name stamped on every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        match level {
            LogLevel::Debug => tracing::debug!(module = %self.inner.module, %metadata, "{message}"),
            LogLevel::Info => tracing::info!(module = %self.inner.module, %metadata, "{message}"),
            LogLevel::Warn => tracing::warn!(module = %self.inner.module, %metadata, "{message}"),
            LogLevel::Error => tracing::error!(module = %self.inner.module, %metadata, "{message}"),
        }
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(&metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus and waits for the publisher.
    ///
    /// On a multi-threaded tokio runtime the worker blocks in place until the
    /// publish finishes; outside any runtime a short-lived current-thread
    /// runtime drives it. A current-thread runtime cannot be blocked, so there
    /// the publish is spawned and a failure only reaches `tracing`. Async
    /// callers that need delivery should await [`Self::publish`] instead.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord::new(self.inner.module.clone(), event_type, payload);
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(|| handle.block_on(publisher.publish(record)))
            }
            Ok(handle) => {
                let publisher = Arc::clone(publisher);
                handle.spawn(async move {
                    if let Err(err) = publisher.publish(record).await {
                        tracing::warn!(error = %err, "telemetry event publish failed");
                    }
                });
                Ok(())
            }
            Err(_) => {
                let runtime = Builder::new_current_thread().enable_all().build()?;
                runtime.block_on(publisher.publish(record))
            }
        }
    }

    /// Publishes an event and awaits delivery.
    pub async fn publish(&self, event_type: &str, payload: Value) -> Result<()> {
        match &self.inner.publisher {
            Some(publisher) => {
                let record = EventRecord::new(self.inner.module.clone(), event_type, payload);
                publisher.publish(record).await
            }
            None => Ok(()),
        }
    }
}
