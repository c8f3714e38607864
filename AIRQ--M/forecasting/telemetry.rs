use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Builder for forecasting telemetry sinks.
pub struct ForecastTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ForecastTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ForecastTelemetry> {
        let logger = self
            .log_path
            .map(|path| JsonLogger::with_min_level(path, self.min_level))
            .transpose()?;
        let event = self.event_publisher.map(EventHandle::new).transpose()?;
        Ok(ForecastTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                event,
            }),
        })
    }
}

/// Telemetry handle shared by the pipeline stages. Without sinks every call is a no-op.
#[derive(Clone)]
pub struct ForecastTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ForecastTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastTelemetry")
            .field("module", &self.inner.module)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Runtime::new()?,
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("forecast event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl ForecastTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ForecastTelemetryBuilder {
        ForecastTelemetryBuilder::new(module)
    }

    /// Handle with no sinks attached.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }

    /// Logs without failing the caller; sink errors go to stderr.
    pub fn note(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Err(err) = self.log(level, message, metadata) {
            eprintln!("forecast log write failed: {err:?}");
        }
    }

    /// Emits an event without failing the caller; sink errors go to stderr.
    pub fn announce(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.event(event_type, payload) {
            eprintln!("forecast event {event_type} failed: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("forecast.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = ForecastTelemetry::builder("forecasting.pipeline")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "site.state", json!({ "site": 3, "state": "train" }))
            .unwrap();
        telemetry
            .event("forecast.site.completed", json!({ "site": 3 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("site.state"));
        assert!(content.contains("\"state\":\"train\""));
        assert_eq!(bus.of_type("forecast.site.completed").len(), 1);
    }

    #[test]
    fn min_level_filters_debug_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("forecast.log");
        let telemetry = ForecastTelemetry::builder("forecasting")
            .log_path(&path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry.note(LogLevel::Debug, "site.state", json!({}));
        telemetry.note(LogLevel::Warn, "training.fallback", json!({}));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("site.state"));
        assert!(content.contains("training.fallback"));
    }

    #[test]
    fn disabled_handle_is_silent() {
        let telemetry = ForecastTelemetry::disabled("forecasting");
        assert!(telemetry.log(LogLevel::Error, "ignored", json!({})).is_ok());
        assert!(telemetry.event("ignored", json!({})).is_ok());
    }
}
