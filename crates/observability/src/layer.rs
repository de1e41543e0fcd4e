// crates/observability/src/layer.rs
//! `tracing-subscriber` layer that feeds events into a [`LogHub`].

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::hub::{LogEntry, LogHub};

/// Captures every event that passes the subscriber's filter.
///
/// The message becomes the entry text; other fields are appended as
/// `key=value` pairs.
pub struct LogCaptureLayer {
    hub: LogHub,
}

impl LogCaptureLayer {
    pub fn new(hub: LogHub) -> Self {
        Self { hub }
    }
}

impl LogHub {
    pub fn layer(&self) -> LogCaptureLayer {
        LogCaptureLayer::new(self.clone())
    }
}

impl<S: Subscriber> Layer<S> for LogCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = event.metadata().level().as_str().to_ascii_lowercase();
        self.hub.record(LogEntry::new(level, visitor.finish()));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(f: impl FnOnce()) -> Vec<LogEntry> {
        let hub = LogHub::new();
        let subscriber = tracing_subscriber::registry().with(hub.layer());
        tracing::subscriber::with_default(subscriber, f);
        hub.recent()
    }

    #[test]
    fn test_message_and_fields_are_flattened() {
        let entries = capture(|| {
            tracing::warn!(job_id = 7, path = "/media/a.mkv", "Skipping file");
        });
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "warn");
        assert_eq!(entries[0].message, "Skipping file job_id=7 path=/media/a.mkv");
    }

    #[test]
    fn test_formatted_message_without_fields() {
        let entries = capture(|| {
            let count = 3;
            tracing::info!("Scanned {count} folders");
        });
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[0].message, "Scanned 3 folders");
    }

    #[test]
    fn test_display_fields_use_display_formatting() {
        let entries = capture(|| {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
            tracing::error!(error = %err, "Write failed");
        });
        assert_eq!(entries[0].message, "Write failed error=disk full");
    }
}
