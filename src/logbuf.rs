// src/logbuf.rs
// In-memory circular log store.
//
// A tracing Layer copies every event into a fixed-capacity ring; the
// `get_logs` tool reads it back with level/time/substring filters. Nothing
// here persists across restarts and none of it is an audit trail.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// One captured log event.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    /// Single-line text rendering for the text output format.
    pub fn to_text(&self) -> String {
        let mut line = format!(
            "{} {:5} {} {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            format!("{:?}", self.level).to_uppercase(),
            self.target,
            self.message
        );
        for (k, v) in &self.fields {
            line.push_str(&format!(" {k}={v}"));
        }
        line
    }
}

/// Filter for reading the ring back.
#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub min_level: Option<LogLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub contains: Option<String>,
    pub limit: Option<usize>,
}

/// Fixed-capacity circular log store. Thread-safe append.
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        #[allow(clippy::unwrap_used)] // poisoned log mutex is unrecoverable
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let entries = self.entries.lock().unwrap();
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read matching entries oldest-first.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        #[allow(clippy::unwrap_used)]
        let entries = self.entries.lock().unwrap();
        let matched = entries.iter().filter(|e| {
            if let Some(min) = filter.min_level {
                if e.level < min {
                    return false;
                }
            }
            if let Some(since) = filter.since {
                if e.timestamp < since {
                    return false;
                }
            }
            if let Some(until) = filter.until {
                if e.timestamp > until {
                    return false;
                }
            }
            if let Some(needle) = &filter.contains {
                if !e.message.contains(needle)
                    && !e.fields.values().any(|v| v.contains(needle.as_str()))
                {
                    return false;
                }
            }
            true
        });

        match filter.limit {
            // Keep the newest `limit` matches, still returned oldest-first.
            Some(limit) => {
                let all: Vec<_> = matched.cloned().collect();
                let skip = all.len().saturating_sub(limit);
                all.into_iter().skip(skip).collect()
            }
            None => matched.cloned().collect(),
        }
    }
}

/// tracing Layer that mirrors every event into a LogBuffer.
pub struct RingBufferLayer {
    buffer: Arc<LogBuffer>,
}

impl RingBufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

struct FieldCollector {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RingBufferLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector {
            message: String::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut collector);

        self.buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: event.metadata().level().into(),
            target: event.metadata().target().to_string(),
            message: collector.message,
            fields: collector.fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            target: "test".into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(entry(LogLevel::Info, &format!("msg-{i}")));
        }
        let entries = buffer.query(&LogFilter::default());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "msg-2");
        assert_eq!(entries[2].message, "msg-4");
    }

    #[test]
    fn min_level_filters_below() {
        let buffer = LogBuffer::new(10);
        buffer.push(entry(LogLevel::Debug, "noise"));
        buffer.push(entry(LogLevel::Warn, "important"));
        let entries = buffer.query(&LogFilter {
            min_level: Some(LogLevel::Warn),
            ..Default::default()
        });
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "important");
    }

    #[test]
    fn substring_filter_checks_message_and_fields() {
        let buffer = LogBuffer::new(10);
        let mut with_field = entry(LogLevel::Info, "building");
        with_field.fields.insert("image".into(), "web:1.0".into());
        buffer.push(with_field);
        buffer.push(entry(LogLevel::Info, "scanning web:1.0"));
        buffer.push(entry(LogLevel::Info, "unrelated"));

        let entries = buffer.query(&LogFilter {
            contains: Some("web:1.0".into()),
            ..Default::default()
        });
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn limit_keeps_newest_matches() {
        let buffer = LogBuffer::new(10);
        for i in 0..6 {
            buffer.push(entry(LogLevel::Info, &format!("m{i}")));
        }
        let entries = buffer.query(&LogFilter {
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "m4");
        assert_eq!(entries[1].message, "m5");
    }

    #[test]
    fn layer_captures_tracing_events() {
        use tracing_subscriber::layer::SubscriberExt;

        let buffer = Arc::new(LogBuffer::new(16));
        let subscriber =
            tracing_subscriber::registry().with(RingBufferLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(step = "build", "step started");
        });

        let entries = buffer.query(&LogFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "step started");
        assert_eq!(entries[0].fields.get("step").map(String::as_str), Some("build"));
    }
}
