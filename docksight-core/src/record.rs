use serde::{Deserialize, Serialize};
use std::fmt;

/// Which output stream of the container a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Container stdout
    #[default]
    Primary,
    /// Container stderr
    Secondary,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Primary => write!(f, "stdout"),
            LogSource::Secondary => write!(f, "stderr"),
        }
    }
}

/// A single, already demultiplexed log line.
///
/// Records are never mutated after the log reader produces them; the
/// deduplicator builds new records instead of rewriting existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: Option<String>,
    pub source: LogSource,
    pub message: String,
}

impl LogRecord {
    pub fn new(timestamp: Option<String>, source: LogSource, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            source,
            message: message.into(),
        }
    }

    /// Shorthand for an untimestamped stdout record.
    pub fn primary(message: impl Into<String>) -> Self {
        Self::new(None, LogSource::Primary, message)
    }

    /// The exact text sent to the model for this record, newline included.
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(self.formatted_len());
        self.write_formatted(&mut out);
        out
    }

    pub(crate) fn write_formatted(&self, out: &mut String) {
        if let Some(ts) = &self.timestamp {
            out.push('[');
            out.push_str(ts);
            out.push_str("] ");
        }
        out.push_str(&self.message);
        out.push('\n');
    }

    fn formatted_len(&self) -> usize {
        let ts_len = self.timestamp.as_ref().map(|ts| ts.len() + 3).unwrap_or(0);
        ts_len + self.message.len() + 1
    }
}

/// Concatenate the formatted representation of every record, in order.
pub fn format_records(records: &[LogRecord]) -> String {
    let mut out = String::with_capacity(records.iter().map(LogRecord::formatted_len).sum());
    for record in records {
        record.write_formatted(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_with_timestamp() {
        let record = LogRecord::new(
            Some("2025-01-01T12:00:00Z".to_string()),
            LogSource::Secondary,
            "connection refused",
        );
        assert_eq!(record.format(), "[2025-01-01T12:00:00Z] connection refused\n");
    }

    #[test]
    fn test_format_without_timestamp() {
        assert_eq!(LogRecord::primary("started").format(), "started\n");
    }

    #[test]
    fn test_format_records_concatenates_in_order() {
        let records = vec![
            LogRecord::primary("one"),
            LogRecord::new(Some("t2".to_string()), LogSource::Primary, "two"),
        ];
        assert_eq!(format_records(&records), "one\n[t2] two\n");
        assert_eq!(format_records(&[]), "");
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&LogSource::Secondary).unwrap();
        assert_eq!(json, "\"secondary\"");
    }
}
