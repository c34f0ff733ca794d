//! Log sources: `docker logs` capture and plain files.

use crate::record::{LogRecord, LogSource};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Options forwarded to `docker logs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub tail: Option<usize>,
    pub since: Option<String>,
}

/// Split a line into an RFC3339 timestamp prefix and the message.
///
/// Lines without a parseable prefix keep their full text as the message.
pub fn parse_docker_line(line: &str, source: LogSource) -> LogRecord {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some((prefix, rest)) = line.split_once(' ') {
        if DateTime::parse_from_rfc3339(prefix).is_ok() {
            return LogRecord::new(Some(prefix.to_string()), source, rest);
        }
    }

    LogRecord::new(None, source, line)
}

/// Parse every non-empty line of `text`.
pub fn parse_lines(text: &str, source: LogSource) -> Vec<LogRecord> {
    text.lines()
        .filter(|line| !line.trim_end_matches('\r').is_empty())
        .map(|line| parse_docker_line(line, source))
        .collect()
}

fn sort_key(record: &LogRecord) -> Option<DateTime<Utc>> {
    record
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Merge two individually ordered streams by timestamp.
///
/// On equal timestamps, or when either side has none, the primary record goes
/// first, so the relative order within each stream is always kept.
pub fn merge_streams(primary: Vec<LogRecord>, secondary: Vec<LogRecord>) -> Vec<LogRecord> {
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());
    let mut primary = primary.into_iter().peekable();
    let mut secondary = secondary.into_iter().peekable();

    loop {
        let take_secondary = match (primary.peek(), secondary.peek()) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some(p), Some(s)) => match (sort_key(p), sort_key(s)) {
                (Some(pt), Some(st)) => st < pt,
                _ => false,
            },
        };

        let next = if take_secondary { secondary.next() } else { primary.next() };
        if let Some(record) = next {
            merged.push(record);
        }
    }

    merged
}

/// Arguments for `docker logs`, container last.
pub fn docker_args(container: &str, options: &CaptureOptions) -> Vec<String> {
    let mut args = vec!["logs".to_string(), "--timestamps".to_string()];
    if let Some(tail) = options.tail {
        args.push("--tail".to_string());
        args.push(tail.to_string());
    }
    if let Some(since) = &options.since {
        args.push("--since".to_string());
        args.push(since.clone());
    }
    args.push(container.to_string());
    args
}

/// Capture a container's logs through the docker CLI.
pub async fn capture_container_logs(container: &str, options: &CaptureOptions) -> Result<Vec<LogRecord>> {
    let args = docker_args(container, options);
    info!("Capturing logs: docker {}", args.join(" "));

    let output = Command::new("docker")
        .args(&args)
        .output()
        .await
        .context("Failed to run the docker CLI; is docker installed and on PATH?")?;

    let stderr = decode_bytes(&output.stderr);
    if !output.status.success() {
        error!("docker logs for {} exited with {}", container, output.status);
        anyhow::bail!(
            "docker logs {} failed ({}): {}",
            container,
            output.status,
            stderr.trim()
        );
    }

    let stdout = decode_bytes(&output.stdout);
    let primary = parse_lines(&stdout, LogSource::Primary);
    let secondary = parse_lines(&stderr, LogSource::Secondary);
    debug!(
        "Captured {} stdout and {} stderr lines from {}",
        primary.len(),
        secondary.len(),
        container
    );

    Ok(merge_streams(primary, secondary))
}

/// Read a log file into primary records, honoring timestamp prefixes.
pub async fn read_log_file(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    info!("Reading log file: {}", path.display());

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read log file {}", path.display()))?;
    debug!("Read {} bytes from {}", data.len(), path.display());

    let text = decode_bytes(&data);
    let records = parse_lines(&text, LogSource::Primary);
    debug!("Parsed {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Decode raw bytes: BOM first, then UTF-8, falling back to Windows-1252.
fn decode_bytes(data: &[u8]) -> String {
    let (encoding, bom_len): (&'static Encoding, usize) = match Encoding::for_bom(data) {
        Some(found) => found,
        None if std::str::from_utf8(data).is_ok() => (UTF_8, 0),
        None => (WINDOWS_1252, 0),
    };

    if encoding != UTF_8 {
        debug!("Decoding log data as {}", encoding.name());
    }

    let (text, had_errors) = encoding.decode_without_bom_handling(&data[bom_len..]);
    if had_errors {
        warn!("Replaced malformed {} sequences in log data", encoding.name());
    }
    text.into_owned()
}
