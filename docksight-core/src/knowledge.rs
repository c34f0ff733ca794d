//! Per-container history of past analyses.
//!
//! Each container gets one JSON file holding a list of [`KnowledgeEntry`]
//! values, oldest first. Every write applies the retention policy.

use crate::pipeline::AnalysisResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Hex digits of the container-name hash appended to each history file.
const NAME_HASH_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub container: String,
    pub analysis: String,
    pub tokens_used: usize,
    pub chunks_used: usize,
    pub processed_count: usize,
}

impl KnowledgeEntry {
    pub fn from_result(container: &str, result: &AnalysisResult, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at,
            container: container.to_string(),
            analysis: result.analysis.clone(),
            tokens_used: result.tokens_used,
            chunks_used: result.chunks_used,
            processed_count: result.processed_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Newest entries kept per container.
    pub max_entries: usize,
    /// Entries older than this many days are dropped; `None` keeps all ages.
    pub max_age_days: Option<u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 20,
            max_age_days: Some(30),
        }
    }
}

impl RetentionPolicy {
    /// Apply the policy to entries sorted oldest first.
    pub fn prune(&self, mut entries: Vec<KnowledgeEntry>, now: DateTime<Utc>) -> Vec<KnowledgeEntry> {
        if let Some(days) = self.max_age_days {
            let cutoff = now - Duration::days(i64::from(days));
            entries.retain(|entry| entry.recorded_at >= cutoff);
        }

        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }

        entries
    }
}

pub struct KnowledgeBase {
    dir: PathBuf,
    policy: RetentionPolicy,
}

impl KnowledgeBase {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: RetentionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `container`'s history. Characters outside
    /// `[A-Za-z0-9_.-]` are replaced, and a short hash of the raw name keeps
    /// names that sanitize alike (`my app`, `my_app`) in separate files.
    pub fn path_for(&self, container: &str) -> PathBuf {
        let safe: String = container
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = safe.trim_start_matches('.');
        let name = if safe.is_empty() { "_" } else { safe };
        let hash = blake3::hash(container.as_bytes());
        self.dir.join(format!("{}-{}.json", name, &hash.to_hex()[..NAME_HASH_LEN]))
    }

    /// Stored entries for `container`, oldest first.
    pub fn load(&self, container: &str) -> Result<Vec<KnowledgeEntry>> {
        let path = self.path_for(container);
        if !path.exists() {
            debug!("No knowledge file for {} at {}", container, path.display());
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<KnowledgeEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse knowledge file {}", path.display()))?;
        debug!("Loaded {} knowledge entries for {}", entries.len(), container);
        Ok(entries)
    }

    /// The newest `limit` entries, newest first.
    pub fn recent(&self, container: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let mut entries = self.load(container)?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Append a result to the container's history and prune it.
    pub fn record(&self, container: &str, result: &AnalysisResult) -> Result<KnowledgeEntry> {
        self.record_at(container, result, Utc::now())
    }

    pub fn record_at(&self, container: &str, result: &AnalysisResult, now: DateTime<Utc>) -> Result<KnowledgeEntry> {
        let entry = KnowledgeEntry::from_result(container, result, now);

        let mut entries = self.load(container)?;
        entries.push(entry.clone());
        let entries = self.policy.prune(entries, now);

        self.save(container, &entries)?;
        info!(
            "Recorded analysis {} for {} ({} entries kept)",
            entry.id,
            container,
            entries.len()
        );
        Ok(entry)
    }

    fn save(&self, container: &str, entries: &[KnowledgeEntry]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create knowledge directory {}", self.dir.display()))?;

        let path = self.path_for(container);
        let contents = serde_json::to_string_pretty(entries).context("Failed to serialize knowledge entries")?;

        // Readers never see a partially written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}
