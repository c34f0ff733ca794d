use crate::record::LogRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid filter pattern #{index} `{pattern}`: {source}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid filter for source `{name}`: {source}")]
    InvalidSource {
        name: String,
        #[source]
        source: Box<FilterError>,
    },
}

/// Line counts produced by one filtering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub total_lines: usize,
    pub excluded_lines: usize,
    pub kept_lines: usize,
}

impl FilterOutcome {
    /// Outcome for a pass that kept every line.
    pub fn passthrough(total: usize) -> Self {
        Self {
            total_lines: total,
            excluded_lines: 0,
            kept_lines: total,
        }
    }
}

/// Exclusion filter over a fixed, pre-compiled set of regular expressions.
///
/// A line is dropped as soon as any pattern matches it. The compiled set is
/// never mutated after construction, so one filter can be shared freely
/// between concurrent analyses.
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    patterns: Vec<Regex>,
}

impl LineFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
        let patterns = patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
                    index,
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// True when any pattern matches `text`.
    pub fn matches_any(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.patterns.iter().any(|re| re.is_match(text))
    }

    /// Drop every line matched by a pattern, keeping the rest in order.
    pub fn filter(&self, lines: Vec<String>) -> (Vec<String>, FilterOutcome) {
        self.retain(lines, |line| line.as_str())
    }

    /// Same as [`LineFilter::filter`], matching against each record's message.
    pub fn filter_records(&self, records: Vec<LogRecord>) -> (Vec<LogRecord>, FilterOutcome) {
        self.retain(records, |record| record.message.as_str())
    }

    fn retain<T>(&self, items: Vec<T>, text: impl Fn(&T) -> &str) -> (Vec<T>, FilterOutcome) {
        let total = items.len();
        if self.patterns.is_empty() {
            return (items, FilterOutcome::passthrough(total));
        }

        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| !self.matches_any(text(item)))
            .collect();

        let outcome = FilterOutcome {
            total_lines: total,
            excluded_lines: total - kept.len(),
            kept_lines: kept.len(),
        };
        (kept, outcome)
    }
}

/// Immutable lookup table of per-source filters, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: HashMap<String, LineFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a filter for every configured source. Fails on the first bad
    /// pattern, naming the source it belongs to.
    pub fn from_patterns<'a, I, S>(sources: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<S>)>,
        S: AsRef<str> + 'a,
    {
        let mut filters = HashMap::new();
        for (name, patterns) in sources {
            let filter = LineFilter::new(patterns).map_err(|e| FilterError::InvalidSource {
                name: name.clone(),
                source: Box::new(e),
            })?;
            debug!("Compiled {} filter patterns for {}", filter.pattern_count(), name);
            filters.insert(name.clone(), filter);
        }
        info!("Loaded line filters for {} sources", filters.len());
        Ok(Self { filters })
    }

    pub fn get(&self, source_id: &str) -> Option<&LineFilter> {
        self.filters.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter records with the set registered for `source_id`. Sources with
    /// no filter keep every record.
    pub fn apply(&self, source_id: &str, records: Vec<LogRecord>) -> (Vec<LogRecord>, FilterOutcome) {
        match self.filters.get(source_id) {
            Some(filter) => filter.filter_records(records),
            None => {
                let total = records.len();
                (records, FilterOutcome::passthrough(total))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PATTERNS: &[&str] = &["^a", "b$", "(?i)c", "[0-9]+", "x.y", "^$"];

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_patterns_keeps_everything() {
        let filter = LineFilter::new::<&str>(&[]).unwrap();
        let (kept, outcome) = filter.filter(lines(&["a", "b"]));
        assert_eq!(kept, lines(&["a", "b"]));
        assert_eq!(outcome, FilterOutcome::passthrough(2));
        assert!(!filter.matches_any("a"));
    }

    #[test]
    fn test_any_pattern_excludes() {
        let filter = LineFilter::new(&["^GET /health", "DEBUG"]).unwrap();
        let (kept, outcome) = filter.filter(lines(&[
            "GET /health 200",
            "POST /orders 500",
            "DEBUG cache warm",
            "GET /health/ready 200",
        ]));
        assert_eq!(kept, lines(&["POST /orders 500"]));
        assert_eq!(outcome.total_lines, 4);
        assert_eq!(outcome.excluded_lines, 3);
        assert_eq!(outcome.kept_lines, 1);
    }

    #[test]
    fn test_case_sensitivity_follows_regex() {
        let sensitive = LineFilter::new(&["debug"]).unwrap();
        assert!(!sensitive.matches_any("DEBUG something"));
        assert!(sensitive.matches_any("debug something"));

        let insensitive = LineFilter::new(&["(?i)debug"]).unwrap();
        assert!(insensitive.matches_any("DEBUG something"));
    }

    #[test]
    fn test_empty_text_never_matches() {
        let filter = LineFilter::new(&[".*"]).unwrap();
        assert!(!filter.matches_any(""));
    }

    #[test]
    fn test_invalid_pattern_reports_index_and_text() {
        let err = LineFilter::new(&["ok", "also ok", "(unclosed"]).unwrap_err();
        match err {
            FilterError::InvalidPattern { index, pattern, .. } => {
                assert_eq!(index, 2);
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_filter_set_scopes_by_source() {
        let mut config: HashMap<String, Vec<String>> = HashMap::new();
        config.insert("web".to_string(), vec!["healthcheck".to_string()]);
        let set = FilterSet::from_patterns(&config).unwrap();

        let records = vec![
            LogRecord::primary("healthcheck ok"),
            LogRecord::primary("request failed"),
        ];

        let (kept, outcome) = set.apply("web", records.clone());
        assert_eq!(kept.len(), 1);
        assert_eq!(outcome.excluded_lines, 1);

        let (kept, outcome) = set.apply("db", records);
        assert_eq!(kept.len(), 2);
        assert_eq!(outcome, FilterOutcome::passthrough(2));
    }

    #[test]
    fn test_filter_set_names_bad_source() {
        let mut config: HashMap<String, Vec<String>> = HashMap::new();
        config.insert("api".to_string(), vec!["[".to_string()]);
        let err = FilterSet::from_patterns(&config).unwrap_err();
        assert!(err.to_string().contains("api"));
    }

    #[test]
    fn test_filter_is_shareable_across_threads() {
        let filter = std::sync::Arc::new(LineFilter::new(&["drop"]).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let filter = filter.clone();
                std::thread::spawn(move || {
                    let (kept, _) = filter.filter(vec![format!("keep {}", i), "drop me".to_string()]);
                    kept.len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }

    proptest! {
        #[test]
        fn test_outcome_counts_every_line(
            patterns in prop::sample::subsequence(PATTERNS.to_vec(), 0..=PATTERNS.len()),
            input in prop::collection::vec("[abcxyC0-9 .]{0,8}", 0..32),
        ) {
            let filter = LineFilter::new(patterns.as_slice()).unwrap();
            let compiled: Vec<Regex> = patterns.iter().map(|p| Regex::new(p).unwrap()).collect();
            let expected: Vec<String> = input
                .iter()
                .filter(|line| line.is_empty() || !compiled.iter().any(|re| re.is_match(line)))
                .cloned()
                .collect();

            let (kept, outcome) = filter.filter(input.clone());
            prop_assert_eq!(outcome.total_lines, input.len());
            prop_assert_eq!(outcome.total_lines, outcome.excluded_lines + outcome.kept_lines);
            prop_assert_eq!(kept.len(), outcome.kept_lines);
            prop_assert_eq!(kept, expected);
        }
    }
}
