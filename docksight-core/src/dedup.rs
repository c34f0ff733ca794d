use crate::record::LogRecord;
use tracing::debug;

/// Minimum run length that gets collapsed into a single marker record.
pub const DEDUP_THRESHOLD: usize = 3;

/// Collapse runs of identical consecutive messages using [`DEDUP_THRESHOLD`].
pub fn deduplicate(records: Vec<LogRecord>) -> Vec<LogRecord> {
    deduplicate_with_threshold(records, DEDUP_THRESHOLD)
}

/// Collapse every run of at least `threshold` consecutive records sharing the
/// same message into one `[REPEAT xN] message` record that keeps the first
/// record's timestamp and source. Shorter runs are emitted untouched.
pub fn deduplicate_with_threshold(records: Vec<LogRecord>, threshold: usize) -> Vec<LogRecord> {
    if records.is_empty() {
        return records;
    }

    // A threshold below 2 would rewrite lone records into "[REPEAT x1]" markers.
    let threshold = threshold.max(2);
    let input_len = records.len();

    // Each run is pushed as-is and rewritten in place when it closes, so the
    // only working state is the index where the current run starts.
    let mut out: Vec<LogRecord> = Vec::with_capacity(input_len);
    let mut run_start = 0;

    for record in records {
        if out.len() > run_start && out[run_start].message != record.message {
            flush_run(&mut out, run_start, threshold);
            run_start = out.len();
        }
        out.push(record);
    }
    flush_run(&mut out, run_start, threshold);

    if out.len() < input_len {
        debug!("Deduplicated {} records down to {}", input_len, out.len());
    }
    out
}

fn flush_run(out: &mut Vec<LogRecord>, run_start: usize, threshold: usize) {
    let run_len = out.len() - run_start;
    if run_len < threshold {
        return;
    }

    out.truncate(run_start + 1);
    let first = &mut out[run_start];
    first.message = format!("[REPEAT x{}] {}", run_len, first.message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogSource;
    use proptest::prelude::*;

    fn records(messages: &[&str]) -> Vec<LogRecord> {
        messages
            .iter()
            .enumerate()
            .map(|(i, m)| LogRecord::new(Some(format!("t{}", i)), LogSource::Primary, *m))
            .collect()
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message.as_str()).collect()
    }

    /// Re-expand `[REPEAT xN] msg` markers back into N copies of `msg`.
    fn expand(records: &[LogRecord]) -> Vec<String> {
        let mut out = Vec::new();
        for record in records {
            let expanded = record
                .message
                .strip_prefix("[REPEAT x")
                .and_then(|rest| rest.split_once("] "))
                .and_then(|(count, msg)| count.parse::<usize>().ok().map(|n| (n, msg)));
            match expanded {
                Some((n, msg)) => out.extend(std::iter::repeat(msg.to_string()).take(n)),
                None => out.push(record.message.clone()),
            }
        }
        out
    }

    #[test]
    fn test_three_identical_collapse() {
        let input = records(&["error", "error", "error"]);
        let result = deduplicate(input);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].message, "[REPEAT x3] error");
        assert_eq!(result[0].timestamp, Some("t0".to_string()));
    }

    #[test]
    fn test_short_run_kept_long_run_collapsed() {
        let result = deduplicate(records(&["a", "a", "b", "b", "b", "b"]));
        assert_eq!(messages(&result), vec!["a", "a", "[REPEAT x4] b"]);
        assert_eq!(result[2].timestamp, Some("t2".to_string()));
    }

    #[test]
    fn test_empty_input() {
        assert!(deduplicate(Vec::new()).is_empty());
    }

    #[test]
    fn test_trailing_run_below_threshold() {
        let result = deduplicate(records(&["x", "x", "x", "y", "y"]));
        assert_eq!(messages(&result), vec!["[REPEAT x3] x", "y", "y"]);
    }

    #[test]
    fn test_non_consecutive_duplicates_untouched() {
        let result = deduplicate(records(&["a", "b", "a", "b", "a", "b"]));
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn test_keeps_source_of_first_record() {
        let input = vec![
            LogRecord::new(None, LogSource::Secondary, "boom"),
            LogRecord::new(None, LogSource::Primary, "boom"),
            LogRecord::new(None, LogSource::Primary, "boom"),
        ];
        let result = deduplicate(input);
        assert_eq!(result[0].source, LogSource::Secondary);
        assert_eq!(result[0].timestamp, None);
    }

    #[test]
    fn test_threshold_boundaries() {
        for len in 1..8 {
            let input = records(&vec!["same"; len]);
            let result = deduplicate(input);
            if len < DEDUP_THRESHOLD {
                assert_eq!(result.len(), len, "run of {} must not collapse", len);
            } else {
                assert_eq!(result.len(), 1, "run of {} must collapse", len);
                assert_eq!(result[0].message, format!("[REPEAT x{}] same", len));
            }
        }
    }

    #[test]
    fn test_custom_threshold() {
        let result = deduplicate_with_threshold(records(&["a", "a", "b"]), 2);
        assert_eq!(messages(&result), vec!["[REPEAT x2] a", "b"]);

        // Thresholds below 2 behave like 2
        let result = deduplicate_with_threshold(records(&["a", "b"]), 0);
        assert_eq!(messages(&result), vec!["a", "b"]);
    }

    fn arb_messages() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(vec!["tick", "warn", "error"]), 0..64)
    }

    proptest! {
        #[test]
        fn test_round_trip_reconstructs_messages(input in arb_messages()) {
            let original: Vec<String> = input.iter().map(|m| m.to_string()).collect();
            let result = deduplicate(records(&input));

            prop_assert!(result.len() <= original.len());
            prop_assert_eq!(expand(&result), original);
        }

        #[test]
        fn test_collapsed_records_keep_run_start(input in arb_messages()) {
            let result = deduplicate(records(&input));

            let mut position = 0;
            for record in &result {
                prop_assert_eq!(record.timestamp.clone(), Some(format!("t{}", position)));
                position += expand(std::slice::from_ref(record)).len();
            }
            prop_assert_eq!(position, input.len());

            for window in result.windows(DEDUP_THRESHOLD) {
                prop_assert!(window.iter().any(|r| r.message != window[0].message));
            }
        }
    }
}
