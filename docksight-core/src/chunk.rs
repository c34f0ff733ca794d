use crate::record::{format_records, LogRecord};
use crate::tokens::TokenEstimator;
use tracing::{debug, warn};

/// An order-preserving, token-bounded slice of the working record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub records: Vec<LogRecord>,
    /// Sum of the formatted-text cost of every record in the chunk.
    pub token_count: usize,
    /// 0-based position within its batch.
    pub index: usize,
    /// Number of chunks in the batch.
    pub total: usize,
}

impl Chunk {
    /// The chunk's records in the exact form sent for analysis.
    pub fn format(&self) -> String {
        format_records(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Greedily split `records` into chunks whose token cost stays within
/// `max_tokens`.
///
/// Records are never split. A record whose own cost exceeds the limit is
/// placed alone in a chunk that is allowed to exceed it. Empty input yields
/// no chunks at all.
pub fn split_into_chunks<E>(records: Vec<LogRecord>, max_tokens: usize, estimator: &E) -> Vec<Chunk>
where
    E: TokenEstimator + ?Sized,
{
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<LogRecord> = Vec::new();
    let mut current_tokens = 0usize;

    for record in records {
        let cost = estimator.count_tokens(&record.format());

        if !current.is_empty() && current_tokens + cost > max_tokens {
            chunks.push(Chunk {
                records: std::mem::take(&mut current),
                token_count: current_tokens,
                index: 0,
                total: 0,
            });
            current_tokens = 0;
        }

        if cost > max_tokens {
            warn!(
                "Single log record costs {} tokens, above the {} token chunk limit; sending it alone",
                cost, max_tokens
            );
        }

        current.push(record);
        current_tokens += cost;
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            records: current,
            token_count: current_tokens,
            index: 0,
            total: 0,
        });
    }

    let total = chunks.len();
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = index;
        chunk.total = total;
    }

    debug!("Split log records into {} chunks (limit {} tokens)", total, max_tokens);
    chunks
}
