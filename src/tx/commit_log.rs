use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::TransactionId;

/// Terminal outcome recorded for a transaction id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxOutcome {
    /// Transaction has not been finalized yet.
    Unknown,
    /// Transaction committed; its versions are permanently valid.
    Committed,
    /// Transaction aborted; its versions are garbage.
    Aborted,
}

const COMMITTED_BITS: u64 = 0b01;
const ABORTED_BITS: u64 = 0b10;

const BITS_PER_ID: u64 = 2;
const IDS_PER_WORD: u64 = 64 / BITS_PER_ID;
const WORDS_PER_CHUNK: usize = 256;
const IDS_PER_CHUNK: u64 = IDS_PER_WORD * WORDS_PER_CHUNK as u64;

struct Chunk {
    words: Box<[AtomicU64]>,
}

impl Chunk {
    fn new() -> Self {
        let words = (0..WORDS_PER_CHUNK).map(|_| AtomicU64::new(0)).collect();
        Self { words }
    }
}

struct LogInner {
    /// Index of the first retained chunk; chunks below it were compacted.
    first_chunk: u64,
    chunks: VecDeque<Arc<Chunk>>,
}

/// Process-wide durable ledger mapping transaction id to outcome.
///
/// Outcomes live in a chunked array of two-bit cells packed into atomic
/// words, so lookups are plain atomic loads under a short read lock that
/// only guards chunk growth. An id transitions from unknown to exactly one
/// terminal state; flipping a terminal state means the transaction
/// engine's exclusivity guarantee was violated and is fatal.
///
/// Entries below the compaction floor read as committed: the garbage
/// collector only drops chunks once every version stamped by their ids is
/// unreachable, so the answer no longer matters for visibility.
pub struct CommitLog {
    inner: RwLock<LogInner>,
}

impl Default for CommitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LogInner {
                first_chunk: 0,
                chunks: VecDeque::new(),
            }),
        }
    }

    /// Marks `id` committed. Panics if `id` was already aborted.
    pub fn set_committed(&self, id: TransactionId) {
        self.set(id, COMMITTED_BITS);
    }

    /// Marks `id` aborted. Panics if `id` was already committed.
    pub fn set_aborted(&self, id: TransactionId) {
        self.set(id, ABORTED_BITS);
    }

    /// Returns the recorded outcome for `id`.
    pub fn fetch(&self, id: TransactionId) -> TxOutcome {
        let chunk_index = id.0 / IDS_PER_CHUNK;
        let inner = self.inner.read();
        if chunk_index < inner.first_chunk {
            return TxOutcome::Committed;
        }
        let offset = (chunk_index - inner.first_chunk) as usize;
        let Some(chunk) = inner.chunks.get(offset) else {
            return TxOutcome::Unknown;
        };
        let slot = id.0 % IDS_PER_CHUNK;
        let word = chunk.words[(slot / IDS_PER_WORD) as usize].load(Ordering::Acquire);
        let bits = (word >> ((slot % IDS_PER_WORD) * BITS_PER_ID)) & 0b11;
        match bits {
            COMMITTED_BITS => TxOutcome::Committed,
            ABORTED_BITS => TxOutcome::Aborted,
            _ => TxOutcome::Unknown,
        }
    }

    /// Whether `id` is recorded as committed.
    pub fn is_committed(&self, id: TransactionId) -> bool {
        self.fetch(id) == TxOutcome::Committed
    }

    /// Whether `id` is recorded as aborted.
    pub fn is_aborted(&self, id: TransactionId) -> bool {
        self.fetch(id) == TxOutcome::Aborted
    }

    /// Drops whole chunks strictly below `horizon`.
    ///
    /// Purely an optimization; retained chunks answer exactly as before.
    /// Returns the number of chunks dropped.
    pub fn compact_below(&self, horizon: TransactionId) -> usize {
        let mut inner = self.inner.write();
        let mut dropped = 0;
        while !inner.chunks.is_empty() {
            let chunk_end = (inner.first_chunk + 1) * IDS_PER_CHUNK;
            if chunk_end > horizon.0 {
                break;
            }
            inner.chunks.pop_front();
            inner.first_chunk += 1;
            dropped += 1;
        }
        dropped
    }

    fn set(&self, id: TransactionId, bits: u64) {
        let chunk = self.chunk_for(id);
        let slot = id.0 % IDS_PER_CHUNK;
        let shift = (slot % IDS_PER_WORD) * BITS_PER_ID;
        let word = &chunk.words[(slot / IDS_PER_WORD) as usize];
        let prev = word.fetch_or(bits << shift, Ordering::AcqRel);
        let prev_bits = (prev >> shift) & 0b11;
        assert!(
            prev_bits == 0 || prev_bits == bits,
            "commit log outcome for transaction {} flipped",
            id
        );
    }

    fn chunk_for(&self, id: TransactionId) -> Arc<Chunk> {
        let chunk_index = id.0 / IDS_PER_CHUNK;
        {
            let inner = self.inner.read();
            assert!(
                chunk_index >= inner.first_chunk,
                "commit log write below compaction floor for transaction {}",
                id
            );
            let offset = (chunk_index - inner.first_chunk) as usize;
            if let Some(chunk) = inner.chunks.get(offset) {
                return Arc::clone(chunk);
            }
        }
        let mut inner = self.inner.write();
        let offset = (chunk_index - inner.first_chunk) as usize;
        while inner.chunks.len() <= offset {
            inner.chunks.push_back(Arc::new(Chunk::new()));
        }
        Arc::clone(&inner.chunks[offset])
    }
}
