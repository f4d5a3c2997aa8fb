//! # Summary
//!
//! This module is the collective memory of the quorum: an append-only,
//! ordered record of accepted (proposal id, workload) pairs with a
//! configurable minimum history, used to replay accepted values and to
//! let lagging nodes catch up gradually.

use std::collections::BTreeMap;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

use log::warn;

/// Storage provider errors, propagated to the caller unmasked.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage i/o: {0}")]
    Io(#[from] io::Error),

    #[error("storage encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Provider obligation for durable storage backends.
///
/// Keys are positive, dense, and monotonically increasing; entry `p` may
/// only be stored once entry `p - 1` exists. A provider may back this
/// with a single file, an embedded key-value store, or a SQL table, as
/// long as those invariants hold.
pub trait Storage: Send + Sync {
    /// Persist one entry. Precondition: `proposal_id` is exactly one past
    /// the highest stored id.
    fn store(&mut self, proposal_id: i64, workload: &[u8]) -> Result<(), Error>;

    /// All stored entries with keys strictly greater than `proposal_id`,
    /// in increasing key order. Providers may return a prefix of the tail
    /// rather than the whole of it; callers must re-call with the highest
    /// id received until the result comes back empty.
    fn retrieve(&self, proposal_id: i64) -> Result<BTreeMap<i64, Vec<u8>>, Error>;

    /// The highest stored key, or 0 if nothing has been stored.
    fn highest_proposal_id(&self) -> i64;

    /// Delete every entry with a key strictly less than `proposal_id`.
    /// If the pivot key itself is absent the store has been tampered with
    /// externally; the only sensible reaction is to warn and keep
    /// everything.
    fn remove(&mut self, proposal_id: i64) -> Result<(), Error>;
}

const DEFAULT_HISTORY_SIZE: i64 = 100;

/// The durable log: a storage provider plus retention policy.
pub struct Log {
    history_size: i64,
    storage: Box<dyn Storage>,
}

impl Log {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Log {
            history_size: DEFAULT_HISTORY_SIZE,
            storage,
        }
    }

    /// Sets the minimum number of past entries to retain.
    pub fn set_history_size(&mut self, history_size: i64) {
        self.history_size = history_size;
    }

    pub fn history_size(&self) -> i64 {
        self.history_size
    }

    /// Accepts a new value, then trims history so that at least
    /// `history_size` most recent entries remain.
    pub fn accept(&mut self, proposal_id: i64, workload: &[u8]) -> Result<(), Error> {
        assert_eq!(
            proposal_id,
            self.storage.highest_proposal_id() + 1,
            "accepted proposal ids must be contiguous",
        );
        self.storage.store(proposal_id, workload)?;

        let oldest_kept = proposal_id - self.history_size + 1;
        if oldest_kept > 1 {
            self.storage.remove(oldest_kept)?;
        }
        Ok(())
    }

    /// All entries accepted after `proposal_id`, possibly a partial batch.
    pub fn retrieve(&self, proposal_id: i64) -> Result<BTreeMap<i64, Vec<u8>>, Error> {
        self.storage.retrieve(proposal_id)
    }

    pub fn highest_proposal_id(&self) -> i64 {
        self.storage.highest_proposal_id()
    }
}

/// In-memory reference provider.
#[derive(Debug, Default)]
pub struct Memory {
    data: BTreeMap<i64, Vec<u8>>,
}

impl Storage for Memory {
    fn store(&mut self, proposal_id: i64, workload: &[u8]) -> Result<(), Error> {
        assert_eq!(
            proposal_id,
            self.highest_proposal_id() + 1,
            "stored proposal ids must be contiguous",
        );
        self.data.insert(proposal_id, workload.to_vec());
        Ok(())
    }

    fn retrieve(&self, proposal_id: i64) -> Result<BTreeMap<i64, Vec<u8>>, Error> {
        Ok(self
            .data
            .range(proposal_id + 1..)
            .map(|(id, workload)| (*id, workload.clone()))
            .collect())
    }

    fn highest_proposal_id(&self) -> i64 {
        self.data.keys().next_back().copied().unwrap_or(0)
    }

    fn remove(&mut self, proposal_id: i64) -> Result<(), Error> {
        assert!(proposal_id >= 0);
        if !self.data.contains_key(&proposal_id) {
            warn!(
                "proposal id {} not found in history, ignoring remove",
                proposal_id,
            );
            return Ok(());
        }
        self.data = self.data.split_off(&proposal_id);
        Ok(())
    }
}

/// File-backed provider: the ordered map bincode-serialized to a single
/// file, rewritten on every mutation and reloaded at startup.
pub struct Disk {
    data: BTreeMap<i64, Vec<u8>>,
    file: std::fs::File,
}

impl Disk {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let data = bincode::deserialize_from(&file).unwrap_or_default();
        Ok(Disk { data, file })
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        bincode::serialize_into(&mut self.file, &self.data)?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl Storage for Disk {
    fn store(&mut self, proposal_id: i64, workload: &[u8]) -> Result<(), Error> {
        assert_eq!(
            proposal_id,
            self.highest_proposal_id() + 1,
            "stored proposal ids must be contiguous",
        );
        self.data.insert(proposal_id, workload.to_vec());
        self.flush()
    }

    fn retrieve(&self, proposal_id: i64) -> Result<BTreeMap<i64, Vec<u8>>, Error> {
        Ok(self
            .data
            .range(proposal_id + 1..)
            .map(|(id, workload)| (*id, workload.clone()))
            .collect())
    }

    fn highest_proposal_id(&self) -> i64 {
        self.data.keys().next_back().copied().unwrap_or(0)
    }

    fn remove(&mut self, proposal_id: i64) -> Result<(), Error> {
        assert!(proposal_id >= 0);
        if !self.data.contains_key(&proposal_id) {
            warn!(
                "proposal id {} not found in history, ignoring remove",
                proposal_id,
            );
            return Ok(());
        }
        self.data = self.data.split_off(&proposal_id);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Log {
        Log::new(Box::new(Memory::default()))
    }

    #[test]
    fn accept_advances_highest() {
        let mut log = log();
        assert_eq!(log.highest_proposal_id(), 0);

        log.accept(1, b"a").unwrap();
        log.accept(2, b"b").unwrap();
        assert_eq!(log.highest_proposal_id(), 2);

        let tail = log.retrieve(0).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[&1], b"a");
        assert_eq!(tail[&2], b"b");
    }

    #[test]
    fn retrieve_returns_the_strict_tail() {
        let mut log = log();
        for id in 1..=4 {
            log.accept(id, &[id as u8]).unwrap();
        }

        let tail = log.retrieve(2).unwrap();
        assert_eq!(tail.keys().copied().collect::<Vec<_>>(), vec![3, 4]);

        assert!(log.retrieve(4).unwrap().is_empty());
    }

    #[test]
    fn retrieve_is_stable_across_calls() {
        let mut log = log();
        log.accept(1, b"value").unwrap();

        for _ in 0..3 {
            let tail = log.retrieve(0).unwrap();
            assert_eq!(tail[&1], b"value");
        }
    }

    #[test]
    fn history_is_trimmed_to_the_configured_size() {
        let mut log = log();
        log.set_history_size(2);
        for id in 1..=4 {
            log.accept(id, &[id as u8]).unwrap();
        }

        assert_eq!(log.highest_proposal_id(), 4);
        let tail = log.retrieve(0).unwrap();
        assert_eq!(tail.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
        let tail = log.retrieve(2).unwrap();
        assert_eq!(tail.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn remove_with_absent_pivot_is_ignored() {
        let mut memory = Memory::default();
        for id in 1..=3 {
            memory.store(id, &[id as u8]).unwrap();
        }

        memory.remove(10).unwrap();
        assert_eq!(memory.retrieve(0).unwrap().len(), 3);

        memory.remove(3).unwrap();
        assert_eq!(
            memory.retrieve(0).unwrap().keys().copied().collect::<Vec<_>>(),
            vec![3],
        );
    }

    #[test]
    #[should_panic(expected = "contiguous")]
    fn accept_requires_contiguous_ids() {
        let mut log = log();
        log.accept(2, b"skipped ahead").unwrap();
    }

    /// Provider that serves catch-up one entry at a time.
    #[derive(Default)]
    struct OneAtATime(Memory);

    impl Storage for OneAtATime {
        fn store(&mut self, proposal_id: i64, workload: &[u8]) -> Result<(), Error> {
            self.0.store(proposal_id, workload)
        }

        fn retrieve(&self, proposal_id: i64) -> Result<BTreeMap<i64, Vec<u8>>, Error> {
            Ok(self.0.retrieve(proposal_id)?.into_iter().take(1).collect())
        }

        fn highest_proposal_id(&self) -> i64 {
            self.0.highest_proposal_id()
        }

        fn remove(&mut self, proposal_id: i64) -> Result<(), Error> {
            self.0.remove(proposal_id)
        }
    }

    #[test]
    fn catch_up_terminates_over_partial_batches() {
        let mut log = Log::new(Box::new(OneAtATime::default()));
        for id in 1..=5 {
            log.accept(id, &[id as u8]).unwrap();
        }

        let mut cursor = 0;
        let mut visited = Vec::new();
        loop {
            let batch = log.retrieve(cursor).unwrap();
            if batch.is_empty() {
                break;
            }
            for (id, _) in batch {
                visited.push(id);
                cursor = id;
            }
        }
        assert_eq!(visited, vec![1, 2, 3, 4, 5]);
    }
}
