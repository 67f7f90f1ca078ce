//! The substrate adapter proper.
//!
//! Wraps the embedded ordered store behind three access shapes:
//!
//! - [`Substrate::view`] — read-only access against the live tree.
//! - [`Substrate::begin`] / [`Substrate::commit`] — an explicit optimistic
//!   transaction: reads are fingerprinted, writes are staged, and commit
//!   re-validates every fingerprint under the commit lock before applying
//!   one atomic batch. A fingerprint mismatch aborts with `Conflict`.
//! - [`Substrate::update`] — the closure convenience over begin/commit
//!   used by nearly every engine operation.
//!
//! ## Validation scope
//!
//! Point reads are validated at commit; prefix scans are not (phantom
//! entries are tolerated). Every read-modify-write in the engine keys its
//! decision off point reads of counters and metadata, which is what the
//! validation protects. Writers for the same logical key are additionally
//! serialized by the engine's shard locks, so scan-based decisions are not
//! racing in practice.

use crate::envelope::{self, NO_EXPIRY};
use parking_lot::Mutex;
use quartz_core::error::{Error, Result};
use quartz_core::time::now_ns;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

fn map_sled(e: sled::Error) -> Error {
    Error::io_with_source("substrate failure", e)
}

/// Handle on one substrate directory. One process owns one instance.
pub struct Substrate {
    tree: sled::Tree,
    _db: sled::Db,
    /// Serializes commit validation + apply. Without it two transactions
    /// could both validate against the same state and both apply.
    commit_lock: Mutex<()>,
}

impl Substrate {
    /// Open (creating if needed) the substrate directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Substrate> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .open()
            .map_err(map_sled)?;
        let tree = db.open_tree("data").map_err(map_sled)?;
        Ok(Substrate {
            tree,
            _db: db,
            commit_lock: Mutex::new(()),
        })
    }

    /// Run a read-only closure against the live tree.
    pub fn view<T>(&self, f: impl FnOnce(&ReadView<'_>) -> Result<T>) -> Result<T> {
        let view = ReadView {
            tree: &self.tree,
            now_ns: now_ns(),
        };
        f(&view)
    }

    /// Begin an explicit optimistic transaction.
    pub fn begin(&self) -> WriteTxn<'_> {
        WriteTxn {
            tree: &self.tree,
            now_ns: now_ns(),
            reads: HashMap::new(),
            staged: BTreeMap::new(),
        }
    }

    /// Validate and atomically apply a transaction.
    ///
    /// Returns `Conflict` if any fingerprinted read changed since it was
    /// taken. A transaction that staged nothing commits trivially.
    pub fn commit(&self, txn: WriteTxn<'_>) -> Result<()> {
        if txn.staged.is_empty() {
            return Ok(());
        }
        let _guard = self.commit_lock.lock();
        for (key, observed) in &txn.reads {
            let current = self.tree.get(key).map_err(map_sled)?;
            let current_fp = current.as_ref().map(|v| xxh3_64(v));
            if current_fp != *observed {
                return Err(Error::conflict(format!(
                    "key {:?} changed during transaction",
                    String::from_utf8_lossy(key)
                )));
            }
        }
        let mut batch = sled::Batch::default();
        for (key, entry) in txn.staged {
            match entry {
                Some((payload, expires_at_ns)) => {
                    batch.insert(key, envelope::wrap(expires_at_ns, &payload));
                }
                None => batch.remove(key),
            }
        }
        self.tree.apply_batch(batch).map_err(map_sled)
    }

    /// Run a mutating closure as one transaction.
    ///
    /// The closure runs exactly once; on `Conflict` the caller (normally
    /// the retry executor) re-invokes `update` with the same closure.
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let mut txn = self.begin();
        let out = f(&mut txn)?;
        self.commit(txn)?;
        Ok(out)
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush().map_err(map_sled)?;
        Ok(())
    }

    /// Physically remove entries whose expiry deadline has passed.
    ///
    /// Best-effort: each removal is a compare-and-swap against the exact
    /// bytes observed, so a concurrent rewrite wins. Returns the number of
    /// entries removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ns();
        let mut removed = 0usize;
        for item in self.tree.iter() {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, _) = envelope::unwrap(&stored)?;
            if envelope::is_expired(expires, now)
                && self
                    .tree
                    .compare_and_swap(&key, Some(&stored), None::<&[u8]>)
                    .map_err(map_sled)?
                    .is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "purged expired substrate entries");
        }
        Ok(removed)
    }
}

/// Read-only access to the live tree, expiry-filtered.
pub struct ReadView<'a> {
    tree: &'a sled::Tree,
    now_ns: u64,
}

impl ReadView<'_> {
    /// Payload of a live entry, or `None` if absent or expired.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_expiry(key)?.map(|(payload, _)| payload))
    }

    /// Payload plus expiry deadline (`NO_EXPIRY` if none).
    pub fn get_with_expiry(&self, key: &[u8]) -> Result<Option<(Vec<u8>, u64)>> {
        match self.tree.get(key).map_err(map_sled)? {
            None => Ok(None),
            Some(stored) => {
                let (expires, payload) = envelope::unwrap(&stored)?;
                if envelope::is_expired(expires, self.now_ns) {
                    Ok(None)
                } else {
                    Ok(Some((payload.to_vec(), expires)))
                }
            }
        }
    }

    /// Whether a live entry exists.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get_with_expiry(key)?.is_some())
    }

    /// All live `(key, payload)` pairs under a prefix, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, payload) = envelope::unwrap(&stored)?;
            if !envelope::is_expired(expires, self.now_ns) {
                out.push((key.to_vec(), payload.to_vec()));
            }
        }
        Ok(out)
    }

    /// All live `(key, payload)` pairs in `[start, end)`, in key order.
    pub fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for item in self.tree.range(start.to_vec()..end.to_vec()) {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, payload) = envelope::unwrap(&stored)?;
            if !envelope::is_expired(expires, self.now_ns) {
                out.push((key.to_vec(), payload.to_vec()));
            }
        }
        Ok(out)
    }

    /// Keys only — the value-prefetch-disabled variant for counting and
    /// existence scans.
    pub fn scan_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, _) = envelope::unwrap(&stored)?;
            if !envelope::is_expired(expires, self.now_ns) {
                out.push(key.to_vec());
            }
        }
        Ok(out)
    }
}

/// One optimistic transaction: fingerprinted reads + staged writes.
pub struct WriteTxn<'a> {
    tree: &'a sled::Tree,
    now_ns: u64,
    /// key -> fingerprint of the raw stored bytes observed (None = absent).
    reads: HashMap<Vec<u8>, Option<u64>>,
    /// key -> Some((payload, expires_at_ns)) to write, None to delete.
    staged: BTreeMap<Vec<u8>, Option<(Vec<u8>, u64)>>,
}

impl WriteTxn<'_> {
    fn record_read(&mut self, key: &[u8], stored: Option<&sled::IVec>) {
        // First observation wins; later reads inside the same transaction
        // must not overwrite the fingerprint the decision was based on.
        if !self.reads.contains_key(key) {
            self.reads
                .insert(key.to_vec(), stored.map(|v| xxh3_64(v)));
        }
    }

    /// Read a payload with read-your-writes semantics.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_expiry(key)?.map(|(payload, _)| payload))
    }

    /// Read payload plus expiry deadline with read-your-writes semantics.
    pub fn get_with_expiry(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, u64)>> {
        if let Some(entry) = self.staged.get(key) {
            return Ok(entry
                .as_ref()
                .map(|(payload, expires)| (payload.clone(), *expires)));
        }
        let stored = self.tree.get(key).map_err(map_sled)?;
        self.record_read(key, stored.as_ref());
        match stored {
            None => Ok(None),
            Some(stored) => {
                let (expires, payload) = envelope::unwrap(&stored)?;
                if envelope::is_expired(expires, self.now_ns) {
                    Ok(None)
                } else {
                    Ok(Some((payload.to_vec(), expires)))
                }
            }
        }
    }

    /// Whether a live entry exists (staged overlay included).
    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.get_with_expiry(key)?.is_some())
    }

    /// Stage a write with no expiry.
    pub fn insert(&mut self, key: Vec<u8>, payload: Vec<u8>) {
        self.insert_with_expiry(key, payload, NO_EXPIRY);
    }

    /// Stage a write with an absolute-nanosecond expiry deadline.
    pub fn insert_with_expiry(&mut self, key: Vec<u8>, payload: Vec<u8>, expires_at_ns: u64) {
        self.staged.insert(key, Some((payload, expires_at_ns)));
    }

    /// Stage a delete.
    pub fn remove(&mut self, key: Vec<u8>) {
        self.staged.insert(key, None);
    }

    /// Live `(key, payload)` pairs under a prefix with the staged writes
    /// of this transaction overlaid, in key order.
    pub fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, payload) = envelope::unwrap(&stored)?;
            if !envelope::is_expired(expires, self.now_ns) {
                merged.insert(key.to_vec(), payload.to_vec());
            }
        }
        for (key, entry) in self.staged.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match entry {
                Some((payload, _)) => {
                    merged.insert(key.clone(), payload.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Live `(key, payload)` pairs in `[start, end)` with the staged
    /// writes of this transaction overlaid.
    pub fn scan_range(&mut self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.tree.range(start.to_vec()..end.to_vec()) {
            let (key, stored) = item.map_err(map_sled)?;
            let (expires, payload) = envelope::unwrap(&stored)?;
            if !envelope::is_expired(expires, self.now_ns) {
                merged.insert(key.to_vec(), payload.to_vec());
            }
        }
        for (key, entry) in self.staged.range(start.to_vec()..end.to_vec()) {
            match entry {
                Some((payload, _)) => {
                    merged.insert(key.clone(), payload.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Keys only, staged overlay included.
    pub fn scan_keys(&mut self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Number of staged writes and deletes.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}
