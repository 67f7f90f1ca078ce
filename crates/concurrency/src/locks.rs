//! The per-key shard lock table.
//!
//! A fixed array of reader-writer locks; a logical key maps to a shard by
//! FNV-1a hash modulo the shard count. Locking is *advisory*: it
//! serializes writers of the same key, and incidentally writers of any
//! two keys that share a shard — an accepted trade for a memory-bounded
//! table.
//!
//! Guards are held briefly: acquire, run the transaction closure, release.
//! Multi-key operations acquire their guards in ascending shard order so
//! two of them can never deadlock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default shard count.
pub const DEFAULT_SHARDS: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over raw key bytes.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fixed-size table of advisory per-key locks.
pub struct LockTable {
    shards: Vec<RwLock<()>>,
}

impl LockTable {
    /// Create a table with the given shard count (rounded up to 1).
    pub fn new(shards: usize) -> LockTable {
        let shards = shards.max(1);
        LockTable {
            shards: (0..shards).map(|_| RwLock::new(())).collect(),
        }
    }

    /// Shard index for a logical key.
    pub fn shard_for(&self, key: &[u8]) -> usize {
        (fnv1a(key) % self.shards.len() as u64) as usize
    }

    /// Exclusive guard for a key's shard.
    pub fn write_guard(&self, key: &[u8]) -> RwLockWriteGuard<'_, ()> {
        self.shards[self.shard_for(key)].write()
    }

    /// Shared guard for a key's shard.
    pub fn read_guard(&self, key: &[u8]) -> RwLockReadGuard<'_, ()> {
        self.shards[self.shard_for(key)].read()
    }

    /// Exclusive guards for several keys, acquired in ascending shard
    /// order with duplicates collapsed.
    pub fn write_guard_many(&self, keys: &[&[u8]]) -> Vec<RwLockWriteGuard<'_, ()>> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.shard_for(k)).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.shards[i].write()).collect()
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        LockTable::new(DEFAULT_SHARDS)
    }
}
