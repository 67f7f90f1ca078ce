//! The engine handle.
//!
//! One `Database` per substrate directory: it owns the substrate, the
//! shard-lock table, the two LRU caches and the notifier. Facades are
//! created from an `Arc<Database>`; nothing here is process-global.

use crate::notify::Notifier;
use crate::sweeper;
use quartz_concurrency::{LockTable, LruCache, DEFAULT_SHARDS};
use quartz_core::error::Result;
use quartz_core::keyspace;
use quartz_core::types::TypeTag;
use quartz_substrate::{codec, Compression, ReadView, Substrate, WriteTxn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Substrate directory.
    pub dir: PathBuf,
    /// Value compression for string and JSON blobs.
    pub compression: Compression,
    /// Shard count of the per-key lock table.
    pub lock_shards: usize,
    /// Read cache capacity (entries).
    pub read_cache_capacity: usize,
    /// Write cache capacity (entries).
    pub write_cache_capacity: usize,
    /// TTL applied to cached entries.
    pub cache_ttl: Duration,
}

impl Config {
    pub fn new(dir: impl Into<PathBuf>) -> Config {
        Config {
            dir: dir.into(),
            compression: Compression::default(),
            lock_shards: DEFAULT_SHARDS,
            read_cache_capacity: 1024,
            write_cache_capacity: 1024,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// One open engine instance.
pub struct Database {
    substrate: Substrate,
    locks: LockTable,
    read_cache: LruCache,
    write_cache: LruCache,
    notifier: Notifier,
    compression: Compression,
}

impl Database {
    /// Open with defaults and run the startup sweep.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Database>> {
        Database::open_with_config(Config::new(dir))
    }

    /// Open with explicit configuration and run the startup sweep.
    pub fn open_with_config(config: Config) -> Result<Arc<Database>> {
        let substrate = Substrate::open(&config.dir)?;
        let db = Arc::new(Database {
            substrate,
            locks: LockTable::new(config.lock_shards),
            read_cache: LruCache::new(config.read_cache_capacity, config.cache_ttl),
            write_cache: LruCache::new(config.write_cache_capacity, config.cache_ttl),
            notifier: Notifier::new(),
            compression: config.compression,
        });
        sweeper::run(&db)?;
        Ok(db)
    }

    /// Flush substrate buffers to disk.
    pub fn flush(&self) -> Result<()> {
        self.substrate.flush()
    }

    pub(crate) fn substrate(&self) -> &Substrate {
        &self.substrate
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn read_cache(&self) -> &LruCache {
        &self.read_cache
    }

    pub(crate) fn write_cache(&self) -> &LruCache {
        &self.write_cache
    }

    // =========================================================================
    // Type tags
    // =========================================================================

    pub(crate) fn tag_in_view(view: &ReadView<'_>, key: &[u8]) -> Result<Option<TypeTag>> {
        match view.get(&keyspace::type_tag_key(key))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(TypeTag::from_bytes(&bytes)?)),
        }
    }

    pub(crate) fn tag_in_txn(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<Option<TypeTag>> {
        match txn.get(&keyspace::type_tag_key(key))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(TypeTag::from_bytes(&bytes)?)),
        }
    }

    /// Read the tag and fail with `WrongType` unless it is `want` (or the
    /// key is absent). Returns whether the key exists.
    pub(crate) fn expect_type_view(
        view: &ReadView<'_>,
        key: &[u8],
        want: TypeTag,
    ) -> Result<bool> {
        match Self::tag_in_view(view, key)? {
            None => Ok(false),
            Some(tag) if tag == want => Ok(true),
            Some(tag) => Err(quartz_core::Error::wrong_type(
                String::from_utf8_lossy(key),
                tag.name(),
            )),
        }
    }

    /// Transactional variant of [`Database::expect_type_view`].
    pub(crate) fn expect_type_txn(
        txn: &mut WriteTxn<'_>,
        key: &[u8],
        want: TypeTag,
    ) -> Result<bool> {
        match Self::tag_in_txn(txn, key)? {
            None => Ok(false),
            Some(tag) if tag == want => Ok(true),
            Some(tag) => Err(quartz_core::Error::wrong_type(
                String::from_utf8_lossy(key),
                tag.name(),
            )),
        }
    }

    /// Stage the type tag for a key, discarding any previous tag (and with
    /// it any expiry stamp). Overwrite paths (SET, the STORE variants,
    /// RESTORE) use this.
    pub(crate) fn write_tag(txn: &mut WriteTxn<'_>, key: &[u8], tag: TypeTag) {
        txn.insert(keyspace::type_tag_key(key), tag.as_bytes().to_vec());
    }

    /// Stage the type tag only when the key has none. Update-in-place
    /// paths use this so a live TTL on the tag survives the mutation.
    pub(crate) fn ensure_tag(txn: &mut WriteTxn<'_>, key: &[u8], tag: TypeTag) -> Result<()> {
        let tag_key = keyspace::type_tag_key(key);
        if txn.get(&tag_key)?.is_none() {
            txn.insert(tag_key, tag.as_bytes().to_vec());
        }
        Ok(())
    }

    /// Delete every entry a key owns under its current tag. The tag entry
    /// itself is left to the caller (DEL removes it last; SET-overwrite
    /// replaces it).
    pub(crate) fn delete_entries_in_txn(
        txn: &mut WriteTxn<'_>,
        key: &[u8],
        tag: TypeTag,
    ) -> Result<()> {
        match tag {
            TypeTag::String => txn.remove(keyspace::string_key(key)),
            TypeTag::Json => txn.remove(keyspace::json_key(key)),
            TypeTag::Hash => {
                for k in txn.scan_keys(&keyspace::hash_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::List => {
                for k in txn.scan_keys(&keyspace::list_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::Set => {
                for k in txn.scan_keys(&keyspace::set_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::SortedSet => {
                for k in txn.scan_keys(&keyspace::zset_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::Stream => {
                for k in txn.scan_keys(&keyspace::stream_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::TimeSeries => {
                for k in txn.scan_keys(&keyspace::ts_prefix(key))? {
                    txn.remove(k);
                }
            }
            TypeTag::Geo => {
                for k in txn.scan_keys(&keyspace::zset_prefix(key))? {
                    txn.remove(k);
                }
                for k in txn.scan_keys(&keyspace::geo_prefix(key))? {
                    txn.remove(k);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Caches
    // =========================================================================

    /// Drop a key from both caches. Called by every mutation path, and on
    /// any write error, so stale bytes are never served.
    pub(crate) fn invalidate(&self, key: &[u8]) {
        self.read_cache.delete(key);
        self.write_cache.delete(key);
    }

    // =========================================================================
    // Compression
    // =========================================================================

    /// Apply the configured codec to a string/JSON blob.
    pub(crate) fn encode_blob(&self, data: &[u8]) -> Result<Vec<u8>> {
        codec::compress(self.compression, data)
    }

    /// Probe-and-decompress a stored blob.
    pub(crate) fn decode_blob(&self, data: &[u8]) -> Result<Vec<u8>> {
        codec::maybe_decompress(data)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub(crate) fn list_notify_key(key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + key.len());
        out.extend_from_slice(b"list:");
        out.extend_from_slice(key);
        out
    }

    pub(crate) fn stream_notify_key(key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + key.len());
        out.extend_from_slice(b"stream:");
        out.extend_from_slice(key);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine");
        {
            let db = Database::open(&path).unwrap();
            db.flush().unwrap();
        }
        let _db = Database::open(&path).unwrap();
    }

    #[test]
    fn test_invalidate_clears_both_caches() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("engine")).unwrap();
        db.read_cache().set(b"k", b"v".to_vec());
        db.write_cache().set(b"k", b"v".to_vec());
        db.invalidate(b"k");
        assert!(db.read_cache().get(b"k").is_none());
        assert!(db.write_cache().get(b"k").is_none());
    }
}
