//! Key-space administration.
//!
//! All generic commands key off the type tag: EXISTS/TYPE consult it,
//! DEL switches on it to delete the full entry set by prefix (tag last),
//! EXPIRE stamps the substrate per-entry expiry on the tag (and on the
//! single-blob primaries, so a bare GET cannot outlive the deadline), and
//! RENAME rewrites every owned entry under the new key inside one
//! transaction.
//!
//! SCAN is a position cursor over the tag scan: best-effort progress, no
//! snapshot guarantee under concurrent inserts.

use crate::database::Database;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::glob::glob_match;
use quartz_core::keyspace;
use quartz_core::time::{now_ns, NANOS_PER_MS};
use quartz_core::types::TypeTag;
use quartz_substrate::{WriteTxn, NO_EXPIRY};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Serialized form of one key's full entry set (DUMP/RESTORE).
#[derive(Debug, Serialize, Deserialize)]
struct DumpPayload {
    tag: Vec<u8>,
    /// (family index into `all_data_prefixes`, suffix, payload); exact-key
    /// families (string, json) use an empty suffix.
    entries: Vec<(u8, Vec<u8>, Vec<u8>)>,
}

/// Key-space admin facade.
#[derive(Clone)]
pub struct Keyspace {
    db: Arc<Database>,
}

impl Keyspace {
    pub fn new(db: Arc<Database>) -> Keyspace {
        Keyspace { db }
    }

    // =========================================================================
    // Existence and typing
    // =========================================================================

    /// EXISTS: counts keys with a live type tag (duplicates recounted).
    pub fn exists(&self, keys: &[Vec<u8>]) -> Result<u64> {
        self.db.substrate().view(|view| {
            let mut found = 0u64;
            for key in keys {
                if view.contains(&keyspace::type_tag_key(key))? {
                    found += 1;
                }
            }
            Ok(found)
        })
    }

    /// TYPE: the tag, or `None` for a missing key.
    pub fn type_of(&self, key: &[u8]) -> Result<Option<TypeTag>> {
        self.db
            .substrate()
            .view(|view| Database::tag_in_view(view, key))
    }

    // =========================================================================
    // Deletion and renaming
    // =========================================================================

    /// DEL: per key, delete all entries by prefix and the tag last.
    pub fn del(&self, keys: &[Vec<u8>]) -> Result<u64> {
        let mut deleted = 0u64;
        for key in keys {
            let _guard = self.db.locks().write_guard(key);
            let removed = with_retry(RetryPolicy::DEFAULT, || {
                self.db.substrate().update(|txn| {
                    match Database::tag_in_txn(txn, key)? {
                        None => Ok(false),
                        Some(tag) => {
                            Database::delete_entries_in_txn(txn, key, tag)?;
                            txn.remove(keyspace::type_tag_key(key));
                            Ok(true)
                        }
                    }
                })
            });
            self.db.invalidate(key);
            if removed? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// RENAME: copy every entry under the destination prefixes, then
    /// delete the originals, in one transaction. The tag's expiry stamp
    /// moves with it, so a TTL survives the rename.
    pub fn rename(&self, src: &[u8], dst: &[u8]) -> Result<()> {
        if src == dst {
            // Renaming onto itself only requires existence.
            return match self.type_of(src)? {
                Some(_) => Ok(()),
                None => Err(Error::not_found(String::from_utf8_lossy(src))),
            };
        }
        let _guards = self.db.locks().write_guard_many(&[src, dst]);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db
                .substrate()
                .update(|txn| rename_in_txn(txn, src, dst, true))
        });
        self.db.invalidate(src);
        self.db.invalidate(dst);
        result.map(|_| ())
    }

    /// RENAMENX: rename only when the destination does not exist.
    pub fn renamenx(&self, src: &[u8], dst: &[u8]) -> Result<bool> {
        if src == dst {
            return match self.type_of(src)? {
                Some(_) => Ok(false),
                None => Err(Error::not_found(String::from_utf8_lossy(src))),
            };
        }
        let _guards = self.db.locks().write_guard_many(&[src, dst]);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db
                .substrate()
                .update(|txn| rename_in_txn(txn, src, dst, false))
        });
        self.db.invalidate(src);
        self.db.invalidate(dst);
        result
    }

    // =========================================================================
    // Expiry
    // =========================================================================

    /// EXPIRE/PEXPIRE: returns false when the key does not exist.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        self.expire_at_ns(key, now_ns().saturating_add(ttl.as_nanos() as u64))
    }

    /// EXPIREAT/PEXPIREAT with an absolute nanosecond deadline.
    pub fn expire_at_ns(&self, key: &[u8], deadline_ns: u64) -> Result<bool> {
        self.rewrite_expiry(key, deadline_ns)
    }

    /// PERSIST: strip the expiry; returns whether one was removed.
    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let tag_key = keyspace::type_tag_key(key);
                let (tag_bytes, expires) = match txn.get_with_expiry(&tag_key)? {
                    Some(found) => found,
                    None => return Ok(false),
                };
                if expires == NO_EXPIRY {
                    return Ok(false);
                }
                txn.insert(tag_key, tag_bytes.clone());
                restamp_primary(txn, key, &tag_bytes, NO_EXPIRY)?;
                Ok(true)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// PTTL in milliseconds: -2 missing, -1 no expiry.
    pub fn pttl(&self, key: &[u8]) -> Result<i64> {
        self.db.substrate().view(|view| {
            match view.get_with_expiry(&keyspace::type_tag_key(key))? {
                None => Ok(-2),
                Some((_, NO_EXPIRY)) => Ok(-1),
                Some((_, deadline)) => {
                    Ok((deadline.saturating_sub(now_ns()) / NANOS_PER_MS) as i64)
                }
            }
        })
    }

    /// TTL in seconds, rounded up so a fresh `EX 10` reads 10.
    pub fn ttl(&self, key: &[u8]) -> Result<i64> {
        let ms = self.pttl(key)?;
        if ms < 0 {
            Ok(ms)
        } else {
            Ok((ms + 999) / 1000)
        }
    }

    fn rewrite_expiry(&self, key: &[u8], deadline_ns: u64) -> Result<bool> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let tag_key = keyspace::type_tag_key(key);
                let tag_bytes = match txn.get(&tag_key)? {
                    Some(bytes) => bytes,
                    None => return Ok(false),
                };
                txn.insert_with_expiry(tag_key, tag_bytes.clone(), deadline_ns);
                restamp_primary(txn, key, &tag_bytes, deadline_ns)?;
                Ok(true)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// KEYS: linear scan of the tag prefix with a glob filter.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.db.substrate().view(|view| {
            let mut out = Vec::new();
            for tag_key in view.scan_keys(keyspace::TYPE_TAG_PREFIX)? {
                let user_key = keyspace::user_key_from_tag(&tag_key)?;
                if glob_match(pattern, user_key) {
                    out.push(user_key.to_vec());
                }
            }
            Ok(out)
        })
    }

    /// SCAN: position cursor over the tag scan. Returns `(next_cursor,
    /// keys)`; a zero next-cursor ends the iteration. Progress is
    /// best-effort under concurrent inserts.
    pub fn scan(
        &self,
        cursor: u64,
        pattern: Option<&[u8]>,
        count: u64,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        self.db.substrate().view(|view| {
            let all = view.scan_keys(keyspace::TYPE_TAG_PREFIX)?;
            let count = count.max(1) as usize;
            let start = cursor as usize;
            if start >= all.len() {
                return Ok((0, Vec::new()));
            }
            let batch = &all[start..(start + count).min(all.len())];
            let next = if start + batch.len() >= all.len() {
                0
            } else {
                (start + batch.len()) as u64
            };
            let mut keys = Vec::new();
            for tag_key in batch {
                let user_key = keyspace::user_key_from_tag(tag_key)?;
                if pattern.map(|p| glob_match(p, user_key)).unwrap_or(true) {
                    keys.push(user_key.to_vec());
                }
            }
            Ok((next, keys))
        })
    }

    /// RANDOMKEY.
    pub fn randomkey(&self) -> Result<Option<Vec<u8>>> {
        self.db.substrate().view(|view| {
            let all = view.scan_keys(keyspace::TYPE_TAG_PREFIX)?;
            if all.is_empty() {
                return Ok(None);
            }
            let pick = &all[rand::thread_rng().gen_range(0..all.len())];
            Ok(Some(keyspace::user_key_from_tag(pick)?.to_vec()))
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// OBJECT ENCODING.
    pub fn object_encoding(&self, key: &[u8]) -> Result<Option<&'static str>> {
        Ok(self.type_of(key)?.map(|tag| tag.object_encoding()))
    }

    /// OBJECT IDLETIME: the substrate has no access-time tracking.
    pub fn object_idletime(&self, key: &[u8]) -> Result<Option<u64>> {
        Ok(self.type_of(key)?.map(|_| 0))
    }

    /// OBJECT REFCOUNT.
    pub fn object_refcount(&self, key: &[u8]) -> Result<Option<u64>> {
        Ok(self.type_of(key)?.map(|_| 1))
    }

    /// MEMORY USAGE: raw bytes of the key plus every entry it owns.
    pub fn memory_usage(&self, key: &[u8]) -> Result<Option<u64>> {
        self.db.substrate().view(|view| {
            let tag = match Database::tag_in_view(view, key)? {
                Some(tag) => tag,
                None => return Ok(None),
            };
            let mut total = (key.len() + keyspace::type_tag_key(key).len()
                + tag.as_bytes().len()) as u64;
            for (entry_key, payload) in owned_entries_view(view, key, tag)? {
                total += (entry_key.len() + payload.len()) as u64;
            }
            Ok(Some(total))
        })
    }

    // =========================================================================
    // DUMP / RESTORE
    // =========================================================================

    /// DUMP: engine-owned serialization of the key's full entry set.
    pub fn dump(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.substrate().view(|view| {
            let tag = match Database::tag_in_view(view, key)? {
                Some(tag) => tag,
                None => return Ok(None),
            };
            let prefixes = keyspace::all_data_prefixes(key);
            let mut entries = Vec::new();
            for (entry_key, payload) in owned_entries_view(view, key, tag)? {
                let (family, suffix) = match prefixes
                    .iter()
                    .enumerate()
                    .find(|(_, p)| entry_key.starts_with(p.as_slice()))
                {
                    Some((i, p)) => (i as u8, entry_key[p.len()..].to_vec()),
                    None => continue,
                };
                entries.push((family, suffix, payload));
            }
            let payload = DumpPayload {
                tag: tag.as_bytes().to_vec(),
                entries,
            };
            Ok(Some(bincode::serialize(&payload)?))
        })
    }

    /// RESTORE: recreate a key from a DUMP payload.
    pub fn restore(&self, key: &[u8], ttl_ms: u64, blob: &[u8], replace: bool) -> Result<()> {
        let payload: DumpPayload = bincode::deserialize(blob)
            .map_err(|_| Error::parse("DUMP payload version or checksum are wrong"))?;
        let tag = TypeTag::from_bytes(&payload.tag)
            .map_err(|_| Error::parse("DUMP payload version or checksum are wrong"))?;
        let deadline = if ttl_ms == 0 {
            NO_EXPIRY
        } else {
            now_ns().saturating_add(ttl_ms * NANOS_PER_MS)
        };
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                match Database::tag_in_txn(txn, key)? {
                    Some(_) if !replace => {
                        return Err(Error::invalid_argument(
                            "BUSYKEY Target key name already exists",
                        ))
                    }
                    Some(existing) => {
                        Database::delete_entries_in_txn(txn, key, existing)?;
                    }
                    None => {}
                }
                let prefixes = keyspace::all_data_prefixes(key);
                for (family, suffix, entry_payload) in &payload.entries {
                    let prefix = prefixes.get(*family as usize).ok_or_else(|| {
                        Error::parse("DUMP payload version or checksum are wrong")
                    })?;
                    let mut entry_key = prefix.clone();
                    entry_key.extend_from_slice(suffix);
                    txn.insert(entry_key, entry_payload.clone());
                }
                txn.insert_with_expiry(
                    keyspace::type_tag_key(key),
                    tag.as_bytes().to_vec(),
                    deadline,
                );
                restamp_primary(txn, key, tag.as_bytes(), deadline)?;
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }
}

/// Re-stamp the single-blob primary entries with the tag's deadline.
fn restamp_primary(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    tag_bytes: &[u8],
    deadline_ns: u64,
) -> Result<()> {
    let primary = match TypeTag::from_bytes(tag_bytes)? {
        TypeTag::String => keyspace::string_key(key),
        TypeTag::Json => keyspace::json_key(key),
        _ => return Ok(()),
    };
    if let Some(value) = txn.get(&primary)? {
        txn.insert_with_expiry(primary, value, deadline_ns);
    }
    Ok(())
}

/// Every entry a key owns under its tag, via the per-family prefixes.
/// Exact-key families avoid prefix scans so sibling keys sharing a byte
/// prefix are never swept in.
fn owned_entries_view(
    view: &quartz_substrate::ReadView<'_>,
    key: &[u8],
    tag: TypeTag,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    match tag {
        TypeTag::String => {
            let k = keyspace::string_key(key);
            if let Some(payload) = view.get(&k)? {
                out.push((k, payload));
            }
        }
        TypeTag::Json => {
            let k = keyspace::json_key(key);
            if let Some(payload) = view.get(&k)? {
                out.push((k, payload));
            }
        }
        TypeTag::Hash => out.extend(view.scan_prefix(&keyspace::hash_prefix(key))?),
        TypeTag::List => out.extend(view.scan_prefix(&keyspace::list_prefix(key))?),
        TypeTag::Set => out.extend(view.scan_prefix(&keyspace::set_prefix(key))?),
        TypeTag::SortedSet => out.extend(view.scan_prefix(&keyspace::zset_prefix(key))?),
        TypeTag::Stream => out.extend(view.scan_prefix(&keyspace::stream_prefix(key))?),
        TypeTag::TimeSeries => out.extend(view.scan_prefix(&keyspace::ts_prefix(key))?),
        TypeTag::Geo => {
            out.extend(view.scan_prefix(&keyspace::zset_prefix(key))?);
            out.extend(view.scan_prefix(&keyspace::geo_prefix(key))?);
        }
    }
    Ok(out)
}

/// Indices into `all_data_prefixes` of the families a composite tag owns.
fn family_indices(tag: TypeTag) -> &'static [usize] {
    match tag {
        TypeTag::String => &[0],
        TypeTag::Hash => &[1],
        TypeTag::List => &[2],
        TypeTag::Set => &[3],
        TypeTag::SortedSet => &[4],
        TypeTag::Stream => &[5],
        TypeTag::TimeSeries => &[6],
        TypeTag::Json => &[7],
        TypeTag::Geo => &[4, 8],
    }
}

/// Move every entry of `src` under `dst`. Returns false when `nx` blocked
/// the rename because `dst` exists.
fn rename_in_txn(txn: &mut WriteTxn<'_>, src: &[u8], dst: &[u8], replace: bool) -> Result<bool> {
    let src_tag_key = keyspace::type_tag_key(src);
    let (tag_bytes, tag_expiry) = txn
        .get_with_expiry(&src_tag_key)?
        .ok_or_else(|| Error::not_found(String::from_utf8_lossy(src)))?;
    let tag = TypeTag::from_bytes(&tag_bytes)?;
    match Database::tag_in_txn(txn, dst)? {
        Some(_) if !replace => return Ok(false),
        Some(dst_tag) => {
            Database::delete_entries_in_txn(txn, dst, dst_tag)?;
        }
        None => {}
    }
    // Copy entries family by family, preserving each entry's expiry stamp.
    let src_prefixes = keyspace::all_data_prefixes(src);
    let dst_prefixes = keyspace::all_data_prefixes(dst);
    match tag {
        TypeTag::String | TypeTag::Json => {
            let (old_key, new_key) = if tag == TypeTag::String {
                (keyspace::string_key(src), keyspace::string_key(dst))
            } else {
                (keyspace::json_key(src), keyspace::json_key(dst))
            };
            if let Some((payload, expires)) = txn.get_with_expiry(&old_key)? {
                txn.insert_with_expiry(new_key, payload, expires);
                txn.remove(old_key);
            }
        }
        _ => {
            for &family in family_indices(tag) {
                let src_prefix = &src_prefixes[family];
                for (entry_key, payload) in txn.scan_prefix(src_prefix)? {
                    let mut new_key = dst_prefixes[family].clone();
                    new_key.extend_from_slice(&entry_key[src_prefix.len()..]);
                    txn.insert(new_key, payload);
                    txn.remove(entry_key);
                }
            }
        }
    }
    txn.insert_with_expiry(keyspace::type_tag_key(dst), tag_bytes.clone(), tag_expiry);
    txn.remove(src_tag_key);
    restamp_primary(txn, dst, &tag_bytes, tag_expiry)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::Hashes;
    use crate::strings::Strings;
    use tempfile::TempDir;

    fn admin() -> (TempDir, Arc<Database>, Keyspace) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, db.clone(), Keyspace::new(db))
    }

    #[test]
    fn test_exists_and_type() {
        let (_dir, db, ks) = admin();
        Strings::new(db.clone()).set(b"s", b"v").unwrap();
        Hashes::new(db).hset(b"h", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
        assert_eq!(
            ks.exists(&[b"s".to_vec(), b"h".to_vec(), b"zz".to_vec()]).unwrap(),
            2
        );
        assert_eq!(ks.type_of(b"s").unwrap(), Some(TypeTag::String));
        assert_eq!(ks.type_of(b"h").unwrap(), Some(TypeTag::Hash));
        assert_eq!(ks.type_of(b"zz").unwrap(), None);
    }

    #[test]
    fn test_del_composite_removes_all_entries() {
        let (_dir, db, ks) = admin();
        let h = Hashes::new(db.clone());
        h.hset(b"h", &[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        assert_eq!(ks.del(&[b"h".to_vec(), b"zz".to_vec()]).unwrap(), 1);
        assert_eq!(ks.type_of(b"h").unwrap(), None);
        assert_eq!(h.hlen(b"h").unwrap(), 0);
        assert!(h.hgetall(b"h").unwrap().is_empty());
    }

    #[test]
    fn test_rename_preserves_type_and_fields() {
        let (_dir, db, ks) = admin();
        let h = Hashes::new(db);
        h.hset(b"u", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
        ks.rename(b"u", b"u2").unwrap();
        assert_eq!(ks.type_of(b"u").unwrap(), None);
        assert_eq!(ks.type_of(b"u2").unwrap(), Some(TypeTag::Hash));
        assert_eq!(h.hget(b"u2", b"f").unwrap(), Some(b"v".to_vec()));
        assert!(matches!(
            ks.rename(b"missing", b"x").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_renamenx_blocks_on_existing_destination() {
        let (_dir, db, ks) = admin();
        let s = Strings::new(db);
        s.set(b"a", b"1").unwrap();
        s.set(b"b", b"2").unwrap();
        assert!(!ks.renamenx(b"a", b"b").unwrap());
        assert_eq!(s.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert!(ks.renamenx(b"a", b"c").unwrap());
        assert_eq!(s.get(b"c").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_expire_ttl_persist_cycle() {
        let (_dir, db, ks) = admin();
        Strings::new(db).set(b"k", b"v").unwrap();
        assert_eq!(ks.ttl(b"k").unwrap(), -1);
        assert!(ks.expire(b"k", Duration::from_secs(10)).unwrap());
        let ttl = ks.ttl(b"k").unwrap();
        assert!(ttl == 9 || ttl == 10, "ttl was {}", ttl);
        assert!(ks.persist(b"k").unwrap());
        assert_eq!(ks.ttl(b"k").unwrap(), -1);
        assert!(!ks.persist(b"k").unwrap());
        assert_eq!(ks.del(&[b"k".to_vec()]).unwrap(), 1);
        assert_eq!(ks.ttl(b"k").unwrap(), -2);
        assert!(!ks.expire(b"zz", Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_expired_key_is_gone_everywhere() {
        let (_dir, db, ks) = admin();
        let s = Strings::new(db);
        s.set(b"k", b"v").unwrap();
        assert!(ks.expire(b"k", Duration::from_millis(20)).unwrap());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ks.ttl(b"k").unwrap(), -2);
        assert_eq!(s.get(b"k").unwrap(), None);
        assert_eq!(ks.exists(&[b"k".to_vec()]).unwrap(), 0);
    }

    #[test]
    fn test_keys_glob() {
        let (_dir, db, ks) = admin();
        let s = Strings::new(db);
        s.set(b"user:1", b"a").unwrap();
        s.set(b"user:2", b"b").unwrap();
        s.set(b"session:1", b"c").unwrap();
        let mut users = ks.keys(b"user:*").unwrap();
        users.sort();
        assert_eq!(users, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
        assert_eq!(ks.keys(b"*").unwrap().len(), 3);
        assert_eq!(ks.keys(b"user:?").unwrap().len(), 2);
    }

    #[test]
    fn test_scan_pages_through_all_keys() {
        let (_dir, db, ks) = admin();
        let s = Strings::new(db);
        for i in 0..10 {
            s.set(format!("k{:02}", i).as_bytes(), b"v").unwrap();
        }
        let mut cursor = 0u64;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = ks.scan(cursor, None, 3).unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_object_and_memory() {
        let (_dir, db, ks) = admin();
        Strings::new(db).set(b"k", b"hello").unwrap();
        assert_eq!(ks.object_encoding(b"k").unwrap(), Some("raw"));
        assert_eq!(ks.object_idletime(b"k").unwrap(), Some(0));
        assert_eq!(ks.object_refcount(b"k").unwrap(), Some(1));
        let usage = ks.memory_usage(b"k").unwrap().unwrap();
        assert!(usage >= 5);
        assert_eq!(ks.memory_usage(b"zz").unwrap(), None);
    }

    #[test]
    fn test_dump_restore_round_trip() {
        let (_dir, db, ks) = admin();
        let h = Hashes::new(db);
        h.hset(b"h", &[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        let blob = ks.dump(b"h").unwrap().unwrap();
        assert!(ks.dump(b"zz").unwrap().is_none());

        ks.restore(b"h2", 0, &blob, false).unwrap();
        assert_eq!(ks.type_of(b"h2").unwrap(), Some(TypeTag::Hash));
        assert_eq!(h.hget(b"h2", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(h.hlen(b"h2").unwrap(), 2);

        // Existing destination requires REPLACE.
        assert!(ks.restore(b"h2", 0, &blob, false).is_err());
        ks.restore(b"h2", 0, &blob, true).unwrap();
    }

    #[test]
    fn test_randomkey() {
        let (_dir, db, ks) = admin();
        assert!(ks.randomkey().unwrap().is_none());
        Strings::new(db).set(b"only", b"v").unwrap();
        assert_eq!(ks.randomkey().unwrap(), Some(b"only".to_vec()));
    }
}
