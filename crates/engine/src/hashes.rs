//! Hash operations.
//!
//! Fields live at `HASH:<K>:<field>`; a sibling `HASH:<K>:count` entry
//! tracks cardinality so HLEN is a point read. The count moves only when
//! a field is created or removed, inside the same transaction as the
//! field write, and the metadata (count + tag) is reclaimed by the
//! operation that removes the last field.

use crate::database::Database;
use crate::num::{fmt_f64, fmt_i64, fmt_u64, parse_f64, parse_i64, parse_u64};
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::types::TypeTag;
use quartz_substrate::WriteTxn;
use std::sync::Arc;

/// Hash operations facade.
#[derive(Clone)]
pub struct Hashes {
    db: Arc<Database>,
}

impl Hashes {
    pub fn new(db: Arc<Database>) -> Hashes {
        Hashes { db }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// HSET / HMSET: returns the number of newly created fields.
    pub fn hset(&self, key: &[u8], pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let exists = Database::expect_type_txn(txn, key, TypeTag::Hash)?;
                let mut count = read_count(txn, key)?;
                let mut created = 0u64;
                for (field, value) in pairs {
                    let field_key = keyspace::hash_field_key(key, field);
                    if txn.get(&field_key)?.is_none() {
                        created += 1;
                    }
                    txn.insert(field_key, value.clone());
                }
                if created > 0 || !exists {
                    count += created;
                    txn.insert(keyspace::hash_count_key(key), fmt_u64(count));
                    Database::ensure_tag(txn, key, TypeTag::Hash)?;
                }
                Ok(created)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// HSETNX: set a single field only if it does not exist.
    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Hash)?;
                let field_key = keyspace::hash_field_key(key, field);
                if txn.get(&field_key)?.is_some() {
                    return Ok(false);
                }
                let count = read_count(txn, key)? + 1;
                txn.insert(field_key, value.to_vec());
                txn.insert(keyspace::hash_count_key(key), fmt_u64(count));
                Database::ensure_tag(txn, key, TypeTag::Hash)?;
                Ok(true)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// HDEL: returns the number of fields actually removed.
    pub fn hdel(&self, key: &[u8], fields: &[Vec<u8>]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Hash)? {
                    return Ok(0);
                }
                let mut count = read_count(txn, key)?;
                let mut removed = 0u64;
                for field in fields {
                    let field_key = keyspace::hash_field_key(key, field);
                    if txn.get(&field_key)?.is_some() {
                        txn.remove(field_key);
                        removed += 1;
                    }
                }
                if removed > 0 {
                    count = count.saturating_sub(removed);
                    if count == 0 {
                        txn.remove(keyspace::hash_count_key(key));
                        txn.remove(keyspace::type_tag_key(key));
                    } else {
                        txn.insert(keyspace::hash_count_key(key), fmt_u64(count));
                    }
                }
                Ok(removed)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// HINCRBY: integer field increment; non-numeric fields error.
    pub fn hincrby(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Hash)?;
                let field_key = keyspace::hash_field_key(key, field);
                let (current, created) = match txn.get(&field_key)? {
                    Some(bytes) => (parse_i64(&bytes)?, false),
                    None => (0, true),
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| Error::range("increment or decrement would overflow"))?;
                txn.insert(field_key, fmt_i64(next));
                if created {
                    let count = read_count(txn, key)? + 1;
                    txn.insert(keyspace::hash_count_key(key), fmt_u64(count));
                    Database::ensure_tag(txn, key, TypeTag::Hash)?;
                }
                Ok(next)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// HINCRBYFLOAT: float field increment with a finite-result guard.
    pub fn hincrbyfloat(&self, key: &[u8], field: &[u8], delta: f64) -> Result<Vec<u8>> {
        if delta.is_nan() {
            return Err(Error::parse("value is not a valid float"));
        }
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Hash)?;
                let field_key = keyspace::hash_field_key(key, field);
                let (current, created) = match txn.get(&field_key)? {
                    Some(bytes) => (parse_f64(&bytes)?, false),
                    None => (0.0, true),
                };
                let next = current + delta;
                if !next.is_finite() {
                    return Err(Error::range("increment would produce NaN or Infinity"));
                }
                let formatted = fmt_f64(next);
                txn.insert(field_key, formatted.clone());
                if created {
                    let count = read_count(txn, key)? + 1;
                    txn.insert(keyspace::hash_count_key(key), fmt_u64(count));
                    Database::ensure_tag(txn, key, TypeTag::Hash)?;
                }
                Ok(formatted)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Hash)? {
                return Ok(None);
            }
            view.get(&keyspace::hash_field_key(key, field))
        })
    }

    pub fn hmget(&self, key: &[u8], fields: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Hash)? {
                return Ok(vec![None; fields.len()]);
            }
            fields
                .iter()
                .map(|f| view.get(&keyspace::hash_field_key(key, f)))
                .collect()
        })
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        Ok(self.hget(key, field)?.is_some())
    }

    pub fn hlen(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Hash)? {
                return Ok(0);
            }
            match view.get(&keyspace::hash_count_key(key))? {
                Some(bytes) => parse_u64(&bytes),
                None => Ok(0),
            }
        })
    }

    pub fn hstrlen(&self, key: &[u8], field: &[u8]) -> Result<u64> {
        Ok(self.hget(key, field)?.map(|v| v.len() as u64).unwrap_or(0))
    }

    /// HGETALL: iterate the field prefix, skipping the count entry.
    pub fn hgetall(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Hash)? {
                return Ok(Vec::new());
            }
            let mut out = Vec::new();
            for (entry_key, value) in view.scan_prefix(&keyspace::hash_prefix(key))? {
                if let Some(field) = keyspace::hash_field_from_key(key, &entry_key) {
                    out.push((field.to_vec(), value));
                }
            }
            Ok(out)
        })
    }

    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, v)| v).collect())
    }
}

fn read_count(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<u64> {
    match txn.get(&keyspace::hash_count_key(key))? {
        Some(bytes) => parse_u64(&bytes),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hashes() -> (TempDir, Hashes) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Hashes::new(db))
    }

    fn pair(f: &[u8], v: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (f.to_vec(), v.to_vec())
    }

    #[test]
    fn test_hset_hget_round_trip() {
        let (_dir, h) = hashes();
        assert_eq!(h.hset(b"h", &[pair(b"f", b"v")]).unwrap(), 1);
        assert_eq!(h.hget(b"h", b"f").unwrap(), Some(b"v".to_vec()));
        assert_eq!(h.hget(b"h", b"missing").unwrap(), None);
        assert_eq!(h.hget(b"missing", b"f").unwrap(), None);
    }

    #[test]
    fn test_hset_same_field_does_not_grow() {
        let (_dir, h) = hashes();
        assert_eq!(h.hset(b"h", &[pair(b"f", b"v")]).unwrap(), 1);
        assert_eq!(h.hset(b"h", &[pair(b"f", b"v")]).unwrap(), 0);
        assert_eq!(h.hlen(b"h").unwrap(), 1);
    }

    #[test]
    fn test_hdel_updates_count_and_reclaims_metadata() {
        let (_dir, h) = hashes();
        h.hset(b"h", &[pair(b"a", b"1"), pair(b"b", b"2")]).unwrap();
        assert_eq!(h.hdel(b"h", &[b"a".to_vec(), b"x".to_vec()]).unwrap(), 1);
        assert_eq!(h.hlen(b"h").unwrap(), 1);
        assert_eq!(h.hdel(b"h", &[b"b".to_vec()]).unwrap(), 1);
        assert_eq!(h.hlen(b"h").unwrap(), 0);
        // The last removal drops count + tag entirely.
        assert!(h.hgetall(b"h").unwrap().is_empty());
    }

    #[test]
    fn test_hgetall_skips_count_entry() {
        let (_dir, h) = hashes();
        h.hset(b"h", &[pair(b"x", b"1"), pair(b"y", b"2")]).unwrap();
        let mut all = h.hgetall(b"h").unwrap();
        all.sort();
        assert_eq!(all, vec![pair(b"x", b"1"), pair(b"y", b"2")]);
        assert_eq!(h.hkeys(b"h").unwrap().len(), 2);
        assert_eq!(h.hvals(b"h").unwrap().len(), 2);
    }

    #[test]
    fn test_hincrby() {
        let (_dir, h) = hashes();
        assert_eq!(h.hincrby(b"h", b"n", 5).unwrap(), 5);
        assert_eq!(h.hincrby(b"h", b"n", -2).unwrap(), 3);
        assert_eq!(h.hlen(b"h").unwrap(), 1);
        h.hset(b"h", &[pair(b"s", b"abc")]).unwrap();
        assert!(h.hincrby(b"h", b"s", 1).is_err());
    }

    #[test]
    fn test_hincrbyfloat() {
        let (_dir, h) = hashes();
        h.hset(b"h", &[pair(b"f", b"10.5")]).unwrap();
        assert_eq!(h.hincrbyfloat(b"h", b"f", 0.1).unwrap(), b"10.6".to_vec());
        assert!(h.hincrbyfloat(b"h", b"f", f64::NAN).is_err());
    }

    #[test]
    fn test_hsetnx() {
        let (_dir, h) = hashes();
        assert!(h.hsetnx(b"h", b"f", b"1").unwrap());
        assert!(!h.hsetnx(b"h", b"f", b"2").unwrap());
        assert_eq!(h.hget(b"h", b"f").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_hmget_order_preserved() {
        let (_dir, h) = hashes();
        h.hset(b"h", &[pair(b"a", b"1"), pair(b"c", b"3")]).unwrap();
        assert_eq!(
            h.hmget(b"h", &[b"c".to_vec(), b"b".to_vec(), b"a".to_vec()])
                .unwrap(),
            vec![Some(b"3".to_vec()), None, Some(b"1".to_vec())]
        );
    }

    #[test]
    fn test_hstrlen_and_hexists() {
        let (_dir, h) = hashes();
        h.hset(b"h", &[pair(b"f", b"hello")]).unwrap();
        assert_eq!(h.hstrlen(b"h", b"f").unwrap(), 5);
        assert_eq!(h.hstrlen(b"h", b"g").unwrap(), 0);
        assert!(h.hexists(b"h", b"f").unwrap());
        assert!(!h.hexists(b"h", b"g").unwrap());
    }
}
