//! Set operations.
//!
//! Membership is the existence of `SET:<K>:member:<m>` (empty value); a
//! sibling `SET:<K>:count` entry keeps SCARD a point read. The algebraic
//! operations enumerate the first set and probe (intersection) or
//! accumulate with deduplication (union/difference); the `*STORE`
//! variants replace the destination atomically inside one transaction.

use crate::database::Database;
use crate::num::{fmt_u64, parse_u64};
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::Result;
use quartz_core::keyspace;
use quartz_core::types::TypeTag;
use quartz_substrate::WriteTxn;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which algebraic combination an SINTER/SUNION/SDIFF-style op performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algebra {
    Inter,
    Union,
    Diff,
}

/// Set operations facade.
#[derive(Clone)]
pub struct Sets {
    db: Arc<Database>,
}

impl Sets {
    pub fn new(db: Arc<Database>) -> Sets {
        Sets { db }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// SADD: returns the number of members actually inserted.
    pub fn sadd(&self, key: &[u8], members: &[Vec<u8>]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Set)?;
                let added = add_members(txn, key, members)?;
                Ok(added)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// SREM: returns the number of members actually removed.
    pub fn srem(&self, key: &[u8], members: &[Vec<u8>]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Set)? {
                    return Ok(0);
                }
                remove_members(txn, key, members)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// SPOP: remove and return one random member.
    pub fn spop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Set)? {
                    return Ok(None);
                }
                let members = members_in_txn(txn, key)?;
                if members.is_empty() {
                    return Ok(None);
                }
                let victim = members[rand::thread_rng().gen_range(0..members.len())].clone();
                remove_members(txn, key, std::slice::from_ref(&victim))?;
                Ok(Some(victim))
            })
        });
        self.db.invalidate(key);
        result
    }

    /// SMOVE: relocate a member between sets in one transaction.
    pub fn smove(&self, src: &[u8], dst: &[u8], member: &[u8]) -> Result<bool> {
        let _guards = self.db.locks().write_guard_many(&[src, dst]);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, src, TypeTag::Set)? {
                    return Ok(false);
                }
                Database::expect_type_txn(txn, dst, TypeTag::Set)?;
                let removed = remove_members(txn, src, std::slice::from_ref(&member.to_vec()))?;
                if removed == 0 {
                    return Ok(false);
                }
                add_members(txn, dst, std::slice::from_ref(&member.to_vec()))?;
                Ok(true)
            })
        });
        self.db.invalidate(src);
        self.db.invalidate(dst);
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn scard(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Set)? {
                return Ok(0);
            }
            match view.get(&keyspace::set_count_key(key))? {
                Some(bytes) => parse_u64(&bytes),
                None => Ok(0),
            }
        })
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Set)? {
                return Ok(false);
            }
            view.contains(&keyspace::set_member_key(key, member))
        })
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Set)? {
                return Ok(Vec::new());
            }
            let mut out = Vec::new();
            for entry_key in view.scan_keys(&keyspace::set_member_prefix(key))? {
                out.push(keyspace::set_member_from_key(key, &entry_key)?.to_vec());
            }
            Ok(out)
        })
    }

    /// SRANDMEMBER: `count = None` returns one member; positive counts are
    /// distinct, negative counts may repeat.
    pub fn srandmember(&self, key: &[u8], count: Option<i64>) -> Result<Vec<Vec<u8>>> {
        let members = self.smembers(key)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        match count {
            None => Ok(vec![members[rng.gen_range(0..members.len())].clone()]),
            Some(n) if n >= 0 => {
                let mut picked = members;
                picked.shuffle(&mut rng);
                picked.truncate(n as usize);
                Ok(picked)
            }
            Some(n) => Ok((0..n.unsigned_abs() as usize)
                .map(|_| members[rng.gen_range(0..members.len())].clone())
                .collect()),
        }
    }

    // =========================================================================
    // Algebra
    // =========================================================================

    pub fn sinter(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        self.db
            .substrate()
            .view(|view| Self::combine_view(view, keys, Algebra::Inter))
    }

    pub fn sunion(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        self.db
            .substrate()
            .view(|view| Self::combine_view(view, keys, Algebra::Union))
    }

    pub fn sdiff(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        self.db
            .substrate()
            .view(|view| Self::combine_view(view, keys, Algebra::Diff))
    }

    pub fn sinterstore(&self, dest: &[u8], keys: &[Vec<u8>]) -> Result<u64> {
        self.store(dest, keys, Algebra::Inter)
    }

    pub fn sunionstore(&self, dest: &[u8], keys: &[Vec<u8>]) -> Result<u64> {
        self.store(dest, keys, Algebra::Union)
    }

    pub fn sdiffstore(&self, dest: &[u8], keys: &[Vec<u8>]) -> Result<u64> {
        self.store(dest, keys, Algebra::Diff)
    }

    fn combine_view(
        view: &quartz_substrate::ReadView<'_>,
        keys: &[Vec<u8>],
        algebra: Algebra,
    ) -> Result<Vec<Vec<u8>>> {
        let mut result: BTreeSet<Vec<u8>> = BTreeSet::new();
        for (i, key) in keys.iter().enumerate() {
            let exists = Database::expect_type_view(view, key, TypeTag::Set)?;
            let members: BTreeSet<Vec<u8>> = if exists {
                view.scan_keys(&keyspace::set_member_prefix(key))?
                    .into_iter()
                    .map(|entry| keyspace::set_member_from_key(key, &entry).map(|m| m.to_vec()))
                    .collect::<Result<_>>()?
            } else {
                BTreeSet::new()
            };
            if i == 0 {
                result = members;
                continue;
            }
            match algebra {
                Algebra::Inter => result = result.intersection(&members).cloned().collect(),
                Algebra::Union => result.extend(members),
                Algebra::Diff => result = result.difference(&members).cloned().collect(),
            }
            if result.is_empty() && algebra != Algebra::Union {
                break;
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Shared `*STORE` path: compute and replace `dest` atomically.
    fn store(&self, dest: &[u8], keys: &[Vec<u8>], algebra: Algebra) -> Result<u64> {
        let _guard = self.db.locks().write_guard(dest);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let mut result: BTreeSet<Vec<u8>> = BTreeSet::new();
                for (i, key) in keys.iter().enumerate() {
                    let exists = Database::expect_type_txn(txn, key, TypeTag::Set)?;
                    let members: BTreeSet<Vec<u8>> = if exists {
                        txn.scan_keys(&keyspace::set_member_prefix(key))?
                            .into_iter()
                            .map(|entry| {
                                keyspace::set_member_from_key(key, &entry).map(|m| m.to_vec())
                            })
                            .collect::<Result<_>>()?
                    } else {
                        BTreeSet::new()
                    };
                    if i == 0 {
                        result = members;
                        continue;
                    }
                    match algebra {
                        Algebra::Inter => {
                            result = result.intersection(&members).cloned().collect()
                        }
                        Algebra::Union => result.extend(members),
                        Algebra::Diff => result = result.difference(&members).cloned().collect(),
                    }
                }
                // Replace whatever the destination held before.
                if let Some(tag) = Database::tag_in_txn(txn, dest)? {
                    Database::delete_entries_in_txn(txn, dest, tag)?;
                    txn.remove(keyspace::type_tag_key(dest));
                }
                let card = result.len() as u64;
                if card > 0 {
                    for member in &result {
                        txn.insert(keyspace::set_member_key(dest, member), Vec::new());
                    }
                    txn.insert(keyspace::set_count_key(dest), fmt_u64(card));
                    Database::write_tag(txn, dest, TypeTag::Set);
                }
                Ok(card)
            })
        });
        self.db.invalidate(dest);
        result
    }
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

fn read_count(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<u64> {
    match txn.get(&keyspace::set_count_key(key))? {
        Some(bytes) => parse_u64(&bytes),
        None => Ok(0),
    }
}

fn members_in_txn(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<Vec<Vec<u8>>> {
    txn.scan_keys(&keyspace::set_member_prefix(key))?
        .into_iter()
        .map(|entry| keyspace::set_member_from_key(key, &entry).map(|m| m.to_vec()))
        .collect()
}

fn add_members(txn: &mut WriteTxn<'_>, key: &[u8], members: &[Vec<u8>]) -> Result<u64> {
    let mut count = read_count(txn, key)?;
    let mut added = 0u64;
    for member in members {
        let member_key = keyspace::set_member_key(key, member);
        if !txn.contains(&member_key)? {
            txn.insert(member_key, Vec::new());
            added += 1;
        }
    }
    if added > 0 {
        count += added;
        txn.insert(keyspace::set_count_key(key), fmt_u64(count));
        Database::ensure_tag(txn, key, TypeTag::Set)?;
    }
    Ok(added)
}

fn remove_members(txn: &mut WriteTxn<'_>, key: &[u8], members: &[Vec<u8>]) -> Result<u64> {
    let mut count = read_count(txn, key)?;
    let mut removed = 0u64;
    for member in members {
        let member_key = keyspace::set_member_key(key, member);
        if txn.contains(&member_key)? {
            txn.remove(member_key);
            removed += 1;
        }
    }
    if removed > 0 {
        count = count.saturating_sub(removed);
        if count == 0 {
            txn.remove(keyspace::set_count_key(key));
            txn.remove(keyspace::type_tag_key(key));
        } else {
            txn.insert(keyspace::set_count_key(key), fmt_u64(count));
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sets() -> (TempDir, Sets) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Sets::new(db))
    }

    fn vals(items: &[&[u8]]) -> Vec<Vec<u8>> {
        items.iter().map(|v| v.to_vec()).collect()
    }

    #[test]
    fn test_sadd_is_idempotent() {
        let (_dir, s) = sets();
        assert_eq!(s.sadd(b"S", &vals(&[b"a", b"b"])).unwrap(), 2);
        assert_eq!(s.sadd(b"S", &vals(&[b"a"])).unwrap(), 0);
        assert_eq!(s.scard(b"S").unwrap(), 2);
    }

    #[test]
    fn test_srem_and_metadata_reclaim() {
        let (_dir, s) = sets();
        s.sadd(b"S", &vals(&[b"a", b"b"])).unwrap();
        assert_eq!(s.srem(b"S", &vals(&[b"a", b"zz"])).unwrap(), 1);
        assert_eq!(s.scard(b"S").unwrap(), 1);
        assert_eq!(s.srem(b"S", &vals(&[b"b"])).unwrap(), 1);
        assert_eq!(s.scard(b"S").unwrap(), 0);
        assert!(s.smembers(b"S").unwrap().is_empty());
    }

    #[test]
    fn test_sismember() {
        let (_dir, s) = sets();
        s.sadd(b"S", &vals(&[b"a"])).unwrap();
        assert!(s.sismember(b"S", b"a").unwrap());
        assert!(!s.sismember(b"S", b"b").unwrap());
        assert!(!s.sismember(b"missing", b"a").unwrap());
    }

    #[test]
    fn test_spop_removes() {
        let (_dir, s) = sets();
        s.sadd(b"S", &vals(&[b"a", b"b", b"c"])).unwrap();
        let popped = s.spop(b"S").unwrap().unwrap();
        assert!(vals(&[b"a", b"b", b"c"]).contains(&popped));
        assert_eq!(s.scard(b"S").unwrap(), 2);
        assert!(!s.sismember(b"S", &popped).unwrap());
        assert!(s.spop(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_srandmember_counts() {
        let (_dir, s) = sets();
        s.sadd(b"S", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(s.srandmember(b"S", None).unwrap().len(), 1);
        let distinct = s.srandmember(b"S", Some(10)).unwrap();
        assert_eq!(distinct.len(), 3);
        let repeats = s.srandmember(b"S", Some(-10)).unwrap();
        assert_eq!(repeats.len(), 10);
        assert_eq!(s.scard(b"S").unwrap(), 3);
    }

    #[test]
    fn test_smove() {
        let (_dir, s) = sets();
        s.sadd(b"src", &vals(&[b"m"])).unwrap();
        assert!(s.smove(b"src", b"dst", b"m").unwrap());
        assert!(!s.sismember(b"src", b"m").unwrap());
        assert!(s.sismember(b"dst", b"m").unwrap());
        assert!(!s.smove(b"src", b"dst", b"m").unwrap());
    }

    #[test]
    fn test_algebra() {
        let (_dir, s) = sets();
        s.sadd(b"A", &vals(&[b"a", b"b", b"c"])).unwrap();
        s.sadd(b"B", &vals(&[b"b", b"c", b"d"])).unwrap();
        assert_eq!(
            s.sinter(&vals(&[b"A", b"B"])).unwrap(),
            vals(&[b"b", b"c"])
        );
        assert_eq!(
            s.sunion(&vals(&[b"A", b"B"])).unwrap(),
            vals(&[b"a", b"b", b"c", b"d"])
        );
        assert_eq!(s.sdiff(&vals(&[b"A", b"B"])).unwrap(), vals(&[b"a"]));
        assert_eq!(s.sdiff(&vals(&[b"B", b"A"])).unwrap(), vals(&[b"d"]));
    }

    #[test]
    fn test_store_variants_replace_destination() {
        let (_dir, s) = sets();
        s.sadd(b"A", &vals(&[b"a", b"b"])).unwrap();
        s.sadd(b"B", &vals(&[b"b", b"c"])).unwrap();
        s.sadd(b"dest", &vals(&[b"old"])).unwrap();
        assert_eq!(s.sinterstore(b"dest", &vals(&[b"A", b"B"])).unwrap(), 1);
        assert_eq!(s.smembers(b"dest").unwrap(), vals(&[b"b"]));
        // Empty result wipes the destination.
        assert_eq!(s.sinterstore(b"dest", &vals(&[b"A", b"missing"])).unwrap(), 0);
        assert_eq!(s.scard(b"dest").unwrap(), 0);
    }
}
