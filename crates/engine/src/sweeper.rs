//! Startup sweep.
//!
//! Runs once at open, after expired entries are purged:
//!
//! 1. every type tag is checked against its type's primary data — a tag
//!    with no data behind it is dropped;
//! 2. derived counters (hash count, set count, sorted-set meta, list
//!    length, stream length, time-series meta) are recomputed from the
//!    entries and rewritten when they disagree, so counters self-heal;
//! 3. data entries whose owning tag no longer exists (an expired or
//!    half-deleted key) are reclaimed.
//!
//! Each repair is logged; a clean database sweeps silently.

use crate::database::Database;
use crate::num::{fmt_u64, parse_u64};
use quartz_core::error::Result;
use quartz_core::keyspace;
use quartz_core::types::{StreamId, StreamMeta, TsMeta, TypeTag, ZSetDataEntry, ZSetMeta};
use quartz_substrate::WriteTxn;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) fn run(db: &Arc<Database>) -> Result<()> {
    let purged = db.substrate().purge_expired()?;
    let tagged: Vec<(Vec<u8>, Option<TypeTag>)> = db.substrate().view(|view| {
        let mut out = Vec::new();
        for (tag_key, value) in view.scan_prefix(keyspace::TYPE_TAG_PREFIX)? {
            let user_key = keyspace::user_key_from_tag(&tag_key)?.to_vec();
            out.push((user_key, TypeTag::from_bytes(&value).ok()));
        }
        Ok(out)
    })?;

    let mut repaired = 0usize;
    for (key, tag) in &tagged {
        match tag {
            None => {
                // Unknown tag byte value: drop the tag, let the orphan
                // pass reclaim whatever data sat behind it.
                warn!(key = %String::from_utf8_lossy(key), "dropping unreadable type tag");
                db.substrate().update(|txn| {
                    txn.remove(keyspace::type_tag_key(key));
                    Ok(())
                })?;
                repaired += 1;
            }
            Some(tag) => {
                if sweep_key(db, key, *tag)? {
                    repaired += 1;
                }
            }
        }
    }

    let live: Vec<(Vec<u8>, TypeTag)> = tagged
        .into_iter()
        .filter_map(|(k, t)| t.map(|t| (k, t)))
        .collect();
    let orphans = sweep_orphans(db, &live)?;

    debug!(purged, repaired, orphans, "startup sweep finished");
    Ok(())
}

/// Verify one tagged key; returns whether anything was repaired.
fn sweep_key(db: &Arc<Database>, key: &[u8], tag: TypeTag) -> Result<bool> {
    db.substrate().update(|txn| match tag {
        TypeTag::String => drop_tag_if_missing(txn, key, &keyspace::string_key(key)),
        TypeTag::Json => drop_tag_if_missing(txn, key, &keyspace::json_key(key)),
        TypeTag::Hash => sweep_counted(
            txn,
            key,
            keyspace::hash_prefix(key),
            keyspace::hash_count_key(key),
            |k, entry| keyspace::hash_field_from_key(k, entry).is_some(),
        ),
        TypeTag::Set => sweep_counted(
            txn,
            key,
            keyspace::set_member_prefix(key),
            keyspace::set_count_key(key),
            |_, _| true,
        ),
        TypeTag::SortedSet | TypeTag::Geo => sweep_zset(txn, key, tag),
        TypeTag::List => sweep_list(txn, key),
        TypeTag::Stream => sweep_stream(txn, key),
        TypeTag::TimeSeries => sweep_ts(txn, key),
    })
}

fn drop_tag_if_missing(txn: &mut WriteTxn<'_>, key: &[u8], primary: &[u8]) -> Result<bool> {
    if txn.contains(primary)? {
        return Ok(false);
    }
    warn!(key = %String::from_utf8_lossy(key), "dropping tag with no primary entry");
    txn.remove(keyspace::type_tag_key(key));
    Ok(true)
}

/// Hash/set shape: entries under a prefix plus an ASCII counter.
fn sweep_counted(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    member_prefix: Vec<u8>,
    count_key: Vec<u8>,
    is_member: impl Fn(&[u8], &[u8]) -> bool,
) -> Result<bool> {
    let members = txn
        .scan_keys(&member_prefix)?
        .into_iter()
        .filter(|entry| is_member(key, entry))
        .count() as u64;
    if members == 0 {
        warn!(key = %String::from_utf8_lossy(key), "dropping empty collection tag");
        txn.remove(count_key);
        txn.remove(keyspace::type_tag_key(key));
        return Ok(true);
    }
    let stored = match txn.get(&count_key)? {
        Some(bytes) => parse_u64(&bytes).unwrap_or(0),
        None => 0,
    };
    if stored != members {
        warn!(
            key = %String::from_utf8_lossy(key),
            stored,
            actual = members,
            "repairing collection counter"
        );
        txn.insert(count_key, fmt_u64(members));
        return Ok(true);
    }
    Ok(false)
}

/// Sorted-set shape: meta.card must match the data entries, and the index
/// rows must mirror the data exactly; a disagreement rebuilds the index.
fn sweep_zset(txn: &mut WriteTxn<'_>, key: &[u8], tag: TypeTag) -> Result<bool> {
    let data = txn.scan_prefix(&keyspace::zset_data_prefix(key))?;
    if data.is_empty() {
        warn!(key = %String::from_utf8_lossy(key), "dropping empty sorted-set tag");
        for entry in txn.scan_keys(&keyspace::zset_prefix(key))? {
            txn.remove(entry);
        }
        if tag == TypeTag::Geo {
            for entry in txn.scan_keys(&keyspace::geo_prefix(key))? {
                txn.remove(entry);
            }
        }
        txn.remove(keyspace::type_tag_key(key));
        return Ok(true);
    }

    let mut meta = match txn.get(&keyspace::zset_meta_key(key))? {
        Some(bytes) => bincode::deserialize::<ZSetMeta>(&bytes).unwrap_or_default(),
        None => ZSetMeta::default(),
    };
    let mut repaired = false;

    // Expected index rows, straight from the data entries.
    let mut expected: Vec<Vec<u8>> = Vec::with_capacity(data.len());
    for (entry_key, payload) in &data {
        let member = keyspace::zset_member_from_data_key(key, entry_key)?;
        let entry = ZSetDataEntry::decode(payload)?;
        expected.push(keyspace::zset_index_key(
            key,
            &entry.score_bytes,
            member,
            entry.ver,
        ));
    }
    expected.sort();
    let actual = txn.scan_keys(&keyspace::zset_index_prefix(key))?;
    if actual != expected {
        warn!(key = %String::from_utf8_lossy(key), "rebuilding sorted-set index rows");
        for row in actual {
            txn.remove(row);
        }
        for row in &expected {
            txn.insert(row.clone(), Vec::new());
        }
        repaired = true;
    }

    let card = data.len() as i64;
    if meta.card != card {
        warn!(
            key = %String::from_utf8_lossy(key),
            stored = meta.card,
            actual = card,
            "repairing sorted-set cardinality"
        );
        meta.card = card;
        txn.insert(keyspace::zset_meta_key(key), bincode::serialize(&meta)?);
        repaired = true;
    }
    Ok(repaired)
}

/// List shape: length must equal the nodes reachable start→end. A broken
/// chain reclaims the whole list (its order is unrecoverable).
fn sweep_list(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<bool> {
    let length = match txn.get(&keyspace::list_length_key(key))? {
        Some(bytes) => parse_u64(&bytes).unwrap_or(0),
        None => 0,
    };
    let mut reachable = 0u64;
    let mut cursor = txn
        .get(&keyspace::list_start_key(key))?
        .filter(|v| !v.is_empty());
    let mut broken = false;
    while let Some(id) = cursor {
        if !txn.contains(&keyspace::list_node_key(key, &id))? {
            broken = true;
            break;
        }
        reachable += 1;
        if reachable > length.saturating_add(1024) {
            broken = true; // runaway chain
            break;
        }
        cursor = txn
            .get(&keyspace::list_node_next_key(key, &id))?
            .filter(|v| !v.is_empty());
    }
    if broken || reachable == 0 {
        warn!(key = %String::from_utf8_lossy(key), "reclaiming unreadable list");
        for entry in txn.scan_keys(&keyspace::list_prefix(key))? {
            txn.remove(entry);
        }
        txn.remove(keyspace::type_tag_key(key));
        return Ok(true);
    }
    if reachable != length {
        warn!(
            key = %String::from_utf8_lossy(key),
            stored = length,
            actual = reachable,
            "repairing list length"
        );
        txn.insert(keyspace::list_length_key(key), fmt_u64(reachable));
        return Ok(true);
    }
    Ok(false)
}

fn sweep_stream(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<bool> {
    let meta_bytes = txn.get(&keyspace::stream_meta_key(key))?;
    let mut meta = match meta_bytes {
        Some(bytes) => match bincode::deserialize::<StreamMeta>(&bytes) {
            Ok(meta) => meta,
            Err(_) => StreamMeta::default(),
        },
        None => {
            warn!(key = %String::from_utf8_lossy(key), "reclaiming stream without meta");
            for entry in txn.scan_keys(&keyspace::stream_prefix(key))? {
                txn.remove(entry);
            }
            txn.remove(keyspace::type_tag_key(key));
            return Ok(true);
        }
    };
    let ids: Vec<StreamId> = txn
        .scan_keys(&keyspace::stream_data_prefix(key))?
        .iter()
        .map(|entry| keyspace::stream_id_from_data_key(key, entry))
        .collect::<Result<_>>()?;
    let length = ids.len() as u64;
    let first = ids.first().copied().unwrap_or(StreamId::MIN);
    // `last` never decreases; deletes may leave it above the max live ID.
    let last = ids.last().copied().unwrap_or(StreamId::MIN).max(meta.last);
    if meta.length != length || meta.first != first || meta.last != last {
        warn!(
            key = %String::from_utf8_lossy(key),
            stored = meta.length,
            actual = length,
            "repairing stream meta"
        );
        meta.length = length;
        meta.first = first;
        meta.last = last;
        txn.insert(keyspace::stream_meta_key(key), bincode::serialize(&meta)?);
        return Ok(true);
    }
    Ok(false)
}

fn sweep_ts(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<bool> {
    let mut meta = match txn.get(&keyspace::ts_meta_key(key))? {
        Some(bytes) => bincode::deserialize::<TsMeta>(&bytes).unwrap_or_default(),
        None => TsMeta::default(),
    };
    let stamps: Vec<u64> = txn
        .scan_keys(&keyspace::ts_data_prefix(key))?
        .iter()
        .map(|entry| keyspace::ts_from_data_key(key, entry))
        .collect::<Result<_>>()?;
    let total = stamps.len() as u64;
    let first = stamps.first().copied().unwrap_or(0);
    let last = stamps.last().copied().unwrap_or(0);
    if meta.total_samples != total || meta.first != first || meta.last != last {
        warn!(
            key = %String::from_utf8_lossy(key),
            stored = meta.total_samples,
            actual = total,
            "repairing time-series meta"
        );
        meta.total_samples = total;
        meta.first = first;
        meta.last = last;
        txn.insert(keyspace::ts_meta_key(key), bincode::serialize(&meta)?);
        return Ok(true);
    }
    Ok(false)
}

/// Reclaim data entries whose owning tag is gone.
fn sweep_orphans(db: &Arc<Database>, live: &[(Vec<u8>, TypeTag)]) -> Result<usize> {
    struct Family {
        root: &'static [u8],
        /// Exact-entry family (string/json) vs prefix family.
        exact: bool,
        owned: Vec<Vec<u8>>,
    }
    let mut families = [
        Family { root: b"STRING:", exact: true, owned: Vec::new() },
        Family { root: b"HASH:", exact: false, owned: Vec::new() },
        Family { root: b"LIST:", exact: false, owned: Vec::new() },
        Family { root: b"SET:", exact: false, owned: Vec::new() },
        Family { root: b"zset:", exact: false, owned: Vec::new() },
        Family { root: b"stream:", exact: false, owned: Vec::new() },
        Family { root: b"ts:", exact: false, owned: Vec::new() },
        Family { root: b"json:", exact: true, owned: Vec::new() },
        Family { root: b"geo:", exact: false, owned: Vec::new() },
    ];
    for (key, tag) in live {
        match tag {
            TypeTag::String => families[0].owned.push(keyspace::string_key(key)),
            TypeTag::Hash => families[1].owned.push(keyspace::hash_prefix(key)),
            TypeTag::List => families[2].owned.push(keyspace::list_prefix(key)),
            TypeTag::Set => families[3].owned.push(keyspace::set_prefix(key)),
            TypeTag::SortedSet => families[4].owned.push(keyspace::zset_prefix(key)),
            TypeTag::Stream => families[5].owned.push(keyspace::stream_prefix(key)),
            TypeTag::TimeSeries => families[6].owned.push(keyspace::ts_prefix(key)),
            TypeTag::Json => families[7].owned.push(keyspace::json_key(key)),
            TypeTag::Geo => {
                families[4].owned.push(keyspace::zset_prefix(key));
                families[8].owned.push(keyspace::geo_prefix(key));
            }
        }
    }
    let mut orphans: Vec<Vec<u8>> = Vec::new();
    db.substrate().view(|view| {
        for family in &mut families {
            family.owned.sort();
            for entry_key in view.scan_keys(family.root)? {
                let covered = if family.exact {
                    family.owned.binary_search(&entry_key).is_ok()
                } else {
                    // The greatest owned prefix <= entry is the only
                    // possible cover.
                    let idx = family.owned.partition_point(|p| p.as_slice() <= &entry_key[..]);
                    idx > 0 && entry_key.starts_with(&family.owned[idx - 1])
                };
                if !covered {
                    orphans.push(entry_key);
                }
            }
        }
        Ok(())
    })?;
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "reclaiming orphaned data entries");
        db.substrate().update(|txn| {
            for entry in &orphans {
                txn.remove(entry.clone());
            }
            Ok(())
        })?;
    }
    Ok(orphans.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::Hashes;
    use crate::lists::Lists;
    use crate::strings::Strings;
    use crate::zsets::SortedSets;
    use quartz_core::keyspace as ks;
    use tempfile::TempDir;

    /// Reopening runs the sweep; this helper closes and reopens a path.
    fn reopen(path: &std::path::Path) -> Arc<Database> {
        Database::open(path).unwrap()
    }

    #[test]
    fn test_orphan_tag_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path).unwrap();
            // A tag with no data behind it.
            db.substrate()
                .update(|txn| {
                    txn.insert(ks::type_tag_key(b"ghost"), b"STRING".to_vec());
                    Ok(())
                })
                .unwrap();
            db.flush().unwrap();
        }
        let db = reopen(&path);
        let tag = db
            .substrate()
            .view(|view| view.get(&ks::type_tag_key(b"ghost")))
            .unwrap();
        assert!(tag.is_none());
    }

    #[test]
    fn test_orphan_data_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path).unwrap();
            // Data with no tag.
            db.substrate()
                .update(|txn| {
                    txn.insert(ks::string_key(b"ghost"), b"value".to_vec());
                    txn.insert(ks::hash_field_key(b"gh", b"f"), b"v".to_vec());
                    Ok(())
                })
                .unwrap();
            Strings::new(db.clone()).set(b"kept", b"v").unwrap();
            db.flush().unwrap();
        }
        let db = reopen(&path);
        db.substrate()
            .view(|view| {
                assert!(view.get(&ks::string_key(b"ghost"))?.is_none());
                assert!(view.get(&ks::hash_field_key(b"gh", b"f"))?.is_none());
                assert!(view.get(&ks::string_key(b"kept"))?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_counter_self_heals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path).unwrap();
            let h = Hashes::new(db.clone());
            h.hset(b"h", &[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
                .unwrap();
            // Corrupt the counter.
            db.substrate()
                .update(|txn| {
                    txn.insert(ks::hash_count_key(b"h"), b"99".to_vec());
                    Ok(())
                })
                .unwrap();
            db.flush().unwrap();
        }
        let db = reopen(&path);
        assert_eq!(Hashes::new(db).hlen(b"h").unwrap(), 2);
    }

    #[test]
    fn test_zset_meta_self_heals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path).unwrap();
            let z = SortedSets::new(db.clone());
            z.zadd(b"z", &[(1.0, b"a".to_vec()), (2.0, b"b".to_vec())]).unwrap();
            db.substrate()
                .update(|txn| {
                    let broken = ZSetMeta { card: 42, ver: 7 };
                    txn.insert(ks::zset_meta_key(b"z"), bincode::serialize(&broken)?);
                    Ok(())
                })
                .unwrap();
            db.flush().unwrap();
        }
        let db = reopen(&path);
        let z = SortedSets::new(db);
        assert_eq!(z.zcard(b"z").unwrap(), 2);
        // Index rows still agree with data.
        assert_eq!(z.zrange(b"z", 0, -1, false).unwrap().len(), 2);
    }

    #[test]
    fn test_clean_database_survives_sweep_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path).unwrap();
            Strings::new(db.clone()).set(b"s", b"v").unwrap();
            Lists::new(db.clone())
                .rpush(b"l", &[b"a".to_vec(), b"b".to_vec()])
                .unwrap();
            db.flush().unwrap();
        }
        let db = reopen(&path);
        assert_eq!(Strings::new(db.clone()).get(b"s").unwrap(), Some(b"v".to_vec()));
        let l = Lists::new(db);
        assert_eq!(l.llen(b"l").unwrap(), 2);
        assert_eq!(
            l.lrange(b"l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }
}
