//! Stream operations.
//!
//! Entries are keyed by `(ms, seq)` IDs in fixed-width big-endian form, so
//! forward prefix iteration is ID order and the meta's `first ≤ last`
//! bracket is maintained by every mutation. `last` is the largest ID ever
//! assigned — XDEL never lowers it, which is what keeps new IDs strictly
//! monotonic.
//!
//! Consumer groups persist a last-delivered ID plus a pending map
//! (id → owner, delivery count, last delivery time). XREADGROUP with `>`
//! delivers and records; XACK removes; XCLAIM/XAUTOCLAIM transfer
//! ownership subject to a minimum idle time.
//!
//! Blocking XREAD registers a wakeup channel before its first scan; XADD
//! notifies after commit, so a woken reader always observes the entry on
//! its re-scan.

use crate::database::Database;
use crate::notify;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::time::now_ms;
use quartz_core::types::{PendingEntry, PendingMap, StreamGroup, StreamId, StreamMeta, TypeTag};
use quartz_substrate::WriteTxn;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One stream entry as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: BTreeMap<String, String>,
}

/// ID argument of XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XAddId {
    /// `*`: pick `now_ms`, bumping the sequence within one millisecond.
    Auto,
    /// Explicit ID; must be strictly greater than the stream's `last`.
    Explicit(StreamId),
}

/// XINFO STREAM reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub length: u64,
    pub first: StreamId,
    pub last: StreamId,
    pub groups: u64,
}

/// Where XREADGROUP starts for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRead {
    /// `>`: entries never delivered to this group.
    New,
    /// Re-deliver this consumer's pending entries after the given ID.
    History(StreamId),
}

/// Stream operations facade.
#[derive(Clone)]
pub struct Streams {
    db: Arc<Database>,
}

impl Streams {
    pub fn new(db: Arc<Database>) -> Streams {
        Streams { db }
    }

    // =========================================================================
    // XADD / XDEL / XTRIM
    // =========================================================================

    /// XADD: append one entry, optionally trimming to `maxlen`.
    pub fn xadd(
        &self,
        key: &[u8],
        id: XAddId,
        fields: &[(Vec<u8>, Vec<u8>)],
        maxlen: Option<u64>,
    ) -> Result<StreamId> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let exists = Database::expect_type_txn(txn, key, TypeTag::Stream)?;
                let mut meta = if exists {
                    read_meta(txn, key)?
                } else {
                    StreamMeta::default()
                };
                let assigned = match id {
                    XAddId::Auto => {
                        let ms = now_ms();
                        if meta.length == 0 && meta.last == StreamId::MIN {
                            StreamId::new(ms, 0)
                        } else if ms <= meta.last.ms {
                            // Clock went backwards (or same ms): stay monotonic.
                            StreamId::new(meta.last.ms, meta.last.seq + 1)
                        } else {
                            StreamId::new(ms, 0)
                        }
                    }
                    XAddId::Explicit(id) => {
                        if id == StreamId::MIN {
                            return Err(Error::invalid_argument(
                                "The ID specified in XADD must be greater than 0-0",
                            ));
                        }
                        if id <= meta.last {
                            return Err(Error::invalid_argument(
                                "The ID specified in XADD is equal or smaller than the target stream top item",
                            ));
                        }
                        id
                    }
                };
                let map: BTreeMap<String, String> = fields
                    .iter()
                    .map(|(f, v)| {
                        (
                            String::from_utf8_lossy(f).into_owned(),
                            String::from_utf8_lossy(v).into_owned(),
                        )
                    })
                    .collect();
                txn.insert(
                    keyspace::stream_data_key(key, assigned),
                    serde_json::to_vec(&map).map_err(Error::from)?,
                );
                if meta.length == 0 {
                    meta.first = assigned;
                }
                meta.last = assigned;
                meta.length += 1;
                if let Some(maxlen) = maxlen {
                    trim_in_txn(txn, key, &mut meta, maxlen)?;
                }
                write_meta(txn, key, &meta)?;
                Database::ensure_tag(txn, key, TypeTag::Stream)?;
                Ok(assigned)
            })
        });
        self.db.invalidate(key);
        let assigned = result?;
        self.db.notifier().notify(&Database::stream_notify_key(key));
        Ok(assigned)
    }

    /// XDEL: returns the number of entries actually deleted.
    pub fn xdel(&self, key: &[u8], ids: &[StreamId]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Stream)? {
                    return Ok(0);
                }
                let mut meta = read_meta(txn, key)?;
                let mut deleted = 0u64;
                let mut first_deleted = false;
                for id in ids {
                    let data_key = keyspace::stream_data_key(key, *id);
                    if txn.contains(&data_key)? {
                        txn.remove(data_key);
                        deleted += 1;
                        if *id == meta.first {
                            first_deleted = true;
                        }
                    }
                }
                if deleted > 0 {
                    meta.length = meta.length.saturating_sub(deleted);
                    if meta.length == 0 {
                        meta.first = StreamId::MIN;
                    } else if first_deleted {
                        // Scan forward for the next live ID.
                        let prefix = keyspace::stream_data_prefix(key);
                        if let Some((entry_key, _)) =
                            txn.scan_prefix(&prefix)?.into_iter().next()
                        {
                            meta.first = keyspace::stream_id_from_data_key(key, &entry_key)?;
                        }
                    }
                    write_meta(txn, key, &meta)?;
                }
                Ok(deleted)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XTRIM to MAXLEN: returns the number of entries removed.
    pub fn xtrim(&self, key: &[u8], maxlen: u64) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Stream)? {
                    return Ok(0);
                }
                let mut meta = read_meta(txn, key)?;
                let removed = trim_in_txn(txn, key, &mut meta, maxlen)?;
                if removed > 0 {
                    write_meta(txn, key, &meta)?;
                }
                Ok(removed)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn xlen(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Ok(0);
            }
            Ok(read_meta_view(view, key)?.length)
        })
    }

    /// Largest ID ever assigned (`$` resolution for XREAD).
    pub fn last_id(&self, key: &[u8]) -> Result<StreamId> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Ok(StreamId::MIN);
            }
            Ok(read_meta_view(view, key)?.last)
        })
    }

    /// XRANGE / XREVRANGE over inclusive ID bounds.
    pub fn xrange(
        &self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: Option<u64>,
        rev: bool,
    ) -> Result<Vec<StreamEntry>> {
        let mut entries = self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Ok(Vec::new());
            }
            let prefix = keyspace::stream_data_prefix(key);
            let mut lo = prefix.clone();
            lo.extend_from_slice(&start.to_key_suffix());
            let mut hi = prefix.clone();
            hi.extend_from_slice(&end.to_key_suffix());
            hi.push(0x00); // make the inclusive end bound exclusive
            let mut out = Vec::new();
            for (entry_key, payload) in view.scan_range(&lo, &hi)? {
                let id = keyspace::stream_id_from_data_key(key, &entry_key)?;
                out.push(decode_entry(id, &payload)?);
            }
            Ok(out)
        })?;
        if rev {
            entries.reverse();
        }
        if let Some(count) = count {
            entries.truncate(count as usize);
        }
        Ok(entries)
    }

    /// XREAD: entries strictly after each spec's ID; blocks when
    /// `block_ms` is set and the immediate scan is empty. `BLOCK 0` waits
    /// indefinitely.
    pub fn xread(
        &self,
        specs: &[(Vec<u8>, StreamId)],
        count: Option<u64>,
        block_ms: Option<u64>,
    ) -> Result<Vec<(Vec<u8>, Vec<StreamEntry>)>> {
        let poll = || -> Result<Option<Vec<(Vec<u8>, Vec<StreamEntry>)>>> {
            let mut out = Vec::new();
            for (key, after) in specs {
                let entries = self.xrange(key, after.next(), StreamId::MAX, count, false)?;
                if !entries.is_empty() {
                    out.push((key.clone(), entries));
                }
            }
            Ok(if out.is_empty() { None } else { Some(out) })
        };
        match block_ms {
            None => Ok(poll()?.unwrap_or_default()),
            Some(timeout_ms) => {
                let notify_keys: Vec<Vec<u8>> = specs
                    .iter()
                    .map(|(k, _)| Database::stream_notify_key(k))
                    .collect();
                Ok(
                    notify::block_on(self.db.notifier(), &notify_keys, timeout_ms, poll)?
                        .unwrap_or_default(),
                )
            }
        }
    }

    pub fn xinfo_stream(&self, key: &[u8]) -> Result<StreamInfo> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Err(Error::not_found(String::from_utf8_lossy(key)));
            }
            let meta = read_meta_view(view, key)?;
            let groups = view.scan_keys(&keyspace::stream_groups_prefix(key))?.len() as u64;
            Ok(StreamInfo {
                length: meta.length,
                first: meta.first,
                last: meta.last,
                groups,
            })
        })
    }

    /// XINFO GROUPS: `(name, consumers, pending, last_delivered)` per group.
    pub fn xinfo_groups(&self, key: &[u8]) -> Result<Vec<(String, u64, u64, StreamId)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Err(Error::not_found(String::from_utf8_lossy(key)));
            }
            let prefix = keyspace::stream_groups_prefix(key);
            let mut out = Vec::new();
            for (entry_key, payload) in view.scan_prefix(&prefix)? {
                let name = String::from_utf8_lossy(&entry_key[prefix.len()..]).into_owned();
                let group: StreamGroup = bincode::deserialize(&payload)?;
                let pending: PendingMap = match view
                    .get(&keyspace::stream_pending_key(key, name.as_bytes()))?
                {
                    Some(bytes) => bincode::deserialize(&bytes)?,
                    None => PendingMap::new(),
                };
                out.push((
                    name,
                    group.consumers.len() as u64,
                    pending.len() as u64,
                    group.last_delivered,
                ));
            }
            Ok(out)
        })
    }

    // =========================================================================
    // Consumer groups
    // =========================================================================

    /// XGROUP CREATE; `start = None` means `$` (deliver only new entries).
    pub fn xgroup_create(&self, key: &[u8], group: &[u8], start: Option<StreamId>) -> Result<()> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Stream)? {
                    return Err(Error::not_found(String::from_utf8_lossy(key)));
                }
                let group_key = keyspace::stream_group_key(key, group);
                if txn.contains(&group_key)? {
                    return Err(Error::invalid_argument(
                        "BUSYGROUP Consumer Group name already exists",
                    ));
                }
                let meta = read_meta(txn, key)?;
                let record = StreamGroup {
                    last_delivered: start.unwrap_or(meta.last),
                    consumers: Vec::new(),
                };
                txn.insert(group_key, bincode::serialize(&record)?);
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XGROUP DESTROY: returns whether the group existed.
    pub fn xgroup_destroy(&self, key: &[u8], group: &[u8]) -> Result<bool> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Stream)? {
                    return Ok(false);
                }
                let group_key = keyspace::stream_group_key(key, group);
                if !txn.contains(&group_key)? {
                    return Ok(false);
                }
                txn.remove(group_key);
                txn.remove(keyspace::stream_pending_key(key, group));
                Ok(true)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XGROUP SETID; `id = None` means `$`.
    pub fn xgroup_setid(&self, key: &[u8], group: &[u8], id: Option<StreamId>) -> Result<()> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let meta = read_meta(txn, key)?;
                let mut record = read_group(txn, key, group)?;
                record.last_delivered = id.unwrap_or(meta.last);
                txn.insert(
                    keyspace::stream_group_key(key, group),
                    bincode::serialize(&record)?,
                );
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XGROUP DELCONSUMER: returns the number of pending entries dropped.
    pub fn xgroup_delconsumer(&self, key: &[u8], group: &[u8], consumer: &str) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let mut record = read_group(txn, key, group)?;
                record.consumers.retain(|c| c != consumer);
                let mut pending = read_pending(txn, key, group)?;
                let before = pending.len();
                pending.retain(|_, e| e.consumer != consumer);
                let dropped = (before - pending.len()) as u64;
                txn.insert(
                    keyspace::stream_group_key(key, group),
                    bincode::serialize(&record)?,
                );
                write_pending(txn, key, group, &pending)?;
                Ok(dropped)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XREADGROUP: `>` delivers never-delivered entries and records them
    /// pending (unless `noack`); an explicit ID re-reads this consumer's
    /// pending history after that ID.
    pub fn xreadgroup(
        &self,
        group: &[u8],
        consumer: &str,
        specs: &[(Vec<u8>, GroupRead)],
        count: Option<u64>,
        noack: bool,
        block_ms: Option<u64>,
    ) -> Result<Vec<(Vec<u8>, Vec<StreamEntry>)>> {
        let poll = || -> Result<Option<Vec<(Vec<u8>, Vec<StreamEntry>)>>> {
            let mut out = Vec::new();
            for (key, read) in specs {
                let entries = match read {
                    GroupRead::New => self.deliver_new(key, group, consumer, count, noack)?,
                    GroupRead::History(after) => {
                        self.read_history(key, group, consumer, *after, count)?
                    }
                };
                if !entries.is_empty() {
                    out.push((key.clone(), entries));
                }
            }
            Ok(if out.is_empty() { None } else { Some(out) })
        };
        let wants_new = specs.iter().any(|(_, r)| matches!(r, GroupRead::New));
        match block_ms {
            Some(timeout_ms) if wants_new => {
                let notify_keys: Vec<Vec<u8>> = specs
                    .iter()
                    .map(|(k, _)| Database::stream_notify_key(k))
                    .collect();
                Ok(
                    notify::block_on(self.db.notifier(), &notify_keys, timeout_ms, poll)?
                        .unwrap_or_default(),
                )
            }
            _ => Ok(poll()?.unwrap_or_default()),
        }
    }

    /// XACK: returns the number of entries removed from pending.
    pub fn xack(&self, key: &[u8], group: &[u8], ids: &[StreamId]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Stream)? {
                    return Ok(0);
                }
                if !txn.contains(&keyspace::stream_group_key(key, group))? {
                    return Ok(0);
                }
                let mut pending = read_pending(txn, key, group)?;
                let mut acked = 0u64;
                for id in ids {
                    if pending.remove(id).is_some() {
                        acked += 1;
                    }
                }
                if acked > 0 {
                    write_pending(txn, key, group, &pending)?;
                }
                Ok(acked)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XPENDING summary: `(count, min, max, per-consumer counts)`.
    pub fn xpending_summary(
        &self,
        key: &[u8],
        group: &[u8],
    ) -> Result<(u64, Option<StreamId>, Option<StreamId>, Vec<(String, u64)>)> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Stream)? {
                return Err(Error::not_found(String::from_utf8_lossy(key)));
            }
            let pending: PendingMap =
                match view.get(&keyspace::stream_pending_key(key, group))? {
                    Some(bytes) => bincode::deserialize(&bytes)?,
                    None => PendingMap::new(),
                };
            let mut per_consumer: BTreeMap<String, u64> = BTreeMap::new();
            for entry in pending.values() {
                *per_consumer.entry(entry.consumer.clone()).or_default() += 1;
            }
            Ok((
                pending.len() as u64,
                pending.keys().next().copied(),
                pending.keys().next_back().copied(),
                per_consumer.into_iter().collect(),
            ))
        })
    }

    /// XPENDING detail rows: `(id, consumer, idle_ms, delivery_count)`.
    pub fn xpending_detail(
        &self,
        key: &[u8],
        group: &[u8],
        start: StreamId,
        end: StreamId,
        count: u64,
        consumer: Option<&str>,
    ) -> Result<Vec<(StreamId, String, u64, u64)>> {
        self.db.substrate().view(|view| {
            let pending: PendingMap =
                match view.get(&keyspace::stream_pending_key(key, group))? {
                    Some(bytes) => bincode::deserialize(&bytes)?,
                    None => PendingMap::new(),
                };
            let now = now_ms();
            Ok(pending
                .range(start..=end)
                .filter(|(_, e)| consumer.map(|c| e.consumer == c).unwrap_or(true))
                .take(count as usize)
                .map(|(id, e)| {
                    (
                        *id,
                        e.consumer.clone(),
                        now.saturating_sub(e.last_delivery_ms),
                        e.delivery_count,
                    )
                })
                .collect())
        })
    }

    /// XCLAIM: transfer ownership of idle pending entries.
    pub fn xclaim(
        &self,
        key: &[u8],
        group: &[u8],
        consumer: &str,
        min_idle_ms: u64,
        ids: &[StreamId],
    ) -> Result<Vec<StreamEntry>> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let mut record = read_group(txn, key, group)?;
                let mut pending = read_pending(txn, key, group)?;
                let now = now_ms();
                let mut claimed = Vec::new();
                for id in ids {
                    let entry = match pending.get(id) {
                        Some(e) => e.clone(),
                        None => continue,
                    };
                    if now.saturating_sub(entry.last_delivery_ms) < min_idle_ms {
                        continue;
                    }
                    match txn.get(&keyspace::stream_data_key(key, *id))? {
                        Some(payload) => {
                            pending.insert(
                                *id,
                                PendingEntry {
                                    consumer: consumer.to_string(),
                                    delivery_count: entry.delivery_count + 1,
                                    last_delivery_ms: now,
                                },
                            );
                            claimed.push(decode_entry(*id, &payload)?);
                        }
                        None => {
                            // The message is gone; drop its pending row.
                            pending.remove(id);
                        }
                    }
                }
                if !record.consumers.iter().any(|c| c == consumer) {
                    record.consumers.push(consumer.to_string());
                    txn.insert(
                        keyspace::stream_group_key(key, group),
                        bincode::serialize(&record)?,
                    );
                }
                write_pending(txn, key, group, &pending)?;
                Ok(claimed)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// XAUTOCLAIM: scan pending from `start`, claiming up to `count` idle
    /// entries; returns the next cursor (`0-0` when the scan wrapped).
    pub fn xautoclaim(
        &self,
        key: &[u8],
        group: &[u8],
        consumer: &str,
        min_idle_ms: u64,
        start: StreamId,
        count: u64,
    ) -> Result<(StreamId, Vec<StreamEntry>)> {
        let candidates: Vec<StreamId> = self.db.substrate().view(|view| {
            let pending: PendingMap =
                match view.get(&keyspace::stream_pending_key(key, group))? {
                    Some(bytes) => bincode::deserialize(&bytes)?,
                    None => PendingMap::new(),
                };
            let now = now_ms();
            Ok(pending
                .range(start..)
                .filter(|(_, e)| now.saturating_sub(e.last_delivery_ms) >= min_idle_ms)
                .map(|(id, _)| *id)
                .collect())
        })?;
        let take = count.max(1) as usize;
        let batch: Vec<StreamId> = candidates.iter().copied().take(take).collect();
        let next = if candidates.len() > take {
            candidates[take]
        } else {
            StreamId::MIN
        };
        let claimed = self.xclaim(key, group, consumer, min_idle_ms, &batch)?;
        Ok((next, claimed))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Deliver never-delivered entries to a group consumer.
    fn deliver_new(
        &self,
        key: &[u8],
        group: &[u8],
        consumer: &str,
        count: Option<u64>,
        noack: bool,
    ) -> Result<Vec<StreamEntry>> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let mut record = read_group(txn, key, group)?;
                let prefix = keyspace::stream_data_prefix(key);
                let mut lo = prefix.clone();
                lo.extend_from_slice(&record.last_delivered.next().to_key_suffix());
                let mut hi = prefix.clone();
                hi.extend_from_slice(&[0xFF; 17]);
                let mut entries = Vec::new();
                for (entry_key, payload) in txn.scan_range(&lo, &hi)? {
                    let id = keyspace::stream_id_from_data_key(key, &entry_key)?;
                    entries.push(decode_entry(id, &payload)?);
                    if let Some(count) = count {
                        if entries.len() as u64 >= count {
                            break;
                        }
                    }
                }
                if entries.is_empty() {
                    return Ok(entries);
                }
                record.last_delivered = entries.last().unwrap().id;
                if !record.consumers.iter().any(|c| c == consumer) {
                    record.consumers.push(consumer.to_string());
                }
                txn.insert(
                    keyspace::stream_group_key(key, group),
                    bincode::serialize(&record)?,
                );
                if !noack {
                    let mut pending = read_pending(txn, key, group)?;
                    let now = now_ms();
                    for entry in &entries {
                        let delivery_count = pending
                            .get(&entry.id)
                            .map(|e| e.delivery_count + 1)
                            .unwrap_or(1);
                        pending.insert(
                            entry.id,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                delivery_count,
                                last_delivery_ms: now,
                            },
                        );
                    }
                    write_pending(txn, key, group, &pending)?;
                }
                Ok(entries)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// Re-read a consumer's own pending entries after `after`.
    fn read_history(
        &self,
        key: &[u8],
        group: &[u8],
        consumer: &str,
        after: StreamId,
        count: Option<u64>,
    ) -> Result<Vec<StreamEntry>> {
        self.db.substrate().view(|view| {
            if view.get(&keyspace::stream_group_key(key, group))?.is_none() {
                return Err(Error::invalid_argument(format!(
                    "NOGROUP No such consumer group '{}' for key name '{}'",
                    String::from_utf8_lossy(group),
                    String::from_utf8_lossy(key)
                )));
            }
            let pending: PendingMap =
                match view.get(&keyspace::stream_pending_key(key, group))? {
                    Some(bytes) => bincode::deserialize(&bytes)?,
                    None => PendingMap::new(),
                };
            let mut out = Vec::new();
            for (id, entry) in pending.range(after.next()..) {
                if entry.consumer != consumer {
                    continue;
                }
                let fields = match view.get(&keyspace::stream_data_key(key, *id))? {
                    Some(payload) => decode_entry(*id, &payload)?.fields,
                    None => BTreeMap::new(),
                };
                out.push(StreamEntry { id: *id, fields });
                if let Some(count) = count {
                    if out.len() as u64 >= count {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }
}

// =============================================================================
// Entry and metadata codecs
// =============================================================================

fn decode_entry(id: StreamId, payload: &[u8]) -> Result<StreamEntry> {
    let fields: BTreeMap<String, String> = serde_json::from_slice(payload)
        .map_err(|e| Error::corruption(format!("stream entry decode failed: {}", e)))?;
    Ok(StreamEntry { id, fields })
}

fn read_meta(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<StreamMeta> {
    match txn.get(&keyspace::stream_meta_key(key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(StreamMeta::default()),
    }
}

fn read_meta_view(view: &quartz_substrate::ReadView<'_>, key: &[u8]) -> Result<StreamMeta> {
    match view.get(&keyspace::stream_meta_key(key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(StreamMeta::default()),
    }
}

fn write_meta(txn: &mut WriteTxn<'_>, key: &[u8], meta: &StreamMeta) -> Result<()> {
    txn.insert(keyspace::stream_meta_key(key), bincode::serialize(meta)?);
    Ok(())
}

fn read_group(txn: &mut WriteTxn<'_>, key: &[u8], group: &[u8]) -> Result<StreamGroup> {
    match txn.get(&keyspace::stream_group_key(key, group))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Err(Error::invalid_argument(format!(
            "NOGROUP No such consumer group '{}' for key name '{}'",
            String::from_utf8_lossy(group),
            String::from_utf8_lossy(key)
        ))),
    }
}

fn read_pending(txn: &mut WriteTxn<'_>, key: &[u8], group: &[u8]) -> Result<PendingMap> {
    match txn.get(&keyspace::stream_pending_key(key, group))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(PendingMap::new()),
    }
}

fn write_pending(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    group: &[u8],
    pending: &PendingMap,
) -> Result<()> {
    if pending.is_empty() {
        txn.remove(keyspace::stream_pending_key(key, group));
    } else {
        txn.insert(
            keyspace::stream_pending_key(key, group),
            bincode::serialize(pending)?,
        );
    }
    Ok(())
}

/// Delete lowest-ID entries until `length <= maxlen`.
fn trim_in_txn(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    meta: &mut StreamMeta,
    maxlen: u64,
) -> Result<u64> {
    if meta.length <= maxlen {
        return Ok(0);
    }
    let excess = meta.length - maxlen;
    let prefix = keyspace::stream_data_prefix(key);
    let mut removed = 0u64;
    let mut new_first = meta.first;
    for (entry_key, _) in txn.scan_prefix(&prefix)? {
        let id = keyspace::stream_id_from_data_key(key, &entry_key)?;
        if removed < excess {
            txn.remove(entry_key);
            removed += 1;
        } else {
            new_first = id;
            break;
        }
    }
    meta.length -= removed;
    meta.first = if meta.length == 0 {
        StreamId::MIN
    } else {
        new_first
    };
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn streams() -> (TempDir, Streams) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Streams::new(db))
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
        pairs
            .iter()
            .map(|(f, v)| (f.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_xadd_auto_ids_are_monotonic() {
        let (_dir, s) = streams();
        let a = s.xadd(b"st", XAddId::Auto, &fields(&[("k", "1")]), None).unwrap();
        let b = s.xadd(b"st", XAddId::Auto, &fields(&[("k", "2")]), None).unwrap();
        let c = s.xadd(b"st", XAddId::Auto, &fields(&[("k", "3")]), None).unwrap();
        assert!(a < b && b < c);
        assert_eq!(s.xlen(b"st").unwrap(), 3);
    }

    #[test]
    fn test_xadd_explicit_must_exceed_last() {
        let (_dir, s) = streams();
        s.xadd(
            b"st",
            XAddId::Explicit(StreamId::new(5, 1)),
            &fields(&[("k", "v")]),
            None,
        )
        .unwrap();
        assert!(s
            .xadd(
                b"st",
                XAddId::Explicit(StreamId::new(5, 1)),
                &fields(&[("k", "v")]),
                None
            )
            .is_err());
        assert!(s
            .xadd(
                b"st",
                XAddId::Explicit(StreamId::new(4, 9)),
                &fields(&[("k", "v")]),
                None
            )
            .is_err());
        s.xadd(
            b"st",
            XAddId::Explicit(StreamId::new(5, 2)),
            &fields(&[("k", "v")]),
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_xrange_bounds_and_rev() {
        let (_dir, s) = streams();
        for i in 1..=5u64 {
            s.xadd(
                b"st",
                XAddId::Explicit(StreamId::new(i, 0)),
                &fields(&[("n", &i.to_string())]),
                None,
            )
            .unwrap();
        }
        let all = s
            .xrange(b"st", StreamId::MIN, StreamId::MAX, None, false)
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].id, StreamId::new(1, 0));
        let mid = s
            .xrange(b"st", StreamId::new(2, 0), StreamId::new(4, 0), None, false)
            .unwrap();
        assert_eq!(mid.len(), 3);
        let rev = s
            .xrange(b"st", StreamId::MIN, StreamId::MAX, Some(2), true)
            .unwrap();
        assert_eq!(rev[0].id, StreamId::new(5, 0));
        assert_eq!(rev.len(), 2);
    }

    #[test]
    fn test_xdel_advances_first() {
        let (_dir, s) = streams();
        for i in 1..=3u64 {
            s.xadd(
                b"st",
                XAddId::Explicit(StreamId::new(i, 0)),
                &fields(&[("n", "x")]),
                None,
            )
            .unwrap();
        }
        assert_eq!(s.xdel(b"st", &[StreamId::new(1, 0)]).unwrap(), 1);
        let info = s.xinfo_stream(b"st").unwrap();
        assert_eq!(info.length, 2);
        assert_eq!(info.first, StreamId::new(2, 0));
        assert_eq!(info.last, StreamId::new(3, 0));
        // Deleting a missing ID counts zero.
        assert_eq!(s.xdel(b"st", &[StreamId::new(1, 0)]).unwrap(), 0);
    }

    #[test]
    fn test_xadd_maxlen_trims_lowest() {
        let (_dir, s) = streams();
        for i in 1..=5u64 {
            s.xadd(
                b"st",
                XAddId::Explicit(StreamId::new(i, 0)),
                &fields(&[("n", "x")]),
                Some(3),
            )
            .unwrap();
        }
        let info = s.xinfo_stream(b"st").unwrap();
        assert_eq!(info.length, 3);
        assert_eq!(info.first, StreamId::new(3, 0));
        assert_eq!(s.xtrim(b"st", 1).unwrap(), 2);
        assert_eq!(s.xlen(b"st").unwrap(), 1);
    }

    #[test]
    fn test_xread_returns_only_newer() {
        let (_dir, s) = streams();
        let first = s.xadd(b"st", XAddId::Auto, &fields(&[("a", "1")]), None).unwrap();
        s.xadd(b"st", XAddId::Auto, &fields(&[("b", "2")]), None).unwrap();
        let out = s
            .xread(&[(b"st".to_vec(), first)], None, None)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.len(), 1);
        assert_eq!(out[0].1[0].fields.get("b").unwrap(), "2");
        let empty = s
            .xread(&[(b"st".to_vec(), s.last_id(b"st").unwrap())], None, None)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_blocking_xread_woken_by_xadd() {
        let (_dir, s) = streams();
        s.xadd(b"st", XAddId::Auto, &fields(&[("seed", "0")]), None)
            .unwrap();
        let last = s.last_id(b"st").unwrap();
        let s2 = s.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            s2.xread(&[(b"st".to_vec(), last)], None, Some(2_000)).unwrap()
        });
        std::thread::sleep(Duration::from_millis(50));
        s.xadd(b"st", XAddId::Auto, &fields(&[("k", "v")]), None).unwrap();
        let out = handle.join().unwrap();
        assert_eq!(out.len(), 1);
        assert!(start.elapsed() < Duration::from_millis(2_000));
    }

    #[test]
    fn test_blocking_xread_times_out() {
        let (_dir, s) = streams();
        s.xadd(b"st", XAddId::Auto, &fields(&[("seed", "0")]), None)
            .unwrap();
        let last = s.last_id(b"st").unwrap();
        let start = Instant::now();
        let out = s
            .xread(&[(b"st".to_vec(), last)], None, Some(150))
            .unwrap();
        assert!(out.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_group_deliver_ack_cycle() {
        let (_dir, s) = streams();
        s.xadd(b"st", XAddId::Explicit(StreamId::new(1, 0)), &fields(&[("a", "1")]), None)
            .unwrap();
        s.xgroup_create(b"st", b"g", Some(StreamId::MIN)).unwrap();
        s.xadd(b"st", XAddId::Explicit(StreamId::new(2, 0)), &fields(&[("b", "2")]), None)
            .unwrap();

        let out = s
            .xreadgroup(
                b"g",
                "c1",
                &[(b"st".to_vec(), GroupRead::New)],
                None,
                false,
                None,
            )
            .unwrap();
        assert_eq!(out[0].1.len(), 2);

        let (count, min, max, consumers) = s.xpending_summary(b"st", b"g").unwrap();
        assert_eq!(count, 2);
        assert_eq!(min, Some(StreamId::new(1, 0)));
        assert_eq!(max, Some(StreamId::new(2, 0)));
        assert_eq!(consumers, vec![("c1".to_string(), 2)]);

        assert_eq!(s.xack(b"st", b"g", &[StreamId::new(1, 0)]).unwrap(), 1);
        let (count, ..) = s.xpending_summary(b"st", b"g").unwrap();
        assert_eq!(count, 1);

        // A second consumer sees nothing new.
        let out = s
            .xreadgroup(
                b"g",
                "c2",
                &[(b"st".to_vec(), GroupRead::New)],
                None,
                false,
                None,
            )
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_group_create_requires_stream_and_rejects_duplicates() {
        let (_dir, s) = streams();
        assert!(s.xgroup_create(b"missing", b"g", None).is_err());
        s.xadd(b"st", XAddId::Auto, &fields(&[("a", "1")]), None).unwrap();
        s.xgroup_create(b"st", b"g", None).unwrap();
        assert!(s.xgroup_create(b"st", b"g", None).is_err());
        assert!(s.xgroup_destroy(b"st", b"g").unwrap());
        assert!(!s.xgroup_destroy(b"st", b"g").unwrap());
    }

    #[test]
    fn test_xclaim_transfers_idle_entries() {
        let (_dir, s) = streams();
        s.xadd(b"st", XAddId::Explicit(StreamId::new(1, 0)), &fields(&[("a", "1")]), None)
            .unwrap();
        s.xgroup_create(b"st", b"g", Some(StreamId::MIN)).unwrap();
        s.xreadgroup(
            b"g",
            "c1",
            &[(b"st".to_vec(), GroupRead::New)],
            None,
            false,
            None,
        )
        .unwrap();
        // min_idle 0: claimable immediately.
        let claimed = s
            .xclaim(b"st", b"g", "c2", 0, &[StreamId::new(1, 0)])
            .unwrap();
        assert_eq!(claimed.len(), 1);
        let rows = s
            .xpending_detail(b"st", b"g", StreamId::MIN, StreamId::MAX, 10, Some("c2"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].3, 2); // delivery count bumped
        // Too-recent entries are not claimable.
        let claimed = s
            .xclaim(b"st", b"g", "c3", 60_000, &[StreamId::new(1, 0)])
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[test]
    fn test_xautoclaim_scans_pending() {
        let (_dir, s) = streams();
        for i in 1..=3u64 {
            s.xadd(
                b"st",
                XAddId::Explicit(StreamId::new(i, 0)),
                &fields(&[("n", "x")]),
                None,
            )
            .unwrap();
        }
        s.xgroup_create(b"st", b"g", Some(StreamId::MIN)).unwrap();
        s.xreadgroup(
            b"g",
            "c1",
            &[(b"st".to_vec(), GroupRead::New)],
            None,
            false,
            None,
        )
        .unwrap();
        let (next, claimed) = s
            .xautoclaim(b"st", b"g", "c2", 0, StreamId::MIN, 2)
            .unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(next, StreamId::new(3, 0));
        let (next, claimed) = s.xautoclaim(b"st", b"g", "c2", 0, next, 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(next, StreamId::MIN);
    }

    #[test]
    fn test_xinfo_groups() {
        let (_dir, s) = streams();
        s.xadd(b"st", XAddId::Auto, &fields(&[("a", "1")]), None).unwrap();
        s.xgroup_create(b"st", b"g1", Some(StreamId::MIN)).unwrap();
        s.xreadgroup(
            b"g1",
            "c1",
            &[(b"st".to_vec(), GroupRead::New)],
            None,
            false,
            None,
        )
        .unwrap();
        let groups = s.xinfo_groups(b"st").unwrap();
        assert_eq!(groups.len(), 1);
        let (name, consumers, pending, _) = &groups[0];
        assert_eq!(name, "g1");
        assert_eq!(*consumers, 1);
        assert_eq!(*pending, 1);
    }
}
