//! Time-series operations.
//!
//! Append-only `(ms, f64)` points keyed by a zero-padded decimal
//! timestamp, plus a meta entry carrying sample count, first/last bracket,
//! the retention window and the duplicate policy. TS.ADD trims anything
//! older than `last - retention` in the same transaction.

use crate::database::Database;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::time::now_ms;
use quartz_core::types::{decode_ts_point, encode_ts_point, DuplicatePolicy, TsMeta, TypeTag};
use quartz_substrate::WriteTxn;
use std::sync::Arc;

/// Time-series operations facade.
#[derive(Clone)]
pub struct TimeSeries {
    db: Arc<Database>,
}

impl TimeSeries {
    pub fn new(db: Arc<Database>) -> TimeSeries {
        TimeSeries { db }
    }

    /// TS.CREATE: errors if the series already exists.
    pub fn create(
        &self,
        key: &[u8],
        retention_ms: u64,
        duplicate_policy: DuplicatePolicy,
    ) -> Result<()> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if Database::expect_type_txn(txn, key, TypeTag::TimeSeries)? {
                    return Err(Error::invalid_argument("key already exists"));
                }
                let meta = TsMeta {
                    retention_ms,
                    duplicate_policy,
                    ..TsMeta::default()
                };
                txn.insert(keyspace::ts_meta_key(key), bincode::serialize(&meta)?);
                Database::write_tag(txn, key, TypeTag::TimeSeries);
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }

    /// TS.ADD: `ts = None` stamps the current time. Returns the stored
    /// timestamp. Creates the series with defaults when absent.
    pub fn add(&self, key: &[u8], ts: Option<u64>, value: f64) -> Result<u64> {
        if value.is_nan() {
            return Err(Error::parse("value is not a valid float"));
        }
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let exists = Database::expect_type_txn(txn, key, TypeTag::TimeSeries)?;
                let mut meta = if exists {
                    read_meta(txn, key)?
                } else {
                    TsMeta::default()
                };
                let ts = ts.unwrap_or_else(now_ms);
                let data_key = keyspace::ts_data_key(key, ts);
                if txn.contains(&data_key)? {
                    match meta.duplicate_policy {
                        DuplicatePolicy::Block => {
                            return Err(Error::invalid_argument(
                                "duplicate timestamp for this series",
                            ))
                        }
                        DuplicatePolicy::Skip => return Ok(ts),
                        DuplicatePolicy::Update => {
                            txn.insert(data_key, encode_ts_point(ts, value).to_vec());
                            write_meta(txn, key, &meta)?;
                            return Ok(ts);
                        }
                    }
                }
                txn.insert(data_key, encode_ts_point(ts, value).to_vec());
                meta.total_samples += 1;
                if meta.total_samples == 1 {
                    meta.first = ts;
                    meta.last = ts;
                } else {
                    meta.first = meta.first.min(ts);
                    meta.last = meta.last.max(ts);
                }
                if meta.retention_ms > 0 {
                    apply_retention(txn, key, &mut meta)?;
                }
                write_meta(txn, key, &meta)?;
                Database::ensure_tag(txn, key, TypeTag::TimeSeries)?;
                Ok(ts)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// TS.GET: the newest sample.
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, f64)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::TimeSeries)? {
                return Ok(None);
            }
            let meta = read_meta_view(view, key)?;
            if meta.total_samples == 0 {
                return Ok(None);
            }
            match view.get(&keyspace::ts_data_key(key, meta.last))? {
                Some(bytes) => Ok(Some(decode_ts_point(&bytes)?)),
                None => Ok(None),
            }
        })
    }

    /// TS.RANGE over `[from, to]`, optionally capped by COUNT.
    pub fn range(
        &self,
        key: &[u8],
        from: u64,
        to: u64,
        count: Option<u64>,
    ) -> Result<Vec<(u64, f64)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::TimeSeries)? {
                return Ok(Vec::new());
            }
            let mut out = Vec::new();
            for (entry_key, payload) in view.scan_prefix(&keyspace::ts_data_prefix(key))? {
                let ts = keyspace::ts_from_data_key(key, &entry_key)?;
                if ts < from || ts > to {
                    continue;
                }
                out.push(decode_ts_point(&payload)?);
                if let Some(count) = count {
                    if out.len() as u64 >= count {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    /// TS.MGET over several series: the newest sample of each.
    pub fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<(Vec<u8>, Option<(u64, f64)>)>> {
        keys.iter()
            .map(|key| Ok((key.clone(), self.get(key)?)))
            .collect()
    }

    /// TS.DEL over `[from, to]`: returns the number of samples removed.
    pub fn del(&self, key: &[u8], from: u64, to: u64) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::TimeSeries)? {
                    return Ok(0);
                }
                let mut meta = read_meta(txn, key)?;
                let mut removed = 0u64;
                let mut remaining: Vec<u64> = Vec::new();
                for entry_key in txn.scan_keys(&keyspace::ts_data_prefix(key))? {
                    let ts = keyspace::ts_from_data_key(key, &entry_key)?;
                    if ts >= from && ts <= to {
                        txn.remove(entry_key);
                        removed += 1;
                    } else {
                        remaining.push(ts);
                    }
                }
                if removed > 0 {
                    meta.total_samples = remaining.len() as u64;
                    meta.first = remaining.first().copied().unwrap_or(0);
                    meta.last = remaining.last().copied().unwrap_or(0);
                    write_meta(txn, key, &meta)?;
                }
                Ok(removed)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// TS.INFO.
    pub fn info(&self, key: &[u8]) -> Result<TsMeta> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::TimeSeries)? {
                return Err(Error::not_found(String::from_utf8_lossy(key)));
            }
            read_meta_view(view, key)
        })
    }

    /// TS.LEN.
    pub fn len(&self, key: &[u8]) -> Result<u64> {
        Ok(match self.info(key) {
            Ok(meta) => meta.total_samples,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        })
    }
}

fn read_meta(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<TsMeta> {
    match txn.get(&keyspace::ts_meta_key(key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(TsMeta::default()),
    }
}

fn read_meta_view(view: &quartz_substrate::ReadView<'_>, key: &[u8]) -> Result<TsMeta> {
    match view.get(&keyspace::ts_meta_key(key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(TsMeta::default()),
    }
}

fn write_meta(txn: &mut WriteTxn<'_>, key: &[u8], meta: &TsMeta) -> Result<()> {
    txn.insert(keyspace::ts_meta_key(key), bincode::serialize(meta)?);
    Ok(())
}

/// Drop samples older than `last - retention`.
fn apply_retention(txn: &mut WriteTxn<'_>, key: &[u8], meta: &mut TsMeta) -> Result<()> {
    let threshold = meta.last.saturating_sub(meta.retention_ms);
    let prefix = keyspace::ts_data_prefix(key);
    let hi = keyspace::ts_data_key(key, threshold);
    let mut removed = 0u64;
    for (entry_key, _) in txn.scan_range(&prefix, &hi)? {
        txn.remove(entry_key);
        removed += 1;
    }
    if removed > 0 {
        meta.total_samples = meta.total_samples.saturating_sub(removed);
        meta.first = threshold;
        // Tighten first to the oldest surviving sample when one exists.
        if let Some(entry_key) = txn.scan_keys(&prefix)?.into_iter().next() {
            meta.first = keyspace::ts_from_data_key(key, &entry_key)?;
        }
    }
    Ok(())
}
