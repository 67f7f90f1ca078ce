//! Sorted-set operations.
//!
//! Three entry families per key:
//!
//! - `zset:<K>:meta` — cardinality plus a version counter;
//! - `zset:<K>:data:<m>` — the member's encoded score and the version its
//!   index row was written under;
//! - `zset:<K>:index:<score8>:<m>:<ver4>` — the order-carrying row.
//!
//! The encoded score sorts lexicographically in numeric order, so every
//! range operation is a forward scan of the index prefix. An upsert knows
//! the member's old score *and* old version from the data entry, computes
//! the exact old index key, deletes it, and writes the new row under a
//! freshly incremented version — no scan-for-collision anywhere.
//!
//! All mutating ops run under the deeper sorted-set retry budget: they
//! touch meta + data + index and lose conflicts more often than the
//! single-entry types.

use crate::database::Database;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::score::{decode_score, encode_score};
use quartz_core::types::{TypeTag, ZSetDataEntry, ZSetMeta};
use quartz_substrate::WriteTxn;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A score interval endpoint (`-inf`, `+inf`, inclusive or exclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Val { score: f64, inclusive: bool },
}

impl ScoreBound {
    /// Parse the wire form: `-inf`, `+inf`, `1.5`, `(1.5`.
    pub fn parse(s: &str) -> Result<ScoreBound> {
        match s {
            "-inf" | "-INF" => Ok(ScoreBound::NegInf),
            "+inf" | "inf" | "+INF" => Ok(ScoreBound::PosInf),
            _ => {
                let (text, inclusive) = match s.strip_prefix('(') {
                    Some(rest) => (rest, false),
                    None => (s, true),
                };
                let score: f64 = text
                    .parse()
                    .map_err(|_| Error::parse("min or max is not a float"))?;
                if score.is_nan() {
                    return Err(Error::parse("min or max is not a float"));
                }
                Ok(ScoreBound::Val { score, inclusive })
            }
        }
    }

    fn accepts_below(&self, score: f64) -> bool {
        // True when `score` satisfies this bound used as a maximum.
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Val {
                score: bound,
                inclusive,
            } => {
                if inclusive {
                    score <= bound
                } else {
                    score < bound
                }
            }
        }
    }

    fn accepts_above(&self, score: f64) -> bool {
        // True when `score` satisfies this bound used as a minimum.
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Val {
                score: bound,
                inclusive,
            } => {
                if inclusive {
                    score >= bound
                } else {
                    score > bound
                }
            }
        }
    }
}

/// A lexicographic interval endpoint (`-`, `+`, `[m`, `(m`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    Min,
    Max,
    Val { member: Vec<u8>, inclusive: bool },
}

impl LexBound {
    pub fn parse(s: &[u8]) -> Result<LexBound> {
        if s == b"-" {
            return Ok(LexBound::Min);
        }
        if s == b"+" {
            return Ok(LexBound::Max);
        }
        match s.first() {
            Some(b'[') => Ok(LexBound::Val {
                member: s[1..].to_vec(),
                inclusive: true,
            }),
            Some(b'(') => Ok(LexBound::Val {
                member: s[1..].to_vec(),
                inclusive: false,
            }),
            _ => Err(Error::invalid_argument(
                "min or max not valid string range item",
            )),
        }
    }

    fn accepts_above(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Min => true,
            LexBound::Max => false,
            LexBound::Val {
                member: bound,
                inclusive,
            } => {
                if *inclusive {
                    member >= bound.as_slice()
                } else {
                    member > bound.as_slice()
                }
            }
        }
    }

    fn accepts_below(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Min => false,
            LexBound::Max => true,
            LexBound::Val {
                member: bound,
                inclusive,
            } => {
                if *inclusive {
                    member <= bound.as_slice()
                } else {
                    member < bound.as_slice()
                }
            }
        }
    }
}

/// Aggregation mode for ZUNIONSTORE/ZINTERSTORE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn parse(s: &str) -> Result<Aggregate> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" => Ok(Aggregate::Sum),
            "MIN" => Ok(Aggregate::Min),
            "MAX" => Ok(Aggregate::Max),
            other => Err(Error::invalid_argument(format!(
                "unknown AGGREGATE mode '{}'",
                other
            ))),
        }
    }

    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Sorted-set operations facade.
#[derive(Clone)]
pub struct SortedSets {
    db: Arc<Database>,
}

impl SortedSets {
    pub fn new(db: Arc<Database>) -> SortedSets {
        SortedSets { db }
    }

    // =========================================================================
    // Upserts
    // =========================================================================

    /// ZADD: returns the number of newly inserted members.
    pub fn zadd(&self, key: &[u8], pairs: &[(f64, Vec<u8>)]) -> Result<u64> {
        for (score, _) in pairs {
            if score.is_nan() {
                return Err(Error::parse("value is not a valid float"));
            }
        }
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::SortedSet)?;
                upsert_in_txn(txn, key, pairs, TypeTag::SortedSet)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// ZINCRBY: returns the member's new score.
    pub fn zincrby(&self, key: &[u8], delta: f64, member: &[u8]) -> Result<f64> {
        if delta.is_nan() {
            return Err(Error::parse("value is not a valid float"));
        }
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::SortedSet)?;
                let current = match txn.get(&keyspace::zset_data_key(key, member))? {
                    Some(bytes) => {
                        let entry = ZSetDataEntry::decode(&bytes)?;
                        decode_score(&entry.score_bytes)
                    }
                    None => 0.0,
                };
                let next = current + delta;
                if next.is_nan() {
                    return Err(Error::range("resulting score is not a number (NaN)"));
                }
                upsert_in_txn(
                    txn,
                    key,
                    &[(next, member.to_vec())],
                    TypeTag::SortedSet,
                )?;
                Ok(next)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// ZREM: returns the number of members removed.
    pub fn zrem(&self, key: &[u8], members: &[Vec<u8>]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::SortedSet)? {
                    return Ok(0);
                }
                remove_in_txn(txn, key, members)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Point reads
    // =========================================================================

    pub fn zcard(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::SortedSet)? {
                return Ok(0);
            }
            match view.get(&keyspace::zset_meta_key(key))? {
                Some(bytes) => {
                    let meta: ZSetMeta = bincode::deserialize(&bytes)?;
                    Ok(meta.card.max(0) as u64)
                }
                None => Ok(0),
            }
        })
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::SortedSet)? {
                return Ok(None);
            }
            match view.get(&keyspace::zset_data_key(key, member))? {
                Some(bytes) => {
                    let entry = ZSetDataEntry::decode(&bytes)?;
                    Ok(Some(decode_score(&entry.score_bytes)))
                }
                None => Ok(None),
            }
        })
    }

    pub fn zmscore(&self, key: &[u8], members: &[Vec<u8>]) -> Result<Vec<Option<f64>>> {
        members.iter().map(|m| self.zscore(key, m)).collect()
    }

    // =========================================================================
    // Range reads
    // =========================================================================

    /// ZRANGE by rank; `rev` flips to ZREVRANGE semantics.
    pub fn zrange(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut all = self.ordered_members(key)?;
        if rev {
            all.reverse();
        }
        let len = all.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let s = if start < 0 { (start + len).max(0) } else { start };
        let e = if stop < 0 { stop + len } else { stop.min(len - 1) };
        if s >= len || e < 0 || s > e {
            return Ok(Vec::new());
        }
        Ok(all[s as usize..=e as usize].to_vec())
    }

    /// ZRANGEBYSCORE: seek to the encoded minimum and scan forward.
    pub fn zrangebyscore(
        &self,
        key: &[u8],
        min: ScoreBound,
        max: ScoreBound,
        rev: bool,
        limit: Option<(i64, i64)>,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut matched = self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::SortedSet)? {
                return Ok(Vec::new());
            }
            let prefix = keyspace::zset_index_prefix(key);
            let (lo, hi) = score_band(&prefix, min, max);
            let mut out = Vec::new();
            for (entry_key, _) in view.scan_range(&lo, &hi)? {
                let (score_bytes, member, _) = keyspace::zset_index_parts(key, &entry_key)?;
                let score = decode_score(&score_bytes);
                if min.accepts_above(score) && max.accepts_below(score) {
                    out.push((member.to_vec(), score));
                }
            }
            Ok(out)
        })?;
        if rev {
            matched.reverse();
        }
        Ok(apply_limit(matched, limit))
    }

    /// ZCOUNT over a score interval.
    pub fn zcount(&self, key: &[u8], min: ScoreBound, max: ScoreBound) -> Result<u64> {
        Ok(self.zrangebyscore(key, min, max, false, None)?.len() as u64)
    }

    /// ZRANK / ZREVRANK.
    pub fn zrank(&self, key: &[u8], member: &[u8], rev: bool) -> Result<Option<u64>> {
        let mut all = self.ordered_members(key)?;
        if rev {
            all.reverse();
        }
        Ok(all
            .iter()
            .position(|(m, _)| m.as_slice() == member)
            .map(|p| p as u64))
    }

    /// ZRANGEBYLEX family; assumes all members share one score.
    pub fn zrangebylex(
        &self,
        key: &[u8],
        min: &LexBound,
        max: &LexBound,
        rev: bool,
        limit: Option<(i64, i64)>,
    ) -> Result<Vec<Vec<u8>>> {
        let all = self.ordered_members(key)?;
        let mut matched: Vec<Vec<u8>> = all
            .into_iter()
            .map(|(m, _)| m)
            .filter(|m| min.accepts_above(m) && max.accepts_below(m))
            .collect();
        if rev {
            matched.reverse();
        }
        Ok(apply_limit(matched, limit))
    }

    pub fn zlexcount(&self, key: &[u8], min: &LexBound, max: &LexBound) -> Result<u64> {
        Ok(self.zrangebylex(key, min, max, false, None)?.len() as u64)
    }

    // =========================================================================
    // Range removals and pops
    // =========================================================================

    /// ZPOPMIN / ZPOPMAX.
    pub fn zpop(&self, key: &[u8], count: u64, max_end: bool) -> Result<Vec<(Vec<u8>, f64)>> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::SortedSet)? {
                    return Ok(Vec::new());
                }
                let mut ordered = ordered_in_txn(txn, key)?;
                if max_end {
                    ordered.reverse();
                }
                ordered.truncate(count as usize);
                let members: Vec<Vec<u8>> = ordered.iter().map(|(m, _)| m.clone()).collect();
                remove_in_txn(txn, key, &members)?;
                Ok(ordered)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// ZREMRANGEBYRANK.
    pub fn zremrangebyrank(&self, key: &[u8], start: i64, stop: i64) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::SortedSet)? {
                    return Ok(0);
                }
                let all = ordered_in_txn(txn, key)?;
                let len = all.len() as i64;
                let s = if start < 0 { (start + len).max(0) } else { start };
                let e = if stop < 0 { stop + len } else { stop.min(len - 1) };
                if len == 0 || s >= len || e < 0 || s > e {
                    return Ok(0);
                }
                let members: Vec<Vec<u8>> = all[s as usize..=e as usize]
                    .iter()
                    .map(|(m, _)| m.clone())
                    .collect();
                remove_in_txn(txn, key, &members)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// ZREMRANGEBYSCORE.
    pub fn zremrangebyscore(&self, key: &[u8], min: ScoreBound, max: ScoreBound) -> Result<u64> {
        self.remove_matching(key, |_, score| min.accepts_above(score) && max.accepts_below(score))
    }

    /// ZREMRANGEBYLEX.
    pub fn zremrangebylex(&self, key: &[u8], min: &LexBound, max: &LexBound) -> Result<u64> {
        self.remove_matching(key, |member, _| {
            min.accepts_above(member) && max.accepts_below(member)
        })
    }

    fn remove_matching(
        &self,
        key: &[u8],
        predicate: impl Fn(&[u8], f64) -> bool,
    ) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::SortedSet)? {
                    return Ok(0);
                }
                let members: Vec<Vec<u8>> = ordered_in_txn(txn, key)?
                    .into_iter()
                    .filter(|(m, s)| predicate(m, *s))
                    .map(|(m, _)| m)
                    .collect();
                remove_in_txn(txn, key, &members)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Store combinators
    // =========================================================================

    /// ZUNIONSTORE / ZINTERSTORE / ZDIFFSTORE.
    ///
    /// Sources may be sorted sets or plain sets (members score 1.0).
    /// `weights` must be empty or match `keys` in length; it applies to
    /// union and intersection only, as does `aggregate`.
    pub fn zstore(
        &self,
        dest: &[u8],
        keys: &[Vec<u8>],
        weights: &[f64],
        aggregate: Aggregate,
        algebra: ZStoreAlgebra,
    ) -> Result<u64> {
        if !weights.is_empty() && weights.len() != keys.len() {
            return Err(Error::invalid_argument(
                "WEIGHTS length must match the number of source keys",
            ));
        }
        let _guard = self.db.locks().write_guard(dest);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                let mut combined: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
                let mut seen_in: Vec<BTreeMap<Vec<u8>, f64>> = Vec::with_capacity(keys.len());
                for (i, key) in keys.iter().enumerate() {
                    let weight = weights.get(i).copied().unwrap_or(1.0);
                    let members = source_members(txn, key)?;
                    let mut weighted = BTreeMap::new();
                    for (member, score) in members {
                        weighted.insert(member, score * weight);
                    }
                    seen_in.push(weighted);
                }
                match algebra {
                    ZStoreAlgebra::Union => {
                        for weighted in &seen_in {
                            for (member, score) in weighted {
                                combined
                                    .entry(member.clone())
                                    .and_modify(|acc| *acc = aggregate.combine(*acc, *score))
                                    .or_insert(*score);
                            }
                        }
                    }
                    ZStoreAlgebra::Inter => {
                        if let Some(first) = seen_in.first() {
                            'member: for (member, score) in first {
                                let mut acc = *score;
                                for other in &seen_in[1..] {
                                    match other.get(member) {
                                        Some(s) => acc = aggregate.combine(acc, *s),
                                        None => continue 'member,
                                    }
                                }
                                combined.insert(member.clone(), acc);
                            }
                        }
                    }
                    ZStoreAlgebra::Diff => {
                        if let Some(first) = seen_in.first() {
                            for (member, score) in first {
                                if seen_in[1..].iter().all(|o| !o.contains_key(member)) {
                                    combined.insert(member.clone(), *score);
                                }
                            }
                        }
                    }
                }
                // Replace the destination atomically.
                if let Some(tag) = Database::tag_in_txn(txn, dest)? {
                    Database::delete_entries_in_txn(txn, dest, tag)?;
                    txn.remove(keyspace::type_tag_key(dest));
                }
                let card = combined.len() as u64;
                if card > 0 {
                    let pairs: Vec<(f64, Vec<u8>)> =
                        combined.into_iter().map(|(m, s)| (s, m)).collect();
                    upsert_in_txn(txn, dest, &pairs, TypeTag::SortedSet)?;
                }
                Ok(card)
            })
        });
        self.db.invalidate(dest);
        result
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// All members in score order via one index scan.
    fn ordered_members(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, f64)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::SortedSet)? {
                return Ok(Vec::new());
            }
            let mut out = Vec::new();
            for (entry_key, _) in view.scan_prefix(&keyspace::zset_index_prefix(key))? {
                let (score_bytes, member, _) = keyspace::zset_index_parts(key, &entry_key)?;
                out.push((member.to_vec(), decode_score(&score_bytes)));
            }
            Ok(out)
        })
    }
}

/// Which combination ZUNIONSTORE/ZINTERSTORE/ZDIFFSTORE performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZStoreAlgebra {
    Union,
    Inter,
    Diff,
}

// =============================================================================
// Transaction-scoped helpers (shared with the geo index)
// =============================================================================

pub(crate) fn read_meta(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<ZSetMeta> {
    match txn.get(&keyspace::zset_meta_key(key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(ZSetMeta::default()),
    }
}

fn write_meta(txn: &mut WriteTxn<'_>, key: &[u8], meta: &ZSetMeta) -> Result<()> {
    txn.insert(keyspace::zset_meta_key(key), bincode::serialize(meta)?);
    Ok(())
}

/// Upsert members, maintaining meta, data and index agreement. The tag is
/// written as `tag` so the geo index can reuse this for its own type.
pub(crate) fn upsert_in_txn(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    pairs: &[(f64, Vec<u8>)],
    tag: TypeTag,
) -> Result<u64> {
    let mut meta = read_meta(txn, key)?;
    let mut added = 0u64;
    for (score, member) in pairs {
        let data_key = keyspace::zset_data_key(key, member);
        match txn.get(&data_key)? {
            Some(old_bytes) => {
                // The data entry names the exact old index row.
                let old = ZSetDataEntry::decode(&old_bytes)?;
                txn.remove(keyspace::zset_index_key(
                    key,
                    &old.score_bytes,
                    member,
                    old.ver,
                ));
            }
            None => added += 1,
        }
        meta.ver = meta.ver.wrapping_add(1);
        let entry = ZSetDataEntry {
            score_bytes: encode_score(*score),
            ver: meta.ver,
        };
        txn.insert(data_key, entry.encode().to_vec());
        txn.insert(
            keyspace::zset_index_key(key, &entry.score_bytes, member, entry.ver),
            Vec::new(),
        );
    }
    meta.card += added as i64;
    write_meta(txn, key, &meta)?;
    Database::ensure_tag(txn, key, tag)?;
    Ok(added)
}

/// Remove members, reclaiming meta + tag when the set empties.
pub(crate) fn remove_in_txn(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    members: &[Vec<u8>],
) -> Result<u64> {
    let mut meta = read_meta(txn, key)?;
    let mut removed = 0u64;
    for member in members {
        let data_key = keyspace::zset_data_key(key, member);
        if let Some(old_bytes) = txn.get(&data_key)? {
            let old = ZSetDataEntry::decode(&old_bytes)?;
            txn.remove(keyspace::zset_index_key(
                key,
                &old.score_bytes,
                member,
                old.ver,
            ));
            txn.remove(data_key);
            removed += 1;
        }
    }
    if removed > 0 {
        meta.card = (meta.card - removed as i64).max(0);
        if meta.card == 0 {
            txn.remove(keyspace::zset_meta_key(key));
            txn.remove(keyspace::type_tag_key(key));
        } else {
            write_meta(txn, key, &meta)?;
        }
    }
    Ok(removed)
}

/// Members in score order inside a transaction.
pub(crate) fn ordered_in_txn(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
) -> Result<Vec<(Vec<u8>, f64)>> {
    let mut out = Vec::new();
    for (entry_key, _) in txn.scan_prefix(&keyspace::zset_index_prefix(key))? {
        let (score_bytes, member, _) = keyspace::zset_index_parts(key, &entry_key)?;
        out.push((member.to_vec(), decode_score(&score_bytes)));
    }
    Ok(out)
}

/// A source for the store combinators: sorted set, geo index, or plain
/// set (score 1.0). Missing keys contribute nothing.
fn source_members(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<Vec<(Vec<u8>, f64)>> {
    match Database::tag_in_txn(txn, key)? {
        None => Ok(Vec::new()),
        Some(TypeTag::SortedSet) | Some(TypeTag::Geo) => ordered_in_txn(txn, key),
        Some(TypeTag::Set) => {
            let mut out = Vec::new();
            for entry in txn.scan_keys(&keyspace::set_member_prefix(key))? {
                out.push((keyspace::set_member_from_key(key, &entry)?.to_vec(), 1.0));
            }
            Ok(out)
        }
        Some(tag) => Err(Error::wrong_type(
            String::from_utf8_lossy(key),
            tag.name(),
        )),
    }
}

/// Key band of the index covering `[min, max]`; exact filtering happens
/// on the decoded score afterwards.
fn score_band(prefix: &[u8], min: ScoreBound, max: ScoreBound) -> (Vec<u8>, Vec<u8>) {
    let mut lo = prefix.to_vec();
    match min {
        ScoreBound::NegInf => {}
        ScoreBound::PosInf => lo.extend_from_slice(&[0xFF; 9]),
        ScoreBound::Val { score, inclusive } => {
            lo.extend_from_slice(&encode_score(score));
            if !inclusive {
                lo.push(0xFF);
            }
        }
    }
    let mut hi = prefix.to_vec();
    match max {
        ScoreBound::NegInf => {}
        ScoreBound::PosInf => hi.extend_from_slice(&[0xFF; 9]),
        ScoreBound::Val { score, inclusive } => {
            hi.extend_from_slice(&encode_score(score));
            if inclusive {
                hi.push(0xFF);
            }
        }
    }
    (lo, hi)
}

fn apply_limit<T>(items: Vec<T>, limit: Option<(i64, i64)>) -> Vec<T> {
    match limit {
        None => items,
        Some((offset, count)) => {
            let offset = offset.max(0) as usize;
            let take = if count < 0 {
                usize::MAX
            } else {
                count as usize
            };
            items.into_iter().skip(offset).take(take).collect()
        }
    }
}
