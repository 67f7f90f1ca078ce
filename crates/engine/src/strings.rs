//! String operations.
//!
//! A string key owns exactly one data entry, `STRING:<K>`, holding the
//! (possibly compressed) raw bytes. SET/GET are cache-through; the
//! read-modify-write family (INCR, APPEND, SETRANGE, the bit operations)
//! runs under the per-key shard lock and preserves any expiry already on
//! the data entry. Plain SET discards expiry, matching command semantics.

use crate::database::Database;
use crate::num::{fmt_f64, fmt_i64, parse_f64, parse_i64};
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::time::now_ns;
use quartz_core::types::TypeTag;
use quartz_substrate::{WriteTxn, NO_EXPIRY};
use std::sync::Arc;
use std::time::Duration;

/// Hard cap on string values and bit offsets, as in the wire protocol.
const MAX_STRING_BYTES: u64 = 512 * 1024 * 1024;

/// Bitwise operator for BITOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Not,
}

impl BitOp {
    pub fn parse(s: &str) -> Result<BitOp> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(BitOp::And),
            "OR" => Ok(BitOp::Or),
            "XOR" => Ok(BitOp::Xor),
            "NOT" => Ok(BitOp::Not),
            other => Err(Error::invalid_argument(format!(
                "unknown BITOP operator '{}'",
                other
            ))),
        }
    }
}

/// Existence precondition of a conditional SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// NX: write only when the key does not exist.
    IfAbsent,
    /// XX: write only when the key already exists.
    IfPresent,
}

/// Field width and signedness for BITFIELD (`i1..i64`, `u1..u63`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitfieldSpec {
    pub signed: bool,
    pub bits: u8,
}

impl BitfieldSpec {
    /// Parse `i<N>` / `u<N>`.
    pub fn parse(s: &str) -> Result<BitfieldSpec> {
        let (signed, digits) = match s.as_bytes().first() {
            Some(b'i') => (true, &s[1..]),
            Some(b'u') => (false, &s[1..]),
            _ => return Err(Error::invalid_argument("invalid bitfield type")),
        };
        let bits: u8 = digits
            .parse()
            .map_err(|_| Error::invalid_argument("invalid bitfield type"))?;
        let max = if signed { 64 } else { 63 };
        if bits == 0 || bits > max {
            return Err(Error::invalid_argument(
                "invalid bitfield type; use something like i16 u8; note that u64 is not supported",
            ));
        }
        Ok(BitfieldSpec { signed, bits })
    }

    fn min(&self) -> i64 {
        if !self.signed {
            0
        } else if self.bits == 64 {
            i64::MIN
        } else {
            -(1i64 << (self.bits - 1))
        }
    }

    fn max(&self) -> i64 {
        if self.signed {
            if self.bits == 64 {
                i64::MAX
            } else {
                (1i64 << (self.bits - 1)) - 1
            }
        } else if self.bits == 63 {
            i64::MAX
        } else {
            (1i64 << self.bits) - 1
        }
    }
}

/// Overflow discipline for BITFIELD SET/INCRBY.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Wrap modulo 2^N (two's complement for signed fields).
    #[default]
    Wrap,
    /// Clamp to the field's range.
    Sat,
    /// Skip the write and report nil.
    Fail,
}

impl Overflow {
    pub fn parse(s: &str) -> Result<Overflow> {
        match s.to_ascii_uppercase().as_str() {
            "WRAP" => Ok(Overflow::Wrap),
            "SAT" => Ok(Overflow::Sat),
            "FAIL" => Ok(Overflow::Fail),
            other => Err(Error::invalid_argument(format!(
                "invalid OVERFLOW mode '{}'",
                other
            ))),
        }
    }
}

/// One BITFIELD subcommand, offsets already resolved to absolute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldCommand {
    Get {
        spec: BitfieldSpec,
        offset: u64,
    },
    Set {
        spec: BitfieldSpec,
        offset: u64,
        value: i64,
        overflow: Overflow,
    },
    IncrBy {
        spec: BitfieldSpec,
        offset: u64,
        delta: i64,
        overflow: Overflow,
    },
}

/// String operations facade. Stateless; holds only the engine handle.
#[derive(Clone)]
pub struct Strings {
    db: Arc<Database>,
}

impl Strings {
    pub fn new(db: Arc<Database>) -> Strings {
        Strings { db }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// GET: cache-through read of the raw value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(hit) = self.db.read_cache().get(key) {
            return Ok(Some(hit));
        }
        if let Some(hit) = self.db.write_cache().get(key) {
            self.db.read_cache().set(key, hit.clone());
            return Ok(Some(hit));
        }
        let value = self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::String)? {
                return Ok(None);
            }
            view.get_with_expiry(&keyspace::string_key(key))
        })?;
        match value {
            None => Ok(None),
            Some((stored, expires)) => {
                let raw = self.db.decode_blob(&stored)?;
                if expires == NO_EXPIRY {
                    self.db.read_cache().set(key, raw.clone());
                }
                Ok(Some(raw))
            }
        }
    }

    pub fn strlen(&self, key: &[u8]) -> Result<u64> {
        Ok(self.get(key)?.map(|v| v.len() as u64).unwrap_or(0))
    }

    /// Bit length of the value (8 × STRLEN).
    pub fn bitlen(&self, key: &[u8]) -> Result<u64> {
        Ok(self.strlen(key)? * 8)
    }

    pub fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter()
            .map(|key| match self.get(key) {
                Ok(v) => Ok(v),
                // MGET reports nil for keys of the wrong type.
                Err(e) if e.is_wrong_type() => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    pub fn getrange(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<u8>> {
        let value = match self.get(key)? {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let (start, end) = normalize_range(start, end, value.len());
        match (start, end) {
            (Some(s), Some(e)) if s <= e => Ok(value[s..=e].to_vec()),
            _ => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// SET: plain overwrite, discarding any expiry.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set_with_expiry(key, value, None)
    }

    /// SET with an optional TTL (SETEX/PSETEX/`SET .. EX`).
    pub fn set_with_expiry(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        check_len(value.len() as u64)?;
        let deadline = ttl
            .map(|d| now_ns().saturating_add(d.as_nanos() as u64))
            .unwrap_or(NO_EXPIRY);
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                self.write_string_in_txn(txn, key, value, deadline)
            })
        });
        self.db.invalidate(key);
        result?;
        // Warm the write cache for re-reads after SET; TTL'd values are
        // not cached so an expiry can never be outlived by a cache entry.
        if deadline == NO_EXPIRY {
            self.db.write_cache().set(key, value.to_vec());
        }
        Ok(())
    }

    /// SETNX: write only when the key does not exist (any type counts).
    pub fn setnx(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.set_conditional(key, value, None, SetCondition::IfAbsent)
    }

    /// `SET .. NX/XX`: the existence check and the write run in one
    /// transaction under the key's shard lock, so two racing conditional
    /// SETs cannot both pass their precondition. Returns whether the
    /// write happened.
    pub fn set_conditional(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool> {
        check_len(value.len() as u64)?;
        let deadline = ttl
            .map(|d| now_ns().saturating_add(d.as_nanos() as u64))
            .unwrap_or(NO_EXPIRY);
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let exists = Database::tag_in_txn(txn, key)?.is_some();
                let allowed = match condition {
                    SetCondition::IfAbsent => !exists,
                    SetCondition::IfPresent => exists,
                };
                if !allowed {
                    return Ok(false);
                }
                self.write_string_in_txn(txn, key, value, deadline)?;
                Ok(true)
            })
        });
        self.db.invalidate(key);
        let written = result?;
        if written && deadline == NO_EXPIRY {
            self.db.write_cache().set(key, value.to_vec());
        }
        Ok(written)
    }

    /// GETSET: swap in a new value, returning the old one.
    pub fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        check_len(value.len() as u64)?;
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let old = self.read_string_in_txn(txn, key)?;
                self.write_string_in_txn(txn, key, value, NO_EXPIRY)?;
                Ok(old.map(|(raw, _)| raw))
            })
        });
        self.db.invalidate(key);
        result
    }

    /// MSET: all writes in one substrate transaction.
    pub fn mset(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        let _guards = self.db.locks().write_guard_many(&keys);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                for (key, value) in pairs {
                    check_len(value.len() as u64)?;
                    self.write_string_in_txn(txn, key, value, NO_EXPIRY)?;
                }
                Ok(())
            })
        });
        for (key, _) in pairs {
            self.db.invalidate(key);
        }
        result
    }

    /// MSETNX: writes all pairs, or none if any key already exists.
    pub fn msetnx(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<bool> {
        let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        let _guards = self.db.locks().write_guard_many(&keys);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                for (key, _) in pairs {
                    if Database::tag_in_txn(txn, key)?.is_some() {
                        return Ok(false);
                    }
                }
                for (key, value) in pairs {
                    check_len(value.len() as u64)?;
                    self.write_string_in_txn(txn, key, value, NO_EXPIRY)?;
                }
                Ok(true)
            })
        });
        for (key, _) in pairs {
            self.db.invalidate(key);
        }
        result
    }

    /// APPEND: concatenate, preserving expiry; returns the new length.
    pub fn append(&self, key: &[u8], suffix: &[u8]) -> Result<u64> {
        self.rmw(key, |old, expires| {
            let mut value = old.unwrap_or_default();
            value.extend_from_slice(suffix);
            check_len(value.len() as u64)?;
            let len = value.len() as u64;
            Ok((Some((value, expires)), len))
        })
    }

    /// SETRANGE: overwrite at a byte offset, zero-padding any gap.
    pub fn setrange(&self, key: &[u8], offset: u64, patch: &[u8]) -> Result<u64> {
        check_len(offset + patch.len() as u64)?;
        self.rmw(key, |old, expires| {
            let mut value = old.unwrap_or_default();
            let end = offset as usize + patch.len();
            if value.len() < end {
                value.resize(end, 0);
            }
            value[offset as usize..end].copy_from_slice(patch);
            let len = value.len() as u64;
            Ok((Some((value, expires)), len))
        })
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// INCRBY / DECRBY (with negated delta); INCR/DECR are ±1.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.rmw(key, |old, expires| {
            let current = match &old {
                Some(bytes) => parse_i64(bytes)?,
                None => 0,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| Error::range("increment or decrement would overflow"))?;
            Ok((Some((fmt_i64(next), expires)), next))
        })
    }

    /// INCRBYFLOAT: float add with a finite-result guard. Returns the
    /// canonical decimal written back.
    pub fn incr_by_float(&self, key: &[u8], delta: f64) -> Result<Vec<u8>> {
        if delta.is_nan() {
            return Err(Error::parse("value is not a valid float"));
        }
        self.rmw(key, |old, expires| {
            let current = match &old {
                Some(bytes) => parse_f64(bytes)?,
                None => 0.0,
            };
            let next = current + delta;
            if !next.is_finite() {
                return Err(Error::range("increment would produce NaN or Infinity"));
            }
            let formatted = fmt_f64(next);
            Ok((Some((formatted.clone(), expires)), formatted))
        })
    }

    // =========================================================================
    // Bit operations
    // =========================================================================

    pub fn getbit(&self, key: &[u8], offset: u64) -> Result<u8> {
        check_bit_offset(offset)?;
        let value = self.get(key)?.unwrap_or_default();
        let byte = (offset / 8) as usize;
        if byte >= value.len() {
            return Ok(0);
        }
        Ok((value[byte] >> (7 - (offset % 8))) & 1)
    }

    /// SETBIT: returns the previous bit value.
    pub fn setbit(&self, key: &[u8], offset: u64, bit: bool) -> Result<u8> {
        check_bit_offset(offset)?;
        self.rmw(key, |old, expires| {
            let mut value = old.unwrap_or_default();
            let byte = (offset / 8) as usize;
            if value.len() <= byte {
                value.resize(byte + 1, 0);
            }
            let mask = 1u8 << (7 - (offset % 8));
            let previous = (value[byte] & mask != 0) as u8;
            if bit {
                value[byte] |= mask;
            } else {
                value[byte] &= !mask;
            }
            Ok((Some((value, expires)), previous))
        })
    }

    /// BITCOUNT over an optional inclusive byte range.
    pub fn bitcount(&self, key: &[u8], range: Option<(i64, i64)>) -> Result<u64> {
        let value = self.get(key)?.unwrap_or_default();
        let (start, end) = match range {
            None => (0i64, value.len() as i64 - 1),
            Some((s, e)) => (s, e),
        };
        let (start, end) = normalize_range(start, end, value.len());
        match (start, end) {
            (Some(s), Some(e)) if s <= e => {
                Ok(value[s..=e].iter().map(|b| b.count_ones() as u64).sum())
            }
            _ => Ok(0),
        }
    }

    /// BITOP: combine source values into `dest`; returns the result length.
    pub fn bitop(&self, op: BitOp, dest: &[u8], sources: &[Vec<u8>]) -> Result<u64> {
        if sources.is_empty() || (op == BitOp::Not && sources.len() != 1) {
            return Err(Error::invalid_argument(
                "BITOP NOT must be called with a single source key",
            ));
        }
        let _guard = self.db.locks().write_guard(dest);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let mut values = Vec::with_capacity(sources.len());
                for src in sources {
                    if !Database::expect_type_txn(txn, src, TypeTag::String)? {
                        values.push(Vec::new());
                        continue;
                    }
                    let stored = txn.get(&keyspace::string_key(src))?.unwrap_or_default();
                    values.push(self.db.decode_blob(&stored)?);
                }
                let combined = combine_bits(op, &values);
                if combined.is_empty() {
                    if let Some(tag) = Database::tag_in_txn(txn, dest)? {
                        Database::delete_entries_in_txn(txn, dest, tag)?;
                        txn.remove(keyspace::type_tag_key(dest));
                    }
                    Ok(0)
                } else {
                    let len = combined.len() as u64;
                    self.write_string_in_txn(txn, dest, &combined, NO_EXPIRY)?;
                    Ok(len)
                }
            })
        });
        self.db.invalidate(dest);
        result
    }

    /// BITPOS: first position of `bit` within an optional byte range.
    pub fn bitpos(
        &self,
        key: &[u8],
        bit: bool,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<i64> {
        let value = self.get(key)?.unwrap_or_default();
        let explicit_end = end.is_some();
        let (s, e) = normalize_range(
            start.unwrap_or(0),
            end.unwrap_or(value.len() as i64 - 1),
            value.len(),
        );
        if let (Some(s), Some(e)) = (s, e) {
            if s <= e {
                for byte in s..=e {
                    for off in 0..8u8 {
                        let found = (value[byte] >> (7 - off)) & 1 == 1;
                        if found == bit {
                            return Ok((byte * 8 + off as usize) as i64);
                        }
                    }
                }
            }
        }
        // Not found. A search for a clear bit with no explicit end treats
        // the value as right-padded with zeros.
        if !bit && !explicit_end {
            return Ok((value.len() * 8) as i64);
        }
        Ok(-1)
    }

    /// BITFIELD: run the subcommand list atomically; nil results mark
    /// FAIL-mode overflows.
    pub fn bitfield(&self, key: &[u8], ops: &[BitfieldCommand]) -> Result<Vec<Option<i64>>> {
        for op in ops {
            let (spec, offset) = match op {
                BitfieldCommand::Get { spec, offset }
                | BitfieldCommand::Set { spec, offset, .. }
                | BitfieldCommand::IncrBy { spec, offset, .. } => (spec, offset),
            };
            check_bit_offset(offset + spec.bits as u64)?;
        }
        self.rmw(key, |old, expires| {
            let mut value = old.unwrap_or_default();
            let mut dirty = false;
            let mut replies = Vec::with_capacity(ops.len());
            for op in ops {
                match *op {
                    BitfieldCommand::Get { spec, offset } => {
                        replies.push(Some(read_field(&value, spec, offset)));
                    }
                    BitfieldCommand::Set {
                        spec,
                        offset,
                        value: new,
                        overflow,
                    } => match fit(spec, new as i128, overflow) {
                        None => replies.push(None),
                        Some(fitted) => {
                            let old_field = read_field(&value, spec, offset);
                            write_field(&mut value, spec, offset, fitted);
                            dirty = true;
                            replies.push(Some(old_field));
                        }
                    },
                    BitfieldCommand::IncrBy {
                        spec,
                        offset,
                        delta,
                        overflow,
                    } => {
                        let current = read_field(&value, spec, offset);
                        match fit(spec, current as i128 + delta as i128, overflow) {
                            None => replies.push(None),
                            Some(next) => {
                                write_field(&mut value, spec, offset, next);
                                dirty = true;
                                replies.push(Some(next));
                            }
                        }
                    }
                }
            }
            let write = if dirty { Some((value, expires)) } else { None };
            Ok((write, replies))
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Read-modify-write skeleton: shard lock, retry, one transaction.
    ///
    /// `f` gets the current raw value (decompressed) plus its expiry and
    /// returns the optional replacement plus the reply. Expiry is passed
    /// back through so RMW ops preserve a live TTL.
    fn rmw<T>(
        &self,
        key: &[u8],
        f: impl Fn(Option<Vec<u8>>, u64) -> Result<(Option<(Vec<u8>, u64)>, T)>,
    ) -> Result<T> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let old = self.read_string_in_txn(txn, key)?;
                let exists = old.is_some();
                let expires = old.as_ref().map(|(_, e)| *e).unwrap_or(NO_EXPIRY);
                let (write, reply) = f(old.map(|(raw, _)| raw), expires)?;
                if let Some((raw, expires)) = write {
                    let stored = self.db.encode_blob(&raw)?;
                    txn.insert_with_expiry(keyspace::string_key(key), stored, expires);
                    if !exists {
                        Database::write_tag(txn, key, TypeTag::String);
                    }
                }
                Ok(reply)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// Current decompressed value + expiry, enforcing the type tag.
    fn read_string_in_txn(
        &self,
        txn: &mut WriteTxn<'_>,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, u64)>> {
        if !Database::expect_type_txn(txn, key, TypeTag::String)? {
            return Ok(None);
        }
        match txn.get_with_expiry(&keyspace::string_key(key))? {
            None => Ok(None),
            Some((stored, expires)) => Ok(Some((self.db.decode_blob(&stored)?, expires))),
        }
    }

    /// Stage a full overwrite: replaces a key of any type.
    fn write_string_in_txn(
        &self,
        txn: &mut WriteTxn<'_>,
        key: &[u8],
        value: &[u8],
        expires: u64,
    ) -> Result<()> {
        match Database::tag_in_txn(txn, key)? {
            Some(TypeTag::String) | None => {}
            Some(other) => Database::delete_entries_in_txn(txn, key, other)?,
        }
        let stored = self.db.encode_blob(value)?;
        txn.insert_with_expiry(keyspace::string_key(key), stored, expires);
        let tag_key = keyspace::type_tag_key(key);
        txn.insert_with_expiry(tag_key, TypeTag::String.as_bytes().to_vec(), expires);
        Ok(())
    }
}

/// Normalize an inclusive index pair with negative-offset semantics.
fn normalize_range(start: i64, end: i64, len: usize) -> (Option<usize>, Option<usize>) {
    if len == 0 {
        return (None, None);
    }
    let len = len as i64;
    let s = if start < 0 { (start + len).max(0) } else { start };
    let e = if end < 0 { end + len } else { end.min(len - 1) };
    if s >= len || e < 0 {
        return (None, None);
    }
    (Some(s as usize), Some(e as usize))
}

fn check_len(len: u64) -> Result<()> {
    if len > MAX_STRING_BYTES {
        return Err(Error::range("string exceeds maximum allowed size"));
    }
    Ok(())
}

fn check_bit_offset(offset: u64) -> Result<()> {
    if offset >= MAX_STRING_BYTES * 8 {
        return Err(Error::range("bit offset is not an integer or out of range"));
    }
    Ok(())
}

fn combine_bits(op: BitOp, values: &[Vec<u8>]) -> Vec<u8> {
    let max_len = values.iter().map(|v| v.len()).max().unwrap_or(0);
    let mut out = vec![0u8; max_len];
    match op {
        BitOp::Not => {
            out.copy_from_slice(&values[0]);
            for b in &mut out {
                *b = !*b;
            }
        }
        BitOp::And | BitOp::Or | BitOp::Xor => {
            for (i, byte) in out.iter_mut().enumerate() {
                let mut acc: Option<u8> = None;
                for v in values {
                    let b = v.get(i).copied().unwrap_or(0);
                    acc = Some(match (acc, op) {
                        (None, _) => b,
                        (Some(a), BitOp::And) => a & b,
                        (Some(a), BitOp::Or) => a | b,
                        (Some(a), BitOp::Xor) => a ^ b,
                        (Some(_), BitOp::Not) => unreachable!(),
                    });
                }
                *byte = acc.unwrap_or(0);
            }
        }
    }
    out
}

/// Read an N-bit field at a bit offset, sign-extending signed specs.
fn read_field(buf: &[u8], spec: BitfieldSpec, offset: u64) -> i64 {
    let mut raw: u64 = 0;
    for i in 0..spec.bits as u64 {
        let pos = offset + i;
        let byte = (pos / 8) as usize;
        let bit = buf
            .get(byte)
            .map(|b| (b >> (7 - (pos % 8))) & 1)
            .unwrap_or(0);
        raw = (raw << 1) | bit as u64;
    }
    if spec.signed && spec.bits < 64 && raw >> (spec.bits - 1) & 1 == 1 {
        (raw | (!0u64 << spec.bits)) as i64
    } else {
        raw as i64
    }
}

/// Write an N-bit field, growing the buffer as needed.
fn write_field(buf: &mut Vec<u8>, spec: BitfieldSpec, offset: u64, value: i64) {
    let end_byte = ((offset + spec.bits as u64 + 7) / 8) as usize;
    if buf.len() < end_byte {
        buf.resize(end_byte, 0);
    }
    let raw = value as u64;
    for i in 0..spec.bits as u64 {
        let pos = offset + i;
        let byte = (pos / 8) as usize;
        let mask = 1u8 << (7 - (pos % 8));
        let bit = (raw >> (spec.bits as u64 - 1 - i)) & 1;
        if bit == 1 {
            buf[byte] |= mask;
        } else {
            buf[byte] &= !mask;
        }
    }
}

/// Apply the overflow discipline to a candidate field value.
fn fit(spec: BitfieldSpec, candidate: i128, overflow: Overflow) -> Option<i64> {
    let min = spec.min() as i128;
    let max = spec.max() as i128;
    if candidate >= min && candidate <= max {
        return Some(candidate as i64);
    }
    match overflow {
        Overflow::Fail => None,
        Overflow::Sat => Some(if candidate < min {
            min as i64
        } else {
            max as i64
        }),
        Overflow::Wrap => {
            let span = 1i128 << spec.bits;
            let wrapped = candidate.rem_euclid(span);
            if spec.signed && wrapped > max {
                Some((wrapped - span) as i64)
            } else {
                Some(wrapped as i64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings() -> (TempDir, Strings) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Strings::new(db))
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, s) = strings();
        s.set(b"k", b"v").unwrap();
        assert_eq!(s.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(s.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_counter_scenario() {
        let (_dir, s) = strings();
        s.set(b"c", b"10").unwrap();
        assert_eq!(s.incr_by(b"c", 5).unwrap(), 15);
        assert_eq!(s.incr_by(b"c", -1).unwrap(), 14);
        assert_eq!(s.get(b"c").unwrap(), Some(b"14".to_vec()));
    }

    #[test]
    fn test_incr_on_missing_starts_at_zero() {
        let (_dir, s) = strings();
        assert_eq!(s.incr_by(b"n", 1).unwrap(), 1);
        assert_eq!(s.incr_by(b"n", 1).unwrap(), 2);
    }

    #[test]
    fn test_incr_non_integer_is_parse_error() {
        let (_dir, s) = strings();
        s.set(b"k", b"abc").unwrap();
        assert!(matches!(
            s.incr_by(b"k", 1).unwrap_err(),
            Error::Parse { .. }
        ));
    }

    #[test]
    fn test_incr_overflow_is_range_error() {
        let (_dir, s) = strings();
        s.set(b"k", i64::MAX.to_string().as_bytes()).unwrap();
        assert!(matches!(
            s.incr_by(b"k", 1).unwrap_err(),
            Error::Range { .. }
        ));
    }

    #[test]
    fn test_incr_by_float() {
        let (_dir, s) = strings();
        s.set(b"f", b"10.5").unwrap();
        assert_eq!(s.incr_by_float(b"f", 0.1).unwrap(), b"10.6".to_vec());
        let huge = format!("{}", f64::MAX);
        s.set(b"f", huge.as_bytes()).unwrap();
        assert!(s.incr_by_float(b"f", f64::MAX).is_err());
    }

    #[test]
    fn test_append() {
        let (_dir, s) = strings();
        assert_eq!(s.append(b"k", b"Hello ").unwrap(), 6);
        assert_eq!(s.append(b"k", b"World").unwrap(), 11);
        assert_eq!(s.get(b"k").unwrap(), Some(b"Hello World".to_vec()));
    }

    #[test]
    fn test_getrange_negative_indices() {
        let (_dir, s) = strings();
        s.set(b"k", b"This is a string").unwrap();
        assert_eq!(s.getrange(b"k", 0, 3).unwrap(), b"This".to_vec());
        assert_eq!(s.getrange(b"k", -3, -1).unwrap(), b"ing".to_vec());
        assert_eq!(s.getrange(b"k", 0, -1).unwrap(), b"This is a string".to_vec());
        assert_eq!(s.getrange(b"k", 10, 100).unwrap(), b"string".to_vec());
        assert!(s.getrange(b"k", 5, 2).unwrap().is_empty());
    }

    #[test]
    fn test_setrange_pads_with_nul() {
        let (_dir, s) = strings();
        assert_eq!(s.setrange(b"k", 5, b"Redis").unwrap(), 10);
        assert_eq!(
            s.get(b"k").unwrap(),
            Some(b"\x00\x00\x00\x00\x00Redis".to_vec())
        );
        assert_eq!(s.setrange(b"k", 0, b"Hello").unwrap(), 10);
        assert_eq!(s.get(b"k").unwrap(), Some(b"HelloRedis".to_vec()));
    }

    #[test]
    fn test_setnx_and_getset() {
        let (_dir, s) = strings();
        assert!(s.setnx(b"k", b"first").unwrap());
        assert!(!s.setnx(b"k", b"second").unwrap());
        assert_eq!(s.getset(b"k", b"third").unwrap(), Some(b"first".to_vec()));
        assert_eq!(s.get(b"k").unwrap(), Some(b"third".to_vec()));
    }

    #[test]
    fn test_mset_mget_msetnx() {
        let (_dir, s) = strings();
        s.mset(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        assert_eq!(
            s.mget(&[b"a".to_vec(), b"missing".to_vec(), b"b".to_vec()])
                .unwrap(),
            vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]
        );
        // msetnx is all-or-nothing.
        assert!(!s
            .msetnx(&[(b"c".to_vec(), b"3".to_vec()), (b"a".to_vec(), b"9".to_vec())])
            .unwrap());
        assert_eq!(s.get(b"c").unwrap(), None);
        assert!(s.msetnx(&[(b"c".to_vec(), b"3".to_vec())]).unwrap());
    }

    #[test]
    fn test_set_bit_get_bit() {
        let (_dir, s) = strings();
        assert_eq!(s.setbit(b"k", 7, true).unwrap(), 0);
        assert_eq!(s.getbit(b"k", 7).unwrap(), 1);
        assert_eq!(s.getbit(b"k", 6).unwrap(), 0);
        assert_eq!(s.get(b"k").unwrap(), Some(vec![0x01]));
        assert_eq!(s.setbit(b"k", 7, false).unwrap(), 1);
        assert_eq!(s.getbit(b"k", 100).unwrap(), 0);
    }

    #[test]
    fn test_bitcount() {
        let (_dir, s) = strings();
        s.set(b"k", b"foobar").unwrap();
        assert_eq!(s.bitcount(b"k", None).unwrap(), 26);
        assert_eq!(s.bitcount(b"k", Some((0, 0))).unwrap(), 4);
        assert_eq!(s.bitcount(b"k", Some((1, 1))).unwrap(), 6);
        assert_eq!(s.bitcount(b"missing", None).unwrap(), 0);
    }

    #[test]
    fn test_bitop() {
        let (_dir, s) = strings();
        s.set(b"a", b"abc").unwrap();
        s.set(b"b", b"ab").unwrap();
        let len = s
            .bitop(BitOp::And, b"dest", &[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(len, 3);
        // Shorter source zero-padded: 'c' & 0 == 0.
        assert_eq!(s.get(b"dest").unwrap(), Some(vec![b'a', b'b', 0]));
        s.bitop(BitOp::Not, b"dest", &[b"a".to_vec()]).unwrap();
        assert_eq!(
            s.get(b"dest").unwrap(),
            Some(vec![!b'a', !b'b', !b'c'])
        );
        assert!(s
            .bitop(BitOp::Not, b"dest", &[b"a".to_vec(), b"b".to_vec()])
            .is_err());
    }

    #[test]
    fn test_bitpos() {
        let (_dir, s) = strings();
        s.set(b"k", &[0xff, 0xf0, 0x00]).unwrap();
        assert_eq!(s.bitpos(b"k", false, None, None).unwrap(), 12);
        assert_eq!(s.bitpos(b"k", true, None, None).unwrap(), 0);
        assert_eq!(s.bitpos(b"k", true, Some(2), None).unwrap(), -1);
        // All ones, no explicit end: first clear bit is past the value.
        s.set(b"ones", &[0xff, 0xff]).unwrap();
        assert_eq!(s.bitpos(b"ones", false, None, None).unwrap(), 16);
        assert_eq!(s.bitpos(b"ones", false, Some(0), Some(1)).unwrap(), -1);
        assert_eq!(s.bitpos(b"missing", true, None, None).unwrap(), -1);
        assert_eq!(s.bitpos(b"missing", false, None, None).unwrap(), 0);
    }

    #[test]
    fn test_bitfield_get_set_incr() {
        let (_dir, s) = strings();
        let spec = BitfieldSpec::parse("u8").unwrap();
        let out = s
            .bitfield(
                b"bf",
                &[
                    BitfieldCommand::Set {
                        spec,
                        offset: 0,
                        value: 255,
                        overflow: Overflow::Wrap,
                    },
                    BitfieldCommand::IncrBy {
                        spec,
                        offset: 0,
                        delta: 10,
                        overflow: Overflow::Wrap,
                    },
                    BitfieldCommand::Get { spec, offset: 0 },
                ],
            )
            .unwrap();
        // 255 + 10 wraps to 9 in u8.
        assert_eq!(out, vec![Some(0), Some(9), Some(9)]);
    }

    #[test]
    fn test_bitfield_signed_wrap_and_sat() {
        let (_dir, s) = strings();
        let spec = BitfieldSpec::parse("i8").unwrap();
        let out = s
            .bitfield(
                b"bf",
                &[
                    BitfieldCommand::Set {
                        spec,
                        offset: 0,
                        value: 127,
                        overflow: Overflow::Wrap,
                    },
                    BitfieldCommand::IncrBy {
                        spec,
                        offset: 0,
                        delta: 1,
                        overflow: Overflow::Wrap,
                    },
                ],
            )
            .unwrap();
        assert_eq!(out[1], Some(-128));
        let out = s
            .bitfield(
                b"bf",
                &[
                    BitfieldCommand::IncrBy {
                        spec,
                        offset: 0,
                        delta: -100,
                        overflow: Overflow::Sat,
                    },
                    BitfieldCommand::IncrBy {
                        spec,
                        offset: 0,
                        delta: -1,
                        overflow: Overflow::Fail,
                    },
                ],
            )
            .unwrap();
        assert_eq!(out[0], Some(-128));
        assert_eq!(out[1], None);
    }

    #[test]
    fn test_bitfield_spec_parse() {
        assert!(BitfieldSpec::parse("i64").is_ok());
        assert!(BitfieldSpec::parse("u63").is_ok());
        assert!(BitfieldSpec::parse("u64").is_err());
        assert!(BitfieldSpec::parse("i0").is_err());
        assert!(BitfieldSpec::parse("x8").is_err());
    }

    #[test]
    fn test_set_conditional_modes() {
        let (_dir, s) = strings();
        assert!(!s
            .set_conditional(b"k", b"a", None, SetCondition::IfPresent)
            .unwrap());
        assert_eq!(s.get(b"k").unwrap(), None);
        assert!(s
            .set_conditional(b"k", b"a", None, SetCondition::IfAbsent)
            .unwrap());
        assert!(!s
            .set_conditional(b"k", b"b", None, SetCondition::IfAbsent)
            .unwrap());
        assert!(s
            .set_conditional(b"k", b"b", None, SetCondition::IfPresent)
            .unwrap());
        assert_eq!(s.get(b"k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_set_conditional_with_ttl() {
        let (_dir, s) = strings();
        assert!(s
            .set_conditional(
                b"lock",
                b"token",
                Some(Duration::from_millis(20)),
                SetCondition::IfAbsent,
            )
            .unwrap());
        assert_eq!(s.get(b"lock").unwrap(), Some(b"token".to_vec()));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(s.get(b"lock").unwrap(), None);
        // Expired key is absent again, so NX succeeds.
        assert!(s
            .set_conditional(b"lock", b"token2", None, SetCondition::IfAbsent)
            .unwrap());
    }

    #[test]
    fn test_concurrent_nx_admits_exactly_one() {
        let (_dir, s) = strings();
        let threads = 8;
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(threads));
        let mut handles = Vec::new();
        for t in 0..threads {
            let s = s.clone();
            let barrier = std::sync::Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                s.set_conditional(
                    b"lock",
                    t.to_string().as_bytes(),
                    None,
                    SetCondition::IfAbsent,
                )
                .unwrap()
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_set_with_expiry_then_read() {
        let (_dir, s) = strings();
        s.set_with_expiry(b"k", b"v", Some(Duration::from_secs(30)))
            .unwrap();
        assert_eq!(s.get(b"k").unwrap(), Some(b"v".to_vec()));
        s.set_with_expiry(b"gone", b"v", Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(s.get(b"gone").unwrap(), None);
    }
}
