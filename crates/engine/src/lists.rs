//! List operations.
//!
//! A list is a doubly-linked list of UUID-addressed nodes:
//!
//! - `LIST:<K>:<uuid>` holds the node's value;
//! - `LIST:<K>:<uuid>:prev` / `:next` hold the neighbor's uuid (empty
//!   bytes = none) — linkage is data, not ownership;
//! - `LIST:<K>:length`, `:start`, `:end` anchor the list.
//!
//! Every splice runs inside one substrate transaction under the per-key
//! lock, which is what maintains "length equals the nodes reachable from
//! start to end". Pushes notify blocked poppers after commit.

use crate::database::Database;
use crate::notify;
use crate::num::{fmt_u64, parse_u64};
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::types::TypeTag;
use quartz_substrate::WriteTxn;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Which end of the list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

/// List anchors as read inside a transaction.
#[derive(Debug, Default, Clone)]
struct ListState {
    length: u64,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
}

/// List operations facade.
#[derive(Clone)]
pub struct Lists {
    db: Arc<Database>,
}

impl Lists {
    pub fn new(db: Arc<Database>) -> Lists {
        Lists { db }
    }

    // =========================================================================
    // Pushes
    // =========================================================================

    /// LPUSH: returns the new length.
    pub fn lpush(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, End::Head, false)
    }

    /// RPUSH: returns the new length.
    pub fn rpush(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, End::Tail, false)
    }

    /// LPUSHX: push only when the list already exists; 0 otherwise.
    pub fn lpushx(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, End::Head, true)
    }

    /// RPUSHX: push only when the list already exists; 0 otherwise.
    pub fn rpushx(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, End::Tail, true)
    }

    fn push(&self, key: &[u8], values: &[Vec<u8>], end: End, require_existing: bool) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                let exists = Database::expect_type_txn(txn, key, TypeTag::List)?;
                if require_existing && !exists {
                    return Ok(0);
                }
                let mut state = read_state(txn, key)?;
                for value in values {
                    splice_new(txn, key, &mut state, value, end)?;
                }
                write_state(txn, key, &state)?;
                Ok(state.length)
            })
        });
        self.db.invalidate(key);
        let length = result?;
        if length > 0 {
            self.db.notifier().notify(&Database::list_notify_key(key));
        }
        Ok(length)
    }

    // =========================================================================
    // Pops
    // =========================================================================

    /// LPOP.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, End::Head)
    }

    /// RPOP.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, End::Tail)
    }

    fn pop(&self, key: &[u8], end: End) -> Result<Option<Vec<u8>>> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::List)? {
                    return Ok(None);
                }
                let mut state = read_state(txn, key)?;
                let popped = pop_terminal(txn, key, &mut state, end)?;
                write_state(txn, key, &state)?;
                Ok(popped)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// RPOPLPUSH: tail of `src` to head of `dst` in one transaction.
    pub fn rpoplpush(&self, src: &[u8], dst: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guards = self.db.locks().write_guard_many(&[src, dst]);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, src, TypeTag::List)? {
                    return Ok(None);
                }
                Database::expect_type_txn(txn, dst, TypeTag::List)?;
                let mut src_state = read_state(txn, src)?;
                let value = match pop_terminal(txn, src, &mut src_state, End::Tail)? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                write_state(txn, src, &src_state)?;
                // For src == dst (rotation) this re-reads the state the
                // pop just staged, via read-your-writes.
                let mut dst_state = read_state(txn, dst)?;
                splice_new(txn, dst, &mut dst_state, &value, End::Head)?;
                write_state(txn, dst, &dst_state)?;
                Ok(Some(value))
            })
        });
        self.db.invalidate(src);
        self.db.invalidate(dst);
        let value = result?;
        if value.is_some() {
            self.db.notifier().notify(&Database::list_notify_key(dst));
        }
        Ok(value)
    }

    // =========================================================================
    // Blocking pops
    // =========================================================================

    /// BLPOP: first non-empty key wins; `timeout_ms == 0` waits forever.
    pub fn blpop(&self, keys: &[Vec<u8>], timeout_ms: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.blocking_pop(keys, timeout_ms, End::Head)
    }

    /// BRPOP.
    pub fn brpop(&self, keys: &[Vec<u8>], timeout_ms: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.blocking_pop(keys, timeout_ms, End::Tail)
    }

    fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        timeout_ms: u64,
        end: End,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let notify_keys: Vec<Vec<u8>> =
            keys.iter().map(|k| Database::list_notify_key(k)).collect();
        notify::block_on(self.db.notifier(), &notify_keys, timeout_ms, || {
            for key in keys {
                if let Some(value) = self.pop(key, end)? {
                    return Ok(Some((key.clone(), value)));
                }
            }
            Ok(None)
        })
    }

    /// BRPOPLPUSH: blocking variant of RPOPLPUSH.
    pub fn brpoplpush(&self, src: &[u8], dst: &[u8], timeout_ms: u64) -> Result<Option<Vec<u8>>> {
        let notify_keys = vec![Database::list_notify_key(src)];
        notify::block_on(self.db.notifier(), &notify_keys, timeout_ms, || {
            self.rpoplpush(src, dst)
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn llen(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::List)? {
                return Ok(0);
            }
            match view.get(&keyspace::list_length_key(key))? {
                Some(bytes) => parse_u64(&bytes),
                None => Ok(0),
            }
        })
    }

    /// LINDEX: negative indices count from the tail.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let values = self.ordered_values(key)?;
        let len = values.len() as i64;
        let idx = if index < 0 { index + len } else { index };
        if idx < 0 || idx >= len {
            return Ok(None);
        }
        Ok(Some(values[idx as usize].1.clone()))
    }

    /// LRANGE with inclusive, negative-normalized bounds.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let values = self.ordered_values(key)?;
        let len = values.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let s = if start < 0 { (start + len).max(0) } else { start };
        let e = if stop < 0 { stop + len } else { stop.min(len - 1) };
        if s >= len || e < 0 || s > e {
            return Ok(Vec::new());
        }
        Ok(values[s as usize..=e as usize]
            .iter()
            .map(|(_, v)| v.clone())
            .collect())
    }

    // =========================================================================
    // In-place edits
    // =========================================================================

    /// LSET: error on missing key or out-of-range index.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::List)? {
                    return Err(Error::not_found(String::from_utf8_lossy(key)));
                }
                let state = read_state(txn, key)?;
                let ids = walk_ids(txn, key, &state)?;
                let len = ids.len() as i64;
                let idx = if index < 0 { index + len } else { index };
                if idx < 0 || idx >= len {
                    return Err(Error::range("index out of range"));
                }
                txn.insert(
                    keyspace::list_node_key(key, &ids[idx as usize]),
                    value.to_vec(),
                );
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }

    /// LTRIM to the inclusive range, deleting everything outside it.
    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> Result<()> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::List)? {
                    return Ok(());
                }
                let mut state = read_state(txn, key)?;
                let ids = walk_ids(txn, key, &state)?;
                let len = ids.len() as i64;
                let s = if start < 0 { (start + len).max(0) } else { start };
                let e = if stop < 0 { stop + len } else { stop.min(len - 1) };
                if s >= len || e < 0 || s > e {
                    // Everything trimmed away.
                    for id in &ids {
                        remove_node_entries(txn, key, id);
                    }
                    state = ListState::default();
                    write_state(txn, key, &state)?;
                    return Ok(());
                }
                let (s, e) = (s as usize, e as usize);
                for id in ids[..s].iter().chain(ids[e + 1..].iter()) {
                    remove_node_entries(txn, key, id);
                }
                let kept = &ids[s..=e];
                set_link(txn, key, &kept[0], End::Head, None);
                set_link(txn, key, kept.last().unwrap(), End::Tail, None);
                state.start = Some(kept[0].clone());
                state.end = Some(kept.last().unwrap().clone());
                state.length = kept.len() as u64;
                write_state(txn, key, &state)?;
                Ok(())
            })
        });
        self.db.invalidate(key);
        result
    }

    /// LINSERT before/after the first node holding `pivot`.
    ///
    /// Returns the new length, -1 when the pivot is absent, 0 on a
    /// missing key.
    pub fn linsert(&self, key: &[u8], before: bool, pivot: &[u8], value: &[u8]) -> Result<i64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::List)? {
                    return Ok(0);
                }
                let mut state = read_state(txn, key)?;
                let ids = walk_ids(txn, key, &state)?;
                let mut pivot_id = None;
                for id in &ids {
                    if txn.get(&keyspace::list_node_key(key, id))?.as_deref() == Some(pivot) {
                        pivot_id = Some(id.clone());
                        break;
                    }
                }
                let pivot_id = match pivot_id {
                    Some(id) => id,
                    None => return Ok(-1),
                };
                splice_beside(txn, key, &mut state, &pivot_id, value, before)?;
                write_state(txn, key, &state)?;
                Ok(state.length as i64)
            })
        });
        self.db.invalidate(key);
        let out = result?;
        if out > 0 {
            self.db.notifier().notify(&Database::list_notify_key(key));
        }
        Ok(out)
    }

    /// LREM: remove up to `count` occurrences of `value` (head-first when
    /// positive, tail-first when negative, all when zero).
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<u64> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::List)? {
                    return Ok(0);
                }
                let mut state = read_state(txn, key)?;
                let ids = walk_ids(txn, key, &state)?;
                let mut matches = Vec::new();
                for id in &ids {
                    if txn.get(&keyspace::list_node_key(key, id))?.as_deref() == Some(value) {
                        matches.push(id.clone());
                    }
                }
                let limit = count.unsigned_abs() as usize;
                let victims: Vec<Vec<u8>> = if count > 0 {
                    matches.into_iter().take(limit).collect()
                } else if count < 0 {
                    matches.into_iter().rev().take(limit).collect()
                } else {
                    matches
                };
                for id in &victims {
                    unlink(txn, key, id, &mut state)?;
                }
                write_state(txn, key, &state)?;
                Ok(victims.len() as u64)
            })
        });
        self.db.invalidate(key);
        result
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Load the whole list in order via one prefix scan.
    fn ordered_values(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::List)? {
                return Ok(Vec::new());
            }
            let prefix = keyspace::list_prefix(key);
            let mut start: Option<Vec<u8>> = None;
            let mut values: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
            let mut next: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
            for (entry_key, value) in view.scan_prefix(&prefix)? {
                let suffix = &entry_key[prefix.len()..];
                if suffix == b"length" || suffix == b"end" {
                    continue;
                } else if suffix == b"start" {
                    if !value.is_empty() {
                        start = Some(value);
                    }
                } else if suffix.ends_with(b":prev") {
                    continue;
                } else if suffix.ends_with(b":next") {
                    let id = suffix[..suffix.len() - 5].to_vec();
                    if !value.is_empty() {
                        next.insert(id, value);
                    }
                } else {
                    values.insert(suffix.to_vec(), value);
                }
            }
            let total = values.len();
            let mut out = Vec::with_capacity(total);
            let mut cursor = start;
            while let Some(id) = cursor {
                let value = values.remove(&id).ok_or_else(|| {
                    Error::corruption("list start chain references a missing node")
                })?;
                cursor = next.get(&id).cloned();
                out.push((id, value));
                if out.len() > total {
                    return Err(Error::corruption("list linkage contains a cycle"));
                }
            }
            Ok(out)
        })
    }
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

fn read_state(txn: &mut WriteTxn<'_>, key: &[u8]) -> Result<ListState> {
    let length = match txn.get(&keyspace::list_length_key(key))? {
        Some(bytes) => parse_u64(&bytes)?,
        None => 0,
    };
    let start = txn
        .get(&keyspace::list_start_key(key))?
        .filter(|v| !v.is_empty());
    let end = txn
        .get(&keyspace::list_end_key(key))?
        .filter(|v| !v.is_empty());
    Ok(ListState { length, start, end })
}

fn write_state(txn: &mut WriteTxn<'_>, key: &[u8], state: &ListState) -> Result<()> {
    if state.length == 0 {
        txn.remove(keyspace::list_length_key(key));
        txn.remove(keyspace::list_start_key(key));
        txn.remove(keyspace::list_end_key(key));
        txn.remove(keyspace::type_tag_key(key));
    } else {
        txn.insert(keyspace::list_length_key(key), fmt_u64(state.length));
        txn.insert(
            keyspace::list_start_key(key),
            state.start.clone().unwrap_or_default(),
        );
        txn.insert(
            keyspace::list_end_key(key),
            state.end.clone().unwrap_or_default(),
        );
        Database::ensure_tag(txn, key, TypeTag::List)?;
    }
    Ok(())
}

fn get_link(txn: &mut WriteTxn<'_>, link_key: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(txn.get(link_key)?.filter(|v| !v.is_empty()))
}

/// Write a node's head-side (`prev`) or tail-side (`next`) link.
fn set_link(txn: &mut WriteTxn<'_>, key: &[u8], id: &[u8], toward: End, neighbor: Option<&[u8]>) {
    let link_key = match toward {
        End::Head => keyspace::list_node_prev_key(key, id),
        End::Tail => keyspace::list_node_next_key(key, id),
    };
    txn.insert(link_key, neighbor.map(|n| n.to_vec()).unwrap_or_default());
}

fn remove_node_entries(txn: &mut WriteTxn<'_>, key: &[u8], id: &[u8]) {
    txn.remove(keyspace::list_node_key(key, id));
    txn.remove(keyspace::list_node_prev_key(key, id));
    txn.remove(keyspace::list_node_next_key(key, id));
}

/// Create a fresh node and splice it at an end of the list.
fn splice_new(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    state: &mut ListState,
    value: &[u8],
    end: End,
) -> Result<()> {
    let id = Uuid::new_v4().to_string().into_bytes();
    txn.insert(keyspace::list_node_key(key, &id), value.to_vec());
    match end {
        End::Head => {
            set_link(txn, key, &id, End::Head, None);
            set_link(txn, key, &id, End::Tail, state.start.as_deref());
            if let Some(old_start) = &state.start {
                set_link(txn, key, old_start, End::Head, Some(&id));
            }
            state.start = Some(id.clone());
            if state.end.is_none() {
                state.end = Some(id);
            }
        }
        End::Tail => {
            set_link(txn, key, &id, End::Tail, None);
            set_link(txn, key, &id, End::Head, state.end.as_deref());
            if let Some(old_end) = &state.end {
                set_link(txn, key, old_end, End::Tail, Some(&id));
            }
            state.end = Some(id.clone());
            if state.start.is_none() {
                state.start = Some(id);
            }
        }
    }
    state.length += 1;
    Ok(())
}

/// Insert a fresh node immediately before/after an existing one.
fn splice_beside(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    state: &mut ListState,
    pivot: &[u8],
    value: &[u8],
    before: bool,
) -> Result<()> {
    let id = Uuid::new_v4().to_string().into_bytes();
    txn.insert(keyspace::list_node_key(key, &id), value.to_vec());
    if before {
        let prev = get_link(txn, &keyspace::list_node_prev_key(key, pivot))?;
        set_link(txn, key, &id, End::Head, prev.as_deref());
        set_link(txn, key, &id, End::Tail, Some(pivot));
        set_link(txn, key, pivot, End::Head, Some(&id));
        match prev {
            Some(prev) => set_link(txn, key, &prev, End::Tail, Some(&id)),
            None => state.start = Some(id),
        }
    } else {
        let next = get_link(txn, &keyspace::list_node_next_key(key, pivot))?;
        set_link(txn, key, &id, End::Tail, next.as_deref());
        set_link(txn, key, &id, End::Head, Some(pivot));
        set_link(txn, key, pivot, End::Tail, Some(&id));
        match next {
            Some(next) => set_link(txn, key, &next, End::Head, Some(&id)),
            None => state.end = Some(id),
        }
    }
    state.length += 1;
    Ok(())
}

/// Pop the terminal node at an end, patching the neighbor.
fn pop_terminal(
    txn: &mut WriteTxn<'_>,
    key: &[u8],
    state: &mut ListState,
    end: End,
) -> Result<Option<Vec<u8>>> {
    let id = match end {
        End::Head => state.start.clone(),
        End::Tail => state.end.clone(),
    };
    let id = match id {
        Some(id) => id,
        None => return Ok(None),
    };
    let value = txn
        .get(&keyspace::list_node_key(key, &id))?
        .ok_or_else(|| Error::corruption("list anchor references a missing node"))?;
    match end {
        End::Head => {
            let next = get_link(txn, &keyspace::list_node_next_key(key, &id))?;
            if let Some(next) = &next {
                set_link(txn, key, next, End::Head, None);
            } else {
                state.end = None;
            }
            state.start = next;
        }
        End::Tail => {
            let prev = get_link(txn, &keyspace::list_node_prev_key(key, &id))?;
            if let Some(prev) = &prev {
                set_link(txn, key, prev, End::Tail, None);
            } else {
                state.start = None;
            }
            state.end = prev;
        }
    }
    remove_node_entries(txn, key, &id);
    state.length = state.length.saturating_sub(1);
    Ok(Some(value))
}

/// Detach one node anywhere in the list.
fn unlink(txn: &mut WriteTxn<'_>, key: &[u8], id: &[u8], state: &mut ListState) -> Result<()> {
    let prev = get_link(txn, &keyspace::list_node_prev_key(key, id))?;
    let next = get_link(txn, &keyspace::list_node_next_key(key, id))?;
    match &prev {
        Some(prev) => set_link(txn, key, prev, End::Tail, next.as_deref()),
        None => state.start = next.clone(),
    }
    match &next {
        Some(next) => set_link(txn, key, next, End::Head, prev.as_deref()),
        None => state.end = prev,
    }
    remove_node_entries(txn, key, id);
    state.length = state.length.saturating_sub(1);
    Ok(())
}

/// Node ids from start to end via `next` links.
fn walk_ids(txn: &mut WriteTxn<'_>, key: &[u8], state: &ListState) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::with_capacity(state.length as usize);
    let mut cursor = state.start.clone();
    while let Some(id) = cursor {
        cursor = get_link(txn, &keyspace::list_node_next_key(key, &id))?;
        out.push(id);
        if out.len() as u64 > state.length {
            return Err(Error::corruption("list linkage exceeds recorded length"));
        }
    }
    if out.len() as u64 != state.length {
        return Err(Error::corruption("list linkage shorter than recorded length"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn lists() -> (TempDir, Lists) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Lists::new(db))
    }

    fn vals(items: &[&[u8]]) -> Vec<Vec<u8>> {
        items.iter().map(|v| v.to_vec()).collect()
    }

    #[test]
    fn test_lpush_lrange_order() {
        let (_dir, l) = lists();
        assert_eq!(l.lpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap(), 3);
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"c", b"b", b"a"]));
    }

    #[test]
    fn test_rpush_preserves_order() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"a", b"b", b"c"]));
        assert_eq!(l.llen(b"L").unwrap(), 3);
    }

    #[test]
    fn test_pops_from_both_ends() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(l.lpop(b"L").unwrap(), Some(b"a".to_vec()));
        assert_eq!(l.rpop(b"L").unwrap(), Some(b"c".to_vec()));
        assert_eq!(l.lpop(b"L").unwrap(), Some(b"b".to_vec()));
        assert_eq!(l.lpop(b"L").unwrap(), None);
        assert_eq!(l.llen(b"L").unwrap(), 0);
        // Emptied list is fully reclaimed; a fresh push starts over.
        assert_eq!(l.rpush(b"L", &vals(&[b"x"])).unwrap(), 1);
    }

    #[test]
    fn test_lindex_negative() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(l.lindex(b"L", 0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(l.lindex(b"L", -1).unwrap(), Some(b"c".to_vec()));
        assert_eq!(l.lindex(b"L", 5).unwrap(), None);
        assert_eq!(l.lindex(b"L", -5).unwrap(), None);
    }

    #[test]
    fn test_lset() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap();
        l.lset(b"L", 1, b"B").unwrap();
        l.lset(b"L", -1, b"C").unwrap();
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"a", b"B", b"C"]));
        assert!(matches!(
            l.lset(b"L", 9, b"x").unwrap_err(),
            Error::Range { .. }
        ));
        assert!(matches!(
            l.lset(b"missing", 0, b"x").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_ltrim() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c", b"d", b"e"])).unwrap();
        l.ltrim(b"L", 1, 3).unwrap();
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"b", b"c", b"d"]));
        l.ltrim(b"L", 5, 9).unwrap();
        assert_eq!(l.llen(b"L").unwrap(), 0);
    }

    #[test]
    fn test_linsert() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"c"])).unwrap();
        assert_eq!(l.linsert(b"L", true, b"c", b"b").unwrap(), 3);
        assert_eq!(l.linsert(b"L", false, b"c", b"d").unwrap(), 4);
        assert_eq!(
            l.lrange(b"L", 0, -1).unwrap(),
            vals(&[b"a", b"b", b"c", b"d"])
        );
        assert_eq!(l.linsert(b"L", true, b"zz", b"x").unwrap(), -1);
        assert_eq!(l.linsert(b"missing", true, b"a", b"x").unwrap(), 0);
    }

    #[test]
    fn test_lrem_directions() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"x", b"a", b"x", b"b", b"x"])).unwrap();
        assert_eq!(l.lrem(b"L", 1, b"x").unwrap(), 1);
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"a", b"x", b"b", b"x"]));
        assert_eq!(l.lrem(b"L", -1, b"x").unwrap(), 1);
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"a", b"x", b"b"]));
        assert_eq!(l.lrem(b"L", 0, b"x").unwrap(), 1);
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"a", b"b"]));
    }

    #[test]
    fn test_rpoplpush() {
        let (_dir, l) = lists();
        l.rpush(b"src", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(l.rpoplpush(b"src", b"dst").unwrap(), Some(b"c".to_vec()));
        assert_eq!(l.lrange(b"src", 0, -1).unwrap(), vals(&[b"a", b"b"]));
        assert_eq!(l.lrange(b"dst", 0, -1).unwrap(), vals(&[b"c"]));
        assert_eq!(l.rpoplpush(b"missing", b"dst").unwrap(), None);
    }

    #[test]
    fn test_rpoplpush_rotation() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(l.rpoplpush(b"L", b"L").unwrap(), Some(b"c".to_vec()));
        assert_eq!(l.lrange(b"L", 0, -1).unwrap(), vals(&[b"c", b"a", b"b"]));
    }

    #[test]
    fn test_pushx_require_existing() {
        let (_dir, l) = lists();
        assert_eq!(l.lpushx(b"L", &vals(&[b"a"])).unwrap(), 0);
        assert_eq!(l.llen(b"L").unwrap(), 0);
        l.rpush(b"L", &vals(&[b"a"])).unwrap();
        assert_eq!(l.rpushx(b"L", &vals(&[b"b"])).unwrap(), 2);
    }

    #[test]
    fn test_blpop_immediate() {
        let (_dir, l) = lists();
        l.rpush(b"L", &vals(&[b"a"])).unwrap();
        let out = l.blpop(&[b"other".to_vec(), b"L".to_vec()], 50).unwrap();
        assert_eq!(out, Some((b"L".to_vec(), b"a".to_vec())));
    }

    #[test]
    fn test_blpop_times_out() {
        let (_dir, l) = lists();
        let start = Instant::now();
        let out = l.blpop(&[b"L".to_vec()], 100).unwrap();
        assert!(out.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_blpop_woken_by_push() {
        let (_dir, l) = lists();
        let l2 = l.clone();
        let handle = std::thread::spawn(move || l2.blpop(&[b"L".to_vec()], 2_000).unwrap());
        std::thread::sleep(Duration::from_millis(50));
        l.rpush(b"L", &vals(&[b"late"])).unwrap();
        let out = handle.join().unwrap();
        assert_eq!(out, Some((b"L".to_vec(), b"late".to_vec())));
    }
}
