//! JSON document operations.
//!
//! Whole-document storage: the value is parsed on every write,
//! re-serialized, and stored as one (possibly compressed) blob at
//! `json:<K>`. Reads traverse a restricted path expression — root (`$` or
//! `.`) plus dotted object keys and numeric array indices. The mutating
//! helpers (ARRAPPEND, NUMINCRBY, NUMMULTBY, CLEAR and friends) apply at
//! the document root only.

use crate::database::Database;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::keyspace;
use quartz_core::types::TypeTag;
use quartz_substrate::WriteTxn;
use serde_json::Value;
use std::sync::Arc;

/// JSON operations facade.
#[derive(Clone)]
pub struct JsonStore {
    db: Arc<Database>,
}

impl JsonStore {
    pub fn new(db: Arc<Database>) -> JsonStore {
        JsonStore { db }
    }

    /// JSON.SET: root-path writes only.
    pub fn set(&self, key: &[u8], path: &str, value: &[u8]) -> Result<()> {
        require_root(path)?;
        let doc: Value = serde_json::from_slice(value)?;
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Json)?;
                self.write_doc(txn, key, &doc)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// JSON.GET: serialized value at one path, or nil for a missing key.
    /// A missing path inside an existing document is an error.
    pub fn get(&self, key: &[u8], path: &str) -> Result<Option<Vec<u8>>> {
        let doc = match self.read_doc(key)? {
            Some(doc) => doc,
            None => return Ok(None),
        };
        let target = traverse(&doc, path)?;
        Ok(Some(serde_json::to_vec(target)?))
    }

    /// JSON.MGET: one path across many keys.
    pub fn mget(&self, keys: &[Vec<u8>], path: &str) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter()
            .map(|key| match self.get(key, path) {
                Ok(v) => Ok(v),
                // Missing paths and wrong types read as nil in MGET.
                Err(e) if e.is_not_found() || e.is_wrong_type() => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// JSON.DEL at root: removes the document; returns 1 if it existed.
    pub fn del(&self, key: &[u8], path: &str) -> Result<u64> {
        require_root(path)?;
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Json)? {
                    return Ok(0);
                }
                txn.remove(keyspace::json_key(key));
                txn.remove(keyspace::type_tag_key(key));
                Ok(1)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// JSON.TYPE at a path.
    pub fn type_of(&self, key: &[u8], path: &str) -> Result<Option<&'static str>> {
        let doc = match self.read_doc(key)? {
            Some(doc) => doc,
            None => return Ok(None),
        };
        let target = traverse(&doc, path)?;
        Ok(Some(json_type_name(target)))
    }

    /// JSON.ARRAPPEND at root: returns the new array length.
    pub fn arrappend(&self, key: &[u8], path: &str, values: &[Vec<u8>]) -> Result<u64> {
        require_root(path)?;
        let mut parsed = Vec::with_capacity(values.len());
        for v in values {
            parsed.push(serde_json::from_slice::<Value>(v)?);
        }
        self.mutate_root(key, move |doc| match doc {
            Value::Array(items) => {
                items.extend(parsed.iter().cloned());
                Ok(items.len() as u64)
            }
            _ => Err(Error::invalid_argument("root value is not an array")),
        })
    }

    /// JSON.ARRLEN at root.
    pub fn arrlen(&self, key: &[u8], path: &str) -> Result<Option<u64>> {
        require_root(path)?;
        match self.read_doc(key)? {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.len() as u64)),
            Some(_) => Err(Error::invalid_argument("root value is not an array")),
        }
    }

    /// JSON.OBJKEYS at root.
    pub fn objkeys(&self, key: &[u8], path: &str) -> Result<Option<Vec<String>>> {
        require_root(path)?;
        match self.read_doc(key)? {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.keys().cloned().collect())),
            Some(_) => Err(Error::invalid_argument("root value is not an object")),
        }
    }

    /// JSON.NUMINCRBY at root: returns the new number, serialized.
    pub fn numincrby(&self, key: &[u8], path: &str, delta: f64) -> Result<Vec<u8>> {
        self.apply_number(key, path, |n| n + delta)
    }

    /// JSON.NUMMULTBY at root: returns the new number, serialized.
    pub fn nummultby(&self, key: &[u8], path: &str, factor: f64) -> Result<Vec<u8>> {
        self.apply_number(key, path, |n| n * factor)
    }

    /// JSON.CLEAR at root: empties containers, zeroes numbers. Returns 1
    /// if the document changed.
    pub fn clear(&self, key: &[u8], path: &str) -> Result<u64> {
        require_root(path)?;
        self.mutate_root(key, |doc| {
            let cleared = match doc {
                Value::Array(items) if !items.is_empty() => {
                    items.clear();
                    1
                }
                Value::Object(map) if !map.is_empty() => {
                    map.clear();
                    1
                }
                Value::Number(n) if n.as_f64() != Some(0.0) => {
                    *doc = Value::from(0);
                    1
                }
                _ => 0,
            };
            Ok(cleared)
        })
    }

    /// JSON.DEBUG MEMORY: stored size of the document blob in bytes.
    pub fn debug_memory(&self, key: &[u8]) -> Result<u64> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Json)? {
                return Ok(0);
            }
            Ok(view
                .get(&keyspace::json_key(key))?
                .map(|v| v.len() as u64)
                .unwrap_or(0))
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read_doc(&self, key: &[u8]) -> Result<Option<Value>> {
        let stored = self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Json)? {
                return Ok(None);
            }
            view.get(&keyspace::json_key(key))
        })?;
        match stored {
            None => Ok(None),
            Some(stored) => {
                let raw = self.db.decode_blob(&stored)?;
                Ok(Some(serde_json::from_slice(&raw).map_err(|e| {
                    Error::corruption(format!("stored JSON document is invalid: {}", e))
                })?))
            }
        }
    }

    /// Serialize and stage the document, carrying any live TTL forward.
    fn write_doc(&self, txn: &mut WriteTxn<'_>, key: &[u8], doc: &Value) -> Result<()> {
        let raw = serde_json::to_vec(doc)?;
        let stored = self.db.encode_blob(&raw)?;
        let tag_key = keyspace::type_tag_key(key);
        let expires = txn
            .get_with_expiry(&tag_key)?
            .map(|(_, expires)| expires)
            .unwrap_or(quartz_substrate::NO_EXPIRY);
        txn.insert_with_expiry(keyspace::json_key(key), stored, expires);
        txn.insert_with_expiry(tag_key, TypeTag::Json.as_bytes().to_vec(), expires);
        Ok(())
    }

    /// Read-modify-write of the whole document under the key lock.
    fn mutate_root<T>(&self, key: &[u8], f: impl Fn(&mut Value) -> Result<T>) -> Result<T> {
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::DEFAULT, || {
            self.db.substrate().update(|txn| {
                if !Database::expect_type_txn(txn, key, TypeTag::Json)? {
                    return Err(Error::not_found(String::from_utf8_lossy(key)));
                }
                let stored = txn
                    .get(&keyspace::json_key(key))?
                    .ok_or_else(|| Error::not_found(String::from_utf8_lossy(key)))?;
                let raw = self.db.decode_blob(&stored)?;
                let mut doc: Value = serde_json::from_slice(&raw).map_err(|e| {
                    Error::corruption(format!("stored JSON document is invalid: {}", e))
                })?;
                let out = f(&mut doc)?;
                self.write_doc(txn, key, &doc)?;
                Ok(out)
            })
        });
        self.db.invalidate(key);
        result
    }

    fn apply_number(&self, key: &[u8], path: &str, f: impl Fn(f64) -> f64) -> Result<Vec<u8>> {
        require_root(path)?;
        self.mutate_root(key, move |doc| match doc {
            Value::Number(n) => {
                let current = n
                    .as_f64()
                    .ok_or_else(|| Error::range("number out of range"))?;
                let next = f(current);
                if !next.is_finite() {
                    return Err(Error::range("result is not a finite number"));
                }
                *doc = serde_json::Number::from_f64(next)
                    .map(Value::Number)
                    .ok_or_else(|| Error::range("result is not a finite number"))?;
                Ok(serde_json::to_vec(doc)?)
            }
            _ => Err(Error::invalid_argument("root value is not a number")),
        })
    }
}

/// Only `$`, `.` and the empty string address the root.
fn require_root(path: &str) -> Result<()> {
    if is_root(path) {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "only the root path is supported for this operation",
        ))
    }
}

fn is_root(path: &str) -> bool {
    matches!(path, "" | "$" | ".")
}

/// Traverse a dotted path: `$.a.b.0` / `.a.b` / `a.b`.
fn traverse<'a>(doc: &'a Value, path: &str) -> Result<&'a Value> {
    if is_root(path) {
        return Ok(doc);
    }
    let trimmed = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('.'))
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    let mut current = doc;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            return Err(Error::parse(format!("invalid path '{}'", path)));
        }
        current = match current {
            Value::Object(map) => map
                .get(segment)
                .ok_or_else(|| Error::not_found(format!("path '{}'", path)))?,
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| Error::not_found(format!("path '{}'", path)))?;
                items
                    .get(index)
                    .ok_or_else(|| Error::not_found(format!("path '{}'", path)))?
            }
            _ => return Err(Error::not_found(format!("path '{}'", path))),
        };
    }
    Ok(current)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, JsonStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, JsonStore::new(db))
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"name":"quartz","tags":["db","kv"]}"#)
            .unwrap();
        let whole = j.get(b"doc", "$").unwrap().unwrap();
        let parsed: Value = serde_json::from_slice(&whole).unwrap();
        assert_eq!(parsed["name"], "quartz");
        assert_eq!(j.get(b"missing", "$").unwrap(), None);
    }

    #[test]
    fn test_set_rejects_invalid_json_and_non_root_paths() {
        let (_dir, j) = store();
        assert!(j.set(b"doc", "$", b"{nope").is_err());
        assert!(j.set(b"doc", "$.a", b"1").is_err());
    }

    #[test]
    fn test_dotted_path_reads() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"a":{"b":[10,20]},"n":1.5}"#).unwrap();
        assert_eq!(j.get(b"doc", "$.a.b.1").unwrap().unwrap(), b"20".to_vec());
        assert_eq!(j.get(b"doc", ".n").unwrap().unwrap(), b"1.5".to_vec());
        assert!(matches!(
            j.get(b"doc", "$.a.zz").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_type_of() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"s":"x","i":3,"f":1.5,"b":true,"n":null,"a":[]}"#)
            .unwrap();
        assert_eq!(j.type_of(b"doc", "$").unwrap(), Some("object"));
        assert_eq!(j.type_of(b"doc", "$.s").unwrap(), Some("string"));
        assert_eq!(j.type_of(b"doc", "$.i").unwrap(), Some("integer"));
        assert_eq!(j.type_of(b"doc", "$.f").unwrap(), Some("number"));
        assert_eq!(j.type_of(b"doc", "$.b").unwrap(), Some("boolean"));
        assert_eq!(j.type_of(b"doc", "$.n").unwrap(), Some("null"));
        assert_eq!(j.type_of(b"doc", "$.a").unwrap(), Some("array"));
    }

    #[test]
    fn test_del() {
        let (_dir, j) = store();
        j.set(b"doc", "$", b"42").unwrap();
        assert_eq!(j.del(b"doc", "$").unwrap(), 1);
        assert_eq!(j.del(b"doc", "$").unwrap(), 0);
        assert_eq!(j.get(b"doc", "$").unwrap(), None);
    }

    #[test]
    fn test_arrappend_and_arrlen() {
        let (_dir, j) = store();
        j.set(b"arr", "$", b"[1,2]").unwrap();
        assert_eq!(
            j.arrappend(b"arr", "$", &[b"3".to_vec(), b"4".to_vec()])
                .unwrap(),
            4
        );
        assert_eq!(j.arrlen(b"arr", "$").unwrap(), Some(4));
        j.set(b"obj", "$", b"{}").unwrap();
        assert!(j.arrappend(b"obj", "$", &[b"1".to_vec()]).is_err());
        assert_eq!(j.arrlen(b"missing", "$").unwrap(), None);
    }

    #[test]
    fn test_objkeys() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"a":1,"b":2}"#).unwrap();
        let mut keys = j.objkeys(b"doc", "$").unwrap().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_num_ops() {
        let (_dir, j) = store();
        j.set(b"n", "$", b"10").unwrap();
        assert_eq!(j.numincrby(b"n", "$", 2.5).unwrap(), b"12.5".to_vec());
        assert_eq!(j.nummultby(b"n", "$", 2.0).unwrap(), b"25.0".to_vec());
        j.set(b"s", "$", br#""text""#).unwrap();
        assert!(j.numincrby(b"s", "$", 1.0).is_err());
    }

    #[test]
    fn test_clear() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"a":1}"#).unwrap();
        assert_eq!(j.clear(b"doc", "$").unwrap(), 1);
        assert_eq!(j.get(b"doc", "$").unwrap().unwrap(), b"{}".to_vec());
        assert_eq!(j.clear(b"doc", "$").unwrap(), 0);
    }

    #[test]
    fn test_debug_memory() {
        let (_dir, j) = store();
        j.set(b"doc", "$", br#"{"a":1}"#).unwrap();
        assert!(j.debug_memory(b"doc").unwrap() > 0);
        assert_eq!(j.debug_memory(b"missing").unwrap(), 0);
    }
}
