//! The typed-keyspace schema.
//!
//! A pure function layer: given a user key and a purpose, produce the
//! canonical byte key in the flat ordered store. The schema is stable and
//! frozen post-launch — changing any prefix here is a format migration.
//!
//! ## Layout
//!
//! ```text
//! TYPE_<K>                                  -> type tag (authoritative)
//! STRING:<K>                                -> raw (possibly compressed) bytes
//! HASH:<K>:<field>                          -> raw value
//! HASH:<K>:count                            -> ASCII u64 cardinality
//! LIST:<K>:<node-uuid>                      -> raw value
//! LIST:<K>:<node-uuid>:prev / :next         -> neighbor uuid
//! LIST:<K>:length / :start / :end           -> list anchors
//! SET:<K>:member:<m>                        -> empty
//! SET:<K>:count                             -> ASCII u64 cardinality
//! zset:<K>:data:<m>                         -> score8 ‖ ver4
//! zset:<K>:index:<score8>:<m>:<ver4>        -> empty
//! zset:<K>:meta                             -> bincode ZSetMeta
//! stream:<K>:meta                           -> bincode StreamMeta
//! stream:<K>:data:<ms8‖seq8>                -> JSON field map
//! stream:<K>:groups:<g>                     -> bincode StreamGroup
//! stream:<K>:pending:<g>                    -> bincode PendingMap
//! ts:<K>:meta                               -> bincode TsMeta
//! ts:<K>:data:<timestamp-decimal-20>        -> 16-byte (ts, value)
//! json:<K>                                  -> document bytes
//! geo:<K>:index:<member>                    -> 8-byte BE geohash
//! ```

use crate::error::{Error, Result};
use crate::types::StreamId;
use byteorder::{BigEndian, ByteOrder};

/// Prefix of every type-tag entry.
pub const TYPE_TAG_PREFIX: &[u8] = b"TYPE_";

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(len);
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

// =============================================================================
// Type tags
// =============================================================================

/// `TYPE_<K>` — the authoritative type indicator for a user key.
pub fn type_tag_key(key: &[u8]) -> Vec<u8> {
    join(&[TYPE_TAG_PREFIX, key])
}

/// Recover the user key from a type-tag entry key.
pub fn user_key_from_tag(tag_key: &[u8]) -> Result<&[u8]> {
    tag_key
        .strip_prefix(TYPE_TAG_PREFIX)
        .ok_or_else(|| Error::corruption("type-tag key without TYPE_ prefix"))
}

// =============================================================================
// Strings
// =============================================================================

pub fn string_key(key: &[u8]) -> Vec<u8> {
    join(&[b"STRING:", key])
}

// =============================================================================
// Hashes
// =============================================================================

pub fn hash_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"HASH:", key, b":"])
}

pub fn hash_field_key(key: &[u8], field: &[u8]) -> Vec<u8> {
    join(&[b"HASH:", key, b":", field])
}

pub fn hash_count_key(key: &[u8]) -> Vec<u8> {
    hash_field_key(key, b"count")
}

/// The field name a `HASH:<K>:` entry stores, or `None` for the count entry.
pub fn hash_field_from_key<'a>(key: &[u8], entry_key: &'a [u8]) -> Option<&'a [u8]> {
    let prefix = hash_prefix(key);
    let field = entry_key.strip_prefix(prefix.as_slice())?;
    if field == b"count" {
        None
    } else {
        Some(field)
    }
}

// =============================================================================
// Lists
// =============================================================================

pub fn list_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":"])
}

pub fn list_node_key(key: &[u8], node: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":", node])
}

pub fn list_node_prev_key(key: &[u8], node: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":", node, b":prev"])
}

pub fn list_node_next_key(key: &[u8], node: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":", node, b":next"])
}

pub fn list_length_key(key: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":length"])
}

pub fn list_start_key(key: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":start"])
}

pub fn list_end_key(key: &[u8]) -> Vec<u8> {
    join(&[b"LIST:", key, b":end"])
}

// =============================================================================
// Sets
// =============================================================================

pub fn set_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"SET:", key, b":"])
}

pub fn set_member_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"SET:", key, b":member:"])
}

pub fn set_member_key(key: &[u8], member: &[u8]) -> Vec<u8> {
    join(&[b"SET:", key, b":member:", member])
}

pub fn set_count_key(key: &[u8]) -> Vec<u8> {
    join(&[b"SET:", key, b":count"])
}

/// Member name carried by a `SET:<K>:member:` entry key.
pub fn set_member_from_key<'a>(key: &[u8], entry_key: &'a [u8]) -> Result<&'a [u8]> {
    let prefix = set_member_prefix(key);
    entry_key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::corruption("set entry outside member prefix"))
}

// =============================================================================
// Sorted sets
// =============================================================================

pub fn zset_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"zset:", key, b":"])
}

pub fn zset_meta_key(key: &[u8]) -> Vec<u8> {
    join(&[b"zset:", key, b":meta"])
}

pub fn zset_data_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"zset:", key, b":data:"])
}

pub fn zset_data_key(key: &[u8], member: &[u8]) -> Vec<u8> {
    join(&[b"zset:", key, b":data:", member])
}

pub fn zset_index_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"zset:", key, b":index:"])
}

/// `zset:<K>:index:<score8>:<m>:<ver4>` — the order-carrying index row.
pub fn zset_index_key(key: &[u8], score: &[u8; 8], member: &[u8], ver: u32) -> Vec<u8> {
    let mut ver_bytes = [0u8; 4];
    BigEndian::write_u32(&mut ver_bytes, ver);
    join(&[
        b"zset:",
        key,
        b":index:",
        score,
        b":",
        member,
        b":",
        &ver_bytes,
    ])
}

/// Parse `(score8, member, ver)` out of an index entry key.
///
/// The score and version are fixed-width, so the member is recovered
/// positionally and may itself contain separator bytes.
pub fn zset_index_parts<'a>(key: &[u8], entry_key: &'a [u8]) -> Result<([u8; 8], &'a [u8], u32)> {
    let prefix = zset_index_prefix(key);
    let rest = entry_key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::corruption("sorted-set entry outside index prefix"))?;
    // score8 ':' member ':' ver4
    if rest.len() < 8 + 1 + 1 + 4 {
        return Err(Error::corruption("sorted-set index key too short"));
    }
    let mut score = [0u8; 8];
    score.copy_from_slice(&rest[..8]);
    let member = &rest[9..rest.len() - 5];
    let ver = BigEndian::read_u32(&rest[rest.len() - 4..]);
    Ok((score, member, ver))
}

/// Member name carried by a `zset:<K>:data:` entry key.
pub fn zset_member_from_data_key<'a>(key: &[u8], entry_key: &'a [u8]) -> Result<&'a [u8]> {
    let prefix = zset_data_prefix(key);
    entry_key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::corruption("sorted-set entry outside data prefix"))
}

// =============================================================================
// Streams
// =============================================================================

pub fn stream_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":"])
}

pub fn stream_meta_key(key: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":meta"])
}

pub fn stream_data_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":data:"])
}

pub fn stream_data_key(key: &[u8], id: StreamId) -> Vec<u8> {
    join(&[b"stream:", key, b":data:", &id.to_key_suffix()])
}

pub fn stream_groups_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":groups:"])
}

pub fn stream_group_key(key: &[u8], group: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":groups:", group])
}

pub fn stream_pending_key(key: &[u8], group: &[u8]) -> Vec<u8> {
    join(&[b"stream:", key, b":pending:", group])
}

/// Entry ID carried by a `stream:<K>:data:` entry key.
pub fn stream_id_from_data_key(key: &[u8], entry_key: &[u8]) -> Result<StreamId> {
    let prefix = stream_data_prefix(key);
    let suffix = entry_key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::corruption("stream entry outside data prefix"))?;
    StreamId::from_key_suffix(suffix)
}

// =============================================================================
// Time series
// =============================================================================

pub fn ts_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"ts:", key, b":"])
}

pub fn ts_meta_key(key: &[u8]) -> Vec<u8> {
    join(&[b"ts:", key, b":meta"])
}

pub fn ts_data_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"ts:", key, b":data:"])
}

/// Timestamps are 20-digit zero-padded decimal so that byte order matches
/// numeric order and the trailing decimal parses directly.
pub fn ts_data_key(key: &[u8], ts: u64) -> Vec<u8> {
    join(&[b"ts:", key, b":data:", format!("{:020}", ts).as_bytes()])
}

/// Timestamp carried by a `ts:<K>:data:` entry key.
pub fn ts_from_data_key(key: &[u8], entry_key: &[u8]) -> Result<u64> {
    let prefix = ts_data_prefix(key);
    let suffix = entry_key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::corruption("time-series entry outside data prefix"))?;
    std::str::from_utf8(suffix)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::corruption("non-decimal time-series key suffix"))
}

// =============================================================================
// JSON
// =============================================================================

pub fn json_key(key: &[u8]) -> Vec<u8> {
    join(&[b"json:", key])
}

// =============================================================================
// Geo
// =============================================================================

pub fn geo_prefix(key: &[u8]) -> Vec<u8> {
    join(&[b"geo:", key, b":index:"])
}

pub fn geo_index_key(key: &[u8], member: &[u8]) -> Vec<u8> {
    join(&[b"geo:", key, b":index:", member])
}

/// Every non-tag prefix a user key owns, in sweep/DEL order.
pub fn all_data_prefixes(key: &[u8]) -> Vec<Vec<u8>> {
    vec![
        string_key(key),
        hash_prefix(key),
        list_prefix(key),
        set_prefix(key),
        zset_prefix(key),
        stream_prefix(key),
        ts_prefix(key),
        json_key(key),
        geo_prefix(key),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_round_trip() {
        let tag = type_tag_key(b"user:1");
        assert_eq!(tag, b"TYPE_user:1");
        assert_eq!(user_key_from_tag(&tag).unwrap(), b"user:1");
    }

    #[test]
    fn test_string_and_json_keys() {
        assert_eq!(string_key(b"k"), b"STRING:k");
        assert_eq!(json_key(b"k"), b"json:k");
    }

    #[test]
    fn test_hash_field_extraction_skips_count() {
        let k = b"h";
        assert_eq!(
            hash_field_from_key(k, &hash_field_key(k, b"name")),
            Some(&b"name"[..])
        );
        assert_eq!(hash_field_from_key(k, &hash_count_key(k)), None);
    }

    #[test]
    fn test_set_member_round_trip() {
        let k = b"s";
        let entry = set_member_key(k, b"alpha");
        assert_eq!(set_member_from_key(k, &entry).unwrap(), b"alpha");
        // The count entry is outside the member prefix entirely.
        assert!(!set_count_key(k).starts_with(&set_member_prefix(k)));
    }

    #[test]
    fn test_zset_index_parts_round_trip() {
        let k = b"z";
        let score = [0x80, 0, 0, 0, 0, 0, 0, 7];
        let entry = zset_index_key(k, &score, b"mem:ber", 42);
        let (s, m, v) = zset_index_parts(k, &entry).unwrap();
        assert_eq!(s, score);
        assert_eq!(m, b"mem:ber");
        assert_eq!(v, 42);
    }

    #[test]
    fn test_zset_index_order_follows_score() {
        let k = b"z";
        let low = zset_index_key(k, &[0x3f; 8], b"a", 1);
        let high = zset_index_key(k, &[0xc0; 8], b"a", 1);
        assert!(low < high);
    }

    #[test]
    fn test_stream_data_key_order() {
        let k = b"st";
        let a = stream_data_key(k, StreamId::new(5, 1));
        let b = stream_data_key(k, StreamId::new(5, 2));
        let c = stream_data_key(k, StreamId::new(6, 0));
        assert!(a < b && b < c);
        assert_eq!(stream_id_from_data_key(k, &b).unwrap(), StreamId::new(5, 2));
    }

    #[test]
    fn test_ts_data_key_order_and_parse() {
        let k = b"temps";
        let a = ts_data_key(k, 999);
        let b = ts_data_key(k, 1000);
        assert!(a < b);
        assert_eq!(ts_from_data_key(k, &a).unwrap(), 999);
    }

    #[test]
    fn test_all_data_prefixes_cover_each_type() {
        let prefixes = all_data_prefixes(b"k");
        assert_eq!(prefixes.len(), 9);
        for p in &prefixes {
            assert!(!p.starts_with(TYPE_TAG_PREFIX));
        }
    }
}
