//! Shared value and metadata types.
//!
//! Metadata structs (`ZSetMeta`, `StreamMeta`, `TsMeta`, group records) are
//! fixed shapes serialized with `bincode`; user-visible values stay raw
//! bytes and numeric storage is canonical ASCII decimal so that Redis
//! interop is deterministic.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Type tags
// =============================================================================

/// The logical type of a user key.
///
/// Stored as the value of the `TYPE_<K>` entry. The on-disk byte values are
/// part of the persisted layout and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    List,
    Hash,
    Set,
    SortedSet,
    Json,
    TimeSeries,
    Stream,
    Geo,
}

impl TypeTag {
    /// On-disk representation of the tag.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            TypeTag::String => b"STRING",
            TypeTag::List => b"LIST",
            TypeTag::Hash => b"HASH",
            TypeTag::Set => b"SET",
            TypeTag::SortedSet => b"zset",
            TypeTag::Json => b"json",
            TypeTag::TimeSeries => b"ts",
            TypeTag::Stream => b"STREAM",
            TypeTag::Geo => b"GEOHASH",
        }
    }

    /// Decode an on-disk tag value.
    pub fn from_bytes(bytes: &[u8]) -> Result<TypeTag> {
        const ALL: [TypeTag; 9] = [
            TypeTag::String,
            TypeTag::List,
            TypeTag::Hash,
            TypeTag::Set,
            TypeTag::SortedSet,
            TypeTag::Json,
            TypeTag::TimeSeries,
            TypeTag::Stream,
            TypeTag::Geo,
        ];
        ALL.into_iter()
            .find(|tag| tag.as_bytes() == bytes)
            .ok_or_else(|| {
                Error::corruption(format!(
                    "unknown type tag {:?}",
                    String::from_utf8_lossy(bytes)
                ))
            })
    }

    /// The name reported by the TYPE command.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::List => "list",
            TypeTag::Hash => "hash",
            TypeTag::Set => "set",
            TypeTag::SortedSet => "zset",
            TypeTag::Json => "json",
            TypeTag::TimeSeries => "timeseries",
            TypeTag::Stream => "stream",
            TypeTag::Geo => "geohash",
        }
    }

    /// The synthetic name reported by OBJECT ENCODING.
    pub fn object_encoding(self) -> &'static str {
        match self {
            TypeTag::String => "raw",
            TypeTag::List => "linkedlist",
            TypeTag::Hash => "hashtable",
            TypeTag::Set => "hashtable",
            TypeTag::SortedSet => "skiplist",
            TypeTag::Json => "raw",
            TypeTag::TimeSeries => "raw",
            TypeTag::Stream => "stream",
            TypeTag::Geo => "skiplist",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Sorted-set metadata
// =============================================================================

/// Per-key sorted-set metadata: cardinality plus a version counter that
/// increments on every ZADD. Index entry keys carry the version they were
/// written under so a superseded row can be deleted by exact key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZSetMeta {
    /// Number of members (equals the number of data entries).
    pub card: i64,
    /// Monotonic write counter.
    pub ver: u32,
}

/// A sorted-set data entry value: the order-preserving encoded score plus
/// the version under which the member's current index row was written.
///
/// 12 bytes: `score8 ‖ ver4`, both big-endian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZSetDataEntry {
    pub score_bytes: [u8; 8],
    pub ver: u32,
}

impl ZSetDataEntry {
    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.score_bytes);
        BigEndian::write_u32(&mut out[8..], self.ver);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<ZSetDataEntry> {
        if bytes.len() != 12 {
            return Err(Error::corruption(format!(
                "sorted-set data entry must be 12 bytes, got {}",
                bytes.len()
            )));
        }
        let mut score_bytes = [0u8; 8];
        score_bytes.copy_from_slice(&bytes[..8]);
        Ok(ZSetDataEntry {
            score_bytes,
            ver: BigEndian::read_u32(&bytes[8..]),
        })
    }
}

// =============================================================================
// Stream types
// =============================================================================

/// A stream entry ID: milliseconds plus a per-millisecond sequence.
///
/// Total order is `(ms, seq)` lexicographic; the textual form is `ms-seq`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// The smallest possible ID (`0-0`).
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    /// The largest possible ID.
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> StreamId {
        StreamId { ms, seq }
    }

    /// The immediately following ID, used for exclusive lower bounds.
    pub fn next(self) -> StreamId {
        if self.seq == u64::MAX {
            StreamId {
                ms: self.ms.saturating_add(1),
                seq: 0,
            }
        } else {
            StreamId {
                ms: self.ms,
                seq: self.seq + 1,
            }
        }
    }

    /// Fixed-width key suffix: 8-byte BE ms then 8-byte BE seq, so that
    /// forward prefix iteration visits entries in ID order.
    pub fn to_key_suffix(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        BigEndian::write_u64(&mut out[..8], self.ms);
        BigEndian::write_u64(&mut out[8..], self.seq);
        out
    }

    /// Parse an ID back out of a fixed-width key suffix.
    pub fn from_key_suffix(bytes: &[u8]) -> Result<StreamId> {
        if bytes.len() != 16 {
            return Err(Error::corruption(format!(
                "stream id suffix must be 16 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(StreamId {
            ms: BigEndian::read_u64(&bytes[..8]),
            seq: BigEndian::read_u64(&bytes[8..]),
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = Error;

    /// Parse `ms-seq`; a bare `ms` defaults the sequence to 0.
    fn from_str(s: &str) -> Result<StreamId> {
        let (ms_part, seq_part) = match s.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (s, None),
        };
        let ms: u64 = ms_part
            .parse()
            .map_err(|_| Error::parse(format!("invalid stream ID '{}'", s)))?;
        let seq: u64 = match seq_part {
            Some(seq) => seq
                .parse()
                .map_err(|_| Error::parse(format!("invalid stream ID '{}'", s)))?,
            None => 0,
        };
        Ok(StreamId { ms, seq })
    }
}

/// Per-stream metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Number of live data entries.
    pub length: u64,
    /// Smallest live entry ID; `0-0` while the stream is empty.
    pub first: StreamId,
    /// Largest ID ever assigned. New IDs must strictly exceed this even
    /// after the entry that carried it is deleted.
    pub last: StreamId,
}

/// A consumer group's durable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGroup {
    /// Last ID delivered to any consumer of the group.
    pub last_delivered: StreamId,
    /// Known consumer names (XGROUP DELCONSUMER removes one).
    pub consumers: Vec<String>,
}

/// One entry of a group's pending list: delivered but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// Number of times the entry has been delivered.
    pub delivery_count: u64,
    /// Wall-clock milliseconds of the latest delivery.
    pub last_delivery_ms: u64,
}

/// The pending map persisted per (stream, group).
pub type PendingMap = BTreeMap<StreamId, PendingEntry>;

// =============================================================================
// Time-series types
// =============================================================================

/// What TS.ADD does when a sample for the same timestamp already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Reject the write with an error.
    #[default]
    Block,
    /// Keep the stored sample, report success.
    Skip,
    /// Overwrite the stored sample.
    Update,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Result<DuplicatePolicy> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(DuplicatePolicy::Block),
            "skip" => Ok(DuplicatePolicy::Skip),
            "update" => Ok(DuplicatePolicy::Update),
            other => Err(Error::invalid_argument(format!(
                "unknown duplicate policy '{}'",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DuplicatePolicy::Block => "block",
            DuplicatePolicy::Skip => "skip",
            DuplicatePolicy::Update => "update",
        }
    }
}

/// Per-series metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TsMeta {
    /// Number of live samples.
    pub total_samples: u64,
    /// Timestamp (ms) of the oldest live sample.
    pub first: u64,
    /// Timestamp (ms) of the newest live sample.
    pub last: u64,
    /// Retention window in milliseconds; 0 keeps everything.
    pub retention_ms: u64,
    /// Duplicate-timestamp policy.
    pub duplicate_policy: DuplicatePolicy,
}

/// Encode one sample as 16 bytes: BE timestamp then BE f64 bits.
pub fn encode_ts_point(ts: u64, value: f64) -> [u8; 16] {
    let mut out = [0u8; 16];
    BigEndian::write_u64(&mut out[..8], ts);
    BigEndian::write_u64(&mut out[8..], value.to_bits());
    out
}

/// Decode a 16-byte sample back into `(timestamp, value)`.
pub fn decode_ts_point(bytes: &[u8]) -> Result<(u64, f64)> {
    if bytes.len() != 16 {
        return Err(Error::corruption(format!(
            "time-series point must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    let ts = BigEndian::read_u64(&bytes[..8]);
    let value = f64::from_bits(BigEndian::read_u64(&bytes[8..]));
    Ok((ts, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_round_trip() {
        for tag in [
            TypeTag::String,
            TypeTag::List,
            TypeTag::Hash,
            TypeTag::Set,
            TypeTag::SortedSet,
            TypeTag::Json,
            TypeTag::TimeSeries,
            TypeTag::Stream,
            TypeTag::Geo,
        ] {
            assert_eq!(TypeTag::from_bytes(tag.as_bytes()).unwrap(), tag);
        }
    }

    #[test]
    fn test_type_tag_disk_values_frozen() {
        // Persisted layout: these byte values must never change.
        assert_eq!(TypeTag::String.as_bytes(), b"STRING");
        assert_eq!(TypeTag::SortedSet.as_bytes(), b"zset");
        assert_eq!(TypeTag::Json.as_bytes(), b"json");
        assert_eq!(TypeTag::TimeSeries.as_bytes(), b"ts");
        assert_eq!(TypeTag::Geo.as_bytes(), b"GEOHASH");
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let e = TypeTag::from_bytes(b"BLOB").unwrap_err();
        assert!(e.is_serious());
    }

    #[test]
    fn test_stream_id_ordering_matches_suffix_order() {
        let a = StreamId::new(1, 5);
        let b = StreamId::new(1, 6);
        let c = StreamId::new(2, 0);
        assert!(a < b && b < c);
        assert!(a.to_key_suffix() < b.to_key_suffix());
        assert!(b.to_key_suffix() < c.to_key_suffix());
    }

    #[test]
    fn test_stream_id_suffix_round_trip() {
        let id = StreamId::new(1_726_000_123, 42);
        let parsed = StreamId::from_key_suffix(&id.to_key_suffix()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_stream_id_parse_forms() {
        assert_eq!("5-3".parse::<StreamId>().unwrap(), StreamId::new(5, 3));
        assert_eq!("5".parse::<StreamId>().unwrap(), StreamId::new(5, 0));
        assert!("abc".parse::<StreamId>().is_err());
        assert!("1-x".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_stream_id_next_carries_over() {
        assert_eq!(StreamId::new(3, 7).next(), StreamId::new(3, 8));
        assert_eq!(StreamId::new(3, u64::MAX).next(), StreamId::new(4, 0));
    }

    #[test]
    fn test_zset_data_entry_round_trip() {
        let entry = ZSetDataEntry {
            score_bytes: [0x80, 0, 0, 0, 0, 0, 0, 1],
            ver: 9,
        };
        let decoded = ZSetDataEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_zset_data_entry_rejects_wrong_length() {
        assert!(ZSetDataEntry::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_ts_point_round_trip() {
        let (ts, v) = decode_ts_point(&encode_ts_point(1234, -2.5)).unwrap();
        assert_eq!(ts, 1234);
        assert_eq!(v, -2.5);
    }

    #[test]
    fn test_meta_bincode_round_trip() {
        let meta = ZSetMeta { card: 3, ver: 17 };
        let bytes = bincode::serialize(&meta).unwrap();
        let back: ZSetMeta = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, meta);

        let smeta = StreamMeta {
            length: 2,
            first: StreamId::new(1, 0),
            last: StreamId::new(9, 4),
        };
        let bytes = bincode::serialize(&smeta).unwrap();
        let back: StreamMeta = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, smeta);
    }

    #[test]
    fn test_duplicate_policy_parse() {
        assert_eq!(
            DuplicatePolicy::parse("BLOCK").unwrap(),
            DuplicatePolicy::Block
        );
        assert_eq!(
            DuplicatePolicy::parse("update").unwrap(),
            DuplicatePolicy::Update
        );
        assert!(DuplicatePolicy::parse("last").is_err());
    }
}
