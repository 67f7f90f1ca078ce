//! Command dispatch: RESP argv in, reply frame out.
//!
//! The dispatcher owns no state beyond the engine facades; every command
//! is a translation from argv to one typed engine call plus a reply
//! shape. Argument validation happens here (arity, option syntax); data
//! validation (types, ranges) happens in the engine and maps back
//! through [`error_frame`].

use crate::resp::Frame;
use quartz_core::error::{Error, Result};
use quartz_core::geohash::Unit;
use quartz_core::time::now_ns;
use quartz_core::types::{DuplicatePolicy, StreamId, TypeTag};
use quartz_engine::{
    Aggregate, BitOp, BitfieldCommand, BitfieldSpec, Database, Geo, GeoResult, GeoSearchBy,
    GeoSearchFrom, GroupRead, Hashes, JsonStore, Keyspace, LexBound, Lists, Overflow, ScoreBound,
    SetCondition, Sets, SortedSets, StreamEntry, Streams, Strings, TimeSeries, XAddId,
    ZStoreAlgebra,
};
use std::sync::Arc;
use std::time::Duration;

/// All engine facades, cloned per connection task.
#[derive(Clone)]
pub struct Handles {
    pub strings: Strings,
    pub hashes: Hashes,
    pub lists: Lists,
    pub sets: Sets,
    pub zsets: SortedSets,
    pub streams: Streams,
    pub timeseries: TimeSeries,
    pub json: JsonStore,
    pub geo: Geo,
    pub keyspace: Keyspace,
}

impl Handles {
    pub fn new(db: Arc<Database>) -> Handles {
        Handles {
            strings: Strings::new(db.clone()),
            hashes: Hashes::new(db.clone()),
            lists: Lists::new(db.clone()),
            sets: Sets::new(db.clone()),
            zsets: SortedSets::new(db.clone()),
            streams: Streams::new(db.clone()),
            timeseries: TimeSeries::new(db.clone()),
            json: JsonStore::new(db.clone()),
            geo: Geo::new(db.clone()),
            keyspace: Keyspace::new(db),
        }
    }
}

/// Execute one command.
pub fn dispatch(h: &Handles, args: &[Vec<u8>]) -> Frame {
    if args.is_empty() {
        return Frame::Error("ERR empty command".into());
    }
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match run(h, &name, &args[1..]) {
        Ok(frame) => frame,
        Err(e) => error_frame(&e),
    }
}

fn error_frame(e: &Error) -> Frame {
    match e {
        Error::WrongType { .. } => Frame::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
        ),
        Error::NotFound { .. } => Frame::Error("ERR no such key".into()),
        Error::Parse { message }
        | Error::Range { message }
        | Error::Conflict { message }
        | Error::Corruption { message }
        | Error::Protocol { message }
        | Error::InvalidArgument { message } => {
            // Some engine messages already carry their reply code.
            if message.starts_with("BUSYGROUP")
                || message.starts_with("NOGROUP")
                || message.starts_with("BUSYKEY")
            {
                Frame::Error(message.clone())
            } else {
                Frame::Error(format!("ERR {}", message))
            }
        }
        Error::Io { message, .. } => Frame::Error(format!("ERR io error: {}", message)),
    }
}

fn run(h: &Handles, name: &str, a: &[Vec<u8>]) -> Result<Frame> {
    match name {
        // Connection / server
        "PING" => Ok(match a.first() {
            None => Frame::Simple("PONG".into()),
            Some(msg) => Frame::bulk(msg.clone()),
        }),
        "ECHO" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk(a[0].clone()))
        }
        "TIME" => {
            let ns = now_ns();
            Ok(Frame::Array(vec![
                Frame::bulk((ns / 1_000_000_000).to_string()),
                Frame::bulk(((ns % 1_000_000_000) / 1_000).to_string()),
            ]))
        }
        "SELECT" => {
            exact(a, 1, name)?;
            Ok(Frame::ok())
        }
        "COMMAND" => Ok(Frame::Array(Vec::new())),
        "QUIT" => Ok(Frame::ok()),

        // Strings
        "SET" => cmd_set(h, a),
        "SETEX" => {
            exact(a, 3, name)?;
            let secs = expire_arg(&a[1], "setex")?;
            h.strings
                .set_with_expiry(&a[0], &a[2], Some(Duration::from_secs(secs)))?;
            Ok(Frame::ok())
        }
        "PSETEX" => {
            exact(a, 3, name)?;
            let ms = expire_arg(&a[1], "psetex")?;
            h.strings
                .set_with_expiry(&a[0], &a[2], Some(Duration::from_millis(ms)))?;
            Ok(Frame::ok())
        }
        "SETNX" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.strings.setnx(&a[0], &a[1])? as i64))
        }
        "GET" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk_or_null(h.strings.get(&a[0])?))
        }
        "GETSET" => {
            exact(a, 2, name)?;
            Ok(Frame::bulk_or_null(h.strings.getset(&a[0], &a[1])?))
        }
        "MGET" => {
            at_least(a, 1, name)?;
            let values = h.strings.mget(a)?;
            Ok(Frame::Array(
                values.into_iter().map(Frame::bulk_or_null).collect(),
            ))
        }
        "MSET" => {
            pairs_arity(a, name)?;
            h.strings.mset(&to_pairs(a))?;
            Ok(Frame::ok())
        }
        "MSETNX" => {
            pairs_arity(a, name)?;
            Ok(Frame::Integer(h.strings.msetnx(&to_pairs(a))? as i64))
        }
        "INCR" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.strings.incr_by(&a[0], 1)?))
        }
        "DECR" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.strings.incr_by(&a[0], -1)?))
        }
        "INCRBY" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.strings.incr_by(&a[0], i64_arg(&a[1])?)?))
        }
        "DECRBY" => {
            exact(a, 2, name)?;
            let delta = i64_arg(&a[1])?
                .checked_neg()
                .ok_or_else(|| Error::range("decrement would overflow"))?;
            Ok(Frame::Integer(h.strings.incr_by(&a[0], delta)?))
        }
        "INCRBYFLOAT" => {
            exact(a, 2, name)?;
            Ok(Frame::Bulk(h.strings.incr_by_float(&a[0], f64_arg(&a[1])?)?))
        }
        "APPEND" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.strings.append(&a[0], &a[1])? as i64))
        }
        "STRLEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.strings.strlen(&a[0])? as i64))
        }
        "BITLEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.strings.bitlen(&a[0])? as i64))
        }
        "GETRANGE" => {
            exact(a, 3, name)?;
            Ok(Frame::Bulk(h.strings.getrange(
                &a[0],
                i64_arg(&a[1])?,
                i64_arg(&a[2])?,
            )?))
        }
        "SETRANGE" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(
                h.strings.setrange(&a[0], u64_arg(&a[1])?, &a[2])? as i64,
            ))
        }
        "GETBIT" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.strings.getbit(&a[0], u64_arg(&a[1])?)? as i64))
        }
        "SETBIT" => {
            exact(a, 3, name)?;
            let bit = match u64_arg(&a[2])? {
                0 => false,
                1 => true,
                _ => return Err(Error::invalid_argument("bit is not an integer or out of range")),
            };
            Ok(Frame::Integer(
                h.strings.setbit(&a[0], u64_arg(&a[1])?, bit)? as i64,
            ))
        }
        "BITCOUNT" => {
            let range = match a.len() {
                1 => None,
                3 => Some((i64_arg(&a[1])?, i64_arg(&a[2])?)),
                _ => return Err(wrong_arity(name)),
            };
            Ok(Frame::Integer(h.strings.bitcount(&a[0], range)? as i64))
        }
        "BITOP" => {
            at_least(a, 3, name)?;
            let op = BitOp::parse(&String::from_utf8_lossy(&a[0]))?;
            Ok(Frame::Integer(
                h.strings.bitop(op, &a[1], &a[2..].to_vec())? as i64,
            ))
        }
        "BITPOS" => {
            at_least(a, 2, name)?;
            let bit = match u64_arg(&a[1])? {
                0 => false,
                1 => true,
                _ => return Err(Error::invalid_argument("The bit argument must be 1 or 0")),
            };
            let start = a.get(2).map(|v| i64_arg(v)).transpose()?;
            let end = a.get(3).map(|v| i64_arg(v)).transpose()?;
            Ok(Frame::Integer(h.strings.bitpos(&a[0], bit, start, end)?))
        }
        "BITFIELD" => cmd_bitfield(h, a),

        // Hashes
        "HSET" | "HMSET" => {
            at_least(a, 3, name)?;
            pairs_arity(&a[1..], name)?;
            let created = h.hashes.hset(&a[0], &to_pairs(&a[1..]))?;
            if name == "HMSET" {
                Ok(Frame::ok())
            } else {
                Ok(Frame::Integer(created as i64))
            }
        }
        "HSETNX" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(h.hashes.hsetnx(&a[0], &a[1], &a[2])? as i64))
        }
        "HGET" => {
            exact(a, 2, name)?;
            Ok(Frame::bulk_or_null(h.hashes.hget(&a[0], &a[1])?))
        }
        "HMGET" => {
            at_least(a, 2, name)?;
            let values = h.hashes.hmget(&a[0], &a[1..].to_vec())?;
            Ok(Frame::Array(
                values.into_iter().map(Frame::bulk_or_null).collect(),
            ))
        }
        "HDEL" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.hashes.hdel(&a[0], &a[1..].to_vec())? as i64))
        }
        "HLEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.hashes.hlen(&a[0])? as i64))
        }
        "HEXISTS" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.hashes.hexists(&a[0], &a[1])? as i64))
        }
        "HSTRLEN" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.hashes.hstrlen(&a[0], &a[1])? as i64))
        }
        "HGETALL" => {
            exact(a, 1, name)?;
            let mut out = Vec::new();
            for (field, value) in h.hashes.hgetall(&a[0])? {
                out.push(Frame::Bulk(field));
                out.push(Frame::Bulk(value));
            }
            Ok(Frame::Array(out))
        }
        "HKEYS" => {
            exact(a, 1, name)?;
            Ok(bulk_array(h.hashes.hkeys(&a[0])?))
        }
        "HVALS" => {
            exact(a, 1, name)?;
            Ok(bulk_array(h.hashes.hvals(&a[0])?))
        }
        "HINCRBY" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(h.hashes.hincrby(
                &a[0],
                &a[1],
                i64_arg(&a[2])?,
            )?))
        }
        "HINCRBYFLOAT" => {
            exact(a, 3, name)?;
            Ok(Frame::Bulk(h.hashes.hincrbyfloat(
                &a[0],
                &a[1],
                f64_arg(&a[2])?,
            )?))
        }

        // Lists
        "LPUSH" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.lists.lpush(&a[0], &a[1..].to_vec())? as i64))
        }
        "RPUSH" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.lists.rpush(&a[0], &a[1..].to_vec())? as i64))
        }
        "LPUSHX" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.lists.lpushx(&a[0], &a[1..].to_vec())? as i64))
        }
        "RPUSHX" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.lists.rpushx(&a[0], &a[1..].to_vec())? as i64))
        }
        "LPOP" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk_or_null(h.lists.lpop(&a[0])?))
        }
        "RPOP" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk_or_null(h.lists.rpop(&a[0])?))
        }
        "RPOPLPUSH" => {
            exact(a, 2, name)?;
            Ok(Frame::bulk_or_null(h.lists.rpoplpush(&a[0], &a[1])?))
        }
        "BLPOP" | "BRPOP" => {
            at_least(a, 2, name)?;
            let timeout_ms = timeout_arg(&a[a.len() - 1])?;
            let keys = a[..a.len() - 1].to_vec();
            let popped = if name == "BLPOP" {
                h.lists.blpop(&keys, timeout_ms)?
            } else {
                h.lists.brpop(&keys, timeout_ms)?
            };
            Ok(match popped {
                Some((key, value)) => Frame::Array(vec![Frame::Bulk(key), Frame::Bulk(value)]),
                None => Frame::NullArray,
            })
        }
        "BRPOPLPUSH" => {
            exact(a, 3, name)?;
            let timeout_ms = timeout_arg(&a[2])?;
            Ok(Frame::bulk_or_null(h.lists.brpoplpush(
                &a[0],
                &a[1],
                timeout_ms,
            )?))
        }
        "LLEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.lists.llen(&a[0])? as i64))
        }
        "LINDEX" => {
            exact(a, 2, name)?;
            Ok(Frame::bulk_or_null(h.lists.lindex(&a[0], i64_arg(&a[1])?)?))
        }
        "LRANGE" => {
            exact(a, 3, name)?;
            Ok(bulk_array(h.lists.lrange(
                &a[0],
                i64_arg(&a[1])?,
                i64_arg(&a[2])?,
            )?))
        }
        "LSET" => {
            exact(a, 3, name)?;
            h.lists.lset(&a[0], i64_arg(&a[1])?, &a[2])?;
            Ok(Frame::ok())
        }
        "LTRIM" => {
            exact(a, 3, name)?;
            h.lists.ltrim(&a[0], i64_arg(&a[1])?, i64_arg(&a[2])?)?;
            Ok(Frame::ok())
        }
        "LINSERT" => {
            exact(a, 4, name)?;
            let before = match String::from_utf8_lossy(&a[1]).to_ascii_uppercase().as_str() {
                "BEFORE" => true,
                "AFTER" => false,
                _ => return Err(Error::invalid_argument("syntax error")),
            };
            Ok(Frame::Integer(h.lists.linsert(&a[0], before, &a[2], &a[3])?))
        }
        "LREM" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(
                h.lists.lrem(&a[0], i64_arg(&a[1])?, &a[2])? as i64,
            ))
        }

        // Sets
        "SADD" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.sets.sadd(&a[0], &a[1..].to_vec())? as i64))
        }
        "SREM" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.sets.srem(&a[0], &a[1..].to_vec())? as i64))
        }
        "SCARD" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.sets.scard(&a[0])? as i64))
        }
        "SISMEMBER" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.sets.sismember(&a[0], &a[1])? as i64))
        }
        "SMEMBERS" => {
            exact(a, 1, name)?;
            Ok(bulk_array(h.sets.smembers(&a[0])?))
        }
        "SPOP" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk_or_null(h.sets.spop(&a[0])?))
        }
        "SRANDMEMBER" => {
            let count = match a.len() {
                1 => None,
                2 => Some(i64_arg(&a[1])?),
                _ => return Err(wrong_arity(name)),
            };
            let members = h.sets.srandmember(&a[0], count)?;
            Ok(match count {
                None => Frame::bulk_or_null(members.into_iter().next()),
                Some(_) => bulk_array(members),
            })
        }
        "SMOVE" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(h.sets.smove(&a[0], &a[1], &a[2])? as i64))
        }
        "SINTER" => {
            at_least(a, 1, name)?;
            Ok(bulk_array(h.sets.sinter(a)?))
        }
        "SUNION" => {
            at_least(a, 1, name)?;
            Ok(bulk_array(h.sets.sunion(a)?))
        }
        "SDIFF" => {
            at_least(a, 1, name)?;
            Ok(bulk_array(h.sets.sdiff(a)?))
        }
        "SINTERSTORE" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(
                h.sets.sinterstore(&a[0], &a[1..].to_vec())? as i64,
            ))
        }
        "SUNIONSTORE" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(
                h.sets.sunionstore(&a[0], &a[1..].to_vec())? as i64,
            ))
        }
        "SDIFFSTORE" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(
                h.sets.sdiffstore(&a[0], &a[1..].to_vec())? as i64,
            ))
        }

        // Sorted sets
        "ZADD" => {
            at_least(a, 3, name)?;
            pairs_arity(&a[1..], name)?;
            let mut pairs = Vec::new();
            for chunk in a[1..].chunks(2) {
                pairs.push((f64_arg(&chunk[0])?, chunk[1].clone()));
            }
            Ok(Frame::Integer(h.zsets.zadd(&a[0], &pairs)? as i64))
        }
        "ZINCRBY" => {
            exact(a, 3, name)?;
            let next = h.zsets.zincrby(&a[0], f64_arg(&a[1])?, &a[2])?;
            Ok(Frame::Bulk(format_score(next)))
        }
        "ZREM" => {
            at_least(a, 2, name)?;
            Ok(Frame::Integer(h.zsets.zrem(&a[0], &a[1..].to_vec())? as i64))
        }
        "ZCARD" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.zsets.zcard(&a[0])? as i64))
        }
        "ZSCORE" => {
            exact(a, 2, name)?;
            Ok(Frame::bulk_or_null(
                h.zsets.zscore(&a[0], &a[1])?.map(format_score),
            ))
        }
        "ZMSCORE" => {
            at_least(a, 2, name)?;
            let scores = h.zsets.zmscore(&a[0], &a[1..].to_vec())?;
            Ok(Frame::Array(
                scores
                    .into_iter()
                    .map(|s| Frame::bulk_or_null(s.map(format_score)))
                    .collect(),
            ))
        }
        "ZRANGE" | "ZREVRANGE" => {
            at_least(a, 3, name)?;
            let withscores = flag_at(a, 3, "WITHSCORES")?;
            let members = h.zsets.zrange(
                &a[0],
                i64_arg(&a[1])?,
                i64_arg(&a[2])?,
                name == "ZREVRANGE",
            )?;
            Ok(scored_array(members, withscores))
        }
        "ZRANGEBYSCORE" | "ZREVRANGEBYSCORE" => cmd_zrangebyscore(h, name, a),
        "ZRANK" | "ZREVRANK" => {
            exact(a, 2, name)?;
            Ok(match h.zsets.zrank(&a[0], &a[1], name == "ZREVRANK")? {
                Some(rank) => Frame::Integer(rank as i64),
                None => Frame::Null,
            })
        }
        "ZCOUNT" => {
            exact(a, 3, name)?;
            let min = ScoreBound::parse(&String::from_utf8_lossy(&a[1]))?;
            let max = ScoreBound::parse(&String::from_utf8_lossy(&a[2]))?;
            Ok(Frame::Integer(h.zsets.zcount(&a[0], min, max)? as i64))
        }
        "ZPOPMIN" | "ZPOPMAX" => {
            at_least(a, 1, name)?;
            let count = a.get(1).map(|v| u64_arg(v)).transpose()?.unwrap_or(1);
            let popped = h.zsets.zpop(&a[0], count, name == "ZPOPMAX")?;
            Ok(scored_array(popped, true))
        }
        "ZREMRANGEBYRANK" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(h.zsets.zremrangebyrank(
                &a[0],
                i64_arg(&a[1])?,
                i64_arg(&a[2])?,
            )? as i64))
        }
        "ZREMRANGEBYSCORE" => {
            exact(a, 3, name)?;
            let min = ScoreBound::parse(&String::from_utf8_lossy(&a[1]))?;
            let max = ScoreBound::parse(&String::from_utf8_lossy(&a[2]))?;
            Ok(Frame::Integer(h.zsets.zremrangebyscore(&a[0], min, max)? as i64))
        }
        "ZRANGEBYLEX" | "ZREVRANGEBYLEX" => {
            at_least(a, 3, name)?;
            let rev = name == "ZREVRANGEBYLEX";
            let (lo, hi) = if rev { (&a[2], &a[1]) } else { (&a[1], &a[2]) };
            let min = LexBound::parse(lo)?;
            let max = LexBound::parse(hi)?;
            let limit = parse_limit(&a[3..])?;
            Ok(bulk_array(h.zsets.zrangebylex(&a[0], &min, &max, rev, limit)?))
        }
        "ZLEXCOUNT" => {
            exact(a, 3, name)?;
            let min = LexBound::parse(&a[1])?;
            let max = LexBound::parse(&a[2])?;
            Ok(Frame::Integer(h.zsets.zlexcount(&a[0], &min, &max)? as i64))
        }
        "ZREMRANGEBYLEX" => {
            exact(a, 3, name)?;
            let min = LexBound::parse(&a[1])?;
            let max = LexBound::parse(&a[2])?;
            Ok(Frame::Integer(h.zsets.zremrangebylex(&a[0], &min, &max)? as i64))
        }
        "ZUNIONSTORE" => cmd_zstore(h, a, ZStoreAlgebra::Union),
        "ZINTERSTORE" => cmd_zstore(h, a, ZStoreAlgebra::Inter),
        "ZDIFFSTORE" => cmd_zstore(h, a, ZStoreAlgebra::Diff),

        // Streams
        "XADD" => cmd_xadd(h, a),
        "XLEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.streams.xlen(&a[0])? as i64))
        }
        "XRANGE" | "XREVRANGE" => {
            at_least(a, 3, name)?;
            let rev = name == "XREVRANGE";
            let (lo, hi) = if rev { (&a[2], &a[1]) } else { (&a[1], &a[2]) };
            let start = range_id(lo, true)?;
            let end = range_id(hi, false)?;
            let count = match a.get(3) {
                None => None,
                Some(word) if word.eq_ignore_ascii_case(b"COUNT") => {
                    Some(u64_arg(a.get(4).ok_or_else(|| wrong_arity(name))?)?)
                }
                Some(_) => return Err(Error::invalid_argument("syntax error")),
            };
            let entries = h.streams.xrange(&a[0], start, end, count, rev)?;
            Ok(Frame::Array(entries.iter().map(entry_frame).collect()))
        }
        "XDEL" => {
            at_least(a, 2, name)?;
            let ids = a[1..]
                .iter()
                .map(|v| id_arg(v))
                .collect::<Result<Vec<_>>>()?;
            Ok(Frame::Integer(h.streams.xdel(&a[0], &ids)? as i64))
        }
        "XTRIM" => {
            at_least(a, 3, name)?;
            if !a[1].eq_ignore_ascii_case(b"MAXLEN") {
                return Err(Error::invalid_argument("syntax error"));
            }
            let maxlen_at = if a[2] == b"~".to_vec() || a[2] == b"=".to_vec() { 3 } else { 2 };
            let maxlen = u64_arg(a.get(maxlen_at).ok_or_else(|| wrong_arity(name))?)?;
            Ok(Frame::Integer(h.streams.xtrim(&a[0], maxlen)? as i64))
        }
        "XREAD" => cmd_xread(h, a),
        "XGROUP" => cmd_xgroup(h, a),
        "XREADGROUP" => cmd_xreadgroup(h, a),
        "XACK" => {
            at_least(a, 3, name)?;
            let ids = a[2..]
                .iter()
                .map(|v| id_arg(v))
                .collect::<Result<Vec<_>>>()?;
            Ok(Frame::Integer(h.streams.xack(&a[0], &a[1], &ids)? as i64))
        }
        "XPENDING" => cmd_xpending(h, a),
        "XCLAIM" => cmd_xclaim(h, a),
        "XAUTOCLAIM" => cmd_xautoclaim(h, a),
        "XINFO" => cmd_xinfo(h, a),

        // Time series
        "TS.CREATE" => cmd_ts_create(h, a),
        "TS.ADD" => {
            at_least(a, 3, name)?;
            let ts = if a[1] == b"*".to_vec() {
                None
            } else {
                Some(u64_arg(&a[1])?)
            };
            Ok(Frame::Integer(
                h.timeseries.add(&a[0], ts, f64_arg(&a[2])?)? as i64,
            ))
        }
        "TS.GET" => {
            exact(a, 1, name)?;
            Ok(match h.timeseries.get(&a[0])? {
                Some((ts, value)) => sample_frame(ts, value),
                None => Frame::Array(Vec::new()),
            })
        }
        "TS.RANGE" => {
            at_least(a, 3, name)?;
            let from = ts_bound(&a[1], 0)?;
            let to = ts_bound(&a[2], u64::MAX)?;
            let count = match a.get(3) {
                None => None,
                Some(word) if word.eq_ignore_ascii_case(b"COUNT") => {
                    Some(u64_arg(a.get(4).ok_or_else(|| wrong_arity(name))?)?)
                }
                Some(_) => return Err(Error::invalid_argument("syntax error")),
            };
            let samples = h.timeseries.range(&a[0], from, to, count)?;
            Ok(Frame::Array(
                samples
                    .into_iter()
                    .map(|(ts, value)| sample_frame(ts, value))
                    .collect(),
            ))
        }
        "TS.DEL" => {
            exact(a, 3, name)?;
            Ok(Frame::Integer(h.timeseries.del(
                &a[0],
                u64_arg(&a[1])?,
                u64_arg(&a[2])?,
            )? as i64))
        }
        "TS.MGET" => {
            at_least(a, 1, name)?;
            let samples = h.timeseries.mget(a)?;
            Ok(Frame::Array(
                samples
                    .into_iter()
                    .map(|(key, sample)| {
                        Frame::Array(vec![
                            Frame::Bulk(key),
                            match sample {
                                Some((ts, value)) => sample_frame(ts, value),
                                None => Frame::Array(Vec::new()),
                            },
                        ])
                    })
                    .collect(),
            ))
        }
        "TS.INFO" => {
            exact(a, 1, name)?;
            let meta = h.timeseries.info(&a[0])?;
            Ok(Frame::Array(vec![
                Frame::bulk("totalSamples"),
                Frame::Integer(meta.total_samples as i64),
                Frame::bulk("firstTimestamp"),
                Frame::Integer(meta.first as i64),
                Frame::bulk("lastTimestamp"),
                Frame::Integer(meta.last as i64),
                Frame::bulk("retentionTime"),
                Frame::Integer(meta.retention_ms as i64),
                Frame::bulk("duplicatePolicy"),
                Frame::bulk(meta.duplicate_policy.name()),
            ]))
        }
        "TS.LEN" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.timeseries.len(&a[0])? as i64))
        }

        // JSON
        "JSON.SET" => {
            exact(a, 3, name)?;
            h.json.set(&a[0], &String::from_utf8_lossy(&a[1]), &a[2])?;
            Ok(Frame::ok())
        }
        "JSON.GET" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(Frame::bulk_or_null(
                h.json.get(&a[0], path.as_deref().unwrap_or("$"))?,
            ))
        }
        "JSON.MGET" => {
            at_least(a, 2, name)?;
            let path = String::from_utf8_lossy(&a[a.len() - 1]).into_owned();
            let keys = a[..a.len() - 1].to_vec();
            let values = h.json.mget(&keys, &path)?;
            Ok(Frame::Array(
                values.into_iter().map(Frame::bulk_or_null).collect(),
            ))
        }
        "JSON.DEL" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(Frame::Integer(
                h.json.del(&a[0], path.as_deref().unwrap_or("$"))? as i64,
            ))
        }
        "JSON.TYPE" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(match h.json.type_of(&a[0], path.as_deref().unwrap_or("$"))? {
                Some(name) => Frame::bulk(name),
                None => Frame::Null,
            })
        }
        "JSON.ARRAPPEND" => {
            at_least(a, 3, name)?;
            Ok(Frame::Integer(h.json.arrappend(
                &a[0],
                &String::from_utf8_lossy(&a[1]),
                &a[2..].to_vec(),
            )? as i64))
        }
        "JSON.ARRLEN" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(
                match h.json.arrlen(&a[0], path.as_deref().unwrap_or("$"))? {
                    Some(len) => Frame::Integer(len as i64),
                    None => Frame::Null,
                },
            )
        }
        "JSON.OBJKEYS" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(
                match h.json.objkeys(&a[0], path.as_deref().unwrap_or("$"))? {
                    Some(keys) => bulk_array(keys.into_iter().map(String::into_bytes).collect()),
                    None => Frame::NullArray,
                },
            )
        }
        "JSON.NUMINCRBY" => {
            exact(a, 3, name)?;
            Ok(Frame::Bulk(h.json.numincrby(
                &a[0],
                &String::from_utf8_lossy(&a[1]),
                f64_arg(&a[2])?,
            )?))
        }
        "JSON.NUMMULTBY" => {
            exact(a, 3, name)?;
            Ok(Frame::Bulk(h.json.nummultby(
                &a[0],
                &String::from_utf8_lossy(&a[1]),
                f64_arg(&a[2])?,
            )?))
        }
        "JSON.CLEAR" => {
            at_least(a, 1, name)?;
            let path = a.get(1).map(|p| String::from_utf8_lossy(p).into_owned());
            Ok(Frame::Integer(
                h.json.clear(&a[0], path.as_deref().unwrap_or("$"))? as i64,
            ))
        }
        "JSON.DEBUG" => {
            at_least(a, 2, name)?;
            if !a[0].eq_ignore_ascii_case(b"MEMORY") {
                return Err(Error::invalid_argument("unknown JSON.DEBUG subcommand"));
            }
            Ok(Frame::Integer(h.json.debug_memory(&a[1])? as i64))
        }

        // Geo
        "GEOADD" => {
            at_least(a, 4, name)?;
            if (a.len() - 1) % 3 != 0 {
                return Err(Error::invalid_argument("syntax error"));
            }
            let mut items = Vec::new();
            for chunk in a[1..].chunks(3) {
                items.push((f64_arg(&chunk[0])?, f64_arg(&chunk[1])?, chunk[2].clone()));
            }
            Ok(Frame::Integer(h.geo.geoadd(&a[0], &items)? as i64))
        }
        "GEOPOS" => {
            at_least(a, 2, name)?;
            let positions = h.geo.geopos(&a[0], &a[1..].to_vec())?;
            Ok(Frame::Array(
                positions
                    .into_iter()
                    .map(|p| match p {
                        Some((lon, lat)) => Frame::Array(vec![
                            Frame::bulk(format_coord(lon)),
                            Frame::bulk(format_coord(lat)),
                        ]),
                        None => Frame::NullArray,
                    })
                    .collect(),
            ))
        }
        "GEOHASH" => {
            at_least(a, 2, name)?;
            let hashes = h.geo.geohash(&a[0], &a[1..].to_vec())?;
            Ok(Frame::Array(
                hashes
                    .into_iter()
                    .map(|s| Frame::bulk_or_null(s.map(String::into_bytes)))
                    .collect(),
            ))
        }
        "GEODIST" => {
            at_least(a, 3, name)?;
            let unit = match a.get(3) {
                Some(u) => Unit::parse(&String::from_utf8_lossy(u))?,
                None => Unit::Meters,
            };
            Ok(Frame::bulk_or_null(
                h.geo
                    .geodist(&a[0], &a[1], &a[2], unit)?
                    .map(|d| format!("{:.4}", d).into_bytes()),
            ))
        }
        "GEOSEARCH" => {
            at_least(a, 1, name)?;
            let (from, by, count, withcoord, withdist) = parse_geosearch(&a[1..])?;
            let results = h.geo.search(&a[0], &from, by, count)?;
            Ok(geo_results_frame(results, withcoord, withdist))
        }
        "GEOSEARCHSTORE" => {
            at_least(a, 2, name)?;
            let (from, by, count, _, _) = parse_geosearch(&a[2..])?;
            Ok(Frame::Integer(
                h.geo.searchstore(&a[0], &a[1], &from, by, count)? as i64,
            ))
        }
        "GEORADIUS" => {
            at_least(a, 5, name)?;
            let from = GeoSearchFrom::LonLat {
                lon: f64_arg(&a[1])?,
                lat: f64_arg(&a[2])?,
            };
            let by = GeoSearchBy::Radius {
                value: f64_arg(&a[3])?,
                unit: Unit::parse(&String::from_utf8_lossy(&a[4]))?,
            };
            let (count, withcoord, withdist) = parse_geo_flags(&a[5..])?;
            let results = h.geo.search(&a[0], &from, by, count)?;
            Ok(geo_results_frame(results, withcoord, withdist))
        }
        "GEORADIUSBYMEMBER" => {
            at_least(a, 4, name)?;
            let from = GeoSearchFrom::Member(a[1].clone());
            let by = GeoSearchBy::Radius {
                value: f64_arg(&a[2])?,
                unit: Unit::parse(&String::from_utf8_lossy(&a[3]))?,
            };
            let (count, withcoord, withdist) = parse_geo_flags(&a[4..])?;
            let results = h.geo.search(&a[0], &from, by, count)?;
            Ok(geo_results_frame(results, withcoord, withdist))
        }

        // Key-space admin
        "EXISTS" => {
            at_least(a, 1, name)?;
            Ok(Frame::Integer(h.keyspace.exists(a)? as i64))
        }
        "TYPE" => {
            exact(a, 1, name)?;
            Ok(Frame::Simple(
                h.keyspace
                    .type_of(&a[0])?
                    .map(TypeTag::name)
                    .unwrap_or("none")
                    .to_string(),
            ))
        }
        "DEL" | "UNLINK" => {
            at_least(a, 1, name)?;
            Ok(Frame::Integer(h.keyspace.del(a)? as i64))
        }
        "RENAME" => {
            exact(a, 2, name)?;
            h.keyspace.rename(&a[0], &a[1])?;
            Ok(Frame::ok())
        }
        "RENAMENX" => {
            exact(a, 2, name)?;
            Ok(Frame::Integer(h.keyspace.renamenx(&a[0], &a[1])? as i64))
        }
        "EXPIRE" | "PEXPIRE" => {
            exact(a, 2, name)?;
            let n = i64_arg(&a[1])?;
            if n <= 0 {
                // A deadline in the past deletes the key outright.
                let existed = h.keyspace.del(&[a[0].clone()])? > 0;
                return Ok(Frame::Integer(existed as i64));
            }
            let ttl = if name == "EXPIRE" {
                Duration::from_secs(n as u64)
            } else {
                Duration::from_millis(n as u64)
            };
            Ok(Frame::Integer(h.keyspace.expire(&a[0], ttl)? as i64))
        }
        "EXPIREAT" => {
            exact(a, 2, name)?;
            let deadline = u64_arg(&a[1])?.saturating_mul(1_000_000_000);
            Ok(Frame::Integer(h.keyspace.expire_at_ns(&a[0], deadline)? as i64))
        }
        "PEXPIREAT" => {
            exact(a, 2, name)?;
            let deadline = u64_arg(&a[1])?.saturating_mul(1_000_000);
            Ok(Frame::Integer(h.keyspace.expire_at_ns(&a[0], deadline)? as i64))
        }
        "TTL" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.keyspace.ttl(&a[0])?))
        }
        "PTTL" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.keyspace.pttl(&a[0])?))
        }
        "PERSIST" => {
            exact(a, 1, name)?;
            Ok(Frame::Integer(h.keyspace.persist(&a[0])? as i64))
        }
        "KEYS" => {
            exact(a, 1, name)?;
            Ok(bulk_array(h.keyspace.keys(&a[0])?))
        }
        "SCAN" => {
            at_least(a, 1, name)?;
            let cursor = u64_arg(&a[0])?;
            let mut pattern: Option<Vec<u8>> = None;
            let mut count = 10u64;
            let mut i = 1;
            while i < a.len() {
                if a[i].eq_ignore_ascii_case(b"MATCH") {
                    pattern = Some(a.get(i + 1).ok_or_else(|| wrong_arity(name))?.clone());
                    i += 2;
                } else if a[i].eq_ignore_ascii_case(b"COUNT") {
                    count = u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity(name))?)?;
                    i += 2;
                } else {
                    return Err(Error::invalid_argument("syntax error"));
                }
            }
            let (next, keys) = h.keyspace.scan(cursor, pattern.as_deref(), count)?;
            Ok(Frame::Array(vec![
                Frame::bulk(next.to_string()),
                bulk_array(keys),
            ]))
        }
        "RANDOMKEY" => Ok(Frame::bulk_or_null(h.keyspace.randomkey()?)),
        "OBJECT" => {
            at_least(a, 2, name)?;
            let sub = String::from_utf8_lossy(&a[0]).to_ascii_uppercase();
            match sub.as_str() {
                "ENCODING" => Ok(match h.keyspace.object_encoding(&a[1])? {
                    Some(enc) => Frame::bulk(enc),
                    None => Frame::Null,
                }),
                "IDLETIME" => Ok(match h.keyspace.object_idletime(&a[1])? {
                    Some(idle) => Frame::Integer(idle as i64),
                    None => Frame::Error("ERR no such key".into()),
                }),
                "REFCOUNT" => Ok(match h.keyspace.object_refcount(&a[1])? {
                    Some(count) => Frame::Integer(count as i64),
                    None => Frame::Error("ERR no such key".into()),
                }),
                _ => Err(Error::invalid_argument("unknown OBJECT subcommand")),
            }
        }
        "MEMORY" => {
            at_least(a, 2, name)?;
            if !a[0].eq_ignore_ascii_case(b"USAGE") {
                return Err(Error::invalid_argument("unknown MEMORY subcommand"));
            }
            Ok(match h.keyspace.memory_usage(&a[1])? {
                Some(bytes) => Frame::Integer(bytes as i64),
                None => Frame::Null,
            })
        }
        "DUMP" => {
            exact(a, 1, name)?;
            Ok(Frame::bulk_or_null(h.keyspace.dump(&a[0])?))
        }
        "RESTORE" => {
            at_least(a, 3, name)?;
            let ttl_ms = u64_arg(&a[1])?;
            let replace = a
                .get(3)
                .map(|w| w.eq_ignore_ascii_case(b"REPLACE"))
                .unwrap_or(false);
            h.keyspace.restore(&a[0], ttl_ms, &a[2], replace)?;
            Ok(Frame::ok())
        }

        _ => Err(Error::invalid_argument(format!(
            "unknown command '{}'",
            name
        ))),
    }
}

// =============================================================================
// Option-heavy commands
// =============================================================================

fn cmd_set(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 2, "SET")?;
    let mut ttl: Option<Duration> = None;
    let mut condition: Option<SetCondition> = None;
    let mut i = 2;
    while i < a.len() {
        let word = String::from_utf8_lossy(&a[i]).to_ascii_uppercase();
        match word.as_str() {
            "EX" => {
                let secs = expire_arg(a.get(i + 1).ok_or_else(|| wrong_arity("SET"))?, "set")?;
                ttl = Some(Duration::from_secs(secs));
                i += 2;
            }
            "PX" => {
                let ms = expire_arg(a.get(i + 1).ok_or_else(|| wrong_arity("SET"))?, "set")?;
                ttl = Some(Duration::from_millis(ms));
                i += 2;
            }
            "NX" if condition.is_none() => {
                condition = Some(SetCondition::IfAbsent);
                i += 1;
            }
            "XX" if condition.is_none() => {
                condition = Some(SetCondition::IfPresent);
                i += 1;
            }
            _ => return Err(Error::invalid_argument("syntax error")),
        }
    }
    match condition {
        None => {
            h.strings.set_with_expiry(&a[0], &a[1], ttl)?;
            Ok(Frame::ok())
        }
        // The precondition and the write run in one engine transaction;
        // checking exists() here first would reopen the NX/XX race.
        Some(condition) => {
            if h.strings.set_conditional(&a[0], &a[1], ttl, condition)? {
                Ok(Frame::ok())
            } else {
                Ok(Frame::Null)
            }
        }
    }
}

fn cmd_bitfield(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 1, "BITFIELD")?;
    let mut ops = Vec::new();
    let mut overflow = Overflow::Wrap;
    let mut i = 1;
    while i < a.len() {
        let word = String::from_utf8_lossy(&a[i]).to_ascii_uppercase();
        match word.as_str() {
            "OVERFLOW" => {
                let mode = a.get(i + 1).ok_or_else(|| wrong_arity("BITFIELD"))?;
                overflow = Overflow::parse(&String::from_utf8_lossy(mode))?;
                i += 2;
            }
            "GET" => {
                let spec = spec_arg(a.get(i + 1).ok_or_else(|| wrong_arity("BITFIELD"))?)?;
                let offset = offset_arg(
                    a.get(i + 2).ok_or_else(|| wrong_arity("BITFIELD"))?,
                    spec,
                )?;
                ops.push(BitfieldCommand::Get { spec, offset });
                i += 3;
            }
            "SET" => {
                let spec = spec_arg(a.get(i + 1).ok_or_else(|| wrong_arity("BITFIELD"))?)?;
                let offset = offset_arg(
                    a.get(i + 2).ok_or_else(|| wrong_arity("BITFIELD"))?,
                    spec,
                )?;
                let value = i64_arg(a.get(i + 3).ok_or_else(|| wrong_arity("BITFIELD"))?)?;
                ops.push(BitfieldCommand::Set {
                    spec,
                    offset,
                    value,
                    overflow,
                });
                i += 4;
            }
            "INCRBY" => {
                let spec = spec_arg(a.get(i + 1).ok_or_else(|| wrong_arity("BITFIELD"))?)?;
                let offset = offset_arg(
                    a.get(i + 2).ok_or_else(|| wrong_arity("BITFIELD"))?,
                    spec,
                )?;
                let delta = i64_arg(a.get(i + 3).ok_or_else(|| wrong_arity("BITFIELD"))?)?;
                ops.push(BitfieldCommand::IncrBy {
                    spec,
                    offset,
                    delta,
                    overflow,
                });
                i += 4;
            }
            _ => return Err(Error::invalid_argument("syntax error")),
        }
    }
    let replies = h.strings.bitfield(&a[0], &ops)?;
    Ok(Frame::Array(
        replies
            .into_iter()
            .map(|r| match r {
                Some(v) => Frame::Integer(v),
                None => Frame::Null,
            })
            .collect(),
    ))
}

fn cmd_zrangebyscore(h: &Handles, name: &str, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 3, name)?;
    let rev = name == "ZREVRANGEBYSCORE";
    let (lo, hi) = if rev { (&a[2], &a[1]) } else { (&a[1], &a[2]) };
    let min = ScoreBound::parse(&String::from_utf8_lossy(lo))?;
    let max = ScoreBound::parse(&String::from_utf8_lossy(hi))?;
    let mut withscores = false;
    let mut limit = None;
    let mut i = 3;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"WITHSCORES") {
            withscores = true;
            i += 1;
        } else if a[i].eq_ignore_ascii_case(b"LIMIT") {
            let off = i64_arg(a.get(i + 1).ok_or_else(|| wrong_arity(name))?)?;
            let cnt = i64_arg(a.get(i + 2).ok_or_else(|| wrong_arity(name))?)?;
            limit = Some((off, cnt));
            i += 3;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    let members = h.zsets.zrangebyscore(&a[0], min, max, rev, limit)?;
    Ok(scored_array(members, withscores))
}

fn cmd_zstore(h: &Handles, a: &[Vec<u8>], algebra: ZStoreAlgebra) -> Result<Frame> {
    at_least(a, 3, "ZUNIONSTORE")?;
    let numkeys = u64_arg(&a[1])? as usize;
    if numkeys == 0 || a.len() < 2 + numkeys {
        return Err(Error::invalid_argument(
            "at least 1 input key is needed for ZUNIONSTORE/ZINTERSTORE",
        ));
    }
    let keys = a[2..2 + numkeys].to_vec();
    let mut weights = Vec::new();
    let mut aggregate = Aggregate::Sum;
    let mut i = 2 + numkeys;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"WEIGHTS") {
            for j in 0..numkeys {
                weights.push(f64_arg(
                    a.get(i + 1 + j).ok_or_else(|| wrong_arity("ZUNIONSTORE"))?,
                )?);
            }
            i += 1 + numkeys;
        } else if a[i].eq_ignore_ascii_case(b"AGGREGATE") {
            let mode = a.get(i + 1).ok_or_else(|| wrong_arity("ZUNIONSTORE"))?;
            aggregate = Aggregate::parse(&String::from_utf8_lossy(mode))?;
            i += 2;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    Ok(Frame::Integer(
        h.zsets.zstore(&a[0], &keys, &weights, aggregate, algebra)? as i64,
    ))
}

fn cmd_xadd(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 4, "XADD")?;
    let mut i = 1;
    let mut maxlen = None;
    if a[i].eq_ignore_ascii_case(b"MAXLEN") {
        i += 1;
        if a.get(i).map(|w| w == b"~" || w == b"=").unwrap_or(false) {
            i += 1;
        }
        maxlen = Some(u64_arg(a.get(i).ok_or_else(|| wrong_arity("XADD"))?)?);
        i += 1;
    }
    let id_word = a.get(i).ok_or_else(|| wrong_arity("XADD"))?;
    let id = if id_word == b"*" {
        XAddId::Auto
    } else {
        XAddId::Explicit(id_arg(id_word)?)
    };
    i += 1;
    let rest = &a[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(wrong_arity("XADD"));
    }
    let fields = to_pairs(rest);
    let assigned = h.streams.xadd(&a[0], id, &fields, maxlen)?;
    Ok(Frame::bulk(assigned.to_string()))
}

fn cmd_xread(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    let mut count = None;
    let mut block_ms = None;
    let mut i = 0;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"COUNT") {
            count = Some(u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("XREAD"))?)?);
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"BLOCK") {
            block_ms = Some(u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("XREAD"))?)?);
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"STREAMS") {
            i += 1;
            break;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    let rest = &a[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(Error::invalid_argument(
            "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified",
        ));
    }
    let n = rest.len() / 2;
    let mut specs = Vec::with_capacity(n);
    for j in 0..n {
        let key = rest[j].clone();
        let id_word = &rest[n + j];
        let after = if id_word == b"$" {
            h.streams.last_id(&key)?
        } else {
            id_arg(id_word)?
        };
        specs.push((key, after));
    }
    let results = h.streams.xread(&specs, count, block_ms)?;
    Ok(xread_reply(results))
}

fn cmd_xgroup(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 2, "XGROUP")?;
    let sub = String::from_utf8_lossy(&a[0]).to_ascii_uppercase();
    match sub.as_str() {
        "CREATE" => {
            exact(&a[1..], 3, "XGROUP CREATE")?;
            let start = group_start(h, &a[1], &a[3])?;
            h.streams.xgroup_create(&a[1], &a[2], start)?;
            Ok(Frame::ok())
        }
        "DESTROY" => {
            exact(&a[1..], 2, "XGROUP DESTROY")?;
            Ok(Frame::Integer(h.streams.xgroup_destroy(&a[1], &a[2])? as i64))
        }
        "SETID" => {
            exact(&a[1..], 3, "XGROUP SETID")?;
            let start = group_start(h, &a[1], &a[3])?;
            h.streams.xgroup_setid(&a[1], &a[2], start)?;
            Ok(Frame::ok())
        }
        "DELCONSUMER" => {
            exact(&a[1..], 3, "XGROUP DELCONSUMER")?;
            Ok(Frame::Integer(h.streams.xgroup_delconsumer(
                &a[1],
                &a[2],
                &String::from_utf8_lossy(&a[3]),
            )? as i64))
        }
        _ => Err(Error::invalid_argument("unknown XGROUP subcommand")),
    }
}

/// `$` means "current last"; engine resolves None the same way, but the
/// explicit read keeps CREATE/SETID symmetrical.
fn group_start(h: &Handles, key: &[u8], word: &[u8]) -> Result<Option<StreamId>> {
    if word == b"$" {
        Ok(Some(h.streams.last_id(key)?))
    } else {
        Ok(Some(id_arg(word)?))
    }
}

fn cmd_xreadgroup(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 5, "XREADGROUP")?;
    if !a[0].eq_ignore_ascii_case(b"GROUP") {
        return Err(Error::invalid_argument(
            "Missing GROUP keyword or consumer/group name",
        ));
    }
    let group = a[1].clone();
    let consumer = String::from_utf8_lossy(&a[2]).into_owned();
    let mut count = None;
    let mut block_ms = None;
    let mut noack = false;
    let mut i = 3;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"COUNT") {
            count = Some(u64_arg(
                a.get(i + 1).ok_or_else(|| wrong_arity("XREADGROUP"))?,
            )?);
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"BLOCK") {
            block_ms = Some(u64_arg(
                a.get(i + 1).ok_or_else(|| wrong_arity("XREADGROUP"))?,
            )?);
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"NOACK") {
            noack = true;
            i += 1;
        } else if a[i].eq_ignore_ascii_case(b"STREAMS") {
            i += 1;
            break;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    let rest = &a[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(Error::invalid_argument("Unbalanced XREADGROUP list of streams"));
    }
    let n = rest.len() / 2;
    let mut specs = Vec::with_capacity(n);
    for j in 0..n {
        let id_word = &rest[n + j];
        let read = if id_word == b">" {
            GroupRead::New
        } else {
            GroupRead::History(id_arg(id_word)?)
        };
        specs.push((rest[j].clone(), read));
    }
    let results = h
        .streams
        .xreadgroup(&group, &consumer, &specs, count, noack, block_ms)?;
    Ok(xread_reply(results))
}

fn cmd_xpending(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 2, "XPENDING")?;
    if a.len() == 2 {
        let (count, min, max, consumers) = h.streams.xpending_summary(&a[0], &a[1])?;
        return Ok(Frame::Array(vec![
            Frame::Integer(count as i64),
            id_or_null(min),
            id_or_null(max),
            Frame::Array(
                consumers
                    .into_iter()
                    .map(|(name, n)| {
                        Frame::Array(vec![Frame::bulk(name), Frame::bulk(n.to_string())])
                    })
                    .collect(),
            ),
        ]));
    }
    at_least(a, 5, "XPENDING")?;
    let start = range_id(&a[2], true)?;
    let end = range_id(&a[3], false)?;
    let count = u64_arg(&a[4])?;
    let consumer = a.get(5).map(|c| String::from_utf8_lossy(c).into_owned());
    let rows = h
        .streams
        .xpending_detail(&a[0], &a[1], start, end, count, consumer.as_deref())?;
    Ok(Frame::Array(
        rows.into_iter()
            .map(|(id, consumer, idle, deliveries)| {
                Frame::Array(vec![
                    Frame::bulk(id.to_string()),
                    Frame::bulk(consumer),
                    Frame::Integer(idle as i64),
                    Frame::Integer(deliveries as i64),
                ])
            })
            .collect(),
    ))
}

fn cmd_xclaim(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 5, "XCLAIM")?;
    let min_idle = u64_arg(&a[3])?;
    let mut ids = Vec::new();
    let mut justid = false;
    for word in &a[4..] {
        if word.eq_ignore_ascii_case(b"JUSTID") {
            justid = true;
        } else {
            ids.push(id_arg(word)?);
        }
    }
    let claimed = h.streams.xclaim(
        &a[0],
        &a[1],
        &String::from_utf8_lossy(&a[2]),
        min_idle,
        &ids,
    )?;
    Ok(claimed_frame(claimed, justid))
}

fn cmd_xautoclaim(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 5, "XAUTOCLAIM")?;
    let min_idle = u64_arg(&a[3])?;
    let start = range_id(&a[4], true)?;
    let mut count = 100u64;
    let mut justid = false;
    let mut i = 5;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"COUNT") {
            count = u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("XAUTOCLAIM"))?)?;
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"JUSTID") {
            justid = true;
            i += 1;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    let (next, claimed) = h.streams.xautoclaim(
        &a[0],
        &a[1],
        &String::from_utf8_lossy(&a[2]),
        min_idle,
        start,
        count,
    )?;
    Ok(Frame::Array(vec![
        Frame::bulk(next.to_string()),
        claimed_frame(claimed, justid),
    ]))
}

fn cmd_xinfo(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 2, "XINFO")?;
    let sub = String::from_utf8_lossy(&a[0]).to_ascii_uppercase();
    match sub.as_str() {
        "STREAM" => {
            let info = h.streams.xinfo_stream(&a[1])?;
            Ok(Frame::Array(vec![
                Frame::bulk("length"),
                Frame::Integer(info.length as i64),
                Frame::bulk("first-entry-id"),
                Frame::bulk(info.first.to_string()),
                Frame::bulk("last-entry-id"),
                Frame::bulk(info.last.to_string()),
                Frame::bulk("groups"),
                Frame::Integer(info.groups as i64),
            ]))
        }
        "GROUPS" => {
            let groups = h.streams.xinfo_groups(&a[1])?;
            Ok(Frame::Array(
                groups
                    .into_iter()
                    .map(|(name, consumers, pending, last)| {
                        Frame::Array(vec![
                            Frame::bulk("name"),
                            Frame::bulk(name),
                            Frame::bulk("consumers"),
                            Frame::Integer(consumers as i64),
                            Frame::bulk("pending"),
                            Frame::Integer(pending as i64),
                            Frame::bulk("last-delivered-id"),
                            Frame::bulk(last.to_string()),
                        ])
                    })
                    .collect(),
            ))
        }
        _ => Err(Error::invalid_argument("unknown XINFO subcommand")),
    }
}

fn cmd_ts_create(h: &Handles, a: &[Vec<u8>]) -> Result<Frame> {
    at_least(a, 1, "TS.CREATE")?;
    let mut retention_ms = 0u64;
    let mut policy = DuplicatePolicy::Block;
    let mut i = 1;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"RETENTION") {
            retention_ms = u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("TS.CREATE"))?)?;
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"DUPLICATE_POLICY") {
            let word = a.get(i + 1).ok_or_else(|| wrong_arity("TS.CREATE"))?;
            policy = DuplicatePolicy::parse(&String::from_utf8_lossy(word))?;
            i += 2;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    h.timeseries.create(&a[0], retention_ms, policy)?;
    Ok(Frame::ok())
}

// =============================================================================
// Reply builders
// =============================================================================

fn bulk_array(items: Vec<Vec<u8>>) -> Frame {
    Frame::Array(items.into_iter().map(Frame::Bulk).collect())
}

fn scored_array(members: Vec<(Vec<u8>, f64)>, withscores: bool) -> Frame {
    let mut out = Vec::new();
    for (member, score) in members {
        out.push(Frame::Bulk(member));
        if withscores {
            out.push(Frame::bulk(format_score(score)));
        }
    }
    Frame::Array(out)
}

fn entry_frame(entry: &StreamEntry) -> Frame {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in &entry.fields {
        fields.push(Frame::bulk(field.clone()));
        fields.push(Frame::bulk(value.clone()));
    }
    Frame::Array(vec![
        Frame::bulk(entry.id.to_string()),
        Frame::Array(fields),
    ])
}

fn xread_reply(results: Vec<(Vec<u8>, Vec<StreamEntry>)>) -> Frame {
    if results.is_empty() {
        return Frame::NullArray;
    }
    Frame::Array(
        results
            .into_iter()
            .map(|(key, entries)| {
                Frame::Array(vec![
                    Frame::Bulk(key),
                    Frame::Array(entries.iter().map(entry_frame).collect()),
                ])
            })
            .collect(),
    )
}

fn claimed_frame(claimed: Vec<StreamEntry>, justid: bool) -> Frame {
    if justid {
        Frame::Array(
            claimed
                .into_iter()
                .map(|e| Frame::bulk(e.id.to_string()))
                .collect(),
        )
    } else {
        Frame::Array(claimed.iter().map(entry_frame).collect())
    }
}

fn sample_frame(ts: u64, value: f64) -> Frame {
    Frame::Array(vec![
        Frame::Integer(ts as i64),
        Frame::bulk(format_score(value)),
    ])
}

fn id_or_null(id: Option<StreamId>) -> Frame {
    match id {
        Some(id) => Frame::bulk(id.to_string()),
        None => Frame::Null,
    }
}

fn geo_results_frame(results: Vec<GeoResult>, withcoord: bool, withdist: bool) -> Frame {
    if !withcoord && !withdist {
        return bulk_array(results.into_iter().map(|r| r.member).collect());
    }
    Frame::Array(
        results
            .into_iter()
            .map(|r| {
                let mut row = vec![Frame::Bulk(r.member)];
                if withdist {
                    row.push(Frame::bulk(format!("{:.4}", r.dist_m)));
                }
                if withcoord {
                    row.push(Frame::Array(vec![
                        Frame::bulk(format_coord(r.lon)),
                        Frame::bulk(format_coord(r.lat)),
                    ]));
                }
                Frame::Array(row)
            })
            .collect(),
    )
}

// =============================================================================
// Argument parsing
// =============================================================================

fn exact(a: &[Vec<u8>], n: usize, name: &str) -> Result<()> {
    if a.len() != n {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn at_least(a: &[Vec<u8>], n: usize, name: &str) -> Result<()> {
    if a.len() < n {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn pairs_arity(a: &[Vec<u8>], name: &str) -> Result<()> {
    if a.is_empty() || a.len() % 2 != 0 {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn wrong_arity(name: &str) -> Error {
    Error::invalid_argument(format!(
        "wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn to_pairs(a: &[Vec<u8>]) -> Vec<(Vec<u8>, Vec<u8>)> {
    a.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect()
}

fn i64_arg(v: &[u8]) -> Result<i64> {
    std::str::from_utf8(v)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::parse("value is not an integer or out of range"))
}

fn u64_arg(v: &[u8]) -> Result<u64> {
    std::str::from_utf8(v)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::parse("value is not an integer or out of range"))
}

fn f64_arg(v: &[u8]) -> Result<f64> {
    std::str::from_utf8(v)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or_else(|| Error::parse("value is not a valid float"))
}

/// EX/PX/SETEX amounts: a non-positive expire is rejected, never written
/// as an already-passed deadline.
fn expire_arg(v: &[u8], command: &str) -> Result<u64> {
    let n = i64_arg(v)?;
    if n <= 0 {
        return Err(Error::invalid_argument(format!(
            "invalid expire time in '{}' command",
            command
        )));
    }
    Ok(n as u64)
}

/// Blocking timeouts arrive in (possibly fractional) seconds; 0 = forever.
fn timeout_arg(v: &[u8]) -> Result<u64> {
    let secs = std::str::from_utf8(v)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t >= 0.0)
        .ok_or_else(|| Error::parse("timeout is not a float or out of range"))?;
    Ok((secs * 1000.0) as u64)
}

fn id_arg(v: &[u8]) -> Result<StreamId> {
    String::from_utf8_lossy(v).parse()
}

/// XRANGE-style bounds: `-` is the minimum, `+` the maximum.
fn range_id(v: &[u8], low: bool) -> Result<StreamId> {
    if v == b"-" {
        return Ok(StreamId::MIN);
    }
    if v == b"+" {
        return Ok(StreamId::MAX);
    }
    let id = id_arg(v)?;
    // A bare ms upper bound covers its whole millisecond.
    if !low && !v.contains(&b'-') {
        Ok(StreamId::new(id.ms, u64::MAX))
    } else {
        Ok(id)
    }
}

fn ts_bound(v: &[u8], open: u64) -> Result<u64> {
    if v == b"-" || v == b"+" {
        Ok(open)
    } else {
        u64_arg(v)
    }
}

fn spec_arg(v: &[u8]) -> Result<BitfieldSpec> {
    BitfieldSpec::parse(&String::from_utf8_lossy(v))
}

/// Plain bit offsets, or `#`-prefixed type-width multiples.
fn offset_arg(v: &[u8], spec: BitfieldSpec) -> Result<u64> {
    match v.strip_prefix(b"#") {
        Some(rest) => Ok(u64_arg(rest)? * spec.bits as u64),
        None => u64_arg(v),
    }
}

fn flag_at(a: &[Vec<u8>], index: usize, flag: &str) -> Result<bool> {
    match a.get(index) {
        None => Ok(false),
        Some(word) if word.eq_ignore_ascii_case(flag.as_bytes()) => Ok(true),
        Some(_) => Err(Error::invalid_argument("syntax error")),
    }
}

fn parse_limit(a: &[Vec<u8>]) -> Result<Option<(i64, i64)>> {
    match a.first() {
        None => Ok(None),
        Some(word) if word.eq_ignore_ascii_case(b"LIMIT") => {
            if a.len() != 3 {
                return Err(Error::invalid_argument("syntax error"));
            }
            Ok(Some((i64_arg(&a[1])?, i64_arg(&a[2])?)))
        }
        Some(_) => Err(Error::invalid_argument("syntax error")),
    }
}

fn format_score(score: f64) -> Vec<u8> {
    format!("{}", score).into_bytes()
}

fn format_coord(v: f64) -> Vec<u8> {
    format!("{:.17}", v)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .as_bytes()
        .to_vec()
}

fn parse_geo_flags(a: &[Vec<u8>]) -> Result<(Option<u64>, bool, bool)> {
    let mut count = None;
    let mut withcoord = false;
    let mut withdist = false;
    let mut i = 0;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"COUNT") {
            count = Some(u64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?);
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"WITHCOORD") {
            withcoord = true;
            i += 1;
        } else if a[i].eq_ignore_ascii_case(b"WITHDIST") {
            withdist = true;
            i += 1;
        } else if a[i].eq_ignore_ascii_case(b"ASC") || a[i].eq_ignore_ascii_case(b"DESC") {
            // Results are distance-sorted ascending; DESC accepted, ignored.
            i += 1;
        } else {
            return Err(Error::invalid_argument("syntax error"));
        }
    }
    Ok((count, withcoord, withdist))
}

type GeoSearchArgs = (GeoSearchFrom, GeoSearchBy, Option<u64>, bool, bool);

fn parse_geosearch(a: &[Vec<u8>]) -> Result<GeoSearchArgs> {
    let mut from = None;
    let mut by = None;
    let mut rest_at = a.len();
    let mut i = 0;
    while i < a.len() {
        if a[i].eq_ignore_ascii_case(b"FROMMEMBER") {
            from = Some(GeoSearchFrom::Member(
                a.get(i + 1).ok_or_else(|| wrong_arity("GEOSEARCH"))?.clone(),
            ));
            i += 2;
        } else if a[i].eq_ignore_ascii_case(b"FROMLONLAT") {
            from = Some(GeoSearchFrom::LonLat {
                lon: f64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?,
                lat: f64_arg(a.get(i + 2).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?,
            });
            i += 3;
        } else if a[i].eq_ignore_ascii_case(b"BYRADIUS") {
            by = Some(GeoSearchBy::Radius {
                value: f64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?,
                unit: Unit::parse(&String::from_utf8_lossy(
                    a.get(i + 2).ok_or_else(|| wrong_arity("GEOSEARCH"))?,
                ))?,
            });
            i += 3;
        } else if a[i].eq_ignore_ascii_case(b"BYBOX") {
            by = Some(GeoSearchBy::Box {
                width: f64_arg(a.get(i + 1).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?,
                height: f64_arg(a.get(i + 2).ok_or_else(|| wrong_arity("GEOSEARCH"))?)?,
                unit: Unit::parse(&String::from_utf8_lossy(
                    a.get(i + 3).ok_or_else(|| wrong_arity("GEOSEARCH"))?,
                ))?,
            });
            i += 4;
        } else {
            rest_at = i;
            break;
        }
    }
    let from = from.ok_or_else(|| {
        Error::invalid_argument("exactly one of FROMMEMBER or FROMLONLAT can be specified")
    })?;
    let by = by.ok_or_else(|| {
        Error::invalid_argument("exactly one of BYRADIUS and BYBOX can be specified")
    })?;
    let (count, withcoord, withdist) = parse_geo_flags(&a[rest_at..])?;
    Ok((from, by, count, withcoord, withdist))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handles() -> (TempDir, Handles) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Handles::new(db))
    }

    fn call(h: &Handles, words: &[&str]) -> Frame {
        let args: Vec<Vec<u8>> = words.iter().map(|w| w.as_bytes().to_vec()).collect();
        dispatch(h, &args)
    }

    #[test]
    fn test_ping_and_echo() {
        let (_dir, h) = handles();
        assert_eq!(call(&h, &["PING"]), Frame::Simple("PONG".into()));
        assert_eq!(call(&h, &["ping", "hi"]), Frame::bulk("hi"));
        assert_eq!(call(&h, &["ECHO", "x"]), Frame::bulk("x"));
    }

    #[test]
    fn test_counter_scenario() {
        let (_dir, h) = handles();
        assert_eq!(call(&h, &["SET", "c", "10"]), Frame::ok());
        assert_eq!(call(&h, &["INCRBY", "c", "5"]), Frame::Integer(15));
        assert_eq!(call(&h, &["DECR", "c"]), Frame::Integer(14));
        assert_eq!(call(&h, &["GET", "c"]), Frame::bulk("14"));
    }

    #[test]
    fn test_wrongtype_error_reply() {
        let (_dir, h) = handles();
        call(&h, &["HSET", "h", "f", "v"]);
        match call(&h, &["GET", "h"]) {
            Frame::Error(msg) => assert!(msg.starts_with("WRONGTYPE")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command() {
        let (_dir, h) = handles();
        match call(&h, &["FROBNICATE"]) {
            Frame::Error(msg) => assert!(msg.contains("unknown command")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_arity_reply() {
        let (_dir, h) = handles();
        match call(&h, &["GET"]) {
            Frame::Error(msg) => assert!(msg.contains("wrong number of arguments")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_zrange_withscores_ordering() {
        let (_dir, h) = handles();
        call(&h, &["ZADD", "z", "1.5", "m1", "-2.0", "m2", "0.0", "m3"]);
        let reply = call(&h, &["ZRANGE", "z", "0", "-1", "WITHSCORES"]);
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::bulk("m2"),
                Frame::bulk("-2"),
                Frame::bulk("m3"),
                Frame::bulk("0"),
                Frame::bulk("m1"),
                Frame::bulk("1.5"),
            ])
        );
        assert_eq!(
            call(&h, &["ZRANGEBYSCORE", "z", "-1", "1"]),
            Frame::Array(vec![Frame::bulk("m3")])
        );
        assert_eq!(call(&h, &["ZREVRANK", "z", "m1"]), Frame::Integer(0));
    }

    #[test]
    fn test_set_nx_xx_options() {
        let (_dir, h) = handles();
        assert_eq!(call(&h, &["SET", "k", "a", "NX"]), Frame::ok());
        assert_eq!(call(&h, &["SET", "k", "b", "NX"]), Frame::Null);
        assert_eq!(call(&h, &["SET", "k", "b", "XX"]), Frame::ok());
        assert_eq!(call(&h, &["SET", "zz", "x", "XX"]), Frame::Null);
        assert_eq!(call(&h, &["GET", "k"]), Frame::bulk("b"));
    }

    #[test]
    fn test_set_rejects_non_positive_expire() {
        let (_dir, h) = handles();
        for words in [
            ["SET", "k", "v", "EX", "0"],
            ["SET", "k", "v", "PX", "0"],
            ["SET", "k", "v", "EX", "-1"],
        ] {
            match call(&h, &words) {
                Frame::Error(msg) => assert!(msg.contains("invalid expire time"), "{}", msg),
                other => panic!("expected error, got {:?}", other),
            }
        }
        // Nothing was written by the rejected commands.
        assert_eq!(call(&h, &["GET", "k"]), Frame::Null);
        match call(&h, &["SETEX", "k", "0", "v"]) {
            Frame::Error(msg) => assert!(msg.contains("invalid expire time")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_set_nx_with_ttl() {
        let (_dir, h) = handles();
        assert_eq!(
            call(&h, &["SET", "lock", "token", "NX", "PX", "30000"]),
            Frame::ok()
        );
        assert_eq!(
            call(&h, &["SET", "lock", "other", "NX", "PX", "30000"]),
            Frame::Null
        );
        match call(&h, &["TTL", "lock"]) {
            Frame::Integer(ttl) => assert!(ttl > 0 && ttl <= 30),
            other => panic!("expected integer, got {:?}", other),
        }
        assert_eq!(call(&h, &["GET", "lock"]), Frame::bulk("token"));
    }

    #[test]
    fn test_type_and_rename_scenario() {
        let (_dir, h) = handles();
        call(&h, &["HSET", "u", "f", "v"]);
        assert_eq!(call(&h, &["RENAME", "u", "u2"]), Frame::ok());
        assert_eq!(call(&h, &["TYPE", "u"]), Frame::Simple("none".into()));
        assert_eq!(call(&h, &["TYPE", "u2"]), Frame::Simple("hash".into()));
        assert_eq!(call(&h, &["HGET", "u2", "f"]), Frame::bulk("v"));
    }

    #[test]
    fn test_xadd_xrange_cycle() {
        let (_dir, h) = handles();
        let id = match call(&h, &["XADD", "s", "*", "k", "v"]) {
            Frame::Bulk(id) => String::from_utf8(id).unwrap(),
            other => panic!("expected id, got {:?}", other),
        };
        assert_eq!(call(&h, &["XLEN", "s"]), Frame::Integer(1));
        match call(&h, &["XRANGE", "s", "-", "+"]) {
            Frame::Array(entries) => {
                assert_eq!(entries.len(), 1);
                match &entries[0] {
                    Frame::Array(parts) => assert_eq!(parts[0], Frame::bulk(id.clone())),
                    other => panic!("bad entry {:?}", other),
                }
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_bitfield_command_parsing() {
        let (_dir, h) = handles();
        let reply = call(
            &h,
            &["BITFIELD", "bf", "SET", "u8", "#1", "255", "GET", "u8", "8"],
        );
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Integer(0), Frame::Integer(255)])
        );
    }

    #[test]
    fn test_geosearch_command() {
        let (_dir, h) = handles();
        call(
            &h,
            &[
                "GEOADD", "g", "13.361389", "38.115556", "Palermo", "15.087269", "37.502669",
                "Catania",
            ],
        );
        match call(&h, &["GEODIST", "g", "Palermo", "Catania", "km"]) {
            Frame::Bulk(d) => {
                let km: f64 = String::from_utf8(d).unwrap().parse().unwrap();
                assert!((km - 166.2742).abs() < 0.5);
            }
            other => panic!("expected distance, got {:?}", other),
        }
        match call(
            &h,
            &["GEOSEARCH", "g", "FROMLONLAT", "15", "37", "BYRADIUS", "200", "km"],
        ) {
            Frame::Array(members) => assert_eq!(members.len(), 2),
            other => panic!("expected members, got {:?}", other),
        }
    }

    #[test]
    fn test_expire_ttl_persist_scenario() {
        let (_dir, h) = handles();
        call(&h, &["SET", "k", "v", "EX", "10"]);
        match call(&h, &["TTL", "k"]) {
            Frame::Integer(ttl) => assert!(ttl == 9 || ttl == 10),
            other => panic!("expected integer, got {:?}", other),
        }
        assert_eq!(call(&h, &["PERSIST", "k"]), Frame::Integer(1));
        assert_eq!(call(&h, &["TTL", "k"]), Frame::Integer(-1));
        assert_eq!(call(&h, &["DEL", "k"]), Frame::Integer(1));
        assert_eq!(call(&h, &["TTL", "k"]), Frame::Integer(-2));
    }
}
