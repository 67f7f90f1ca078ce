//! End-to-end scenarios across the typed operations, exercised through
//! the public facades against a scratch database.

use quartzdb::{Database, Geo, Hashes, Keyspace, Lists, Sets, SortedSets, Streams, Strings};
use quartz_engine::{GeoSearchBy, GeoSearchFrom, XAddId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open() -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    (dir, db)
}

fn b(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

#[test]
fn scenario_counter() {
    let (_dir, db) = open();
    let strings = Strings::new(db);
    strings.set(b"c", b"10").unwrap();
    assert_eq!(strings.incr_by(b"c", 5).unwrap(), 15);
    assert_eq!(strings.incr_by(b"c", -1).unwrap(), 14);
    assert_eq!(strings.get(b"c").unwrap(), Some(b"14".to_vec()));
}

#[test]
fn scenario_sorted_set_ordering_with_negatives() {
    let (_dir, db) = open();
    let zsets = SortedSets::new(db);
    assert_eq!(
        zsets
            .zadd(
                b"z",
                &[
                    (1.5, b"m1".to_vec()),
                    (-2.0, b"m2".to_vec()),
                    (0.0, b"m3".to_vec()),
                ],
            )
            .unwrap(),
        3
    );
    let all = zsets.zrange(b"z", 0, -1, false).unwrap();
    assert_eq!(
        all,
        vec![
            (b"m2".to_vec(), -2.0),
            (b"m3".to_vec(), 0.0),
            (b"m1".to_vec(), 1.5),
        ]
    );
    let mid = zsets
        .zrangebyscore(
            b"z",
            quartz_engine::ScoreBound::Val {
                score: -1.0,
                inclusive: true,
            },
            quartz_engine::ScoreBound::Val {
                score: 1.0,
                inclusive: true,
            },
            false,
            None,
        )
        .unwrap();
    assert_eq!(mid, vec![(b"m3".to_vec(), 0.0)]);
    assert_eq!(zsets.zincrby(b"z", 1.5, b"m1").unwrap(), 3.0);
    assert_eq!(zsets.zrank(b"z", b"m1", true).unwrap(), Some(0));
}

#[test]
fn scenario_expire_and_ttl() {
    let (_dir, db) = open();
    let strings = Strings::new(db.clone());
    let keyspace = Keyspace::new(db);
    strings
        .set_with_expiry(b"k", b"v", Some(Duration::from_secs(10)))
        .unwrap();
    let ttl = keyspace.ttl(b"k").unwrap();
    assert!(ttl == 9 || ttl == 10, "ttl was {}", ttl);
    assert!(keyspace.persist(b"k").unwrap());
    assert_eq!(keyspace.ttl(b"k").unwrap(), -1);
    assert_eq!(keyspace.del(&b(&["k"])).unwrap(), 1);
    assert_eq!(keyspace.ttl(b"k").unwrap(), -2);
}

#[test]
fn scenario_rename_preserves_type() {
    let (_dir, db) = open();
    let hashes = Hashes::new(db.clone());
    let keyspace = Keyspace::new(db);
    hashes
        .hset(b"u", &[(b"f".to_vec(), b"v".to_vec())])
        .unwrap();
    keyspace.rename(b"u", b"u2").unwrap();
    assert_eq!(keyspace.type_of(b"u").unwrap(), None);
    assert_eq!(
        keyspace.type_of(b"u2").unwrap().map(|t| t.name()),
        Some("hash")
    );
    assert_eq!(hashes.hget(b"u2", b"f").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn scenario_stream_blocking_read() {
    let (_dir, db) = open();
    let streams = Streams::new(db);
    streams
        .xadd(b"s", XAddId::Auto, &[(b"seed".to_vec(), b"0".to_vec())], None)
        .unwrap();
    let last = streams.last_id(b"s").unwrap();

    let reader = streams.clone();
    let started = std::time::Instant::now();
    let handle = std::thread::spawn(move || {
        reader
            .xread(&[(b"s".to_vec(), last)], None, Some(2_000))
            .unwrap()
    });
    std::thread::sleep(Duration::from_millis(50));
    streams
        .xadd(b"s", XAddId::Auto, &[(b"k".to_vec(), b"v".to_vec())], None)
        .unwrap();
    let out = handle.join().unwrap();
    // Woken well before the 2s deadline, with the new entry visible.
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1.len(), 1);
    assert_eq!(out[0].1[0].fields.get("k").unwrap(), "v");
}

#[test]
fn scenario_geo_search() {
    let (_dir, db) = open();
    let geo = Geo::new(db);
    geo.geoadd(
        b"g",
        &[
            (13.361389, 38.115556, b"Palermo".to_vec()),
            (15.087269, 37.502669, b"Catania".to_vec()),
        ],
    )
    .unwrap();
    let km = geo
        .geodist(b"g", b"Palermo", b"Catania", quartz_core::geohash::Unit::Kilometers)
        .unwrap()
        .unwrap();
    assert!((km - 166.2742).abs() < 0.5, "distance was {} km", km);
    let hits = geo
        .search(
            b"g",
            &GeoSearchFrom::LonLat { lon: 15.0, lat: 37.0 },
            GeoSearchBy::Radius {
                value: 200.0,
                unit: quartz_core::geohash::Unit::Kilometers,
            },
            None,
        )
        .unwrap();
    let names: Vec<_> = hits.into_iter().map(|h| h.member).collect();
    assert!(names.contains(&b"Palermo".to_vec()));
    assert!(names.contains(&b"Catania".to_vec()));
}

// =============================================================================
// Round-trip / idempotence laws
// =============================================================================

#[test]
fn law_set_get_del() {
    let (_dir, db) = open();
    let strings = Strings::new(db.clone());
    let keyspace = Keyspace::new(db);
    strings.set(b"k", b"V").unwrap();
    assert_eq!(strings.get(b"k").unwrap(), Some(b"V".to_vec()));
    keyspace.del(&b(&["k"])).unwrap();
    assert_eq!(strings.get(b"k").unwrap(), None);
}

#[test]
fn law_zadd_idempotent() {
    let (_dir, db) = open();
    let zsets = SortedSets::new(db);
    zsets.zadd(b"z", &[(2.5, b"m".to_vec())]).unwrap();
    assert_eq!(zsets.zscore(b"z", b"m").unwrap(), Some(2.5));
    zsets.zadd(b"z", &[(2.5, b"m".to_vec())]).unwrap();
    assert_eq!(zsets.zcard(b"z").unwrap(), 1);
}

#[test]
fn law_lpush_lrange() {
    let (_dir, db) = open();
    let lists = Lists::new(db);
    lists.lpush(b"L", &b(&["a", "b", "c"])).unwrap();
    assert_eq!(lists.lrange(b"L", 0, -1).unwrap(), b(&["c", "b", "a"]));
}

#[test]
fn law_hset_sadd_idempotent() {
    let (_dir, db) = open();
    let hashes = Hashes::new(db.clone());
    let sets = Sets::new(db);
    hashes.hset(b"h", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
    hashes.hset(b"h", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
    assert_eq!(hashes.hlen(b"h").unwrap(), 1);
    sets.sadd(b"s", &b(&["m"])).unwrap();
    sets.sadd(b"s", &b(&["m"])).unwrap();
    assert_eq!(sets.scard(b"s").unwrap(), 1);
}

#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = Database::open(&path).unwrap();
        Strings::new(db.clone()).set(b"k", b"v").unwrap();
        SortedSets::new(db.clone())
            .zadd(b"z", &[(1.0, b"m".to_vec())])
            .unwrap();
        db.flush().unwrap();
    }
    let db = Database::open(&path).unwrap();
    assert_eq!(Strings::new(db.clone()).get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(SortedSets::new(db).zscore(b"z", b"m").unwrap(), Some(1.0));
}
