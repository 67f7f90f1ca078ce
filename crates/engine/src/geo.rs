//! Geo operations.
//!
//! GEOADD quantizes (lat, lon) into the 52-bit interleaved geohash and
//! stores it twice: as the member's score in the sorted-set index under
//! the same key (the hash fits an f64 mantissa exactly), and as an 8-byte
//! `geo:<K>:index:<member>` entry for point lookups.
//!
//! Searches compute a bounding box around the center, scan the sorted-set
//! index across the box's Morton code band (a superset of the box), and
//! filter candidates by true haversine distance.

use crate::database::Database;
use crate::zsets;
use quartz_concurrency::{with_retry, RetryPolicy};
use quartz_core::error::{Error, Result};
use quartz_core::geohash::{self, BoundingBox, Unit};
use quartz_core::keyspace;
use quartz_core::score::{decode_score, encode_score};
use quartz_core::types::TypeTag;
use std::sync::Arc;

/// Search center.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoSearchFrom {
    /// FROMMEMBER: an already-indexed member.
    Member(Vec<u8>),
    /// FROMLONLAT.
    LonLat { lon: f64, lat: f64 },
}

/// Search shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoSearchBy {
    /// BYRADIUS.
    Radius { value: f64, unit: Unit },
    /// BYBOX: width × height centered on the search origin.
    Box { width: f64, height: f64, unit: Unit },
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoResult {
    pub member: Vec<u8>,
    pub dist_m: f64,
    pub lon: f64,
    pub lat: f64,
    pub hash: u64,
}

/// Geo operations facade.
#[derive(Clone)]
pub struct Geo {
    db: Arc<Database>,
}

impl Geo {
    pub fn new(db: Arc<Database>) -> Geo {
        Geo { db }
    }

    /// GEOADD: items are `(lon, lat, member)`; returns newly added count.
    pub fn geoadd(&self, key: &[u8], items: &[(f64, f64, Vec<u8>)]) -> Result<u64> {
        let mut pairs = Vec::with_capacity(items.len());
        let mut hashes = Vec::with_capacity(items.len());
        for (lon, lat, member) in items {
            let hash = geohash::encode(*lat, *lon)?;
            pairs.push((hash as f64, member.clone()));
            hashes.push((member.clone(), hash));
        }
        let _guard = self.db.locks().write_guard(key);
        let result = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                Database::expect_type_txn(txn, key, TypeTag::Geo)?;
                let added = zsets::upsert_in_txn(txn, key, &pairs, TypeTag::Geo)?;
                for (member, hash) in &hashes {
                    txn.insert(
                        keyspace::geo_index_key(key, member),
                        hash.to_be_bytes().to_vec(),
                    );
                }
                Ok(added)
            })
        });
        self.db.invalidate(key);
        result
    }

    /// GEOPOS: `(lon, lat)` per member.
    pub fn geopos(&self, key: &[u8], members: &[Vec<u8>]) -> Result<Vec<Option<(f64, f64)>>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Geo)? {
                return Ok(vec![None; members.len()]);
            }
            members
                .iter()
                .map(|member| {
                    Ok(read_hash(view, key, member)?.map(|hash| {
                        let (lat, lon) = geohash::decode(hash);
                        (lon, lat)
                    }))
                })
                .collect()
        })
    }

    /// GEOHASH: conventional 11-character base32 codes.
    pub fn geohash(&self, key: &[u8], members: &[Vec<u8>]) -> Result<Vec<Option<String>>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Geo)? {
                return Ok(vec![None; members.len()]);
            }
            members
                .iter()
                .map(|member| Ok(read_hash(view, key, member)?.map(geohash::to_base32)))
                .collect()
        })
    }

    /// GEODIST in the requested unit; `None` when either member is absent.
    pub fn geodist(&self, key: &[u8], m1: &[u8], m2: &[u8], unit: Unit) -> Result<Option<f64>> {
        self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Geo)? {
                return Ok(None);
            }
            let (h1, h2) = match (read_hash(view, key, m1)?, read_hash(view, key, m2)?) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(None),
            };
            let (lat1, lon1) = geohash::decode(h1);
            let (lat2, lon2) = geohash::decode(h2);
            Ok(Some(unit.from_meters(geohash::haversine_m(
                lat1, lon1, lat2, lon2,
            ))))
        })
    }

    /// GEOSEARCH / GEORADIUS / GEORADIUSBYMEMBER: results sorted by
    /// ascending distance, optionally truncated by COUNT.
    pub fn search(
        &self,
        key: &[u8],
        from: &GeoSearchFrom,
        by: GeoSearchBy,
        count: Option<u64>,
    ) -> Result<Vec<GeoResult>> {
        let mut results = self.db.substrate().view(|view| {
            if !Database::expect_type_view(view, key, TypeTag::Geo)? {
                return Ok(Vec::new());
            }
            let (center_lat, center_lon) = match from {
                GeoSearchFrom::LonLat { lon, lat } => (*lat, *lon),
                GeoSearchFrom::Member(member) => match read_hash(view, key, member)? {
                    Some(hash) => geohash::decode(hash),
                    None => {
                        return Err(Error::not_found(format!(
                            "member '{}'",
                            String::from_utf8_lossy(member)
                        )))
                    }
                },
            };
            let bbox = search_box(center_lat, center_lon, by);
            let (lo_hash, hi_hash) = bbox.hash_band()?;
            let prefix = keyspace::zset_index_prefix(key);
            let mut lo = prefix.clone();
            lo.extend_from_slice(&encode_score(lo_hash as f64));
            let mut hi = prefix.clone();
            hi.extend_from_slice(&encode_score(hi_hash as f64));
            hi.push(0xFF);

            let mut out = Vec::new();
            for (entry_key, _) in view.scan_range(&lo, &hi)? {
                let (score_bytes, member, _) = keyspace::zset_index_parts(key, &entry_key)?;
                let hash = decode_score(&score_bytes) as u64;
                let (lat, lon) = geohash::decode(hash);
                let dist_m = geohash::haversine_m(center_lat, center_lon, lat, lon);
                if !matches(center_lat, center_lon, lat, lon, dist_m, by) {
                    continue;
                }
                out.push(GeoResult {
                    member: member.to_vec(),
                    dist_m,
                    lon,
                    lat,
                    hash,
                });
            }
            Ok(out)
        })?;
        results.sort_by(|a, b| a.dist_m.total_cmp(&b.dist_m));
        if let Some(count) = count {
            results.truncate(count as usize);
        }
        Ok(results)
    }

    /// GEOSEARCHSTORE: run a search on `src` and materialize the hits as a
    /// fresh geo index at `dest`.
    pub fn searchstore(
        &self,
        dest: &[u8],
        src: &[u8],
        from: &GeoSearchFrom,
        by: GeoSearchBy,
        count: Option<u64>,
    ) -> Result<u64> {
        let results = self.search(src, from, by, count)?;
        let _guard = self.db.locks().write_guard(dest);
        let stored = with_retry(RetryPolicy::SORTED_SET, || {
            self.db.substrate().update(|txn| {
                if let Some(tag) = Database::tag_in_txn(txn, dest)? {
                    Database::delete_entries_in_txn(txn, dest, tag)?;
                    txn.remove(keyspace::type_tag_key(dest));
                }
                if results.is_empty() {
                    return Ok(0);
                }
                let pairs: Vec<(f64, Vec<u8>)> = results
                    .iter()
                    .map(|r| (r.hash as f64, r.member.clone()))
                    .collect();
                zsets::upsert_in_txn(txn, dest, &pairs, TypeTag::Geo)?;
                for r in &results {
                    txn.insert(
                        keyspace::geo_index_key(dest, &r.member),
                        r.hash.to_be_bytes().to_vec(),
                    );
                }
                Ok(results.len() as u64)
            })
        });
        self.db.invalidate(dest);
        stored
    }
}

fn read_hash(
    view: &quartz_substrate::ReadView<'_>,
    key: &[u8],
    member: &[u8],
) -> Result<Option<u64>> {
    match view.get(&keyspace::geo_index_key(key, member))? {
        None => Ok(None),
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::corruption("geo index entry is not 8 bytes"))?;
            Ok(Some(u64::from_be_bytes(arr)))
        }
    }
}

/// Bounding box for the scan band.
fn search_box(lat: f64, lon: f64, by: GeoSearchBy) -> BoundingBox {
    match by {
        GeoSearchBy::Radius { value, unit } => {
            BoundingBox::around(lat, lon, unit.to_meters(value))
        }
        GeoSearchBy::Box {
            width,
            height,
            unit,
        } => {
            let half_h = BoundingBox::around(lat, lon, unit.to_meters(height) / 2.0);
            let half_w = BoundingBox::around(lat, lon, unit.to_meters(width) / 2.0);
            BoundingBox {
                min_lat: half_h.min_lat,
                max_lat: half_h.max_lat,
                min_lon: half_w.min_lon,
                max_lon: half_w.max_lon,
            }
        }
    }
}

/// Exact shape filter applied after the band scan.
fn matches(
    center_lat: f64,
    center_lon: f64,
    lat: f64,
    lon: f64,
    dist_m: f64,
    by: GeoSearchBy,
) -> bool {
    match by {
        GeoSearchBy::Radius { value, unit } => dist_m <= unit.to_meters(value),
        GeoSearchBy::Box {
            width,
            height,
            unit,
        } => {
            let lat_dist = geohash::haversine_m(center_lat, center_lon, lat, center_lon);
            let lon_dist = geohash::haversine_m(lat, center_lon, lat, lon);
            lat_dist <= unit.to_meters(height) / 2.0 && lon_dist <= unit.to_meters(width) / 2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PALERMO: (f64, f64) = (13.361389, 38.115556);
    const CATANIA: (f64, f64) = (15.087269, 37.502669);

    fn geo() -> (TempDir, Geo) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, Geo::new(db))
    }

    fn sicily(g: &Geo) {
        g.geoadd(
            b"g",
            &[
                (PALERMO.0, PALERMO.1, b"Palermo".to_vec()),
                (CATANIA.0, CATANIA.1, b"Catania".to_vec()),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_geoadd_counts_new_members() {
        let (_dir, g) = geo();
        assert_eq!(
            g.geoadd(b"g", &[(PALERMO.0, PALERMO.1, b"Palermo".to_vec())])
                .unwrap(),
            1
        );
        // Re-adding the same member updates in place.
        assert_eq!(
            g.geoadd(b"g", &[(PALERMO.0, PALERMO.1, b"Palermo".to_vec())])
                .unwrap(),
            0
        );
        assert!(g.geoadd(b"g", &[(200.0, 0.0, b"bad".to_vec())]).is_err());
    }

    #[test]
    fn test_geopos_round_trip() {
        let (_dir, g) = geo();
        sicily(&g);
        let pos = g.geopos(b"g", &[b"Palermo".to_vec(), b"nowhere".to_vec()]).unwrap();
        let (lon, lat) = pos[0].unwrap();
        assert!((lon - PALERMO.0).abs() < 1e-4);
        assert!((lat - PALERMO.1).abs() < 1e-4);
        assert!(pos[1].is_none());
    }

    #[test]
    fn test_geodist_palermo_catania() {
        let (_dir, g) = geo();
        sicily(&g);
        let km = g
            .geodist(b"g", b"Palermo", b"Catania", Unit::Kilometers)
            .unwrap()
            .unwrap();
        assert!((km - 166.2742).abs() < 0.5, "got {} km", km);
        assert!(g
            .geodist(b"g", b"Palermo", b"nowhere", Unit::Meters)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_geosearch_radius_contains_both() {
        let (_dir, g) = geo();
        sicily(&g);
        let hits = g
            .search(
                b"g",
                &GeoSearchFrom::LonLat { lon: 15.0, lat: 37.0 },
                GeoSearchBy::Radius {
                    value: 200.0,
                    unit: Unit::Kilometers,
                },
                None,
            )
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.member.clone()).collect();
        assert!(names.contains(&b"Palermo".to_vec()));
        assert!(names.contains(&b"Catania".to_vec()));
        // Sorted by ascending distance: Catania is closer to (15, 37).
        assert_eq!(hits[0].member, b"Catania".to_vec());
    }

    #[test]
    fn test_geosearch_small_radius_excludes() {
        let (_dir, g) = geo();
        sicily(&g);
        let hits = g
            .search(
                b"g",
                &GeoSearchFrom::Member(b"Catania".to_vec()),
                GeoSearchBy::Radius {
                    value: 50.0,
                    unit: Unit::Kilometers,
                },
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member, b"Catania".to_vec());
        assert!(hits[0].dist_m < 100.0);
    }

    #[test]
    fn test_geosearch_bybox() {
        let (_dir, g) = geo();
        sicily(&g);
        let hits = g
            .search(
                b"g",
                &GeoSearchFrom::LonLat { lon: 15.0, lat: 37.5 },
                GeoSearchBy::Box {
                    width: 100.0,
                    height: 100.0,
                    unit: Unit::Kilometers,
                },
                None,
            )
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.member.clone()).collect();
        assert!(names.contains(&b"Catania".to_vec()));
        assert!(!names.contains(&b"Palermo".to_vec()));
    }

    #[test]
    fn test_search_from_missing_member_errors() {
        let (_dir, g) = geo();
        sicily(&g);
        assert!(g
            .search(
                b"g",
                &GeoSearchFrom::Member(b"Atlantis".to_vec()),
                GeoSearchBy::Radius {
                    value: 10.0,
                    unit: Unit::Kilometers
                },
                None,
            )
            .is_err());
    }

    #[test]
    fn test_searchstore() {
        let (_dir, g) = geo();
        sicily(&g);
        let stored = g
            .searchstore(
                b"dest",
                b"g",
                &GeoSearchFrom::LonLat { lon: 15.0, lat: 37.0 },
                GeoSearchBy::Radius {
                    value: 100.0,
                    unit: Unit::Kilometers,
                },
                None,
            )
            .unwrap();
        assert_eq!(stored, 1);
        let km = g
            .geodist(b"dest", b"Catania", b"Catania", Unit::Meters)
            .unwrap()
            .unwrap();
        assert_eq!(km, 0.0);
    }

    #[test]
    fn test_geohash_strings() {
        let (_dir, g) = geo();
        sicily(&g);
        let hashes = g.geohash(b"g", &[b"Palermo".to_vec()]).unwrap();
        let s = hashes[0].as_ref().unwrap();
        assert_eq!(s.len(), 11);
        // Standard geohash of Palermo starts with "sq".
        assert!(s.starts_with("sq"), "got {}", s);
    }
}
