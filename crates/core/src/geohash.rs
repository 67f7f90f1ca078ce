//! 52-bit interleaved geohash plus spherical distance math.
//!
//! A coordinate is quantized to 26 bits of latitude (range [-90, 90]) and
//! 26 bits of longitude (range [-180, 180]); the two words are bit
//! interleaved (latitude in the even positions) into a 52-bit code. The
//! code fits losslessly in an `f64` mantissa, which is what lets the geo
//! index live inside the sorted-set index: the hash *is* the score.
//!
//! The interleaving is a Morton (Z-order) curve, so for any axis-aligned
//! box the codes of all contained points fall between the codes of the
//! box's min and max corners. Searches iterate that code band and then
//! filter candidates by true haversine distance.

use crate::error::{Error, Result};

/// Latitude bounds of the quantization grid.
pub const LAT_MIN: f64 = -90.0;
pub const LAT_MAX: f64 = 90.0;
/// Longitude bounds of the quantization grid.
pub const LON_MIN: f64 = -180.0;
pub const LON_MAX: f64 = 180.0;

/// Bits per coordinate.
const STEP: u32 = 26;

/// Mean earth radius in meters, matching the reference implementation.
pub const EARTH_RADIUS_M: f64 = 6_372_797.560856;

/// Spread the low 26 bits of `v` to the even bit positions of a u64.
fn spread(v: u32) -> u64 {
    let mut x = v as u64 & 0x3FF_FFFF;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Inverse of `spread`: collect the even bit positions into 26 bits.
fn squash(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

/// Encode a coordinate into its 52-bit interleaved hash.
pub fn encode(lat: f64, lon: f64) -> Result<u64> {
    if !(LAT_MIN..=LAT_MAX).contains(&lat) || !(LON_MIN..=LON_MAX).contains(&lon) {
        return Err(Error::invalid_argument(format!(
            "invalid longitude,latitude pair {:.6},{:.6}",
            lon, lat
        )));
    }
    let cells = (1u64 << STEP) as f64;
    let lat_off = ((lat - LAT_MIN) / (LAT_MAX - LAT_MIN) * cells) as u64;
    let lon_off = ((lon - LON_MIN) / (LON_MAX - LON_MIN) * cells) as u64;
    // The max coordinate lands exactly on the cell count; clamp into range.
    let lat_bits = lat_off.min((1 << STEP) - 1) as u32;
    let lon_bits = lon_off.min((1 << STEP) - 1) as u32;
    Ok(spread(lat_bits) | (spread(lon_bits) << 1))
}

/// Decode a 52-bit hash back to the (lat, lon) midpoint of its cell.
pub fn decode(hash: u64) -> (f64, f64) {
    let lat_bits = squash(hash) as f64;
    let lon_bits = squash(hash >> 1) as f64;
    let cells = (1u64 << STEP) as f64;
    let lat_unit = (LAT_MAX - LAT_MIN) / cells;
    let lon_unit = (LON_MAX - LON_MIN) / cells;
    (
        LAT_MIN + (lat_bits + 0.5) * lat_unit,
        LON_MIN + (lon_bits + 0.5) * lon_unit,
    )
}

/// Haversine great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lon1r) = (lat1.to_radians(), lon1.to_radians());
    let (lat2r, lon2r) = (lat2.to_radians(), lon2.to_radians());
    let u = ((lat2r - lat1r) / 2.0).sin();
    let v = ((lon2r - lon1r) / 2.0).sin();
    let a = u * u + lat1r.cos() * lat2r.cos() * v * v;
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// An axis-aligned search box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The box that contains every point within `radius_m` of the center.
    ///
    /// The longitude span widens with latitude; near the poles it degrades
    /// to the full range, which is safe (filtering removes the excess).
    pub fn around(lat: f64, lon: f64, radius_m: f64) -> BoundingBox {
        let dlat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = lat.to_radians().cos().abs();
        let dlon = if cos_lat < 1e-9 {
            LON_MAX - LON_MIN
        } else {
            (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees()
        };
        BoundingBox {
            min_lat: (lat - dlat).max(LAT_MIN),
            max_lat: (lat + dlat).min(LAT_MAX),
            min_lon: (lon - dlon).max(LON_MIN),
            max_lon: (lon + dlon).min(LON_MAX),
        }
    }

    /// Hash-code band covering this box (min corner, max corner).
    pub fn hash_band(&self) -> Result<(u64, u64)> {
        Ok((
            encode(self.min_lat, self.min_lon)?,
            encode(self.max_lat, self.max_lon)?,
        ))
    }
}

/// Distance units accepted by the geo commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl Unit {
    pub fn parse(s: &str) -> Result<Unit> {
        match s.to_ascii_lowercase().as_str() {
            "m" => Ok(Unit::Meters),
            "km" => Ok(Unit::Kilometers),
            "mi" => Ok(Unit::Miles),
            "ft" => Ok(Unit::Feet),
            other => Err(Error::invalid_argument(format!(
                "unsupported unit '{}'",
                other
            ))),
        }
    }

    /// Convert meters into this unit.
    pub fn from_meters(self, m: f64) -> f64 {
        match self {
            Unit::Meters => m,
            Unit::Kilometers => m / 1000.0,
            Unit::Miles => m / 1609.34,
            Unit::Feet => m * 3.28084,
        }
    }

    /// Convert a quantity of this unit into meters.
    pub fn to_meters(self, v: f64) -> f64 {
        match self {
            Unit::Meters => v,
            Unit::Kilometers => v * 1000.0,
            Unit::Miles => v * 1609.34,
            Unit::Feet => v / 3.28084,
        }
    }
}

/// Render a 52-bit hash as the conventional 11-character base32 geohash.
pub fn to_base32(hash: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";
    // 11 chars carry 55 bits; the low 3 are zero padding.
    let padded = hash << 3;
    let mut out = String::with_capacity(11);
    for i in 0..11 {
        let shift = 55 - 5 * (i + 1);
        let idx = ((padded >> shift) & 0x1F) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_close() {
        let (lat, lon) = (38.115556, 13.361389); // Palermo
        let hash = encode(lat, lon).unwrap();
        let (dlat, dlon) = decode(hash);
        assert!((dlat - lat).abs() < 1e-5, "lat {} vs {}", dlat, lat);
        assert!((dlon - lon).abs() < 1e-5, "lon {} vs {}", dlon, lon);
    }

    #[test]
    fn test_hash_fits_in_52_bits() {
        let hash = encode(89.9999, 179.9999).unwrap();
        assert!(hash < (1u64 << 52));
        // Must round-trip through f64 exactly (it is stored as a score).
        assert_eq!(hash as f64 as u64, hash);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(encode(91.0, 0.0).is_err());
        assert!(encode(0.0, 181.0).is_err());
    }

    #[test]
    fn test_morton_band_contains_box_points() {
        let bbox = BoundingBox {
            min_lat: 37.0,
            max_lat: 39.0,
            min_lon: 13.0,
            max_lon: 16.0,
        };
        let (lo, hi) = bbox.hash_band().unwrap();
        for &(lat, lon) in &[(38.115556, 13.361389), (37.502669, 15.087269)] {
            let h = encode(lat, lon).unwrap();
            assert!(h >= lo && h <= hi);
        }
    }

    #[test]
    fn test_haversine_palermo_catania() {
        let d = haversine_m(38.115556, 13.361389, 37.502669, 15.087269);
        let km = d / 1000.0;
        assert!((km - 166.27).abs() < 0.5, "got {} km", km);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let bbox = BoundingBox::around(37.0, 15.0, 200_000.0);
        assert!(bbox.min_lat < 36.0 && bbox.max_lat > 38.0);
        assert!(bbox.min_lon < 13.0 && bbox.max_lon > 17.0);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(Unit::parse("km").unwrap(), Unit::Kilometers);
        assert!((Unit::Kilometers.from_meters(1500.0) - 1.5).abs() < 1e-9);
        assert!((Unit::Miles.to_meters(1.0) - 1609.34).abs() < 1e-9);
        assert!(Unit::parse("leagues").is_err());
    }

    #[test]
    fn test_base32_length() {
        let s = to_base32(encode(38.115556, 13.361389).unwrap());
        assert_eq!(s.len(), 11);
    }
}
