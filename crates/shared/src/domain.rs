use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque routing key for every addressable entity (markers, search managers,
/// search sessions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(MapId);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Geographic query window. Corners are not reordered: a north-east corner
/// lying south of the south-west corner is a degenerate but valid box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub north_east: Point,
    pub south_west: Point,
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        self.north_east.is_valid() && self.south_west.is_valid()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPosition {
    pub target: Point,
    #[serde(default)]
    pub azimuth: f32,
    #[serde(default)]
    pub tilt: f32,
    #[serde(default)]
    pub zoom: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationType {
    Linear,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    #[serde(rename = "type")]
    pub kind: AnimationType,
    pub duration_seconds: f32,
}

impl Animation {
    /// Builds an animation from the wire form, where the duration is given in
    /// milliseconds.
    pub fn from_millis(smooth: bool, duration_ms: u64) -> Self {
        Self {
            kind: if smooth {
                AnimationType::Smooth
            } else {
                AnimationType::Linear
            },
            duration_seconds: duration_ms as f32 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Decodes a packed `0xAARRGGBB` value. Bits above the low 32 are ignored.
    pub fn from_argb(value: i64) -> Self {
        let value = value as u32;
        Self {
            a: (value >> 24) as u8,
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub outer_ring: Vec<Point>,
    pub fill_color: Color,
    pub stroke_color: Color,
    pub stroke_width: f32,
    pub z_index: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchManagerType {
    #[default]
    Default,
    Combined,
    Online,
    Offline,
}

impl SearchManagerType {
    /// Parses a manager type; anything unrecognised falls back to `Default`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "combined" => Self::Combined,
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Combined => "combined",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Set of search kinds, carried to the backend as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SearchTypes(u32);

impl SearchTypes {
    pub const GEO: Self = Self(1);
    pub const BIZ: Self = Self(1 << 1);
    pub const TRANSIT: Self = Self(1 << 2);
    pub const COLLECTIONS: Self = Self(1 << 3);
    pub const DIRECT: Self = Self(1 << 4);

    const NAMED: [(&'static str, SearchTypes); 5] = [
        ("geo", Self::GEO),
        ("biz", Self::BIZ),
        ("transit", Self::TRANSIT),
        ("collections", Self::COLLECTIONS),
        ("direct", Self::DIRECT),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps only the bits that name a known search kind.
    pub fn from_bits(bits: u32) -> Self {
        let known = Self::NAMED.iter().fold(0, |acc, (_, flag)| acc | flag.0);
        Self(bits & known)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Case-insensitive; unknown names are skipped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut types = Self::empty();
        for name in names {
            let name = name.as_ref().trim().to_ascii_lowercase();
            if let Some((_, flag)) = Self::NAMED.iter().find(|(known, _)| *known == name) {
                types.insert(*flag);
            }
        }
        types
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl From<Vec<String>> for SearchTypes {
    fn from(value: Vec<String>) -> Self {
        Self::from_names(value)
    }
}

impl From<SearchTypes> for Vec<String> {
    fn from(value: SearchTypes) -> Self {
        value.names().into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_types_round_trip_through_bitmask() {
        let types = SearchTypes::from_names(["geo", "biz"]);
        assert_eq!(types.bits(), 0b11);

        let decoded = SearchTypes::from_bits(types.bits());
        let mut names = decoded.names();
        names.sort_unstable();
        assert_eq!(names, vec!["biz", "geo"]);
    }

    #[test]
    fn search_types_ignore_unknown_names_and_case() {
        let types = SearchTypes::from_names(["GEO", "bogus", "Transit"]);
        assert_eq!(types, {
            let mut expected = SearchTypes::GEO;
            expected.insert(SearchTypes::TRANSIT);
            expected
        });
        assert!(SearchTypes::from_names(["bogus"]).is_empty());
    }

    #[test]
    fn search_types_deserialize_from_string_list() {
        let types: SearchTypes =
            serde_json::from_str(r#"["biz","collections","nope"]"#).expect("types");
        assert!(types.contains(SearchTypes::BIZ));
        assert!(types.contains(SearchTypes::COLLECTIONS));
        assert!(!types.contains(SearchTypes::GEO));

        let encoded = serde_json::to_value(types).expect("encode");
        assert_eq!(encoded, serde_json::json!(["biz", "collections"]));
    }

    #[test]
    fn animation_duration_is_converted_to_seconds() {
        let animation = Animation::from_millis(true, 2000);
        assert_eq!(animation.kind, AnimationType::Smooth);
        assert!((animation.duration_seconds - 2.0).abs() < f32::EPSILON);

        let linear = Animation::from_millis(false, 250);
        assert_eq!(linear.kind, AnimationType::Linear);
        assert!((linear.duration_seconds - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn point_bounds_are_inclusive() {
        assert!(Point::new(90.0, -180.0).is_valid());
        assert!(!Point::new(90.5, 0.0).is_valid());
        assert!(!Point::new(0.0, 181.0).is_valid());
        assert!(!Point::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn degenerate_bounding_box_is_still_valid() {
        let inverted = BoundingBox {
            north_east: Point::new(10.0, 10.0),
            south_west: Point::new(20.0, 20.0),
        };
        assert!(inverted.is_valid());
    }

    #[test]
    fn color_unpacks_argb() {
        let color = Color::from_argb(0x80FF_1020);
        assert_eq!(
            color,
            Color {
                a: 0x80,
                r: 0xFF,
                g: 0x10,
                b: 0x20
            }
        );
    }

    #[test]
    fn unknown_manager_type_falls_back_to_default() {
        assert_eq!(SearchManagerType::parse("ONLINE"), SearchManagerType::Online);
        assert_eq!(SearchManagerType::parse("weird"), SearchManagerType::Default);
    }
}
