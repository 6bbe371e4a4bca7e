// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry value types.
//!
//! A [`Geometry`] is a collection: it owns ordered vectors of points,
//! linestrings and polygons. Single geometries (one point, one line) are just
//! collections with one member; the declared [`GeometryClass`] decides how the
//! value is encoded and how column type checks see it.

use serde::{Deserialize, Serialize};

/// A coordinate. `z` is 0.0 for 2D geometries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord {
    /// Creates a 2D coordinate.
    pub const fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Creates a 3D coordinate.
    pub const fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Exact comparison of the X and Y ordinates.
    pub fn same_xy(&self, other: &Coord) -> bool {
        self.x == other.x && self.y == other.y
    }

    /// Planar distance ignoring Z.
    pub fn distance_2d(&self, other: &Coord) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A polygon: one exterior ring plus zero or more holes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    pub interiors: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>) -> Self {
        Self {
            exterior,
            interiors: Vec::new(),
        }
    }
}

/// Geometry classes, numbered like the BLOB class codes (XY variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryClass {
    Geometry = 0,
    Point = 1,
    Linestring = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLinestring = 5,
    MultiPolygon = 6,
    GeometryCollection = 7,
}

impl GeometryClass {
    /// Decodes a class code into `(class, has_z)`. Codes above 1000 are XYZ.
    pub fn from_code(code: i32) -> Option<(Self, bool)> {
        let has_z = match code / 1000 {
            0 => false,
            1 => true,
            _ => return None,
        };
        let class = match code % 1000 {
            0 => Self::Geometry,
            1 => Self::Point,
            2 => Self::Linestring,
            3 => Self::Polygon,
            4 => Self::MultiPoint,
            5 => Self::MultiLinestring,
            6 => Self::MultiPolygon,
            7 => Self::GeometryCollection,
            _ => return None,
        };
        Some((class, has_z))
    }

    /// The class code, with the XYZ offset applied when `has_z` is set.
    pub fn code(self, has_z: bool) -> i32 {
        self as i32 + if has_z { 1000 } else { 0 }
    }

    /// Upper-case type name as used in geometry column declarations.
    pub fn name(self) -> &'static str {
        match self {
            Self::Geometry => "GEOMETRY",
            Self::Point => "POINT",
            Self::Linestring => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLinestring => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
            Self::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    /// Parses a type name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let class = match name.to_ascii_uppercase().as_str() {
            "GEOMETRY" => Self::Geometry,
            "POINT" => Self::Point,
            "LINESTRING" => Self::Linestring,
            "POLYGON" => Self::Polygon,
            "MULTIPOINT" => Self::MultiPoint,
            "MULTILINESTRING" => Self::MultiLinestring,
            "MULTIPOLYGON" => Self::MultiPolygon,
            "GEOMETRYCOLLECTION" => Self::GeometryCollection,
            _ => return None,
        };
        Some(class)
    }

    /// True for classes whose members are all linestrings.
    pub fn is_linear(self) -> bool {
        matches!(self, Self::Linestring | Self::MultiLinestring)
    }
}

/// Axis-aligned 2D bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Bounds of a single coordinate.
    pub fn of(c: &Coord) -> Self {
        Self {
            min_x: c.x,
            min_y: c.y,
            max_x: c.x,
            max_y: c.y,
        }
    }

    /// Grows the rectangle to include `c`.
    pub fn include(&mut self, c: &Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    /// Returns the rectangle grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Bounds of a coordinate sequence, `None` when empty.
    pub fn of_coords(coords: &[Coord]) -> Option<Self> {
        let (first, rest) = coords.split_first()?;
        let mut bounds = Self::of(first);
        for c in rest {
            bounds.include(c);
        }
        Some(bounds)
    }
}

/// A geometry value: an SRID, a dimension model and ordered member vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub srid: i32,
    pub has_z: bool,
    /// Class to encode as; reconciled with the members by [`Geometry::class`].
    pub declared: GeometryClass,
    pub points: Vec<Coord>,
    pub linestrings: Vec<Vec<Coord>>,
    pub polygons: Vec<Polygon>,
}

impl Geometry {
    /// An empty collection.
    pub fn new(srid: i32, has_z: bool) -> Self {
        Self {
            srid,
            has_z,
            declared: GeometryClass::GeometryCollection,
            points: Vec::new(),
            linestrings: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// A single point.
    pub fn point(srid: i32, has_z: bool, coord: Coord) -> Self {
        let mut geom = Self::new(srid, has_z);
        geom.declared = GeometryClass::Point;
        geom.points.push(coord);
        geom
    }

    /// A single linestring.
    pub fn linestring(srid: i32, has_z: bool, coords: Vec<Coord>) -> Self {
        let mut geom = Self::new(srid, has_z);
        geom.declared = GeometryClass::Linestring;
        geom.linestrings.push(coords);
        geom
    }

    /// A single polygon.
    pub fn polygon(srid: i32, has_z: bool, polygon: Polygon) -> Self {
        let mut geom = Self::new(srid, has_z);
        geom.declared = GeometryClass::Polygon;
        geom.polygons.push(polygon);
        geom
    }

    /// Returns this geometry re-declared as `class`.
    pub fn with_class(mut self, class: GeometryClass) -> Self {
        self.declared = class;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.linestrings.is_empty() && self.polygons.is_empty()
    }

    /// The coordinate of a geometry made of exactly one point and nothing else.
    pub fn as_single_point(&self) -> Option<Coord> {
        match (
            self.points.as_slice(),
            self.linestrings.is_empty(),
            self.polygons.is_empty(),
        ) {
            ([p], true, true) => Some(*p),
            _ => None,
        }
    }

    /// The vertices of a geometry made of exactly one linestring and nothing else.
    pub fn as_single_linestring(&self) -> Option<&[Coord]> {
        match (
            self.linestrings.as_slice(),
            self.points.is_empty(),
            self.polygons.is_empty(),
        ) {
            ([line], true, true) => Some(line.as_slice()),
            _ => None,
        }
    }

    /// The class this value encodes as, reconciling the declared class with
    /// what the members actually are.
    pub fn class(&self) -> GeometryClass {
        let kinds = [
            !self.points.is_empty(),
            !self.linestrings.is_empty(),
            !self.polygons.is_empty(),
        ];
        let mixed = kinds.iter().filter(|k| **k).count() > 1;
        if mixed || self.declared == GeometryClass::GeometryCollection {
            return GeometryClass::GeometryCollection;
        }
        if self.points.len() == 1 && self.declared != GeometryClass::MultiPoint {
            GeometryClass::Point
        } else if !self.points.is_empty() {
            GeometryClass::MultiPoint
        } else if self.linestrings.len() == 1 && self.declared != GeometryClass::MultiLinestring {
            GeometryClass::Linestring
        } else if !self.linestrings.is_empty() {
            GeometryClass::MultiLinestring
        } else if self.polygons.len() == 1 && self.declared != GeometryClass::MultiPolygon {
            GeometryClass::Polygon
        } else if !self.polygons.is_empty() {
            GeometryClass::MultiPolygon
        } else {
            match self.declared {
                GeometryClass::MultiPoint
                | GeometryClass::MultiLinestring
                | GeometryClass::MultiPolygon => self.declared,
                _ => GeometryClass::GeometryCollection,
            }
        }
    }

    /// Iterates every vertex of every member.
    pub fn coords(&self) -> impl Iterator<Item = &Coord> {
        self.points
            .iter()
            .chain(self.linestrings.iter().flatten())
            .chain(
                self.polygons
                    .iter()
                    .flat_map(|p| p.exterior.iter().chain(p.interiors.iter().flatten())),
            )
    }

    /// 2D bounding rectangle, `None` for an empty geometry.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut iter = self.coords();
        let mut bounds = Bounds::of(iter.next()?);
        for c in iter {
            bounds.include(c);
        }
        Some(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_codes_round_trip() {
        for code in [1, 2, 3, 4, 5, 6, 7, 1001, 1002, 1007] {
            let (class, has_z) = GeometryClass::from_code(code).unwrap();
            assert_eq!(class.code(has_z), code);
        }
        assert!(GeometryClass::from_code(2001).is_none());
        assert!(GeometryClass::from_code(9).is_none());
    }

    #[test]
    fn class_follows_members() {
        let mut g = Geometry::linestring(4326, false, vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
        assert_eq!(g.class(), GeometryClass::Linestring);
        g.linestrings.push(vec![Coord::xy(2.0, 2.0), Coord::xy(3.0, 3.0)]);
        assert_eq!(g.class(), GeometryClass::MultiLinestring);
        g.points.push(Coord::xy(5.0, 5.0));
        assert_eq!(g.class(), GeometryClass::GeometryCollection);

        let single = Geometry::point(0, false, Coord::xy(1.0, 2.0))
            .with_class(GeometryClass::MultiPoint);
        assert_eq!(single.class(), GeometryClass::MultiPoint);
    }

    #[test]
    fn single_accessors() {
        let p = Geometry::point(0, false, Coord::xy(1.0, 2.0));
        assert_eq!(p.as_single_point(), Some(Coord::xy(1.0, 2.0)));
        assert!(p.as_single_linestring().is_none());

        let mut two = p.clone();
        two.points.push(Coord::xy(3.0, 4.0));
        assert!(two.as_single_point().is_none());
    }

    #[test]
    fn bounds_cover_all_members() {
        let mut g = Geometry::new(0, false);
        g.points.push(Coord::xy(-1.0, 5.0));
        g.linestrings.push(vec![Coord::xy(0.0, 0.0), Coord::xy(10.0, 2.0)]);
        let b = g.bounds().unwrap();
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (-1.0, 0.0, 10.0, 5.0));
        assert!(Geometry::new(0, false).bounds().is_none());
    }
}
