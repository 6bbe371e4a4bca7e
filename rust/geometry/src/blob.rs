// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary geometry BLOB codec.
//!
//! Layout:
//!
//! ```text
//! 0x00 | endian (0x01 LE, 0x00 BE) | srid i32 | minx miny maxx maxy f64 | 0x7C
//!      | class i32 | body | 0xFE
//! ```
//!
//! Point bodies are the raw ordinates, linestrings a vertex count followed by
//! the vertices, polygons a ring count followed by counted rings. Multi and
//! collection bodies are a member count followed by members, each prefixed by
//! `0x69` and its own class code. Writing is always little endian.

use crate::error::{Error, Result};
use crate::types::{Bounds, Coord, Geometry, GeometryClass, Polygon};

const START: u8 = 0x00;
const LITTLE_ENDIAN: u8 = 0x01;
const BIG_ENDIAN: u8 = 0x00;
const MBR_END: u8 = 0x7C;
const ENTITY: u8 = 0x69;
const END: u8 = 0xFE;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a geometry into a BLOB.
pub fn encode(geom: &Geometry) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    let bounds = geom.bounds().unwrap_or(Bounds {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    });
    out.push(START);
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&geom.srid.to_le_bytes());
    for v in [bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.push(MBR_END);

    let class = geom.class();
    let has_z = geom.has_z;
    out.extend_from_slice(&class.code(has_z).to_le_bytes());
    match class {
        GeometryClass::Point => write_coord(&mut out, &geom.points[0], has_z),
        GeometryClass::Linestring => write_ring(&mut out, &geom.linestrings[0], has_z),
        GeometryClass::Polygon => write_polygon(&mut out, &geom.polygons[0], has_z),
        _ => {
            let count = geom.points.len() + geom.linestrings.len() + geom.polygons.len();
            write_count(&mut out, count);
            for p in &geom.points {
                out.push(ENTITY);
                out.extend_from_slice(&GeometryClass::Point.code(has_z).to_le_bytes());
                write_coord(&mut out, p, has_z);
            }
            for line in &geom.linestrings {
                out.push(ENTITY);
                out.extend_from_slice(&GeometryClass::Linestring.code(has_z).to_le_bytes());
                write_ring(&mut out, line, has_z);
            }
            for poly in &geom.polygons {
                out.push(ENTITY);
                out.extend_from_slice(&GeometryClass::Polygon.code(has_z).to_le_bytes());
                write_polygon(&mut out, poly, has_z);
            }
        }
    }
    out.push(END);
    out
}

fn write_count(out: &mut Vec<u8>, count: usize) {
    out.extend_from_slice(&(count as i32).to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, c: &Coord, has_z: bool) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
    if has_z {
        out.extend_from_slice(&c.z.to_le_bytes());
    }
}

fn write_ring(out: &mut Vec<u8>, coords: &[Coord], has_z: bool) {
    write_count(out, coords.len());
    for c in coords {
        write_coord(out, c, has_z);
    }
}

fn write_polygon(out: &mut Vec<u8>, poly: &Polygon, has_z: bool) {
    write_count(out, 1 + poly.interiors.len());
    write_ring(out, &poly.exterior, has_z);
    for ring in &poly.interiors {
        write_ring(out, ring, has_z);
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or(Error::Truncated {
            offset: self.pos,
            needed: N,
        })?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn marker(&mut self, expected: u8) -> Result<()> {
        let offset = self.pos;
        let found = self.u8()?;
        if found != expected {
            return Err(Error::BadMarker {
                offset,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take::<4>()?;
        Ok(if self.little {
            i32::from_le_bytes(bytes)
        } else {
            i32::from_be_bytes(bytes)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes = self.take::<8>()?;
        Ok(if self.little {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn count(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| Error::NegativeCount(n))
    }

    fn coord(&mut self, has_z: bool) -> Result<Coord> {
        let x = self.f64()?;
        let y = self.f64()?;
        let z = if has_z { self.f64()? } else { 0.0 };
        Ok(Coord { x, y, z })
    }

    fn ring(&mut self, has_z: bool) -> Result<Vec<Coord>> {
        let n = self.count()?;
        let mut coords = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            coords.push(self.coord(has_z)?);
        }
        Ok(coords)
    }

    fn polygon(&mut self, has_z: bool) -> Result<Polygon> {
        let rings = self.count()?;
        if rings == 0 {
            return Ok(Polygon::default());
        }
        let exterior = self.ring(has_z)?;
        let mut interiors = Vec::with_capacity(rings - 1);
        for _ in 1..rings {
            interiors.push(self.ring(has_z)?);
        }
        Ok(Polygon {
            exterior,
            interiors,
        })
    }

    fn class(&mut self) -> Result<(GeometryClass, bool)> {
        let code = self.i32()?;
        GeometryClass::from_code(code).ok_or(Error::UnsupportedClass(code))
    }

    fn header(&mut self) -> Result<(i32, Bounds)> {
        self.marker(START)?;
        self.little = match self.u8()? {
            LITTLE_ENDIAN => true,
            BIG_ENDIAN => false,
            other => return Err(Error::BadEndianness(other)),
        };
        let srid = self.i32()?;
        let bounds = Bounds {
            min_x: self.f64()?,
            min_y: self.f64()?,
            max_x: self.f64()?,
            max_y: self.f64()?,
        };
        self.marker(MBR_END)?;
        Ok((srid, bounds))
    }
}

/// Decodes a BLOB into a geometry.
pub fn decode(blob: &[u8]) -> Result<Geometry> {
    let mut r = Reader {
        buf: blob,
        pos: 0,
        little: true,
    };
    let (srid, _) = r.header()?;
    let (class, has_z) = r.class()?;
    let mut geom = Geometry::new(srid, has_z);
    geom.declared = class;
    match class {
        GeometryClass::Point => geom.points.push(r.coord(has_z)?),
        GeometryClass::Linestring => geom.linestrings.push(r.ring(has_z)?),
        GeometryClass::Polygon => geom.polygons.push(r.polygon(has_z)?),
        GeometryClass::Geometry => return Err(Error::UnsupportedClass(class.code(has_z))),
        _ => {
            let n = r.count()?;
            for _ in 0..n {
                r.marker(ENTITY)?;
                let (member, member_z) = r.class()?;
                let allowed = match class {
                    GeometryClass::MultiPoint => member == GeometryClass::Point,
                    GeometryClass::MultiLinestring => member == GeometryClass::Linestring,
                    GeometryClass::MultiPolygon => member == GeometryClass::Polygon,
                    _ => matches!(
                        member,
                        GeometryClass::Point | GeometryClass::Linestring | GeometryClass::Polygon
                    ),
                };
                if !allowed || member_z != has_z {
                    return Err(Error::UnsupportedClass(member.code(member_z)));
                }
                match member {
                    GeometryClass::Point => geom.points.push(r.coord(has_z)?),
                    GeometryClass::Linestring => geom.linestrings.push(r.ring(has_z)?),
                    _ => geom.polygons.push(r.polygon(has_z)?),
                }
            }
        }
    }
    r.marker(END)?;
    if r.pos != blob.len() {
        return Err(Error::TrailingBytes(blob.len() - r.pos));
    }
    Ok(geom)
}

/// Reads the SRID and stored bounding rectangle without decoding the body.
pub fn read_bounds(blob: &[u8]) -> Result<(i32, Bounds)> {
    let mut r = Reader {
        buf: blob,
        pos: 0,
        little: true,
    };
    r.header()
}

/// Reads the class code and dimension model without decoding the body.
pub fn read_class(blob: &[u8]) -> Result<(i32, GeometryClass, bool)> {
    let mut r = Reader {
        buf: blob,
        pos: 0,
        little: true,
    };
    let (srid, _) = r.header()?;
    let (class, has_z) = r.class()?;
    Ok((srid, class, has_z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_layout() {
        let blob = encode(&Geometry::point(4326, false, Coord::xy(1.5, -2.0)));
        assert_eq!(blob[0], START);
        assert_eq!(blob[1], LITTLE_ENDIAN);
        assert_eq!(i32::from_le_bytes(blob[2..6].try_into().unwrap()), 4326);
        assert_eq!(blob[38], MBR_END);
        assert_eq!(i32::from_le_bytes(blob[39..43].try_into().unwrap()), 1);
        assert_eq!(*blob.last().unwrap(), END);
        // header, class, two doubles, end marker
        assert_eq!(blob.len(), 39 + 4 + 16 + 1);
    }

    #[test]
    fn decodes_linestring_with_z() {
        let line = vec![Coord::xyz(0.0, 0.0, 1.0), Coord::xyz(3.0, 4.0, 2.0)];
        let geom = Geometry::linestring(3003, true, line.clone());
        let back = decode(&encode(&geom)).unwrap();
        assert_eq!(back.srid, 3003);
        assert!(back.has_z);
        assert_eq!(back.as_single_linestring(), Some(line.as_slice()));
        let (_, bounds) = read_bounds(&encode(&geom)).unwrap();
        assert_eq!(bounds.max_x, 3.0);
        assert_eq!(bounds.max_y, 4.0);
    }

    #[test]
    fn collection_keeps_member_order() {
        let mut geom = Geometry::new(0, false);
        geom.points.push(Coord::xy(9.0, 9.0));
        geom.linestrings.push(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 0.0)]);
        geom.polygons.push(Polygon::new(vec![
            Coord::xy(0.0, 0.0),
            Coord::xy(1.0, 0.0),
            Coord::xy(1.0, 1.0),
            Coord::xy(0.0, 0.0),
        ]));
        let back = decode(&encode(&geom)).unwrap();
        assert_eq!(back.declared, GeometryClass::GeometryCollection);
        assert_eq!(back.points, geom.points);
        assert_eq!(back.linestrings, geom.linestrings);
        assert_eq!(back.polygons, geom.polygons);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode(&[]).is_err());
        assert!(decode(b"not a geometry").is_err());

        let mut blob = encode(&Geometry::point(0, false, Coord::xy(0.0, 0.0)));
        blob.push(0);
        assert!(matches!(decode(&blob), Err(Error::TrailingBytes(1))));

        let mut blob = encode(&Geometry::point(0, false, Coord::xy(0.0, 0.0)));
        blob.pop();
        assert!(decode(&blob).is_err());
    }

    #[test]
    fn reads_big_endian() {
        let mut blob = vec![START, BIG_ENDIAN];
        blob.extend_from_slice(&4326i32.to_be_bytes());
        for v in [1.0f64, 2.0, 1.0, 2.0] {
            blob.extend_from_slice(&v.to_be_bytes());
        }
        blob.push(MBR_END);
        blob.extend_from_slice(&1i32.to_be_bytes());
        blob.extend_from_slice(&1.0f64.to_be_bytes());
        blob.extend_from_slice(&2.0f64.to_be_bytes());
        blob.push(END);
        let geom = decode(&blob).unwrap();
        assert_eq!(geom.as_single_point(), Some(Coord::xy(1.0, 2.0)));
    }
}
