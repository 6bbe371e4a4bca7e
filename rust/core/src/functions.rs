// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SQL scalar functions used by spatial index and constraint triggers.
//!
//! - `MbrMinX(g)`, `MbrMaxX(g)`, `MbrMinY(g)`, `MbrMaxY(g)`: bounds stored in
//!   a geometry BLOB header, NULL for NULL or non-geometry input.
//! - `GeometryConstraints(g, type, srid)`: 1 when `g` is NULL or a geometry
//!   of the column's class, dimension model and SRID; 0 otherwise.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use toponet_geometry::blob::{read_bounds, read_class};
use toponet_geometry::{Bounds, GeometryClass};

use crate::error::Result;

fn flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

fn blob_bounds(ctx: &Context<'_>) -> Option<Bounds> {
    match ctx.get_raw(0) {
        ValueRef::Blob(bytes) => read_bounds(bytes).ok().map(|(_, bounds)| bounds),
        _ => None,
    }
}

/// Whether a BLOB satisfies a column's declared `(type code, srid)`.
///
/// Type code 0 (or 1000) accepts any class of the matching dimension model.
pub fn satisfies_constraints(blob: &[u8], type_code: i32, srid: i32) -> bool {
    let Ok((blob_srid, class, has_z)) = read_class(blob) else {
        return false;
    };
    let Some((expected, expected_z)) = GeometryClass::from_code(type_code) else {
        return false;
    };
    blob_srid == srid
        && has_z == expected_z
        && (expected == GeometryClass::Geometry || expected == class)
}

/// Registers every function on `conn`.
pub fn register(conn: &Connection) -> Result<()> {
    conn.create_scalar_function("MbrMinX", 1, flags(), |ctx| {
        Ok(blob_bounds(ctx).map(|b| b.min_x))
    })?;
    conn.create_scalar_function("MbrMaxX", 1, flags(), |ctx| {
        Ok(blob_bounds(ctx).map(|b| b.max_x))
    })?;
    conn.create_scalar_function("MbrMinY", 1, flags(), |ctx| {
        Ok(blob_bounds(ctx).map(|b| b.min_y))
    })?;
    conn.create_scalar_function("MbrMaxY", 1, flags(), |ctx| {
        Ok(blob_bounds(ctx).map(|b| b.max_y))
    })?;
    conn.create_scalar_function("GeometryConstraints", 3, flags(), |ctx| {
        let type_code: i32 = ctx.get(1)?;
        let srid: i32 = ctx.get(2)?;
        let ok = match ctx.get_raw(0) {
            ValueRef::Null => true,
            ValueRef::Blob(bytes) => satisfies_constraints(bytes, type_code, srid),
            _ => false,
        };
        Ok(i32::from(ok))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rusqlite::params;
    use toponet_geometry::{encode, Coord, Geometry};

    #[test]
    fn mbr_functions_read_header() {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        let blob = encode(&Geometry::linestring(
            4326,
            false,
            vec![Coord::xy(1.5, -2.0), Coord::xy(7.25, 3.0)],
        ));
        let (minx, maxx, miny, maxy): (f64, f64, f64, f64) = conn
            .query_row(
                "SELECT MbrMinX(?1), MbrMaxX(?1), MbrMinY(?1), MbrMaxY(?1)",
                params![blob],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_relative_eq!(minx, 1.5);
        assert_relative_eq!(maxx, 7.25);
        assert_relative_eq!(miny, -2.0);
        assert_relative_eq!(maxy, 3.0);

        let none: Option<f64> = conn
            .query_row("SELECT MbrMinX('text')", [], |r| r.get(0))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn constraints() {
        let point = encode(&Geometry::point(4326, false, Coord::xy(0.0, 0.0)));
        assert!(satisfies_constraints(&point, 1, 4326));
        assert!(satisfies_constraints(&point, 0, 4326));
        assert!(!satisfies_constraints(&point, 1, 3003));
        assert!(!satisfies_constraints(&point, 1001, 4326));
        assert!(!satisfies_constraints(&point, 2, 4326));
        assert!(!satisfies_constraints(b"junk", 1, 4326));
    }
}
