// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Spatial metadata.
//!
//! Geometry columns are registered in `geometry_columns` with their class,
//! dimension model and SRID. Registration installs two constraint triggers
//! (`ggi_` on insert, `ggu_` on update) rejecting values of the wrong shape.
//! A spatial index is an R*Tree named `idx_{table}_{column}` keyed by the
//! row id and kept current by three triggers (`gii_`, `giu_`, `gid_`).

use rusqlite::{params, Connection, OptionalExtension};
use toponet_geometry::{Bounds, GeometryClass};

use crate::error::{Error, Result};
use crate::sql::{quote_identifier, quote_literal, schema};

const CREATE_GEOMETRY_COLUMNS: &str = "
CREATE TABLE IF NOT EXISTS geometry_columns (
    f_table_name TEXT NOT NULL,
    f_geometry_column TEXT NOT NULL,
    geometry_type INTEGER NOT NULL,
    coord_dimension INTEGER NOT NULL,
    srid INTEGER NOT NULL,
    spatial_index_enabled INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT pk_geom_cols PRIMARY KEY (f_table_name, f_geometry_column),
    CONSTRAINT ck_gc_rtree CHECK (spatial_index_enabled IN (0, 1)),
    CONSTRAINT ck_gc_dims CHECK (coord_dimension IN (2, 3))
)";

/// A registered geometry column.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryColumn {
    pub table: String,
    pub column: String,
    pub class: GeometryClass,
    pub has_z: bool,
    pub srid: i32,
    pub spatial_index: bool,
}

/// Creates the `geometry_columns` table if it is missing.
pub fn init_spatial_metadata(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_GEOMETRY_COLUMNS)?;
    Ok(())
}

/// Name of the R*Tree backing the spatial index of `table.column`.
pub fn spatial_index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}

/// SQL fragment restricting `ROWID` to spatial index hits inside a search
/// frame. Binds four parameters starting at `?{first}`: min x, min y, max x,
/// max y.
pub fn index_filter(db_prefix: Option<&str>, table: &str, column: &str, first: usize) -> String {
    format!(
        "ROWID IN (SELECT pkid FROM {}.{} WHERE xmin <= ?{} AND xmax >= ?{} AND ymin <= ?{} AND ymax >= ?{})",
        quote_identifier(schema(db_prefix)),
        quote_identifier(&spatial_index_name(table, column)),
        first + 2,
        first,
        first + 3,
        first + 1,
    )
}

/// Parameters matching [`index_filter`].
pub fn frame_params(frame: &Bounds) -> [f64; 4] {
    [frame.min_x, frame.min_y, frame.max_x, frame.max_y]
}

/// Adds a geometry column to an existing table and registers it.
pub fn add_geometry_column(
    conn: &Connection,
    table: &str,
    column: &str,
    class: GeometryClass,
    srid: i32,
    has_z: bool,
) -> Result<()> {
    if find_geometry_column(conn, None, table, column)?.is_some() {
        return Err(Error::ColumnExists {
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    let qt = quote_identifier(table);
    let qc = quote_identifier(column);
    conn.execute_batch(&format!(
        "ALTER TABLE {qt} ADD COLUMN {qc} {}",
        class.name()
    ))?;
    conn.execute(
        "INSERT INTO geometry_columns (f_table_name, f_geometry_column, geometry_type, coord_dimension, srid, spatial_index_enabled)
         VALUES (Lower(?1), Lower(?2), ?3, ?4, ?5, 0)",
        params![table, column, class.code(has_z), if has_z { 3 } else { 2 }, srid],
    )?;

    let type_code = class.code(has_z);
    let message = quote_literal(&format!(
        "{table}.{column} violates Geometry constraint [geom-type or SRID not allowed]"
    ));
    conn.execute_batch(&format!(
        "CREATE TRIGGER {ggi} BEFORE INSERT ON {qt} FOR EACH ROW BEGIN
            SELECT RAISE(ABORT, {message}) WHERE GeometryConstraints(NEW.{qc}, {type_code}, {srid}) = 0;
         END;
         CREATE TRIGGER {ggu} BEFORE UPDATE OF {qc} ON {qt} FOR EACH ROW BEGIN
            SELECT RAISE(ABORT, {message}) WHERE GeometryConstraints(NEW.{qc}, {type_code}, {srid}) = 0;
         END;",
        ggi = quote_identifier(&format!("ggi_{table}_{column}")),
        ggu = quote_identifier(&format!("ggu_{table}_{column}")),
    ))?;
    tracing::debug!(table, column, class = class.name(), srid, has_z, "geometry column added");
    Ok(())
}

/// Creates and back-fills the R*Tree spatial index of a registered column.
pub fn create_spatial_index(conn: &Connection, table: &str, column: &str) -> Result<()> {
    let info = find_geometry_column(conn, None, table, column)?.ok_or_else(|| Error::ColumnNotFound {
        table: table.to_string(),
        column: column.to_string(),
    })?;
    let qt = quote_identifier(&info.table);
    let qc = quote_identifier(&info.column);
    let idx = quote_identifier(&spatial_index_name(&info.table, &info.column));
    let insert_new = format!(
        "INSERT INTO {idx} (pkid, xmin, xmax, ymin, ymax)
            SELECT NEW.ROWID, MbrMinX(NEW.{qc}), MbrMaxX(NEW.{qc}), MbrMinY(NEW.{qc}), MbrMaxY(NEW.{qc})
            WHERE NEW.{qc} IS NOT NULL;"
    );
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE {idx} USING rtree(pkid, xmin, xmax, ymin, ymax);
         CREATE TRIGGER {gii} AFTER INSERT ON {qt} FOR EACH ROW BEGIN
            {insert_new}
         END;
         CREATE TRIGGER {giu} AFTER UPDATE OF {qc} ON {qt} FOR EACH ROW BEGIN
            DELETE FROM {idx} WHERE pkid = OLD.ROWID;
            {insert_new}
         END;
         CREATE TRIGGER {gid} AFTER DELETE ON {qt} FOR EACH ROW BEGIN
            DELETE FROM {idx} WHERE pkid = OLD.ROWID;
         END;
         INSERT INTO {idx} (pkid, xmin, xmax, ymin, ymax)
            SELECT ROWID, MbrMinX({qc}), MbrMaxX({qc}), MbrMinY({qc}), MbrMaxY({qc})
            FROM {qt} WHERE {qc} IS NOT NULL;",
        gii = quote_identifier(&format!("gii_{}_{}", info.table, info.column)),
        giu = quote_identifier(&format!("giu_{}_{}", info.table, info.column)),
        gid = quote_identifier(&format!("gid_{}_{}", info.table, info.column)),
    ))?;
    conn.execute(
        "UPDATE geometry_columns SET spatial_index_enabled = 1
         WHERE f_table_name = ?1 AND f_geometry_column = ?2",
        params![info.table, info.column],
    )?;
    tracing::debug!(table = %info.table, column = %info.column, "spatial index created");
    Ok(())
}

/// Case-insensitive lookup of a registered geometry column.
pub fn find_geometry_column(
    conn: &Connection,
    db_prefix: Option<&str>,
    table: &str,
    column: &str,
) -> Result<Option<GeometryColumn>> {
    let sql = format!(
        "SELECT f_table_name, f_geometry_column, geometry_type, srid, spatial_index_enabled
         FROM {}.geometry_columns
         WHERE Lower(f_table_name) = Lower(?1) AND Lower(f_geometry_column) = Lower(?2)",
        quote_identifier(schema(db_prefix))
    );
    let row = conn
        .query_row(&sql, params![table, column], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })
        .optional()?;
    Ok(row.and_then(|(table, column, code, srid, indexed)| {
        let (class, has_z) = GeometryClass::from_code(code)?;
        Some(GeometryColumn {
            table,
            column,
            class,
            has_z,
            srid,
            spatial_index: indexed != 0,
        })
    }))
}

/// Every registered geometry column of a table.
pub fn table_geometry_columns(
    conn: &Connection,
    db_prefix: Option<&str>,
    table: &str,
) -> Result<Vec<GeometryColumn>> {
    let sql = format!(
        "SELECT f_geometry_column FROM {}.geometry_columns WHERE Lower(f_table_name) = Lower(?1)
         ORDER BY f_geometry_column",
        quote_identifier(schema(db_prefix))
    );
    let names = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        if let Some(col) = find_geometry_column(conn, db_prefix, table, &name)? {
            columns.push(col);
        }
    }
    Ok(columns)
}

/// Drops a table together with its spatial indices and metadata rows.
pub fn drop_geometry_table(conn: &Connection, table: &str) -> Result<()> {
    for col in table_geometry_columns(conn, None, table)? {
        if col.spatial_index {
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_identifier(&spatial_index_name(&col.table, &col.column))
            ))?;
        }
    }
    conn.execute(
        "DELETE FROM geometry_columns WHERE Lower(f_table_name) = Lower(?1)",
        params![table],
    )?;
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))?;
    tracing::debug!(table, "geometry table dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions;
    use toponet_geometry::{encode, Coord, Geometry};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        functions::register(&conn).unwrap();
        init_spatial_metadata(&conn).unwrap();
        conn.execute_batch("CREATE TABLE pts (id INTEGER PRIMARY KEY)").unwrap();
        conn
    }

    fn point(x: f64, y: f64) -> Vec<u8> {
        encode(&Geometry::point(3003, false, Coord::xy(x, y)))
    }

    #[test]
    fn registers_and_finds_columns() {
        let conn = conn();
        add_geometry_column(&conn, "pts", "geom", GeometryClass::Point, 3003, false).unwrap();
        let col = find_geometry_column(&conn, None, "PTS", "Geom").unwrap().unwrap();
        assert_eq!(col.class, GeometryClass::Point);
        assert_eq!(col.srid, 3003);
        assert!(!col.has_z);
        assert!(!col.spatial_index);
        assert!(matches!(
            add_geometry_column(&conn, "pts", "geom", GeometryClass::Point, 3003, false),
            Err(Error::ColumnExists { .. })
        ));
    }

    #[test]
    fn constraint_triggers_reject_wrong_shapes() {
        let conn = conn();
        add_geometry_column(&conn, "pts", "geom", GeometryClass::Point, 3003, false).unwrap();
        conn.execute("INSERT INTO pts (geom) VALUES (?1)", params![point(1.0, 1.0)])
            .unwrap();
        conn.execute("INSERT INTO pts (geom) VALUES (NULL)", []).unwrap();

        let wrong_srid = encode(&Geometry::point(4326, false, Coord::xy(1.0, 1.0)));
        assert!(conn
            .execute("INSERT INTO pts (geom) VALUES (?1)", params![wrong_srid])
            .is_err());
        let line = encode(&Geometry::linestring(
            3003,
            false,
            vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)],
        ));
        assert!(conn
            .execute("UPDATE pts SET geom = ?1 WHERE id = 1", params![line])
            .is_err());
    }

    #[test]
    fn spatial_index_tracks_rows() {
        let conn = conn();
        add_geometry_column(&conn, "pts", "geom", GeometryClass::Point, 3003, false).unwrap();
        conn.execute("INSERT INTO pts (geom) VALUES (?1)", params![point(1.0, 1.0)])
            .unwrap();
        create_spatial_index(&conn, "pts", "geom").unwrap();
        conn.execute("INSERT INTO pts (geom) VALUES (?1)", params![point(50.0, 50.0)])
            .unwrap();

        let hits = |frame: Bounds| -> i64 {
            let sql = format!(
                "SELECT Count(*) FROM pts WHERE {}",
                index_filter(None, "pts", "geom", 1)
            );
            let p = frame_params(&frame);
            conn.query_row(&sql, params![p[0], p[1], p[2], p[3]], |r| r.get(0))
                .unwrap()
        };
        let near_origin = Bounds::of(&Coord::xy(1.0, 1.0)).expanded(0.5);
        let near_far = Bounds::of(&Coord::xy(50.0, 50.0)).expanded(0.5);
        assert_eq!(hits(near_origin), 1);
        assert_eq!(hits(near_far), 1);

        conn.execute("UPDATE pts SET geom = ?1 WHERE id = 1", params![point(50.0, 50.2)])
            .unwrap();
        assert_eq!(hits(near_origin), 0);
        assert_eq!(hits(near_far), 2);

        conn.execute("DELETE FROM pts WHERE id = 2", []).unwrap();
        assert_eq!(hits(near_far), 1);

        assert!(find_geometry_column(&conn, None, "pts", "geom").unwrap().unwrap().spatial_index);
        drop_geometry_table(&conn, "pts").unwrap();
        assert!(find_geometry_column(&conn, None, "pts", "geom").unwrap().is_none());
    }
}
