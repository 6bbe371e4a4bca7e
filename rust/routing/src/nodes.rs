// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node columns for LINESTRING tables.
//!
//! Tables that carry road geometries but no node references can be made
//! routable by numbering the distinct start and end points of their lines.
//! Points are compared exactly on X, Y and Z.

use rusqlite::{params, Connection};
use toponet_core::metadata::{find_geometry_column, table_geometry_columns};
use toponet_core::sql::{qualified, quote_identifier, read_geometry, table_columns};
use toponet_core::Session;
use toponet_geometry::{Coord, GeometryClass};

use crate::error::{Error, Result};

const AUX_TABLE: &str = "temp_create_routing_aux_nodes";

/// Arguments of [`crate::RoutingBuilder::create_routing_nodes`].
#[derive(Debug, Clone, Copy)]
pub struct NodesRequest<'a> {
    pub db_prefix: Option<&'a str>,
    pub table: &'a str,
    /// Registered LINESTRING column; may be omitted when the table has
    /// exactly one.
    pub geom_column: Option<&'a str>,
    pub from_column: &'a str,
    pub to_column: &'a str,
}

impl<'a> NodesRequest<'a> {
    pub fn new(table: &'a str, from_column: &'a str, to_column: &'a str) -> Self {
        Self {
            db_prefix: None,
            table,
            geom_column: None,
            from_column,
            to_column,
        }
    }

    pub fn in_database(mut self, db_prefix: &'a str) -> Self {
        self.db_prefix = Some(db_prefix);
        self
    }

    pub fn geometry(mut self, column: &'a str) -> Self {
        self.geom_column = Some(column);
        self
    }
}

fn linestring_column(conn: &Connection, req: &NodesRequest<'_>) -> Result<String> {
    match req.geom_column.filter(|c| !c.is_empty()) {
        Some(column) => find_geometry_column(conn, req.db_prefix, req.table, column)?
            .filter(|g| g.class == GeometryClass::Linestring)
            .map(|g| g.column)
            .ok_or_else(|| Error::NotSpatialColumn {
                table: req.table.to_string(),
                column: column.to_string(),
            }),
        None => {
            let mut lines: Vec<_> = table_geometry_columns(conn, req.db_prefix, req.table)?
                .into_iter()
                .filter(|g| g.class == GeometryClass::Linestring)
                .collect();
            match (lines.pop(), lines.is_empty()) {
                (Some(only), true) => Ok(only.column),
                _ => Err(Error::NotSpatialTable(req.table.to_string())),
            }
        }
    }
}

/// Adds `from_column` and `to_column` to a LINESTRING table and fills them
/// with ids of the distinct line end points. Returns the node count.
pub fn create_routing_nodes(session: &mut Session, req: &NodesRequest<'_>) -> Result<usize> {
    for (value, what) in [
        (req.table, "Spatial Table Name"),
        (req.from_column, "FromNode Column Name"),
        (req.to_column, "ToNode Column Name"),
    ] {
        if value.is_empty() {
            return Err(Error::NullName(what));
        }
    }

    let conn = session.conn();
    let geom_column = linestring_column(conn, req)?;
    let columns = table_columns(conn, req.db_prefix, req.table)?;
    let defined = |name: &str| columns.iter().any(|c| c.name.eq_ignore_ascii_case(name));
    for (column, role) in [(req.from_column, "FromNode"), (req.to_column, "ToNode")] {
        if defined(column) {
            return Err(Error::ColumnAlreadyDefined {
                role,
                column: column.to_string(),
            });
        }
    }
    if !defined(&geom_column) {
        return Err(Error::GeometryColumnMissing(geom_column));
    }

    let nodes = session.atomic_named("create_routing_nodes", |s| fill_node_columns(s.conn(), req, &geom_column))?;
    tracing::info!(table = req.table, nodes, "routing node columns created");
    Ok(nodes)
}

fn fill_node_columns(conn: &Connection, req: &NodesRequest<'_>, geom_column: &str) -> Result<usize> {
    let table = qualified(req.db_prefix, req.table);
    let from = quote_identifier(req.from_column);
    let to = quote_identifier(req.to_column);
    conn.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {from} INTEGER;
         ALTER TABLE {table} ADD COLUMN {to} INTEGER;
         DROP TABLE IF EXISTS temp.{AUX_TABLE};
         CREATE TEMP TABLE {AUX_TABLE} (
             x DOUBLE NOT NULL,
             y DOUBLE NOT NULL,
             z DOUBLE NOT NULL,
             CONSTRAINT pk_aux_nodes PRIMARY KEY (x, y, z))"
    ))?;

    let ends: Vec<(i64, Coord, Coord)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT ROWID, {} FROM {table}",
            quote_identifier(geom_column)
        ))?;
        let mut rows = stmt.query([])?;
        let mut ends = Vec::new();
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let Some(geom) = read_geometry(row.get_ref(1)?)? else {
                continue;
            };
            let Some(line) = geom.as_single_linestring() else {
                continue;
            };
            if let (Some(first), Some(last)) = (line.first(), line.last()) {
                ends.push((rowid, *first, *last));
            }
        }
        ends
    };

    let mut insert = conn.prepare(&format!(
        "INSERT OR IGNORE INTO temp.{AUX_TABLE} (x, y, z) VALUES (?1, ?2, ?3)"
    ))?;
    for (_, first, last) in &ends {
        for p in [first, last] {
            insert.execute(params![p.x, p.y, p.z])?;
        }
    }

    let mut lookup = conn.prepare(&format!(
        "SELECT ROWID FROM temp.{AUX_TABLE} WHERE x = ?1 AND y = ?2 AND z = ?3"
    ))?;
    let mut update = conn.prepare(&format!(
        "UPDATE {table} SET {from} = ?2, {to} = ?3 WHERE ROWID = ?1"
    ))?;
    for (rowid, first, last) in &ends {
        let a: i64 = lookup.query_row(params![first.x, first.y, first.z], |r| r.get(0))?;
        let b: i64 = lookup.query_row(params![last.x, last.y, last.z], |r| r.get(0))?;
        update.execute(params![rowid, a, b])?;
    }

    let nodes: i64 = conn.query_row(&format!("SELECT Count(*) FROM temp.{AUX_TABLE}"), [], |r| r.get(0))?;
    conn.execute_batch(&format!("DROP TABLE temp.{AUX_TABLE}"))?;
    Ok(nodes as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toponet_core::metadata::add_geometry_column;
    use toponet_geometry::{encode, Geometry};

    fn roads(session: &Session) {
        let conn = session.conn();
        conn.execute_batch("CREATE TABLE roads (id INTEGER PRIMARY KEY)").unwrap();
        add_geometry_column(conn, "roads", "geom", GeometryClass::Linestring, 4326, false).unwrap();
        for coords in [
            [(0.0, 0.0), (1.0, 0.0)],
            [(1.0, 0.0), (1.0, 1.0)],
            [(5.0, 5.0), (0.0, 0.0)],
        ] {
            let line = Geometry::linestring(4326, false, coords.iter().map(|&(x, y)| Coord::xy(x, y)).collect());
            conn.execute("INSERT INTO roads (geom) VALUES (?1)", [encode(&line)]).unwrap();
        }
    }

    #[test]
    fn shared_end_points_share_ids() {
        let mut session = Session::open_in_memory().unwrap();
        roads(&session);
        let nodes = create_routing_nodes(&mut session, &NodesRequest::new("roads", "node_from", "node_to")).unwrap();
        assert_eq!(nodes, 4);

        let mut stmt = session
            .conn()
            .prepare("SELECT node_from, node_to FROM roads ORDER BY id")
            .unwrap();
        let pairs: Vec<(i64, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(pairs, vec![(1, 2), (2, 3), (4, 1)]);
    }

    #[test]
    fn existing_columns_are_refused() {
        let mut session = Session::open_in_memory().unwrap();
        roads(&session);
        let err = create_routing_nodes(&mut session, &NodesRequest::new("roads", "ID", "node_to")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "FromNode Column \"ID\" is already defined in the Spatial Table"
        );
    }

    #[test]
    fn only_linestring_tables_qualify() {
        let mut session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        conn.execute_batch("CREATE TABLE places (id INTEGER PRIMARY KEY)").unwrap();
        add_geometry_column(conn, "places", "geom", GeometryClass::Point, 4326, false).unwrap();
        let err = create_routing_nodes(&mut session, &NodesRequest::new("places", "a", "b")).unwrap_err();
        assert_eq!(err.to_string(), "'places' is not a valid Spatial Table (LINESTRING)");
        let err = create_routing_nodes(&mut session, &NodesRequest::new("places", "a", "b").geometry("geom"))
            .unwrap_err();
        assert!(matches!(err, Error::NotSpatialColumn { .. }));
    }
}
