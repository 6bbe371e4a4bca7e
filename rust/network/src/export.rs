// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Correlating reference features with the network.
//!
//! Reference lines are matched to links through link seeds: a link belongs
//! to a reference line when its seed lies on it. Reference points are
//! matched to the nodes at the same position.

use std::collections::BTreeSet;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use rustc_hash::{FxHashMap, FxHashSet};
use toponet_core::metadata::{
    add_geometry_column, create_spatial_index, find_geometry_column, frame_params, index_filter,
    GeometryColumn,
};
use toponet_core::sql::{find_table, qualified, quote_identifier, table_columns, ColumnInfo};
use toponet_geometry::ops::{line_merge, locate_along, simplify};
use toponet_geometry::predicates::point_intersects;
use toponet_geometry::{decode, encode, Bounds, Coord, Geometry, GeometryClass};

use crate::backend::{NetworkBackend, SqliteBackend};
use crate::catalog::GEOMETRY_COLUMN;
use crate::error::{Error, Result};
use crate::seeds::update_seeds;

/// Parameters of a `TopoNet_ToGeoTable` export.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub db_prefix: Option<&'a str>,
    pub ref_table: &'a str,
    pub ref_column: &'a str,
    pub out_table: &'a str,
    /// Douglas-Peucker tolerance applied to every link; `<= 0` keeps links as
    /// they are.
    pub tolerance: f64,
    pub with_spatial_index: bool,
}

impl<'a> ExportRequest<'a> {
    pub fn new(ref_table: &'a str, ref_column: &'a str, out_table: &'a str) -> Self {
        Self {
            db_prefix: None,
            ref_table,
            ref_column,
            out_table,
            tolerance: 0.0,
            with_spatial_index: false,
        }
    }

    pub fn in_database(mut self, db_prefix: Option<&'a str>) -> Self {
        self.db_prefix = db_prefix;
        self
    }

    /// Simplifies exported links with `tolerance`.
    pub fn generalized(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_spatial_index(mut self, enabled: bool) -> Self {
        self.with_spatial_index = enabled;
        self
    }
}

/// Class of the exported geometry column for a reference column of `class`.
pub fn output_class(class: GeometryClass) -> GeometryClass {
    match class {
        GeometryClass::Point => GeometryClass::Point,
        GeometryClass::MultiPoint => GeometryClass::MultiPoint,
        GeometryClass::Linestring | GeometryClass::MultiLinestring => GeometryClass::MultiLinestring,
        GeometryClass::GeometryCollection => GeometryClass::GeometryCollection,
        _ => GeometryClass::Geometry,
    }
}

fn decode_value(value: Value, op: &'static str) -> Result<Option<Geometry>> {
    match value {
        Value::Null => Ok(None),
        Value::Blob(bytes) => decode(&bytes).map(Some).map_err(|_| Error::InvalidGeometry(op)),
        _ => Err(Error::NotABlob(op)),
    }
}

// ============================================================================
// Seed matching
// ============================================================================

/// Ids of the links whose seed lies on any linestring of `geom`.
fn links_on(backend: &SqliteBackend<'_>, geom: &Geometry) -> Result<BTreeSet<i64>> {
    let info = backend.info();
    let seeds = info.seeds_table();
    let sql = format!(
        "SELECT link_id, geometry FROM {} WHERE {}",
        quote_identifier(&seeds),
        index_filter(None, &seeds, GEOMETRY_COLUMN, 1)
    );
    let mut stmt = backend.conn().prepare_cached(&sql)?;
    let mut found = BTreeSet::new();
    for line in &geom.linestrings {
        let Some(frame) = Bounds::of_coords(line) else {
            continue;
        };
        let hits = stmt
            .query_map(params_from_iter(frame_params(&frame)), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let single = Geometry::linestring(geom.srid, geom.has_z, line.clone());
        for (link_id, value) in hits {
            let seed = decode_value(value, "TopoNet_ToGeoTable")?.and_then(|g| g.as_single_point());
            if seed.is_some_and(|p| point_intersects(&p, &single)) {
                found.insert(link_id);
            }
        }
    }
    Ok(found)
}

/// The network counterpart of one reference geometry, `None` when nothing in
/// the network matches it or the reference holds a polygon.
fn network_geometry(
    backend: &SqliteBackend<'_>,
    reference: &Geometry,
    class: GeometryClass,
    tolerance: f64,
) -> Result<Option<Geometry>> {
    if !reference.polygons.is_empty() {
        tracing::debug!("reference geometry holds polygons, row left without geometry");
        return Ok(None);
    }
    let info = backend.info();
    let mut out = Geometry::new(info.srid, info.has_z).with_class(class);

    for p in &reference.points {
        for node in backend.get_nodes_in_frame(&Bounds::of(p))? {
            if let Some(at) = node.geom.filter(|g| g.same_xy(p)) {
                out.points.push(at);
            }
        }
    }
    if class == GeometryClass::Point {
        out.points.truncate(1);
    }

    let mut lines = Vec::new();
    for link_id in links_on(backend, reference)? {
        if let Some(line) = backend.get_link_by_id(link_id)?.and_then(|l| l.geom) {
            lines.push(simplify(&line, tolerance));
        }
    }
    out.linestrings = line_merge(&lines);

    Ok((!out.is_empty()).then_some(out))
}

// ============================================================================
// ToGeoTable
// ============================================================================

fn reference_column(
    conn: &Connection,
    db_prefix: Option<&str>,
    table: &str,
    column: &str,
    op: &'static str,
) -> Result<GeometryColumn> {
    find_geometry_column(conn, db_prefix, table, column)?.ok_or(Error::InvalidReferenceGeoTable(op))
}

fn column_definition(col: &ColumnInfo) -> String {
    let mut def = quote_identifier(&col.name);
    if !col.decl_type.is_empty() {
        def.push(' ');
        def.push_str(&col.decl_type);
    }
    if col.not_null {
        def.push_str(" NOT NULL");
    }
    def
}

/// Copies the reference table into `out_table`, replacing each reference
/// geometry by the nodes or links matching it.
pub fn to_geo_table(backend: &SqliteBackend<'_>, request: &ExportRequest<'_>) -> Result<()> {
    const OP: &str = "TopoNet_ToGeoTable";
    let info = backend.info();
    let conn = backend.conn();

    let reference = reference_column(conn, request.db_prefix, request.ref_table, request.ref_column, OP)?;
    if reference.srid != info.srid {
        return Err(Error::MismatchingReferenceSrid);
    }
    if find_table(conn, None, request.out_table)?.is_some() {
        return Err(Error::OutputExists(OP));
    }

    update_seeds(backend, true)?;
    export_rows(backend, request, &reference).map_err(Error::within(OP))
}

fn export_rows(backend: &SqliteBackend<'_>, request: &ExportRequest<'_>, reference: &GeometryColumn) -> Result<()> {
    const OP: &str = "TopoNet_ToGeoTable";
    let info = backend.info();
    let conn = backend.conn();

    let columns: Vec<ColumnInfo> = table_columns(conn, request.db_prefix, &reference.table)?
        .into_iter()
        .filter(|c| !c.name.eq_ignore_ascii_case(&reference.column))
        .collect();
    let mut defs: Vec<String> = columns.iter().map(column_definition).collect();
    let keys: Vec<String> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| quote_identifier(&c.name))
        .collect();
    if !keys.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    let out = quote_identifier(request.out_table);
    conn.execute_batch(&format!("CREATE TABLE {out} ({})", defs.join(", ")))?;

    let geom_column = request.ref_column.to_lowercase();
    let class = output_class(reference.class);
    add_geometry_column(conn, request.out_table, &geom_column, class, info.srid, info.has_z)?;
    if request.with_spatial_index {
        create_spatial_index(conn, request.out_table, &geom_column)?;
    }

    let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
    let mut select_list = names.clone();
    select_list.push(quote_identifier(&reference.column));
    let rows: Vec<Vec<Value>> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            qualified(request.db_prefix, &reference.table)
        ))?;
        let width = select_list.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut insert_list = names;
    insert_list.push(quote_identifier(&geom_column));
    let placeholders: Vec<String> = (1..=insert_list.len()).map(|i| format!("?{i}")).collect();
    let mut insert = conn.prepare(&format!(
        "INSERT INTO {out} ({}) VALUES ({})",
        insert_list.join(", "),
        placeholders.join(", ")
    ))?;

    let mut matched = 0usize;
    let total = rows.len();
    for mut row in rows {
        let value = row.pop().unwrap_or(Value::Null);
        let exported = match decode_value(value, OP)? {
            Some(geom) => network_geometry(backend, &geom, class, request.tolerance)?,
            None => None,
        };
        if exported.is_some() {
            matched += 1;
        }
        row.push(exported.map_or(Value::Null, |g| Value::Blob(encode(&g))));
        insert.execute(params_from_iter(row))?;
    }

    tracing::info!(
        network = %info.name,
        reference = %reference.table,
        out = request.out_table,
        rows = total,
        matched,
        "geo table exported"
    );
    Ok(())
}

// ============================================================================
// LineLinksList
// ============================================================================

/// Direction of a link along a reference line: `+` when both run the same
/// way, `-` when opposite, `?` when it cannot be told.
fn direction(link: &[Coord], reference: &Geometry) -> &'static str {
    let (Some(first), Some(last)) = (link.first(), link.last()) else {
        return "?";
    };
    for line in &reference.linestrings {
        if let (Some(a), Some(b)) = (locate_along(line, first), locate_along(line, last)) {
            return if a < b {
                "+"
            } else if a > b {
                "-"
            } else {
                "?"
            };
        }
    }
    "?"
}

/// Writes `out_table(id, link_id, ref_rowid, direction)`: one row per
/// (link, reference line) match, plus rows with a NULL side for links and
/// reference lines that matched nothing.
pub fn line_links_list(
    backend: &SqliteBackend<'_>,
    db_prefix: Option<&str>,
    ref_table: &str,
    ref_column: &str,
    out_table: &str,
) -> Result<()> {
    const OP: &str = "TopoNet_LineLinksList";
    let info = backend.info();
    let conn = backend.conn();

    let reference = reference_column(conn, db_prefix, ref_table, ref_column, OP)?;
    if !reference.class.is_linear() {
        return Err(Error::NotLinearReference);
    }
    if reference.srid != info.srid {
        return Err(Error::MismatchingReferenceGeoTable);
    }
    if find_table(conn, None, out_table)?.is_some() {
        return Err(Error::OutputExists(OP));
    }

    update_seeds(backend, true)?;
    list_links(backend, db_prefix, &reference, out_table).map_err(Error::within(OP))
}

fn list_links(
    backend: &SqliteBackend<'_>,
    db_prefix: Option<&str>,
    reference: &GeometryColumn,
    out_table: &str,
) -> Result<()> {
    const OP: &str = "TopoNet_LineLinksList";
    let info = backend.info();
    let conn = backend.conn();

    let out = quote_identifier(out_table);
    conn.execute_batch(&format!(
        "CREATE TABLE {out} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            link_id INTEGER,
            ref_rowid INTEGER,
            direction TEXT);
         CREATE INDEX {idx} ON {out} (link_id, ref_rowid);",
        idx = quote_identifier(&format!("idx_{out_table}_link_id")),
    ))?;

    let references: Vec<(i64, Geometry, Bounds)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT ROWID, {} FROM {} WHERE {} IS NOT NULL ORDER BY ROWID",
            quote_identifier(&reference.column),
            qualified(db_prefix, &reference.table),
            quote_identifier(&reference.column),
        ))?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut decoded = Vec::with_capacity(raw.len());
        for (rowid, value) in raw {
            let Some(geom) = decode_value(value, OP)? else { continue };
            let Some(bounds) = geom.bounds() else { continue };
            decoded.push((rowid, geom, bounds));
        }
        decoded
    };

    let seeds: FxHashMap<i64, Coord> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT link_id, geometry FROM {}",
            quote_identifier(&info.seeds_table())
        ))?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut map = FxHashMap::default();
        for (link_id, value) in raw {
            if let Some(p) = decode_value(value, OP)?.and_then(|g| g.as_single_point()) {
                map.insert(link_id, p);
            }
        }
        map
    };

    let mut insert = conn.prepare(&format!(
        "INSERT INTO {out} (id, link_id, ref_rowid, direction) VALUES (NULL, ?1, ?2, ?3)"
    ))?;
    let mut seen: FxHashSet<i64> = FxHashSet::default();
    let mut pairs = 0usize;
    for link in backend.all_links()? {
        let mut matched = false;
        if let (Some(seed), Some(line)) = (seeds.get(&link.link_id), link.geom.as_deref()) {
            for (rowid, geom, bounds) in &references {
                if !bounds.intersects(&Bounds::of(seed)) || !point_intersects(seed, geom) {
                    continue;
                }
                insert.execute(params![link.link_id, rowid, direction(line, geom)])?;
                seen.insert(*rowid);
                matched = true;
                pairs += 1;
            }
        }
        if !matched {
            insert.execute(params![link.link_id, None::<i64>, None::<String>])?;
        }
    }
    for (rowid, _, _) in references.iter().filter(|(rowid, _, _)| !seen.contains(rowid)) {
        insert.execute(params![None::<i64>, rowid, None::<String>])?;
    }

    tracing::info!(
        network = %info.name,
        reference = %reference.table,
        out = out_table,
        pairs,
        unmatched_refs = references.len() - seen.len(),
        "line links listed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{create_network, NetworkInfo};
    use crate::edit::EditCore;
    use crate::statements::StatementSet;
    use toponet_core::Session;
    use toponet_geometry::Polygon;

    fn c(x: f64, y: f64) -> Coord {
        Coord::xy(x, y)
    }

    fn info() -> NetworkInfo {
        NetworkInfo {
            name: "net".into(),
            spatial: true,
            srid: 4326,
            has_z: false,
            allow_coincident: false,
        }
    }

    /// a(0,0) -L1-> b(5,0) <-L2- c(10,0) -L3-> d(10,5)
    fn build(backend: &SqliteBackend<'_>, info: &NetworkInfo) {
        let core = EditCore::new(backend, info);
        let a = core.add_iso_net_node(Some(c(0.0, 0.0))).unwrap();
        let b = core.add_iso_net_node(Some(c(5.0, 0.0))).unwrap();
        let cc = core.add_iso_net_node(Some(c(10.0, 0.0))).unwrap();
        let d = core.add_iso_net_node(Some(c(10.0, 5.0))).unwrap();
        core.add_link(a, b, Some(vec![c(0.0, 0.0), c(2.0, 0.0), c(5.0, 0.0)])).unwrap();
        core.add_link(cc, b, Some(vec![c(10.0, 0.0), c(7.0, 0.0), c(5.0, 0.0)])).unwrap();
        core.add_link(cc, d, Some(vec![c(10.0, 0.0), c(10.0, 2.0), c(10.0, 5.0)])).unwrap();
    }

    fn streets(conn: &Connection) {
        conn.execute_batch("CREATE TABLE streets (id INTEGER PRIMARY KEY, name TEXT NOT NULL)").unwrap();
        add_geometry_column(conn, "streets", "Geom", GeometryClass::Linestring, 4326, false).unwrap();
        for (id, name, line) in [
            (1, "main", vec![c(0.0, 0.0), c(10.0, 0.0)]),
            (2, "side", vec![c(20.0, 20.0), c(30.0, 30.0)]),
        ] {
            let blob = encode(&Geometry::linestring(4326, false, line));
            conn.execute(
                "INSERT INTO streets (id, name, geom) VALUES (?1, ?2, ?3)",
                params![id, name, blob],
            )
            .unwrap();
        }
    }

    fn exported(conn: &Connection, sql: &str) -> Option<Geometry> {
        let blob: Option<Vec<u8>> = conn.query_row(sql, [], |r| r.get(0)).unwrap();
        blob.map(|b| decode(&b).unwrap())
    }

    #[test]
    fn lines_export_as_merged_links() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        build(&backend, &info);
        streets(conn);

        let request = ExportRequest::new("streets", "Geom", "streets_net").with_spatial_index(true);
        to_geo_table(&backend, &request).unwrap();

        let main = exported(conn, "SELECT geom FROM streets_net WHERE id = 1").unwrap();
        assert_eq!(main.class(), GeometryClass::MultiLinestring);
        assert_eq!(main.linestrings.len(), 1);
        assert_eq!(main.linestrings[0].len(), 5);
        assert!(exported(conn, "SELECT geom FROM streets_net WHERE id = 2").is_none());
        let name: String = conn
            .query_row("SELECT name FROM streets_net WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "side");
        let column = find_geometry_column(conn, None, "streets_net", "geom").unwrap().unwrap();
        assert!(column.spatial_index);

        assert!(matches!(to_geo_table(&backend, &request), Err(Error::OutputExists(_))));
    }

    #[test]
    fn generalized_export_drops_vertices() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        build(&backend, &info);
        streets(conn);

        to_geo_table(&backend, &ExportRequest::new("streets", "geom", "gen").generalized(0.5)).unwrap();
        let main = exported(conn, "SELECT geom FROM gen WHERE id = 1").unwrap();
        assert_eq!(main.linestrings, vec![vec![c(0.0, 0.0), c(5.0, 0.0), c(10.0, 0.0)]]);
    }

    #[test]
    fn points_export_as_nodes() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        build(&backend, &info);
        conn.execute_batch("CREATE TABLE stops (id INTEGER PRIMARY KEY)").unwrap();
        add_geometry_column(conn, "stops", "geom", GeometryClass::Point, 4326, false).unwrap();
        for p in [c(5.0, 0.0), c(50.0, 50.0)] {
            let blob = encode(&Geometry::point(4326, false, p));
            conn.execute("INSERT INTO stops (geom) VALUES (?1)", [blob]).unwrap();
        }

        to_geo_table(&backend, &ExportRequest::new("stops", "geom", "stops_net")).unwrap();
        let hit = exported(conn, "SELECT geom FROM stops_net WHERE id = 1").unwrap();
        assert_eq!(hit.as_single_point(), Some(c(5.0, 0.0)));
        assert!(exported(conn, "SELECT geom FROM stops_net WHERE id = 2").is_none());

        assert!(matches!(
            to_geo_table(&backend, &ExportRequest::new("stops", "shape", "x")),
            Err(Error::InvalidReferenceGeoTable(_))
        ));
    }

    #[test]
    fn polygons_leave_the_row_empty() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        build(&backend, &info);
        conn.execute_batch("CREATE TABLE mixed (id INTEGER PRIMARY KEY, label TEXT)").unwrap();
        add_geometry_column(conn, "mixed", "geom", GeometryClass::GeometryCollection, 4326, false).unwrap();
        let mut with_polygon = Geometry::point(4326, false, c(5.0, 0.0));
        with_polygon.polygons.push(Polygon::new(vec![
            c(0.0, 0.0),
            c(1.0, 0.0),
            c(1.0, 1.0),
            c(0.0, 0.0),
        ]));
        let with_polygon = with_polygon.with_class(GeometryClass::GeometryCollection);
        let point_only = Geometry::point(4326, false, c(5.0, 0.0)).with_class(GeometryClass::GeometryCollection);
        for (id, label, geom) in [(1, "area", with_polygon), (2, "stop", point_only)] {
            conn.execute(
                "INSERT INTO mixed (id, label, geom) VALUES (?1, ?2, ?3)",
                params![id, label, encode(&geom)],
            )
            .unwrap();
        }

        to_geo_table(&backend, &ExportRequest::new("mixed", "geom", "mixed_net")).unwrap();
        assert!(exported(conn, "SELECT geom FROM mixed_net WHERE id = 1").is_none());
        let label: String = conn
            .query_row("SELECT label FROM mixed_net WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(label, "area");
        let stop = exported(conn, "SELECT geom FROM mixed_net WHERE id = 2").unwrap();
        assert_eq!(stop.points, vec![c(5.0, 0.0)]);
    }

    #[test]
    fn line_links_with_directions() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        build(&backend, &info);
        streets(conn);

        line_links_list(&backend, None, "streets", "geom", "links_of").unwrap();
        let mut stmt = conn
            .prepare("SELECT link_id, ref_rowid, direction FROM links_of ORDER BY id")
            .unwrap();
        let rows: Vec<(Option<i64>, Option<i64>, Option<String>)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (Some(1), Some(1), Some("+".to_string())),
                (Some(2), Some(1), Some("-".to_string())),
                (Some(3), None, None),
                (None, Some(2), None),
            ]
        );
    }

    #[test]
    fn line_links_need_linear_reference() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info();
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        conn.execute_batch("CREATE TABLE stops (id INTEGER PRIMARY KEY)").unwrap();
        add_geometry_column(conn, "stops", "geom", GeometryClass::Point, 4326, false).unwrap();

        assert!(matches!(
            line_links_list(&backend, None, "stops", "geom", "out"),
            Err(Error::NotLinearReference)
        ));
    }
}
