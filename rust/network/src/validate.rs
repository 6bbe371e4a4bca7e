// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network validation.
//!
//! Validation is read-only with respect to the network. Every violation found
//! becomes one `(error, primitive1, primitive2)` row of a report, returned to
//! the caller and also stored in a temporary table so that it can be queried
//! with SQL afterwards:
//!
//! - `TEMP."{name}_valid_logicalnet"` for logical networks,
//! - `TEMP."{name}_valid_spatialnet"` for spatial networks.
//!
//! Finding violations is not a failure; only storage errors are.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use toponet_core::sql::quote_identifier;
use toponet_geometry::predicates::{is_simple, lines_cross, point_on_linestring, polygon_within, polygons_overlap};
use toponet_geometry::{Bounds, Polygon};

use crate::backend::{NetworkBackend, SqliteBackend};
use crate::catalog::NetworkInfo;
use crate::error::{Error, Result};

/// One detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub error: String,
    pub primitive1: Option<i64>,
    pub primitive2: Option<i64>,
}

impl ValidationIssue {
    fn new(error: &str, primitive1: Option<i64>, primitive2: Option<i64>) -> Self {
        Self {
            error: error.to_string(),
            primitive1,
            primitive2,
        }
    }
}

/// Faces to validate together with a network.
///
/// Networks carry no faces themselves; a caller holding a face-aware
/// topology supplies them here. Face 0 is the universal face.
pub trait FaceSource {
    /// Every face id present, including 0 when the universal face exists.
    fn face_ids(&self) -> Result<Vec<i64>>;
    /// Ids of faces referenced by at least one edge, on either side.
    fn faces_with_edges(&self) -> Result<Vec<i64>>;
    /// Polygon of a face other than the universal face.
    fn face_geometry(&self, face_id: i64) -> Result<Option<Polygon>>;
}

fn report_table(info: &NetworkInfo, kind: &str) -> String {
    format!("{}_valid_{kind}", info.name)
}

/// Recreates the report table. Runs with the network's statements finalized.
fn reset_report(backend: &SqliteBackend<'_>, table: &str) -> Result<()> {
    let conn = backend.conn();
    backend.statements().suspended(conn, || {
        let qt = quote_identifier(table);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS TEMP.{qt};
             CREATE TEMP TABLE {qt} (
                error TEXT,
                primitive1 INTEGER,
                primitive2 INTEGER)"
        ))?;
        Ok(())
    })
}

fn store_report(conn: &Connection, table: &str, issues: &[ValidationIssue]) -> Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO TEMP.{} (error, primitive1, primitive2) VALUES (?1, ?2, ?3)",
        quote_identifier(table)
    ))?;
    for issue in issues {
        stmt.execute(params![issue.error, issue.primitive1, issue.primitive2])?;
    }
    Ok(())
}

/// Validates a logical network: no node or link may carry a geometry.
pub fn valid_logical_net(backend: &SqliteBackend<'_>) -> Result<Vec<ValidationIssue>> {
    let info = backend.info();
    if backend.count_primitives()? == 0 {
        return Err(Error::EmptyNetwork);
    }
    let table = report_table(info, "logicalnet");
    let run = || -> Result<Vec<ValidationIssue>> {
        reset_report(backend, &table)?;
        let mut issues = Vec::new();
        for node in backend.all_nodes()? {
            if node.geom.is_some() {
                issues.push(ValidationIssue::new("node has geometry", Some(node.node_id), None));
            }
        }
        for link in backend.all_links()? {
            if link.geom.is_some() {
                issues.push(ValidationIssue::new("link has geometry", Some(link.link_id), None));
            }
        }
        store_report(backend.conn(), &table, &issues)?;
        Ok(issues)
    };
    let issues = run().map_err(Error::within("ST_ValidLogicalNet"))?;
    tracing::info!(network = %info.name, issues = issues.len(), "logical network validated");
    Ok(issues)
}

/// Validates a spatial network, and the faces of `faces` when given.
pub fn valid_spatial_net(
    backend: &SqliteBackend<'_>,
    faces: Option<&dyn FaceSource>,
) -> Result<Vec<ValidationIssue>> {
    let info = backend.info();
    if backend.count_primitives()? == 0 {
        return Err(Error::EmptyNetwork);
    }
    let table = report_table(info, "spatialnet");
    let run = || -> Result<Vec<ValidationIssue>> {
        reset_report(backend, &table)?;
        let mut issues = check_network(backend)?;
        if let Some(faces) = faces {
            issues.extend(check_faces(backend, faces)?);
        }
        store_report(backend.conn(), &table, &issues)?;
        Ok(issues)
    };
    let issues = run().map_err(Error::within("ST_ValidSpatialNet"))?;
    tracing::info!(network = %info.name, issues = issues.len(), "spatial network validated");
    Ok(issues)
}

fn check_network(backend: &SqliteBackend<'_>) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let nodes = backend.all_nodes()?;
    let links = backend.all_links()?;

    for node in &nodes {
        match node.geom {
            None => issues.push(ValidationIssue::new("missing node geometry", Some(node.node_id), None)),
            Some(p) => {
                // each unordered pair once
                for other in backend.get_nodes_in_frame(&Bounds::of(&p))? {
                    if other.node_id > node.node_id && other.geom.is_some_and(|q| q.same_xy(&p)) {
                        issues.push(ValidationIssue::new(
                            "coincident nodes",
                            Some(node.node_id),
                            Some(other.node_id),
                        ));
                    }
                }
            }
        }
    }

    for link in &links {
        let Some(line) = link.geom.as_deref() else {
            issues.push(ValidationIssue::new("missing link geometry", Some(link.link_id), None));
            continue;
        };
        let (Some(first), Some(last)) = (line.first(), line.last()) else {
            continue;
        };
        let start = backend.get_node_by_id(link.start_node)?.and_then(|n| n.geom);
        if !start.is_some_and(|p| p.same_xy(first)) {
            issues.push(ValidationIssue::new(
                "geometry start mismatch",
                Some(link.link_id),
                Some(link.start_node),
            ));
        }
        let end = backend.get_node_by_id(link.end_node)?.and_then(|n| n.geom);
        if !end.is_some_and(|p| p.same_xy(last)) {
            issues.push(ValidationIssue::new(
                "geometry end mismatch",
                Some(link.link_id),
                Some(link.end_node),
            ));
        }
        if !is_simple(line) {
            issues.push(ValidationIssue::new("edge not simple", Some(link.link_id), None));
        }
        let Some(frame) = Bounds::of_coords(line) else {
            continue;
        };
        for node in backend.get_nodes_in_frame(&frame)? {
            if node.node_id == link.start_node || node.node_id == link.end_node {
                continue;
            }
            if node.geom.is_some_and(|p| point_on_linestring(&p, line)) {
                issues.push(ValidationIssue::new(
                    "edge crosses node",
                    Some(link.link_id),
                    Some(node.node_id),
                ));
            }
        }
        for other in backend.get_links_in_frame(&frame)? {
            if other.link_id <= link.link_id {
                continue;
            }
            if other.geom.as_deref().is_some_and(|o| lines_cross(line, o)) {
                issues.push(ValidationIssue::new(
                    "edge crosses edge",
                    Some(link.link_id),
                    Some(other.link_id),
                ));
            }
        }
    }
    Ok(issues)
}

/// Face checks. Overlap and containment candidates come from a scratch
/// R*Tree over the face bounds, dropped before returning.
fn check_faces(backend: &SqliteBackend<'_>, faces: &dyn FaceSource) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let ids = faces.face_ids()?;
    let used = faces.faces_with_edges()?;
    for id in ids.iter().filter(|id| **id != 0) {
        if !used.contains(id) {
            issues.push(ValidationIssue::new("face without edges", Some(*id), None));
        }
    }
    if !ids.contains(&0) {
        issues.push(ValidationIssue::new("no universal face", None, None));
    }

    let mut polygons = Vec::new();
    for id in ids.iter().filter(|id| **id != 0) {
        if let Some(polygon) = faces.face_geometry(*id)? {
            polygons.push((*id, polygon));
        }
    }

    let conn = backend.conn();
    let rtree = quote_identifier(&format!("{}_faces_rtree", backend.info().name));
    backend.statements().suspended(conn, || {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS TEMP.{rtree};
             CREATE VIRTUAL TABLE TEMP.{rtree} USING rtree(face_id, xmin, xmax, ymin, ymax)"
        ))?;
        Ok(())
    })?;

    let outcome = face_pairs(conn, &rtree, &polygons);
    backend.statements().suspended(conn, || {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS TEMP.{rtree}"))?;
        Ok(())
    })?;
    issues.extend(outcome?);
    Ok(issues)
}

fn face_pairs(conn: &Connection, rtree: &str, polygons: &[(i64, Polygon)]) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    {
        let mut insert = conn.prepare(&format!(
            "INSERT INTO TEMP.{rtree} (face_id, xmin, xmax, ymin, ymax) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))?;
        for (id, polygon) in polygons {
            if let Some(b) = Bounds::of_coords(&polygon.exterior) {
                insert.execute(params![id, b.min_x, b.max_x, b.min_y, b.max_y])?;
            }
        }
    }
    let mut search = conn.prepare(&format!(
        "SELECT face_id FROM TEMP.{rtree}
         WHERE face_id > ?1 AND xmin <= ?4 AND xmax >= ?2 AND ymin <= ?5 AND ymax >= ?3"
    ))?;
    for (id, polygon) in polygons {
        let Some(b) = Bounds::of_coords(&polygon.exterior) else {
            continue;
        };
        let candidates = search
            .query_map(params![id, b.min_x, b.min_y, b.max_x, b.max_y], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for other_id in candidates {
            let Some((_, other)) = polygons.iter().find(|(i, _)| *i == other_id) else {
                continue;
            };
            if polygon_within(polygon, other) {
                issues.push(ValidationIssue::new("face within face", Some(*id), Some(other_id)));
            } else if polygon_within(other, polygon) {
                issues.push(ValidationIssue::new("face within face", Some(other_id), Some(*id)));
            } else if polygons_overlap(polygon, other) {
                issues.push(ValidationIssue::new("face overlaps face", Some(*id), Some(other_id)));
            }
        }
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::create_network;
    use crate::statements::StatementSet;
    use toponet_core::Session;
    use toponet_geometry::{encode, Coord, Geometry};

    fn info(spatial: bool) -> NetworkInfo {
        NetworkInfo {
            name: "net".into(),
            spatial,
            srid: 0,
            has_z: false,
            allow_coincident: true,
        }
    }

    fn node(conn: &Connection, id: i64, x: f64, y: f64) {
        conn.execute(
            "INSERT INTO net_node (node_id, geometry) VALUES (?1, ?2)",
            params![id, encode(&Geometry::point(0, false, Coord::xy(x, y)))],
        )
        .unwrap();
    }

    fn link(conn: &Connection, id: i64, start: i64, end: i64, coords: &[(f64, f64)]) {
        let line = coords.iter().map(|(x, y)| Coord::xy(*x, *y)).collect();
        conn.execute(
            "INSERT INTO net_link (link_id, start_node, end_node, geometry) VALUES (?1, ?2, ?3, ?4)",
            params![id, start, end, encode(&Geometry::linestring(0, false, line))],
        )
        .unwrap();
    }

    struct Faces(Vec<(i64, Polygon)>, Vec<i64>);

    impl FaceSource for Faces {
        fn face_ids(&self) -> Result<Vec<i64>> {
            Ok(self.0.iter().map(|(id, _)| *id).collect())
        }

        fn faces_with_edges(&self) -> Result<Vec<i64>> {
            Ok(self.1.clone())
        }

        fn face_geometry(&self, face_id: i64) -> Result<Option<Polygon>> {
            Ok(self.0.iter().find(|(id, _)| *id == face_id).map(|(_, p)| p.clone()))
        }
    }

    fn square(x0: f64, y0: f64, side: f64) -> Polygon {
        Polygon::new(vec![
            Coord::xy(x0, y0),
            Coord::xy(x0 + side, y0),
            Coord::xy(x0 + side, y0 + side),
            Coord::xy(x0, y0 + side),
            Coord::xy(x0, y0),
        ])
    }

    #[test]
    fn spatial_report() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info(true);
        create_network(conn, &info).unwrap();
        node(conn, 1, 0.0, 0.0);
        node(conn, 2, 0.0, 0.0);
        node(conn, 3, 10.0, 0.0);
        node(conn, 4, 5.0, 0.0);
        link(conn, 1, 1, 3, &[(0.0, 0.0), (10.0, 0.0)]);
        link(conn, 2, 4, 3, &[(5.0, -5.0), (5.0, 5.0)]);

        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        let issues = valid_spatial_net(&backend, None).unwrap();
        let has = |e: &str, a: i64, b: Option<i64>| issues.contains(&ValidationIssue::new(e, Some(a), b));
        assert!(has("coincident nodes", 1, Some(2)));
        assert!(has("edge crosses node", 1, Some(4)));
        assert!(has("edge crosses edge", 1, Some(2)));
        assert!(has("geometry start mismatch", 2, Some(4)));
        assert!(has("geometry end mismatch", 2, Some(3)));

        let stored: i64 = conn
            .query_row("SELECT Count(*) FROM TEMP.net_valid_spatialnet", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored as usize, issues.len());
    }

    #[test]
    fn logical_report_and_empty_network() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info(false);
        create_network(conn, &info).unwrap();
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        assert!(matches!(valid_logical_net(&backend), Err(Error::EmptyNetwork)));

        conn.execute_batch("INSERT INTO net_node (node_id) VALUES (1)").unwrap();
        node(conn, 2, 1.0, 1.0);
        let issues = valid_logical_net(&backend).unwrap();
        assert_eq!(issues, vec![ValidationIssue::new("node has geometry", Some(2), None)]);
    }

    #[test]
    fn face_checks() {
        let session = Session::open_in_memory().unwrap();
        let conn = session.conn();
        let info = info(true);
        create_network(conn, &info).unwrap();
        node(conn, 1, 0.0, 0.0);
        let stmts = StatementSet::new(&info);
        let backend = SqliteBackend::new(conn, &info, &stmts);
        let faces = Faces(
            vec![(1, square(0.0, 0.0, 10.0)), (2, square(2.0, 2.0, 2.0)), (3, square(8.0, 8.0, 5.0))],
            vec![1, 2],
        );
        let issues = valid_spatial_net(&backend, Some(&faces)).unwrap();
        assert!(issues.contains(&ValidationIssue::new("face without edges", Some(3), None)));
        assert!(issues.contains(&ValidationIssue::new("no universal face", None, None)));
        assert!(issues.contains(&ValidationIssue::new("face within face", Some(2), Some(1))));
        assert!(issues.contains(&ValidationIssue::new("face overlaps face", Some(1), Some(3))));
        let leftover: i64 = conn
            .query_row(
                "SELECT Count(*) FROM sqlite_temp_master WHERE name = 'net_faces_rtree'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(leftover, 0);
    }
}
