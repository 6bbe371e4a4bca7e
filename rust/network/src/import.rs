// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Populating a network from geometries.
//!
//! Every linestring becomes a link. Its end points are matched against
//! existing nodes exactly; unmatched ends become new isolated nodes first.
//! The caller wraps the whole import in one savepoint, so the first failing
//! linestring leaves the network untouched.

use rusqlite::params;
use rusqlite::types::Value;
use toponet_core::metadata::find_geometry_column;
use toponet_core::sql::{find_table, qualified, quote_identifier};
use toponet_geometry::{decode, Coord, Geometry};

use crate::backend::{NetworkBackend, SqliteBackend};
use crate::edit::EditCore;
use crate::error::{Error, Result};

type Core<'c, 'a> = EditCore<'c, SqliteBackend<'a>>;

/// Existing node at `p`, or a new isolated one.
fn node_at(core: &Core<'_, '_>, p: Coord) -> Result<i64> {
    match core.get_net_node_by_point(&p, 0.0)? {
        0 => core.add_iso_net_node(Some(p)),
        id => Ok(id),
    }
}

/// Adds one link per linestring of `geom`; points are ignored.
fn insert_geometry(core: &Core<'_, '_>, geom: &Geometry) -> Result<usize> {
    let has_z = core.backend().info().has_z;
    for line in &geom.linestrings {
        let line: Vec<Coord> = if has_z {
            line.clone()
        } else {
            line.iter().map(|c| Coord::xy(c.x, c.y)).collect()
        };
        let (Some(first), Some(last)) = (line.first().copied(), line.last().copied()) else {
            return Err(Error::InvalidArgument);
        };
        let start = node_at(core, first)?;
        let end = node_at(core, last)?;
        core.add_link(start, end, Some(line))?;
    }
    Ok(geom.linestrings.len())
}

/// Loads every linestring stored in `table.column`. NULL rows are skipped.
pub fn from_geo_table(core: &Core<'_, '_>, db_prefix: Option<&str>, table: &str, column: &str) -> Result<()> {
    let backend = core.backend();
    let info = backend.info();
    let conn = backend.conn();

    let input = find_geometry_column(conn, db_prefix, table, column)?.ok_or(Error::InvalidInputGeoTable)?;
    if input.srid != info.srid || input.has_z != info.has_z {
        return Err(Error::MismatchingInputGeoTable);
    }

    let values: Vec<Value> = {
        let sql = format!(
            "SELECT {} FROM {}",
            quote_identifier(&input.column),
            qualified(db_prefix, &input.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut links = 0;
    for value in values {
        let bytes = match value {
            Value::Null => continue,
            Value::Blob(bytes) => bytes,
            _ => return Err(Error::NotABlob("TopoNet_FromGeoTable")),
        };
        let geom = decode(&bytes).map_err(|_| Error::InvalidGeometry("TopoNet_FromGeoTable"))?;
        links += insert_geometry(core, &geom)?;
    }
    tracing::info!(network = %info.name, table = %input.table, links, "geo table imported");
    Ok(())
}

/// Builds the content of an empty network from one geometry.
pub fn spat_net_from_geom(core: &Core<'_, '_>, geom: &Geometry) -> Result<()> {
    let backend = core.backend();
    let info = backend.info();
    if backend.count_primitives()? > 0 {
        return Err(Error::NonEmptyNetwork);
    }
    if geom.srid != info.srid || geom.has_z != info.has_z {
        return Err(Error::MismatchingGeometry);
    }
    let links = insert_geometry(core, geom)?;
    tracing::info!(network = %info.name, links, "network built from geometry");
    Ok(())
}

/// Copies the nodes and edges of topology `topology` into an empty network,
/// keeping their ids. Logical networks receive NULL geometries.
pub fn net_from_topology(core: &Core<'_, '_>, topology: &str) -> Result<()> {
    let backend = core.backend();
    let info = backend.info();
    let conn = backend.conn();
    let op = if info.spatial { "ST_SpatNetFromTGeo" } else { "ST_LogiNetFromTGeo" };

    let (Some(node_table), Some(edge_table)) = (
        find_table(conn, None, &format!("{topology}_node"))?,
        find_table(conn, None, &format!("{topology}_edge"))?,
    ) else {
        return Err(Error::InvalidTopologyName);
    };
    if backend.count_primitives()? > 0 {
        return Err(Error::NonEmptyNetwork);
    }

    copy_topology(backend, &node_table, &edge_table).map_err(Error::within(op))
}

fn copy_topology(backend: &SqliteBackend<'_>, node_table: &str, edge_table: &str) -> Result<()> {
    let info = backend.info();
    let conn = backend.conn();

    let nodes: Vec<(i64, Option<Vec<u8>>)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT node_id, geom FROM main.{} ORDER BY node_id",
            quote_identifier(node_table)
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };
    let edges: Vec<(i64, i64, i64, Option<Vec<u8>>)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT edge_id, start_node, end_node, geom FROM main.{} ORDER BY edge_id",
            quote_identifier(edge_table)
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let keep = |blob: Option<Vec<u8>>| -> Result<Option<Vec<u8>>> {
        if !info.spatial {
            return Ok(None);
        }
        let bytes = blob.ok_or(Error::NullGeometry)?;
        let geom = decode(&bytes).map_err(toponet_core::Error::from)?;
        if geom.srid != info.srid || geom.has_z != info.has_z {
            return Err(Error::MismatchingTopology);
        }
        Ok(Some(bytes))
    };

    let mut insert_node = conn.prepare(&format!(
        "INSERT INTO {} (node_id, geometry) VALUES (?1, ?2)",
        quote_identifier(&info.node_table())
    ))?;
    for (node_id, blob) in &nodes {
        insert_node.execute(params![node_id, keep(blob.clone())?])?;
    }
    let mut insert_link = conn.prepare(&format!(
        "INSERT INTO {} (link_id, start_node, end_node, geometry) VALUES (?1, ?2, ?3, ?4)",
        quote_identifier(&info.link_table())
    ))?;
    for (edge_id, start, end, blob) in &edges {
        insert_link.execute(params![edge_id, start, end, keep(blob.clone())?])?;
    }

    tracing::info!(
        network = %info.name,
        nodes = nodes.len(),
        links = edges.len(),
        "topology copied"
    );
    Ok(())
}
