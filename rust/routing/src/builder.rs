// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing graph construction.
//!
//! [`RoutingBuilder::create_routing`] turns an edge-list table into a
//! serialized graph in four phases, each in its own savepoint nested inside
//! `create_routing_zero`:
//!
//! 1. ingest: validate every input row and stage node and link rows in
//!    temporary tables;
//! 2. index: give every distinct node identifier a dense index, check that
//!    all rows naming a node agree on its position, and resolve link ends;
//! 3. serialize: write the header and the node blocks to the data table;
//! 4. register: create the query view and drop the staging tables.
//!
//! A failure anywhere rolls the whole call back.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use toponet_core::metadata::find_geometry_column;
use toponet_core::sql::{find_table, quote_identifier, table_columns, ColumnInfo};
use toponet_core::Session;
use toponet_geometry::measure::length_or_geodesic;
use toponet_geometry::{decode, Coord};

use crate::error::{Error, Result};
use crate::format::{encode_header, encode_node, Arc, BlockWriter, Header, NodeKey, NodeRecord};
use crate::nodes::{create_routing_nodes, NodesRequest};

const NODES_TABLE: &str = "create_routing_nodes";
const LINKS_TABLE: &str = "create_routing_links";

// ============================================================================
// Request
// ============================================================================

/// Arguments of [`RoutingBuilder::create_routing`].
///
/// Empty strings count as missing names.
#[derive(Debug, Clone, Copy)]
pub struct RoutingRequest<'a> {
    /// Table receiving the serialized graph.
    pub data_table: &'a str,
    /// View exposing the serialized graph to queries.
    pub virtual_table: &'a str,
    /// Edge-list table to read.
    pub input_table: &'a str,
    pub from_column: &'a str,
    pub to_column: &'a str,
    pub geom_column: Option<&'a str>,
    pub cost_column: Option<&'a str>,
    pub name_column: Option<&'a str>,
    /// Store node coordinates and the cost/length ratio for A*.
    pub a_star: bool,
    /// Every row yields arcs in both directions, subject to oneway flags.
    pub bidirectional: bool,
    /// Integer flag column allowing travel from `from` to `to`.
    pub oneway_from_to: Option<&'a str>,
    /// Integer flag column allowing travel from `to` to `from`.
    pub oneway_to_from: Option<&'a str>,
    /// Replace existing data and view tables.
    pub overwrite: bool,
}

impl<'a> RoutingRequest<'a> {
    pub fn new(
        data_table: &'a str,
        virtual_table: &'a str,
        input_table: &'a str,
        from_column: &'a str,
        to_column: &'a str,
    ) -> Self {
        Self {
            data_table,
            virtual_table,
            input_table,
            from_column,
            to_column,
            geom_column: None,
            cost_column: None,
            name_column: None,
            a_star: false,
            bidirectional: true,
            oneway_from_to: None,
            oneway_to_from: None,
            overwrite: false,
        }
    }

    pub fn geometry(mut self, column: &'a str) -> Self {
        self.geom_column = Some(column);
        self
    }

    pub fn cost(mut self, column: &'a str) -> Self {
        self.cost_column = Some(column);
        self
    }

    pub fn name(mut self, column: &'a str) -> Self {
        self.name_column = Some(column);
        self
    }

    pub fn a_star(mut self, enabled: bool) -> Self {
        self.a_star = enabled;
        self
    }

    pub fn bidirectional(mut self, enabled: bool) -> Self {
        self.bidirectional = enabled;
        self
    }

    pub fn oneway(mut self, from_to: &'a str, to_from: &'a str) -> Self {
        self.oneway_from_to = Some(from_to);
        self.oneway_to_from = Some(to_from);
        self
    }

    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    fn geom(&self) -> Option<&'a str> {
        given(self.geom_column)
    }

    fn cost_col(&self) -> Option<&'a str> {
        given(self.cost_column)
    }

    fn name_col(&self) -> Option<&'a str> {
        given(self.name_column)
    }

    /// Argument checks that need no database access.
    fn check(&self) -> Result<()> {
        for (value, what) in [
            (self.data_table, "Routing Data Table Name"),
            (self.virtual_table, "VirtualRouting Table Name"),
            (self.input_table, "Input Table Name"),
            (self.from_column, "FromNode Column Name"),
            (self.to_column, "ToNode Column Name"),
        ] {
            if value.is_empty() {
                return Err(Error::NullName(what));
            }
        }
        if self.geom().is_none() && self.cost_col().is_none() {
            return Err(Error::NoCostSource);
        }
        match (given(self.oneway_from_to), given(self.oneway_to_from)) {
            (None, Some(_)) => return Err(Error::MissingOnewayFromTo),
            (Some(_), None) => return Err(Error::MissingOnewayToFrom),
            (Some(_), Some(_)) if !self.bidirectional => return Err(Error::OnewayOnUnidirectional),
            _ => {}
        }
        if self.a_star && self.geom().is_none() {
            return Err(Error::AStarWithoutGeometry);
        }
        Ok(())
    }
}

fn given(name: Option<&str>) -> Option<&str> {
    name.filter(|n| !n.is_empty())
}

/// What a successful build produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSummary {
    pub nodes: usize,
    pub arcs: usize,
    pub blocks: usize,
    pub has_ids: bool,
    pub a_star_coeff: Option<f64>,
}

// ============================================================================
// Builder
// ============================================================================

/// Entry point for routing graph construction; remembers the last failure.
#[derive(Debug, Default)]
pub struct RoutingBuilder {
    last_error: Option<String>,
}

impl RoutingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message of the last failed call, cleared by every new call.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Builds the routing data table and its query view from an edge list.
    pub fn create_routing(
        &mut self,
        session: &mut Session,
        request: &RoutingRequest<'_>,
    ) -> Result<RoutingSummary> {
        self.last_error = None;
        let outcome = build(session, request);
        self.remember("create_routing", outcome)
    }

    /// Adds from/to node columns to a LINESTRING table. Returns the number of
    /// distinct nodes found.
    pub fn create_routing_nodes(&mut self, session: &mut Session, request: &NodesRequest<'_>) -> Result<usize> {
        self.last_error = None;
        let outcome = create_routing_nodes(session, request);
        self.remember("create_routing_nodes", outcome)
    }

    fn remember<T>(&mut self, operation: &'static str, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            tracing::warn!(operation, error = %err, "routing operation failed");
            self.last_error = Some(err.to_string());
        }
        outcome
    }
}

fn build(session: &mut Session, req: &RoutingRequest<'_>) -> Result<RoutingSummary> {
    req.check()?;
    drop_temp_tables(session.conn())?;

    let outcome = session.atomic_named("create_routing_zero", |s| {
        prepare_targets(s.conn(), req)?;
        let ingest = s.atomic_named("create_routing_one", |s| ingest(s.conn(), req))?;
        let nodes = s.atomic_named("create_routing_two", |s| index_nodes(s.conn(), ingest.has_ids))?;
        let header = Header {
            node_count: u32::try_from(nodes).map_err(|_| Error::InvalidData("too many nodes"))?,
            has_ids: ingest.has_ids,
            max_code_length: ingest.max_code_length,
            table: req.input_table.to_string(),
            from_column: req.from_column.to_string(),
            to_column: req.to_column.to_string(),
            geom_column: req.geom().map(str::to_string),
            name_column: req.name_col().map(str::to_string),
            a_star_coeff: ingest.a_star_coeff,
        };
        let blocks = s.atomic_named("create_routing_three", |s| write_data(s.conn(), req, &header))?;
        s.atomic_named("create_routing_four", |s| register_view(s.conn(), req))?;
        Ok(RoutingSummary {
            nodes,
            arcs: ingest.arcs,
            blocks,
            has_ids: ingest.has_ids,
            a_star_coeff: ingest.a_star_coeff,
        })
    });

    match &outcome {
        Ok(summary) => tracing::info!(
            data_table = req.data_table,
            nodes = summary.nodes,
            arcs = summary.arcs,
            blocks = summary.blocks,
            "routing graph created"
        ),
        Err(_) => {
            if let Err(cleanup) = drop_temp_tables(session.conn()) {
                tracing::warn!(error = %cleanup, "staging tables were not dropped");
            }
        }
    }
    outcome
}

fn drop_temp_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS temp.{NODES_TABLE}; DROP TABLE IF EXISTS temp.{LINKS_TABLE}"
    ))?;
    Ok(())
}

fn drop_object(conn: &Connection, name: &str) -> Result<()> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT type FROM sqlite_master WHERE type IN ('table', 'view') AND Lower(name) = Lower(?1)",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(kind) = kind {
        let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
        conn.execute_batch(&format!("DROP {keyword} {}", quote_identifier(name)))?;
    }
    Ok(())
}

fn prepare_targets(conn: &Connection, req: &RoutingRequest<'_>) -> Result<()> {
    if req.overwrite {
        drop_object(conn, req.virtual_table)?;
        drop_object(conn, req.data_table)?;
    }
    if find_table(conn, None, req.data_table)?.is_some() {
        return Err(Error::DataTableExists(req.data_table.to_string()));
    }
    if find_table(conn, None, req.virtual_table)?.is_some() {
        return Err(Error::VirtualTableExists(req.virtual_table.to_string()));
    }
    Ok(())
}

// ============================================================================
// Phase one: ingest
// ============================================================================

struct Ingest {
    has_ids: bool,
    max_code_length: u8,
    a_star_coeff: Option<f64>,
    arcs: usize,
}

fn stored_column(columns: &[ColumnInfo], role: &'static str, name: &str) -> Result<String> {
    columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.name.clone())
        .ok_or_else(|| Error::ColumnNotDefined {
            role,
            column: name.to_string(),
        })
}

fn optional_column(columns: &[ColumnInfo], role: &'static str, name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => Ok(quote_identifier(&stored_column(columns, role, name)?)),
        None => Ok("NULL".to_string()),
    }
}

fn node_key(value: ValueRef<'_>, role: &'static str, column: &str) -> Result<NodeKey> {
    match value {
        ValueRef::Integer(id) => Ok(NodeKey::Id(id)),
        ValueRef::Text(text) => {
            if text.len() > u8::MAX as usize {
                return Err(Error::NodeCodeTooLong {
                    role,
                    column: column.to_string(),
                });
            }
            let code = std::str::from_utf8(text).map_err(|_| Error::NodeValueType {
                role,
                column: column.to_string(),
            })?;
            Ok(NodeKey::Code(code.to_string()))
        }
        _ => Err(Error::NodeValueType {
            role,
            column: column.to_string(),
        }),
    }
}

fn oneway_flag(value: ValueRef<'_>, role: &'static str, column: &str) -> Result<bool> {
    match value {
        ValueRef::Integer(flag) => Ok(flag != 0),
        _ => Err(Error::OnewayNotInteger {
            role,
            column: column.to_string(),
        }),
    }
}

/// End points and length of a row geometry.
fn row_geometry(value: ValueRef<'_>, column: &str, srid: i32, has_z: bool) -> Result<(Coord, Coord, f64)> {
    let blob = match value {
        ValueRef::Blob(blob) => blob,
        _ => return Err(Error::GeometryNotBlob(column.to_string())),
    };
    let geom = decode(blob).map_err(|_| Error::NotAGeometry(column.to_string()))?;
    if geom.srid != srid {
        return Err(Error::MismatchingSrid(column.to_string()));
    }
    if geom.has_z != has_z {
        return Err(Error::MismatchingDimensions(column.to_string()));
    }
    let line = geom
        .as_single_linestring()
        .ok_or_else(|| Error::NotSimpleLinestring(column.to_string()))?;
    let (Some(first), Some(last)) = (line.first(), line.last()) else {
        return Err(Error::NotSimpleLinestring(column.to_string()));
    };
    let length = length_or_geodesic(&geom)
        .filter(|l| l.is_finite() && *l >= 0.0)
        .ok_or_else(|| Error::InvalidLength(column.to_string()))?;
    Ok((*first, *last, length))
}

fn ingest(conn: &Connection, req: &RoutingRequest<'_>) -> Result<Ingest> {
    let columns = table_columns(conn, None, req.input_table)?;
    let from_col = stored_column(&columns, "FromNode", req.from_column)?;
    let to_col = stored_column(&columns, "ToNode", req.to_column)?;
    let geom_sql = optional_column(&columns, "Geometry", req.geom())?;
    let cost_sql = optional_column(&columns, "Cost", req.cost_col())?;
    let name_sql = optional_column(&columns, "Name", req.name_col())?;
    let oneway_from_sql = optional_column(&columns, "OnewayFromTo", given(req.oneway_from_to))?;
    let oneway_to_sql = optional_column(&columns, "OnewayToFrom", given(req.oneway_to_from))?;
    let oneways = given(req.oneway_from_to).is_some();

    let geometry = match req.geom() {
        Some(column) => {
            let info = find_geometry_column(conn, None, req.input_table, column)?.ok_or_else(|| {
                Error::GeometryNotFound {
                    table: req.input_table.to_string(),
                    column: column.to_string(),
                }
            })?;
            Some((column, info.srid, info.has_z))
        }
        None => None,
    };

    conn.execute_batch(&format!(
        "CREATE TEMP TABLE {NODES_TABLE} (
             internal_index INTEGER,
             node_id INTEGER,
             node_code TEXT,
             node_x DOUBLE,
             node_y DOUBLE,
             node_z DOUBLE);
         CREATE TEMP TABLE {LINKS_TABLE} (
             source_rowid INTEGER,
             id_node_from INTEGER,
             cod_node_from TEXT,
             id_node_to INTEGER,
             cod_node_to TEXT,
             cost DOUBLE,
             index_from INTEGER,
             index_to INTEGER)"
    ))?;
    let mut insert_node = conn.prepare(&format!(
        "INSERT INTO temp.{NODES_TABLE} (node_id, node_code, node_x, node_y, node_z)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;
    let mut insert_link = conn.prepare(&format!(
        "INSERT INTO temp.{LINKS_TABLE} (source_rowid, id_node_from, cod_node_from, id_node_to, cod_node_to, cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    ))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT ROWID, {}, {}, {geom_sql}, {cost_sql}, {name_sql}, {oneway_from_sql}, {oneway_to_sql} FROM {}",
        quote_identifier(&from_col),
        quote_identifier(&to_col),
        quote_identifier(req.input_table),
    ))?;
    let mut rows = stmt.query([])?;

    let mut has_ids: Option<bool> = None;
    let mut max_code_length = 0u8;
    let mut min_ratio = f64::MAX;
    let mut arcs = 0usize;
    let mut input_rows = 0usize;

    while let Some(row) = rows.next()? {
        input_rows += 1;
        let rowid: i64 = row.get(0)?;
        let mut keys = Vec::with_capacity(2);
        for (i, role, column) in [(1usize, "NodeFrom", req.from_column), (2, "NodeTo", req.to_column)] {
            let key = node_key(row.get_ref(i)?, role, column)?;
            let is_id = matches!(key, NodeKey::Id(_));
            match has_ids {
                None => has_ids = Some(is_id),
                Some(mode) if mode != is_id => {
                    return Err(Error::NodeValueMismatch {
                        role,
                        column: column.to_string(),
                    })
                }
                Some(_) => {}
            }
            if let NodeKey::Code(code) = &key {
                max_code_length = max_code_length.max(code.len() as u8);
            }
            keys.push(key);
        }
        let (from, to) = (&keys[0], &keys[1]);

        let shape = match geometry {
            Some((column, srid, has_z)) => Some(row_geometry(row.get_ref(3)?, column, srid, has_z)?),
            None => None,
        };
        let cost = match req.cost_col() {
            Some(column) => {
                let cost = match row.get_ref(4)? {
                    ValueRef::Real(v) => v,
                    ValueRef::Integer(v) => v as f64,
                    _ => return Err(Error::CostNotDouble(column.to_string())),
                };
                if cost <= 0.0 {
                    return Err(Error::NonPositiveCost(column.to_string()));
                }
                cost
            }
            None => shape.map(|(_, _, length)| length).unwrap_or_default(),
        };
        if let Some(column) = req.name_col() {
            if !matches!(row.get_ref(5)?, ValueRef::Text(_)) {
                return Err(Error::NameNotText(column.to_string()));
            }
        }
        let (from_to, to_from) = if oneways {
            (
                oneway_flag(row.get_ref(6)?, "OnewayFromTo", given(req.oneway_from_to).unwrap_or_default())?,
                oneway_flag(row.get_ref(7)?, "OnewayToFrom", given(req.oneway_to_from).unwrap_or_default())?,
            )
        } else {
            (true, true)
        };
        if let Some((_, _, length)) = shape {
            if length > 0.0 {
                min_ratio = min_ratio.min(cost / length);
            }
        }

        let (start, end) = match shape {
            Some((start, end, _)) => (start, end),
            None => (Coord::xyz(0.0, 0.0, 0.0), Coord::xyz(0.0, 0.0, 0.0)),
        };
        for (key, p) in [(from, start), (to, end)] {
            insert_node.execute(params![key.id(), key.code(), p.x, p.y, p.z])?;
        }
        let mut directions = Vec::with_capacity(2);
        if req.bidirectional {
            if from_to {
                directions.push((from, to));
            }
            if to_from {
                directions.push((to, from));
            }
        } else {
            directions.push((from, to));
        }
        for (a, b) in directions {
            insert_link.execute(params![rowid, a.id(), a.code(), b.id(), b.code(), cost])?;
            arcs += 1;
        }
    }

    let a_star_coeff = req.a_star.then(|| {
        if req.cost_col().is_none() || min_ratio == f64::MAX {
            1.0
        } else {
            min_ratio
        }
    });
    tracing::debug!(rows = input_rows, arcs, "routing input staged");
    Ok(Ingest {
        has_ids: has_ids.unwrap_or(true),
        max_code_length,
        a_star_coeff,
        arcs,
    })
}

// ============================================================================
// Phase two: dense indices
// ============================================================================

fn index_nodes(conn: &Connection, has_ids: bool) -> Result<usize> {
    let key_col = if has_ids { "node_id" } else { "node_code" };
    let assigned: Vec<(i64, i64)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT ROWID, node_id, node_code, node_x, node_y, node_z FROM temp.{NODES_TABLE}
             ORDER BY {key_col}, ROWID"
        ))?;
        let mut rows = stmt.query([])?;
        let mut assigned = Vec::new();
        let mut previous: Option<(NodeKey, [f64; 3])> = None;
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let key = if has_ids {
                NodeKey::Id(row.get(1)?)
            } else {
                NodeKey::Code(row.get(2)?)
            };
            let at = [row.get::<_, f64>(3)?, row.get::<_, f64>(4)?, row.get::<_, f64>(5)?];
            match &previous {
                Some((prev_key, prev_at)) if *prev_key == key => {
                    if *prev_at != at {
                        return Err(match key {
                            NodeKey::Id(id) => Error::NodeIdTopology(id),
                            NodeKey::Code(code) => Error::NodeCodeTopology(code),
                        });
                    }
                }
                _ => {
                    assigned.push((rowid, assigned.len() as i64));
                    previous = Some((key, at));
                }
            }
        }
        assigned
    };

    let mut update = conn.prepare(&format!(
        "UPDATE temp.{NODES_TABLE} SET internal_index = ?2 WHERE ROWID = ?1"
    ))?;
    for (rowid, index) in &assigned {
        update.execute(params![rowid, index])?;
    }

    let (from_ref, to_ref) = if has_ids {
        ("id_node_from", "id_node_to")
    } else {
        ("cod_node_from", "cod_node_to")
    };
    conn.execute_batch(&format!(
        "CREATE INDEX temp.idx_create_routing_nodes ON {NODES_TABLE} ({key_col});
         UPDATE temp.{LINKS_TABLE} SET
             index_from = (SELECT n.internal_index FROM temp.{NODES_TABLE} AS n
                           WHERE n.internal_index IS NOT NULL AND n.{key_col} = {LINKS_TABLE}.{from_ref}),
             index_to = (SELECT n.internal_index FROM temp.{NODES_TABLE} AS n
                         WHERE n.internal_index IS NOT NULL AND n.{key_col} = {LINKS_TABLE}.{to_ref});
         CREATE INDEX temp.idx_create_routing_links ON {LINKS_TABLE} (index_from, cost, index_to)"
    ))?;
    tracing::debug!(nodes = assigned.len(), "dense node indices assigned");
    Ok(assigned.len())
}

// ============================================================================
// Phase three: serialization
// ============================================================================

fn write_data(conn: &Connection, req: &RoutingRequest<'_>, header: &Header) -> Result<usize> {
    let data = quote_identifier(req.data_table);
    conn.execute_batch(&format!(
        "CREATE TABLE {data} (Id INTEGER PRIMARY KEY, NetworkData BLOB NOT NULL)"
    ))?;
    let mut insert = conn.prepare(&format!("INSERT INTO {data} (Id, NetworkData) VALUES (?1, ?2)"))?;
    insert.execute(params![0, encode_header(header)])?;

    let mut nodes = conn.prepare(&format!(
        "SELECT internal_index, node_id, node_code, node_x, node_y FROM temp.{NODES_TABLE}
         WHERE internal_index IS NOT NULL ORDER BY internal_index"
    ))?;
    let mut arcs = conn.prepare(&format!(
        "SELECT source_rowid, index_to, cost FROM temp.{LINKS_TABLE}
         WHERE index_from = ?1 ORDER BY cost, index_to"
    ))?;

    let mut block = BlockWriter::new();
    let mut block_id = 0i64;
    let mut rows = nodes.query([])?;
    while let Some(row) = rows.next()? {
        let index: u32 = row.get(0)?;
        let key = if header.has_ids {
            NodeKey::Id(row.get(1)?)
        } else {
            NodeKey::Code(row.get(2)?)
        };
        let coords = header.a_star().then_some((row.get::<_, f64>(3)?, row.get::<_, f64>(4)?));
        let node_arcs = arcs
            .query_map(params![index], |r| {
                Ok(Arc {
                    rowid: r.get(0)?,
                    to: r.get(1)?,
                    cost: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let record = encode_node(
            header,
            &NodeRecord {
                index,
                key,
                coords,
                arcs: node_arcs,
            },
        )?;
        if !block.fits(record.len()) {
            block_id += 1;
            insert.execute(params![block_id, std::mem::take(&mut block).finish()])?;
        }
        block.push(&record);
    }
    if !block.is_empty() {
        block_id += 1;
        insert.execute(params![block_id, block.finish()])?;
    }
    tracing::debug!(data_table = req.data_table, blocks = block_id, "routing data written");
    Ok(block_id as usize)
}

// ============================================================================
// Phase four: registration
// ============================================================================

fn register_view(conn: &Connection, req: &RoutingRequest<'_>) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE VIEW {} AS SELECT Id, NetworkData, Length(NetworkData) AS BlockSize FROM {}",
        quote_identifier(req.virtual_table),
        quote_identifier(req.data_table)
    ))?;
    drop_temp_tables(conn)
}
