// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `networks` catalog and the tables each network owns.
//!
//! A network named `n` is one row in `networks` plus three tables:
//!
//! - `n_node(node_id, geometry POINT)`
//! - `n_link(link_id, start_node, end_node, timestamp, geometry LINESTRING)`
//! - `n_seeds(seed_id, link_id, timestamp, geometry POINT)`
//!
//! Every geometry column is registered and spatially indexed. Triggers keep
//! the catalog's `next_node_id` / `next_link_id` counters ahead of the
//! largest id in use and stamp link and seed rows with a millisecond
//! timestamp on every change; seed freshness is decided by comparing them.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use toponet_core::metadata::{self, spatial_index_name};
use toponet_core::sql::{derived_name, find_table, object_exists, quote_identifier, quote_literal, schema};
use toponet_geometry::GeometryClass;

use crate::error::{Error, Result};

/// Name of the catalog table.
pub const NETWORKS_TABLE: &str = "networks";

/// Name of the geometry column of every network table.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// SQL expression producing the timestamps stored in link and seed rows.
pub(crate) const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const CREATE_NETWORKS: &str = "
CREATE TABLE IF NOT EXISTS networks (
    network_name TEXT NOT NULL PRIMARY KEY,
    spatial INTEGER NOT NULL,
    srid INTEGER NOT NULL,
    has_z INTEGER NOT NULL,
    allow_coincident INTEGER NOT NULL,
    next_node_id INTEGER NOT NULL DEFAULT 1,
    next_link_id INTEGER NOT NULL DEFAULT 1);
CREATE TRIGGER IF NOT EXISTS network_name_insert
BEFORE INSERT ON networks
FOR EACH ROW BEGIN
    SELECT RAISE(ABORT, 'insert on networks violates constraint: network_name value must not contain a single quote')
        WHERE NEW.network_name LIKE ('%''%');
    SELECT RAISE(ABORT, 'insert on networks violates constraint: network_name value must not contain a double quote')
        WHERE NEW.network_name LIKE ('%\"%');
    SELECT RAISE(ABORT, 'insert on networks violates constraint: network_name value must be lower case')
        WHERE NEW.network_name <> lower(NEW.network_name);
END;
CREATE TRIGGER IF NOT EXISTS network_name_update
BEFORE UPDATE OF network_name ON networks
FOR EACH ROW BEGIN
    SELECT RAISE(ABORT, 'update on networks violates constraint: network_name value must not contain a single quote')
        WHERE NEW.network_name LIKE ('%''%');
    SELECT RAISE(ABORT, 'update on networks violates constraint: network_name value must not contain a double quote')
        WHERE NEW.network_name LIKE ('%\"%');
    SELECT RAISE(ABORT, 'update on networks violates constraint: network_name value must be lower case')
        WHERE NEW.network_name <> lower(NEW.network_name);
END;";

/// Parameters of a network as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Canonical (lower case) name.
    pub name: String,
    /// Spatial networks store a geometry for every node and link.
    pub spatial: bool,
    pub srid: i32,
    pub has_z: bool,
    /// Allow two nodes at the same position.
    pub allow_coincident: bool,
}

impl NetworkInfo {
    pub fn node_table(&self) -> String {
        derived_name(&self.name, "node")
    }

    pub fn link_table(&self) -> String {
        derived_name(&self.name, "link")
    }

    pub fn seeds_table(&self) -> String {
        derived_name(&self.name, "seeds")
    }
}

/// Every schema object name a network called `name` would create.
fn derived_objects(name: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(11);
    for suffix in ["node", "link", "seeds"] {
        let table = derived_name(name, suffix);
        names.push(spatial_index_name(&table, GEOMETRY_COLUMN));
        names.push(table);
    }
    for index in ["start_node", "end_node", "timestamp", "link", "seeds_timestamp"] {
        names.push(format!("idx_{name}_{index}"));
    }
    names
}

/// True when nothing in the database already uses a name a new network
/// called `name` would need.
pub fn check_new_network(conn: &Connection, name: &str) -> Result<bool> {
    if find_table(conn, None, NETWORKS_TABLE)?.is_some() && lookup_network(conn, None, name)?.is_some() {
        return Ok(false);
    }
    for suffix in ["node", "link", "seeds"] {
        let table = derived_name(name, suffix);
        if metadata::find_geometry_column(conn, None, &table, GEOMETRY_COLUMN)?.is_some() {
            return Ok(false);
        }
    }
    for object in derived_objects(name) {
        if object_exists(conn, &object)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// True when `name` is a completely registered network: a catalog row, the
/// three geometry columns and the three tables with their spatial indices.
pub fn check_existing_network(conn: &Connection, db_prefix: Option<&str>, name: &str) -> Result<bool> {
    if find_table(conn, db_prefix, NETWORKS_TABLE)?.is_none() {
        return Ok(false);
    }
    let Some(info) = lookup_network(conn, db_prefix, name)? else {
        return Ok(false);
    };
    for table in [info.node_table(), info.link_table(), info.seeds_table()] {
        if metadata::find_geometry_column(conn, db_prefix, &table, GEOMETRY_COLUMN)?.is_none() {
            return Ok(false);
        }
        if find_table(conn, db_prefix, &table)?.is_none()
            || find_table(conn, db_prefix, &spatial_index_name(&table, GEOMETRY_COLUMN))?.is_none()
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Reads a network's catalog row, matching the name case-insensitively.
pub fn lookup_network(conn: &Connection, db_prefix: Option<&str>, name: &str) -> Result<Option<NetworkInfo>> {
    if find_table(conn, db_prefix, NETWORKS_TABLE)?.is_none() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT network_name, spatial, srid, has_z, allow_coincident FROM {}.networks
         WHERE Lower(network_name) = Lower(?1)",
        quote_identifier(schema(db_prefix))
    );
    let info = conn
        .query_row(&sql, params![name], |row| {
            Ok(NetworkInfo {
                name: row.get(0)?,
                spatial: row.get::<_, i64>(1)? != 0,
                srid: row.get(2)?,
                has_z: row.get::<_, i64>(3)? != 0,
                allow_coincident: row.get::<_, i64>(4)? != 0,
            })
        })
        .optional()?;
    Ok(info)
}

/// Every registered network, ordered by name.
pub fn list_networks(conn: &Connection) -> Result<Vec<NetworkInfo>> {
    if find_table(conn, None, NETWORKS_TABLE)?.is_none() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT network_name, spatial, srid, has_z, allow_coincident FROM networks ORDER BY network_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(NetworkInfo {
            name: row.get(0)?,
            spatial: row.get::<_, i64>(1)? != 0,
            srid: row.get(2)?,
            has_z: row.get::<_, i64>(3)? != 0,
            allow_coincident: row.get::<_, i64>(4)? != 0,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Creates the catalog row and the tables of a new network.
///
/// The caller provides atomicity; on error some of the objects may exist
/// until the enclosing savepoint is rolled back.
pub fn create_network(conn: &Connection, info: &NetworkInfo) -> Result<()> {
    if info.name.is_empty() {
        return Err(Error::InvalidArgument);
    }
    let name = info.name.to_lowercase();
    if !check_new_network(conn, &name)? {
        return Err(Error::NameCollision(name));
    }
    conn.execute_batch(CREATE_NETWORKS)?;
    conn.execute(
        "INSERT INTO networks (network_name, spatial, srid, has_z, allow_coincident)
         VALUES (Lower(?1), ?2, ?3, ?4, ?5)",
        params![name, info.spatial, info.srid, info.has_z, info.allow_coincident],
    )?;

    let info = NetworkInfo {
        name,
        ..info.clone()
    };
    create_node_table(conn, &info)?;
    create_link_table(conn, &info)?;
    create_seeds_table(conn, &info)?;
    tracing::info!(
        network = %info.name,
        spatial = info.spatial,
        srid = info.srid,
        has_z = info.has_z,
        "network created"
    );
    Ok(())
}

/// Trigger body statement advancing a catalog id counter.
fn advance_counter(name: &str, counter: &str, id_column: &str) -> String {
    format!(
        "UPDATE networks SET {counter} = NEW.{id_column} + 1
            WHERE Lower(network_name) = {} AND {counter} < NEW.{id_column} + 1;",
        quote_literal(name)
    )
}

fn create_node_table(conn: &Connection, info: &NetworkInfo) -> Result<()> {
    let table = info.node_table();
    let qt = quote_identifier(&table);
    conn.execute_batch(&format!(
        "CREATE TABLE {qt} (node_id INTEGER PRIMARY KEY AUTOINCREMENT)"
    ))?;
    metadata::add_geometry_column(conn, &table, GEOMETRY_COLUMN, GeometryClass::Point, info.srid, info.has_z)?;
    metadata::create_spatial_index(conn, &table, GEOMETRY_COLUMN)?;
    let advance = advance_counter(&info.name, "next_node_id", "node_id");
    conn.execute_batch(&format!(
        "CREATE TRIGGER {ins} AFTER INSERT ON {qt} FOR EACH ROW BEGIN
            {advance}
         END;
         CREATE TRIGGER {upd} AFTER UPDATE OF node_id ON {qt} FOR EACH ROW BEGIN
            {advance}
         END;",
        ins = quote_identifier(&format!("{table}_next_ins")),
        upd = quote_identifier(&format!("{table}_next_upd")),
    ))?;
    Ok(())
}

fn create_link_table(conn: &Connection, info: &NetworkInfo) -> Result<()> {
    let table = info.link_table();
    let qt = quote_identifier(&table);
    let nodes = quote_identifier(&info.node_table());
    let n = &info.name;
    conn.execute_batch(&format!(
        "CREATE TABLE {qt} (
            link_id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_node INTEGER NOT NULL,
            end_node INTEGER NOT NULL,
            timestamp DATETIME,
            CONSTRAINT {fk_start} FOREIGN KEY (start_node) REFERENCES {nodes} (node_id),
            CONSTRAINT {fk_end} FOREIGN KEY (end_node) REFERENCES {nodes} (node_id));
         CREATE INDEX {idx_start} ON {qt} (start_node);
         CREATE INDEX {idx_end} ON {qt} (end_node);
         CREATE INDEX {idx_ts} ON {qt} (timestamp);",
        fk_start = quote_identifier(&format!("fk_{n}_link_start")),
        fk_end = quote_identifier(&format!("fk_{n}_link_end")),
        idx_start = quote_identifier(&format!("idx_{n}_start_node")),
        idx_end = quote_identifier(&format!("idx_{n}_end_node")),
        idx_ts = quote_identifier(&format!("idx_{n}_timestamp")),
    ))?;
    metadata::add_geometry_column(
        conn,
        &table,
        GEOMETRY_COLUMN,
        GeometryClass::Linestring,
        info.srid,
        info.has_z,
    )?;
    metadata::create_spatial_index(conn, &table, GEOMETRY_COLUMN)?;
    let advance = advance_counter(&info.name, "next_link_id", "link_id");
    conn.execute_batch(&format!(
        "CREATE TRIGGER {ins} AFTER INSERT ON {qt} FOR EACH ROW BEGIN
            {advance}
            UPDATE {qt} SET timestamp = {NOW} WHERE link_id = NEW.link_id;
         END;
         CREATE TRIGGER {upd} AFTER UPDATE OF start_node, end_node, geometry ON {qt} FOR EACH ROW BEGIN
            UPDATE {qt} SET timestamp = {NOW} WHERE link_id = NEW.link_id;
         END;
         CREATE TRIGGER {next_upd} AFTER UPDATE OF link_id ON {qt} FOR EACH ROW BEGIN
            {advance}
         END;",
        ins = quote_identifier(&format!("{table}_next_ins")),
        upd = quote_identifier(&format!("{table}_update")),
        next_upd = quote_identifier(&format!("{table}_next_upd")),
    ))?;
    Ok(())
}

fn create_seeds_table(conn: &Connection, info: &NetworkInfo) -> Result<()> {
    let table = info.seeds_table();
    let qt = quote_identifier(&table);
    let links = quote_identifier(&info.link_table());
    let n = &info.name;
    conn.execute_batch(&format!(
        "CREATE TABLE {qt} (
            seed_id INTEGER PRIMARY KEY AUTOINCREMENT,
            link_id INTEGER NOT NULL,
            timestamp DATETIME,
            CONSTRAINT {fk_link} FOREIGN KEY (link_id) REFERENCES {links} (link_id) ON DELETE CASCADE);
         CREATE INDEX {idx_link} ON {qt} (link_id);
         CREATE INDEX {idx_ts} ON {qt} (timestamp);",
        fk_link = quote_identifier(&format!("fk_{n}_seed_link")),
        idx_link = quote_identifier(&format!("idx_{n}_link")),
        idx_ts = quote_identifier(&format!("idx_{n}_seeds_timestamp")),
    ))?;
    metadata::add_geometry_column(conn, &table, GEOMETRY_COLUMN, GeometryClass::Point, info.srid, info.has_z)?;
    metadata::create_spatial_index(conn, &table, GEOMETRY_COLUMN)?;
    conn.execute_batch(&format!(
        "CREATE TRIGGER {ins} AFTER INSERT ON {qt} FOR EACH ROW BEGIN
            UPDATE {qt} SET timestamp = {NOW} WHERE seed_id = NEW.seed_id;
         END;
         CREATE TRIGGER {upd} AFTER UPDATE OF link_id, geometry ON {qt} FOR EACH ROW BEGIN
            UPDATE {qt} SET timestamp = {NOW} WHERE seed_id = NEW.seed_id;
         END;",
        ins = quote_identifier(&format!("{table}_ins")),
        upd = quote_identifier(&format!("{table}_update")),
    ))?;
    Ok(())
}

/// Drops a network's tables, indices and metadata and its catalog row.
pub fn drop_network(conn: &Connection, name: &str) -> Result<()> {
    let info = lookup_network(conn, None, name)?.ok_or(Error::InvalidNetworkName)?;
    for table in [info.seeds_table(), info.link_table(), info.node_table()] {
        metadata::drop_geometry_table(conn, &table)?;
    }
    conn.execute(
        "DELETE FROM networks WHERE Lower(network_name) = Lower(?1)",
        params![info.name],
    )?;
    tracing::info!(network = %info.name, "network dropped");
    Ok(())
}
