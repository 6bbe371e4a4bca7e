// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network accessors and the registry of open networks.
//!
//! A [`Registry`] owns one [`NetworkAccessor`] per open network, keyed by the
//! lower case network name. [`Registry::open`] hands out a [`Network`]: a
//! short-lived handle pairing the accessor with the [`Session`] that every
//! operation runs against.
//!
//! Each mutating call on a [`Network`] clears the accessor's last error, runs
//! inside its own savepoint and, on failure, rolls back and records the error
//! message for [`Network::last_error`].

use rusqlite::Connection;
use rustc_hash::FxHashMap;
use toponet_core::sql::quote_identifier;
use toponet_core::Session;
use toponet_geometry::{Coord, Geometry};

use crate::backend::SqliteBackend;
use crate::catalog::{self, NetworkInfo};
use crate::edit::EditCore;
use crate::error::{Error, Result};
use crate::statements::StatementSet;
use crate::validate::{FaceSource, ValidationIssue};
use crate::{export, import, seeds, validate};

/// One open network: its catalog parameters, prepared statements and the
/// message of the last failed operation.
#[derive(Debug)]
pub struct NetworkAccessor {
    info: NetworkInfo,
    statements: StatementSet,
    last_error: Option<String>,
}

impl NetworkAccessor {
    /// Validates that `name` is a completely registered network and compiles
    /// its statements.
    fn load(conn: &Connection, name: &str) -> Result<Self> {
        if !catalog::check_existing_network(conn, None, name)? {
            return Err(Error::InvalidNetworkName);
        }
        let info = catalog::lookup_network(conn, None, name)?.ok_or(Error::InvalidNetworkName)?;
        let statements = StatementSet::new(&info);
        statements.prepare_all(conn)?;
        tracing::debug!(network = %info.name, spatial = info.spatial, "network accessor opened");
        Ok(Self {
            info,
            statements,
            last_error: None,
        })
    }

    pub fn info(&self) -> &NetworkInfo {
        &self.info
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Parameters of a network to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkOptions {
    pub spatial: bool,
    pub srid: i32,
    pub has_z: bool,
    pub allow_coincident: bool,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            spatial: true,
            srid: -1,
            has_z: false,
            allow_coincident: false,
        }
    }
}

/// Open networks of one session.
#[derive(Debug, Default)]
pub struct Registry {
    open: FxHashMap<String, NetworkAccessor>,
    last_error: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a registry level operation.
    fn track<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.to_string()),
        }
        outcome
    }

    /// Creates a network. Nothing is left behind on failure.
    pub fn create_network(&mut self, session: &mut Session, name: &str, options: &NetworkOptions) -> Result<()> {
        let info = NetworkInfo {
            name: name.to_lowercase(),
            spatial: options.spatial,
            srid: options.srid,
            has_z: options.has_z,
            allow_coincident: options.allow_coincident,
        };
        let outcome = session.atomic(|s| catalog::create_network(s.conn(), &info));
        self.track(outcome)
    }

    /// Returns a handle on the network called `name` (any case), loading and
    /// caching its accessor on first use.
    pub fn open<'a>(&'a mut self, session: &'a mut Session, name: &str) -> Result<Network<'a>> {
        let key = name.to_lowercase();
        if !self.open.contains_key(&key) {
            match NetworkAccessor::load(session.conn(), &key) {
                Ok(accessor) => {
                    self.open.insert(key.clone(), accessor);
                }
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            }
        }
        let accessor = self.open.get_mut(&key).ok_or(Error::InvalidNetworkName)?;
        Ok(Network { session, accessor })
    }

    /// True when an accessor for `name` is cached.
    pub fn is_open(&self, name: &str) -> bool {
        self.open.contains_key(&name.to_lowercase())
    }

    /// Finalizes and forgets the accessor of `name`. No-op when none is open.
    pub fn destroy(&mut self, session: &Session, name: &str) {
        if let Some(accessor) = self.open.remove(&name.to_lowercase()) {
            accessor.statements.finalize_all(session.conn());
            tracing::debug!(network = %accessor.info.name, "network accessor closed");
        }
    }

    /// Destroys every open accessor.
    pub fn close_all(&mut self, session: &Session) {
        for (_, accessor) in self.open.drain() {
            accessor.statements.finalize_all(session.conn());
        }
    }

    /// Drops a network and all its tables.
    pub fn drop_network(&mut self, session: &mut Session, name: &str) -> Result<()> {
        self.destroy(session, name);
        let outcome = session.atomic(|s| catalog::drop_network(s.conn(), name));
        self.track(outcome)
    }

    /// Creates `to` with the parameters of `from` and copies its nodes and
    /// links.
    pub fn clone_network(&mut self, session: &mut Session, from: &str, to: &str) -> Result<()> {
        let outcome = session.atomic(|s| clone_tables(s.conn(), from, to));
        self.track(outcome)
    }

    /// Message of the last failed operation on `name`, if it is open.
    pub fn last_error(&self, name: &str) -> Option<&str> {
        self.open
            .get(&name.to_lowercase())
            .and_then(NetworkAccessor::last_error)
    }

    /// Message of the last failed registry level operation (create, drop,
    /// clone, open).
    pub fn registry_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

fn clone_tables(conn: &Connection, from: &str, to: &str) -> Result<()> {
    if !catalog::check_existing_network(conn, None, from)? {
        return Err(Error::InvalidOriginNetwork);
    }
    let origin = catalog::lookup_network(conn, None, from)?.ok_or(Error::InvalidOriginNetwork)?;
    let name = to.to_lowercase();
    if name.is_empty() || !catalog::check_new_network(conn, &name)? {
        return Err(Error::InvalidDestinationNetwork);
    }
    let target = NetworkInfo {
        name,
        ..origin.clone()
    };
    catalog::create_network(conn, &target)?;
    let copy = format!(
        "INSERT INTO {dst_node} (node_id, geometry) SELECT node_id, geometry FROM {src_node};
         INSERT INTO {dst_link} (link_id, start_node, end_node, geometry)
            SELECT link_id, start_node, end_node, geometry FROM {src_link};",
        dst_node = quote_identifier(&target.node_table()),
        src_node = quote_identifier(&origin.node_table()),
        dst_link = quote_identifier(&target.link_table()),
        src_link = quote_identifier(&origin.link_table()),
    );
    conn.execute_batch(&copy).map_err(|err| {
        tracing::warn!(from = %origin.name, to = %target.name, error = %err, "network copy failed");
        Error::CloneFailure
    })?;
    tracing::info!(from = %origin.name, to = %target.name, "network cloned");
    Ok(())
}

/// An open network bound to a session.
pub struct Network<'a> {
    session: &'a mut Session,
    accessor: &'a mut NetworkAccessor,
}

impl Network<'_> {
    pub fn info(&self) -> &NetworkInfo {
        &self.accessor.info
    }

    pub fn name(&self) -> &str {
        &self.accessor.info.name
    }

    pub fn last_error(&self) -> Option<&str> {
        self.accessor.last_error()
    }

    pub fn session(&self) -> &Session {
        &*self.session
    }

    // ========================================================================
    // Call plumbing
    // ========================================================================

    /// Runs `f` in a savepoint with the accessor's last error cleared first
    /// and set from the outcome.
    fn run<T>(&mut self, f: impl FnOnce(&SqliteBackend<'_>) -> Result<T>) -> Result<T> {
        let Network { session, accessor } = self;
        accessor.last_error = None;
        let (info, statements) = (&accessor.info, &accessor.statements);
        let outcome = session.atomic(|s| f(&SqliteBackend::new(s.conn(), info, statements)));
        if let Err(err) = &outcome {
            tracing::debug!(network = %accessor.info.name, error = %err, "network operation failed");
            accessor.last_error = Some(err.to_string());
        }
        outcome
    }

    fn edit<T>(&mut self, f: impl FnOnce(&EditCore<'_, SqliteBackend<'_>>) -> Result<T>) -> Result<T> {
        self.run(|backend| f(&EditCore::new(backend, backend.info())))
    }

    /// Stores `err` as the last error without touching the database.
    fn reject<T>(&mut self, err: Error) -> Result<T> {
        self.accessor.last_error = Some(err.to_string());
        Err(err)
    }

    fn require_spatial(&mut self, op: &'static str) -> Result<()> {
        if self.accessor.info.spatial {
            Ok(())
        } else {
            self.reject(Error::LogicalNetwork(op))
        }
    }

    fn require_logical(&mut self, op: &'static str) -> Result<()> {
        if self.accessor.info.spatial {
            self.reject(Error::SpatialNetwork(op))
        } else {
            Ok(())
        }
    }

    fn check_srid_dims(&self, geom: &Geometry) -> Result<()> {
        let info = &self.accessor.info;
        if geom.srid != info.srid || geom.has_z != info.has_z {
            return Err(Error::MismatchingGeometry);
        }
        Ok(())
    }

    /// Enforces the nullability contract for a node geometry and extracts
    /// its coordinate.
    fn node_point(&mut self, geom: Option<&Geometry>) -> Result<Option<Coord>> {
        let checked = match (self.accessor.info.spatial, geom) {
            (true, None) => Err(Error::NullGeometry),
            (false, Some(_)) => Err(Error::NotNullGeometry),
            (false, None) => Ok(None),
            (true, Some(g)) => self
                .check_srid_dims(g)
                .and_then(|()| g.as_single_point().map(Some).ok_or(Error::InvalidArgument)),
        };
        checked.or_else(|err| self.reject(err))
    }

    /// Same as [`Network::node_point`] for a link geometry.
    fn link_line(&mut self, geom: Option<&Geometry>) -> Result<Option<Vec<Coord>>> {
        let checked = match (self.accessor.info.spatial, geom) {
            (true, None) => Err(Error::NullGeometry),
            (false, Some(_)) => Err(Error::NotNullGeometry),
            (false, None) => Ok(None),
            (true, Some(g)) => self.check_srid_dims(g).and_then(|()| {
                g.as_single_linestring()
                    .map(|l| Some(l.to_vec()))
                    .ok_or(Error::InvalidArgument)
            }),
        };
        checked.or_else(|err| self.reject(err))
    }

    /// A search point for the point lookups.
    fn search_point(&mut self, op: &'static str, geom: &Geometry) -> Result<Coord> {
        self.require_spatial(op)?;
        let checked = self
            .check_srid_dims(geom)
            .and_then(|()| geom.as_single_point().ok_or(Error::InvalidArgument));
        checked.or_else(|err| self.reject(err))
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Adds an isolated node; `point` must be present exactly when the
    /// network is spatial.
    pub fn add_iso_net_node(&mut self, point: Option<&Geometry>) -> Result<i64> {
        let point = self.node_point(point)?;
        self.edit(|core| core.add_iso_net_node(point))
    }

    /// Moves an isolated node and describes the new location.
    pub fn move_iso_net_node(&mut self, node_id: i64, point: Option<&Geometry>) -> Result<String> {
        let point = self.node_point(point)?;
        self.edit(|core| core.move_iso_net_node(node_id, point))?;
        Ok(match point {
            Some(p) => format!("Isolated Node {node_id} moved to location {:.6},{:.6}", p.x, p.y),
            None => format!("Isolated Node {node_id} moved to NULL location"),
        })
    }

    pub fn rem_iso_net_node(&mut self, node_id: i64) -> Result<String> {
        self.edit(|core| core.rem_iso_net_node(node_id))?;
        Ok(format!("Isolated NetNode {node_id} removed"))
    }

    // ========================================================================
    // Links
    // ========================================================================

    pub fn add_link(&mut self, start_node: i64, end_node: i64, line: Option<&Geometry>) -> Result<i64> {
        let line = self.link_line(line)?;
        self.edit(|core| core.add_link(start_node, end_node, line))
    }

    pub fn change_link_geom(&mut self, link_id: i64, line: Option<&Geometry>) -> Result<String> {
        let line = self.link_line(line)?;
        self.edit(|core| core.change_link_geom(link_id, line))?;
        Ok(format!("Link {link_id} changed"))
    }

    pub fn remove_link(&mut self, link_id: i64) -> Result<String> {
        self.edit(|core| core.remove_link(link_id))?;
        Ok(format!("Link {link_id} removed"))
    }

    // ========================================================================
    // Split and heal
    // ========================================================================

    pub fn new_log_link_split(&mut self, link_id: i64) -> Result<i64> {
        if self.accessor.info.spatial {
            return self.reject(Error::SplitNeedsGeometry("ST_NewLogLinkSplit", "ST_NewGeoLinkSplit"));
        }
        self.edit(|core| core.new_log_link_split(link_id))
    }

    pub fn mod_log_link_split(&mut self, link_id: i64) -> Result<i64> {
        if self.accessor.info.spatial {
            return self.reject(Error::SplitNeedsGeometry("ST_ModLogLinkSplit", "ST_ModGeoLinkSplit"));
        }
        self.edit(|core| core.mod_log_link_split(link_id))
    }

    pub fn new_geo_link_split(&mut self, link_id: i64, point: &Geometry) -> Result<i64> {
        if !self.accessor.info.spatial {
            return self.reject(Error::SplitNeedsLogical("ST_NewGeoLinkSplit", "ST_NewLogLinkSplit"));
        }
        let Some(p) = self.node_point(Some(point))? else {
            return self.reject(Error::NullGeometry);
        };
        self.edit(|core| core.new_geo_link_split(link_id, p))
    }

    pub fn mod_geo_link_split(&mut self, link_id: i64, point: &Geometry) -> Result<i64> {
        if !self.accessor.info.spatial {
            return self.reject(Error::SplitNeedsLogical("ST_ModGeoLinkSplit", "ST_ModLogLinkSplit"));
        }
        let Some(p) = self.node_point(Some(point))? else {
            return self.reject(Error::NullGeometry);
        };
        self.edit(|core| core.mod_geo_link_split(link_id, p))
    }

    pub fn new_link_heal(&mut self, first_link: i64, second_link: i64) -> Result<i64> {
        self.edit(|core| core.new_link_heal(first_link, second_link))
    }

    pub fn mod_link_heal(&mut self, first_link: i64, second_link: i64) -> Result<i64> {
        self.edit(|core| core.mod_link_heal(first_link, second_link))
    }

    // ========================================================================
    // Point lookups
    // ========================================================================

    pub fn get_net_node_by_point(&mut self, point: &Geometry, tolerance: f64) -> Result<i64> {
        let p = self.search_point("ST_GetNetNodeByPoint", point)?;
        self.edit(|core| core.get_net_node_by_point(&p, tolerance))
    }

    pub fn get_link_by_point(&mut self, point: &Geometry, tolerance: f64) -> Result<i64> {
        let p = self.search_point("ST_GetLinkByPoint", point)?;
        self.edit(|core| core.get_link_by_point(&p, tolerance))
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Checks a logical network; the report is also left in
    /// `TEMP."{name}_valid_logicalnet"`.
    pub fn valid_logical_net(&mut self) -> Result<Vec<ValidationIssue>> {
        self.require_logical("ST_ValidLogicalNet")?;
        self.run(validate::valid_logical_net)
    }

    /// Checks a spatial network; the report is also left in
    /// `TEMP."{name}_valid_spatialnet"`.
    pub fn valid_spatial_net(&mut self) -> Result<Vec<ValidationIssue>> {
        self.require_spatial("ST_ValidSpatialNet")?;
        self.run(|backend| validate::valid_spatial_net(backend, None))
    }

    /// [`Network::valid_spatial_net`] plus the face checks over `faces`.
    pub fn valid_spatial_net_with_faces(&mut self, faces: &dyn FaceSource) -> Result<Vec<ValidationIssue>> {
        self.require_spatial("ST_ValidSpatialNet")?;
        self.run(|backend| validate::valid_spatial_net(backend, Some(faces)))
    }

    // ========================================================================
    // Seeds
    // ========================================================================

    pub fn update_seeds(&mut self, incremental: bool) -> Result<()> {
        self.require_spatial("TopoNet_UpdateSeeds")?;
        self.run(|backend| seeds::update_seeds(backend, incremental))
    }

    /// The seed point of one link.
    pub fn get_link_seed(&mut self, link_id: i64) -> Result<Geometry> {
        self.require_spatial("GetLinkSeed")?;
        self.run(|backend| seeds::link_seed(backend, link_id))
    }

    /// Gives every two-vertex link a middle vertex; returns how many links
    /// changed.
    pub fn disambiguate_segment_links(&mut self) -> Result<i64> {
        self.require_spatial("TopoNet_DisambiguateSegmentLinks")?;
        self.edit(seeds::disambiguate_segment_links)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Loads every linestring of `table.column` as links.
    pub fn from_geo_table(&mut self, db_prefix: Option<&str>, table: &str, column: &str) -> Result<()> {
        self.require_spatial("TopoNet_FromGeoTable")?;
        self.edit(|core| import::from_geo_table(core, db_prefix, table, column))
    }

    /// Builds the content of an empty spatial network from one geometry.
    pub fn spat_net_from_geom(&mut self, geom: &Geometry) -> Result<()> {
        self.require_spatial("ST_SpatNetFromGeom")?;
        self.edit(|core| import::spat_net_from_geom(core, geom))
    }

    /// Copies the nodes and edges of a topology into an empty logical network.
    pub fn logi_net_from_tgeo(&mut self, topology: &str) -> Result<()> {
        self.require_logical("ST_LogiNetFromTGeo")?;
        self.edit(|core| import::net_from_topology(core, topology))
    }

    /// Copies the nodes and edges of a topology into an empty spatial network.
    pub fn spat_net_from_tgeo(&mut self, topology: &str) -> Result<()> {
        self.require_spatial("ST_SpatNetFromTGeo")?;
        self.edit(|core| import::net_from_topology(core, topology))
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Rebuilds every feature of a reference table from the network's
    /// primitives into a new table.
    pub fn to_geo_table(&mut self, request: &export::ExportRequest<'_>) -> Result<()> {
        self.require_spatial("TopoNet_ToGeoTable")?;
        self.run(|backend| export::to_geo_table(backend, request))
    }

    /// Lists which reference lines each link belongs to.
    pub fn line_links_list(
        &mut self,
        db_prefix: Option<&str>,
        ref_table: &str,
        ref_column: &str,
        out_table: &str,
    ) -> Result<()> {
        self.require_spatial("TopoNet_LineLinksList")?;
        self.run(|backend| export::line_links_list(backend, db_prefix, ref_table, ref_column, out_table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64) -> Geometry {
        Geometry::point(4326, false, Coord::xy(x, y))
    }

    fn spatial() -> NetworkOptions {
        NetworkOptions {
            srid: 4326,
            ..NetworkOptions::default()
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "MixedCase", &spatial()).unwrap();
        assert_eq!(registry.open(&mut session, "MIXEDCASE").unwrap().name(), "mixedcase");
        assert!(registry.is_open("mixedcase"));
        assert!(registry.create_network(&mut session, "mixedcase", &spatial()).is_err());
        assert!(registry.registry_error().is_some());
    }

    #[test]
    fn unknown_network_is_reported() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        assert!(matches!(
            registry.open(&mut session, "nowhere"),
            Err(Error::InvalidNetworkName)
        ));
        assert_eq!(
            registry.registry_error(),
            Some("SQL/MM Spatial exception - invalid network name.")
        );
    }

    #[test]
    fn last_error_is_cleared_by_next_call() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "roads", &spatial()).unwrap();
        let mut net = registry.open(&mut session, "roads").unwrap();
        assert!(matches!(net.add_iso_net_node(None), Err(Error::NullGeometry)));
        assert_eq!(
            net.last_error(),
            Some("SQL/MM Spatial exception - Spatial Network can't accept null geometry.")
        );
        net.add_iso_net_node(Some(&point(1.0, 1.0))).unwrap();
        assert_eq!(net.last_error(), None);
    }

    #[test]
    fn mismatching_srid_is_rejected() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "roads", &spatial()).unwrap();
        let mut net = registry.open(&mut session, "roads").unwrap();
        let wrong = Geometry::point(3003, false, Coord::xy(1.0, 1.0));
        assert!(matches!(net.add_iso_net_node(Some(&wrong)), Err(Error::MismatchingGeometry)));
    }

    #[test]
    fn result_messages() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "roads", &spatial()).unwrap();
        let mut net = registry.open(&mut session, "roads").unwrap();
        let id = net.add_iso_net_node(Some(&point(1.0, 1.0))).unwrap();
        assert_eq!(
            net.move_iso_net_node(id, Some(&point(2.5, 3.0))).unwrap(),
            format!("Isolated Node {id} moved to location 2.500000,3.000000")
        );
        assert_eq!(net.rem_iso_net_node(id).unwrap(), format!("Isolated NetNode {id} removed"));
    }

    #[test]
    fn split_kind_must_match_network() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "roads", &spatial()).unwrap();
        let mut net = registry.open(&mut session, "roads").unwrap();
        let err = net.new_log_link_split(1).unwrap_err();
        assert!(err.to_string().contains("try using ST_NewGeoLinkSplit"));
    }

    #[test]
    fn drop_and_clone() {
        let mut session = Session::open_in_memory().unwrap();
        let mut registry = Registry::new();
        registry.create_network(&mut session, "roads", &spatial()).unwrap();
        {
            let mut net = registry.open(&mut session, "roads").unwrap();
            net.add_iso_net_node(Some(&point(1.0, 1.0))).unwrap();
        }
        registry.clone_network(&mut session, "roads", "roads_copy").unwrap();
        assert!(matches!(
            registry.clone_network(&mut session, "missing", "other"),
            Err(Error::InvalidOriginNetwork)
        ));
        assert!(matches!(
            registry.clone_network(&mut session, "roads", "roads_copy"),
            Err(Error::InvalidDestinationNetwork)
        ));
        let copied: i64 = session
            .conn()
            .query_row("SELECT Count(*) FROM roads_copy_node", [], |r| r.get(0))
            .unwrap();
        assert_eq!(copied, 1);

        registry.drop_network(&mut session, "roads").unwrap();
        assert!(!registry.is_open("roads"));
        assert!(registry.open(&mut session, "roads").is_err());
    }
}
