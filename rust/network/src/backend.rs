// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage capability interface used by the edit primitives.
//!
//! [`crate::edit::EditCore`] never builds SQL; it reads and writes nodes and
//! links only through [`NetworkBackend`]. [`SqliteBackend`] implements it on
//! top of a network's tables and its [`StatementSet`].

use rusqlite::{params, params_from_iter, Connection};
use toponet_core::metadata::frame_params;
use toponet_core::sql::quote_identifier;
use toponet_geometry::{decode, encode, Bounds, Coord, Geometry};

use crate::catalog::NetworkInfo;
use crate::error::Result;
use crate::statements::{StatementSet, Stmt};

/// A node row. `geom` is `None` on logical networks.
#[derive(Debug, Clone, PartialEq)]
pub struct NetNode {
    pub node_id: i64,
    pub geom: Option<Coord>,
}

/// A link row. `geom` is `None` on logical networks.
#[derive(Debug, Clone, PartialEq)]
pub struct NetLink {
    pub link_id: i64,
    pub start_node: i64,
    pub end_node: i64,
    pub geom: Option<Vec<Coord>>,
}

/// Node and link storage as seen by the edit primitives.
///
/// Frame queries are candidate searches: they may return primitives whose
/// bounding box touches the frame without the geometry itself doing so.
pub trait NetworkBackend {
    fn get_node_by_id(&self, node_id: i64) -> Result<Option<NetNode>>;
    fn get_nodes_in_frame(&self, frame: &Bounds) -> Result<Vec<NetNode>>;
    /// Inserts a node and returns its new id.
    fn insert_node(&self, geom: Option<&Coord>) -> Result<i64>;
    fn update_node(&self, node: &NetNode) -> Result<()>;
    /// Returns `false` when no such node existed.
    fn delete_node(&self, node_id: i64) -> Result<bool>;

    fn get_link_by_id(&self, link_id: i64) -> Result<Option<NetLink>>;
    fn get_links_in_frame(&self, frame: &Bounds) -> Result<Vec<NetLink>>;
    /// Links starting or ending at the node, by ascending id.
    fn get_links_by_node(&self, node_id: i64) -> Result<Vec<NetLink>>;
    /// Reserves and returns the next link id.
    fn get_next_link_id(&self) -> Result<i64>;
    fn insert_link(&self, link: &NetLink) -> Result<()>;
    fn update_link(&self, link: &NetLink) -> Result<()>;
    /// Returns `false` when no such link existed.
    fn delete_link(&self, link_id: i64) -> Result<bool>;

    /// Number of nodes plus links.
    fn count_primitives(&self) -> Result<i64>;
}

/// [`NetworkBackend`] over one network's SQLite tables.
pub struct SqliteBackend<'a> {
    conn: &'a Connection,
    info: &'a NetworkInfo,
    stmts: &'a StatementSet,
}

type RawLink = (i64, i64, i64, Option<Vec<u8>>);

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection, info: &'a NetworkInfo, stmts: &'a StatementSet) -> Self {
        Self { conn, info, stmts }
    }

    pub fn info(&self) -> &'a NetworkInfo {
        self.info
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn statements(&self) -> &'a StatementSet {
        self.stmts
    }

    fn point_blob(&self, geom: Option<&Coord>) -> Option<Vec<u8>> {
        geom.map(|c| encode(&Geometry::point(self.info.srid, self.info.has_z, *c)))
    }

    fn line_blob(&self, geom: Option<&Vec<Coord>>) -> Option<Vec<u8>> {
        geom.map(|l| encode(&Geometry::linestring(self.info.srid, self.info.has_z, l.clone())))
    }

    fn node_from_row(node_id: i64, blob: Option<Vec<u8>>) -> Result<NetNode> {
        let geom = match blob {
            Some(bytes) => decode(&bytes)
                .map_err(toponet_core::Error::from)?
                .as_single_point(),
            None => None,
        };
        Ok(NetNode { node_id, geom })
    }

    fn link_from_row((link_id, start_node, end_node, blob): RawLink) -> Result<NetLink> {
        let geom = match blob {
            Some(bytes) => decode(&bytes)
                .map_err(toponet_core::Error::from)?
                .as_single_linestring()
                .map(<[Coord]>::to_vec),
            None => None,
        };
        Ok(NetLink {
            link_id,
            start_node,
            end_node,
            geom,
        })
    }

    /// Every node, by ascending id.
    pub fn all_nodes(&self) -> Result<Vec<NetNode>> {
        let sql = format!(
            "SELECT node_id, geometry FROM {} ORDER BY node_id",
            quote_identifier(&self.info.node_table())
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(i64, Option<Vec<u8>>)>, _>>()?;
        raw.into_iter()
            .map(|(id, blob)| Self::node_from_row(id, blob))
            .collect()
    }

    /// Every link, by ascending id.
    pub fn all_links(&self) -> Result<Vec<NetLink>> {
        let sql = format!(
            "SELECT link_id, start_node, end_node, geometry FROM {} ORDER BY link_id",
            quote_identifier(&self.info.link_table())
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<std::result::Result<Vec<RawLink>, _>>()?;
        raw.into_iter().map(Self::link_from_row).collect()
    }

    fn query_links(&self, stmt: Stmt, params: impl rusqlite::Params) -> Result<Vec<NetLink>> {
        let mut stmt = self.stmts.get(self.conn, stmt)?;
        let raw = stmt
            .query_map(params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<std::result::Result<Vec<RawLink>, _>>()?;
        raw.into_iter().map(Self::link_from_row).collect()
    }
}

impl NetworkBackend for SqliteBackend<'_> {
    fn get_node_by_id(&self, node_id: i64) -> Result<Option<NetNode>> {
        let mut stmt = self.stmts.get(self.conn, Stmt::NodeById)?;
        let mut rows = stmt.query(params![node_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::node_from_row(row.get(0)?, row.get(1)?)?)),
            None => Ok(None),
        }
    }

    fn get_nodes_in_frame(&self, frame: &Bounds) -> Result<Vec<NetNode>> {
        let mut stmt = self.stmts.get(self.conn, Stmt::NodesInFrame)?;
        let raw = stmt
            .query_map(params_from_iter(frame_params(frame)), |row| {
                Ok((row.get::<_, i64>(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<(i64, Option<Vec<u8>>)>, _>>()?;
        raw.into_iter()
            .map(|(id, blob)| Self::node_from_row(id, blob))
            .collect()
    }

    fn insert_node(&self, geom: Option<&Coord>) -> Result<i64> {
        let mut stmt = self.stmts.get(self.conn, Stmt::InsertNode)?;
        stmt.execute(params![self.point_blob(geom)])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_node(&self, node: &NetNode) -> Result<()> {
        let mut stmt = self.stmts.get(self.conn, Stmt::UpdateNode)?;
        stmt.execute(params![node.node_id, self.point_blob(node.geom.as_ref())])?;
        Ok(())
    }

    fn delete_node(&self, node_id: i64) -> Result<bool> {
        let mut stmt = self.stmts.get(self.conn, Stmt::DeleteNode)?;
        Ok(stmt.execute(params![node_id])? > 0)
    }

    fn get_link_by_id(&self, link_id: i64) -> Result<Option<NetLink>> {
        Ok(self.query_links(Stmt::LinkById, params![link_id])?.into_iter().next())
    }

    fn get_links_in_frame(&self, frame: &Bounds) -> Result<Vec<NetLink>> {
        self.query_links(Stmt::LinksInFrame, params_from_iter(frame_params(frame)))
    }

    fn get_links_by_node(&self, node_id: i64) -> Result<Vec<NetLink>> {
        self.query_links(Stmt::LinksByNode, params![node_id])
    }

    fn get_next_link_id(&self) -> Result<i64> {
        let next: i64 = {
            let mut stmt = self.stmts.get(self.conn, Stmt::NextLinkId)?;
            stmt.query_row(params![self.info.name], |row| row.get(0))?
        };
        let mut bump = self.stmts.get(self.conn, Stmt::BumpLinkId)?;
        bump.execute(params![self.info.name])?;
        Ok(next)
    }

    fn insert_link(&self, link: &NetLink) -> Result<()> {
        let mut stmt = self.stmts.get(self.conn, Stmt::InsertLink)?;
        stmt.execute(params![
            link.link_id,
            link.start_node,
            link.end_node,
            self.line_blob(link.geom.as_ref())
        ])?;
        Ok(())
    }

    fn update_link(&self, link: &NetLink) -> Result<()> {
        let mut stmt = self.stmts.get(self.conn, Stmt::UpdateLink)?;
        stmt.execute(params![
            link.link_id,
            link.start_node,
            link.end_node,
            self.line_blob(link.geom.as_ref())
        ])?;
        Ok(())
    }

    fn delete_link(&self, link_id: i64) -> Result<bool> {
        let mut stmt = self.stmts.get(self.conn, Stmt::DeleteLink)?;
        Ok(stmt.execute(params![link_id])? > 0)
    }

    fn count_primitives(&self) -> Result<i64> {
        let mut stmt = self.stmts.get(self.conn, Stmt::CountPrimitives)?;
        Ok(stmt.query_row([], |row| row.get(0))?)
    }
}
