// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The prepared statement set owned by a network accessor.
//!
//! Statement text is generated once per network from its table names. The
//! compiled statements live in the connection's statement cache: they are
//! compiled eagerly when an accessor opens, reused through
//! `prepare_cached`, and finalized as a whole around any DDL touching the
//! network's tables (see [`StatementSet::suspended`]).

use rusqlite::{CachedStatement, Connection};
use toponet_core::metadata::index_filter;
use toponet_core::sql::quote_identifier;

use crate::catalog::{NetworkInfo, GEOMETRY_COLUMN};
use crate::error::Result;

/// Statements every accessor keeps ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stmt {
    NodeById,
    NodesInFrame,
    InsertNode,
    UpdateNode,
    DeleteNode,
    LinkById,
    LinksInFrame,
    LinksByNode,
    InsertLink,
    UpdateLink,
    DeleteLink,
    NextLinkId,
    BumpLinkId,
    CountPrimitives,
    SeedByLink,
    SeedsInFrame,
}

impl Stmt {
    pub const ALL: [Stmt; 16] = [
        Stmt::NodeById,
        Stmt::NodesInFrame,
        Stmt::InsertNode,
        Stmt::UpdateNode,
        Stmt::DeleteNode,
        Stmt::LinkById,
        Stmt::LinksInFrame,
        Stmt::LinksByNode,
        Stmt::InsertLink,
        Stmt::UpdateLink,
        Stmt::DeleteLink,
        Stmt::NextLinkId,
        Stmt::BumpLinkId,
        Stmt::CountPrimitives,
        Stmt::SeedByLink,
        Stmt::SeedsInFrame,
    ];

    fn sql(self, info: &NetworkInfo) -> String {
        let nodes_table = info.node_table();
        let links_table = info.link_table();
        let seeds_table = info.seeds_table();
        let nodes = quote_identifier(&nodes_table);
        let links = quote_identifier(&links_table);
        let seeds = quote_identifier(&seeds_table);
        match self {
            Stmt::NodeById => format!("SELECT node_id, geometry FROM {nodes} WHERE node_id = ?1"),
            Stmt::NodesInFrame => format!(
                "SELECT node_id, geometry FROM {nodes} WHERE {}",
                index_filter(None, &nodes_table, GEOMETRY_COLUMN, 1)
            ),
            Stmt::InsertNode => format!("INSERT INTO {nodes} (node_id, geometry) VALUES (NULL, ?1)"),
            Stmt::UpdateNode => format!("UPDATE {nodes} SET geometry = ?2 WHERE node_id = ?1"),
            Stmt::DeleteNode => format!("DELETE FROM {nodes} WHERE node_id = ?1"),
            Stmt::LinkById => format!(
                "SELECT link_id, start_node, end_node, geometry FROM {links} WHERE link_id = ?1"
            ),
            Stmt::LinksInFrame => format!(
                "SELECT link_id, start_node, end_node, geometry FROM {links} WHERE {}",
                index_filter(None, &links_table, GEOMETRY_COLUMN, 1)
            ),
            Stmt::LinksByNode => format!(
                "SELECT link_id, start_node, end_node, geometry FROM {links}
                 WHERE start_node = ?1 OR end_node = ?1 ORDER BY link_id"
            ),
            Stmt::InsertLink => format!(
                "INSERT INTO {links} (link_id, start_node, end_node, geometry) VALUES (?1, ?2, ?3, ?4)"
            ),
            Stmt::UpdateLink => format!(
                "UPDATE {links} SET start_node = ?2, end_node = ?3, geometry = ?4 WHERE link_id = ?1"
            ),
            Stmt::DeleteLink => format!("DELETE FROM {links} WHERE link_id = ?1"),
            Stmt::NextLinkId => {
                "SELECT next_link_id FROM networks WHERE Lower(network_name) = Lower(?1)".to_string()
            }
            Stmt::BumpLinkId => {
                "UPDATE networks SET next_link_id = next_link_id + 1 WHERE Lower(network_name) = Lower(?1)"
                    .to_string()
            }
            Stmt::CountPrimitives => {
                format!("SELECT (SELECT Count(*) FROM {nodes}) + (SELECT Count(*) FROM {links})")
            }
            Stmt::SeedByLink => format!("SELECT geometry FROM {seeds} WHERE link_id = ?1"),
            Stmt::SeedsInFrame => format!(
                "SELECT seed_id, link_id, geometry FROM {seeds} WHERE {}",
                index_filter(None, &seeds_table, GEOMETRY_COLUMN, 1)
            ),
        }
    }
}

/// SQL text of every [`Stmt`] for one network.
#[derive(Debug, Clone)]
pub struct StatementSet {
    sql: Vec<String>,
}

impl StatementSet {
    pub fn new(info: &NetworkInfo) -> Self {
        Self {
            sql: Stmt::ALL.iter().map(|s| s.sql(info)).collect(),
        }
    }

    pub fn sql(&self, stmt: Stmt) -> &str {
        &self.sql[stmt as usize]
    }

    /// Fetches a compiled statement from the connection cache, compiling it
    /// on a miss.
    pub fn get<'c>(&self, conn: &'c Connection, stmt: Stmt) -> Result<CachedStatement<'c>> {
        Ok(conn.prepare_cached(self.sql(stmt))?)
    }

    /// Compiles every statement. Fails if any of the network's tables or
    /// columns is missing.
    pub fn prepare_all(&self, conn: &Connection) -> Result<()> {
        for stmt in Stmt::ALL {
            self.get(conn, stmt)?;
        }
        Ok(())
    }

    /// Finalizes every cached statement on the connection.
    pub fn finalize_all(&self, conn: &Connection) {
        conn.flush_prepared_statement_cache();
    }

    /// Runs a schema-changing block with all statements finalized, then
    /// compiles them again. Recompilation happens whether or not `ddl`
    /// succeeds; the block's own error wins.
    pub fn suspended<T>(&self, conn: &Connection, ddl: impl FnOnce() -> Result<T>) -> Result<T> {
        self.finalize_all(conn);
        let outcome = ddl();
        let restored = self.prepare_all(conn);
        let value = outcome?;
        restored?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::create_network;
    use crate::error::Error;
    use toponet_core::Session;

    fn info() -> NetworkInfo {
        NetworkInfo {
            name: "roads".into(),
            spatial: true,
            srid: 3003,
            has_z: false,
            allow_coincident: false,
        }
    }

    #[test]
    fn statements_compile_against_network_tables() {
        let session = Session::open_in_memory().unwrap();
        create_network(session.conn(), &info()).unwrap();
        let set = StatementSet::new(&info());
        set.prepare_all(session.conn()).unwrap();
        assert!(set.sql(Stmt::NodesInFrame).contains("\"idx_roads_node_geometry\""));
    }

    #[test]
    fn prepare_fails_without_tables() {
        let session = Session::open_in_memory().unwrap();
        let set = StatementSet::new(&info());
        assert!(set.prepare_all(session.conn()).is_err());
    }

    #[test]
    fn suspended_recompiles_after_failed_ddl() {
        let session = Session::open_in_memory().unwrap();
        create_network(session.conn(), &info()).unwrap();
        let set = StatementSet::new(&info());
        set.prepare_all(session.conn()).unwrap();

        let result: Result<()> = set.suspended(session.conn(), || {
            session.conn().execute_batch("CREATE TABLE broken (")?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        set.get(session.conn(), Stmt::LinkById).unwrap();
    }
}
