// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A configured database connection plus its savepoint stack.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::savepoint::SavepointStack;
use crate::{functions, metadata};

/// Prefix of generated savepoint names.
const SAVEPOINT_PREFIX: &str = "netsvpt";

/// An open database ready for network and routing work.
///
/// Every public operation of the higher layers takes `&mut Session` and runs
/// inside [`Session::atomic`], so a failing call leaves the database exactly
/// as it found it.
#[derive(Debug)]
pub struct Session {
    conn: Connection,
    savepoints: SavepointStack,
    config: Config,
}

impl Session {
    /// Opens (or creates) a database file with configuration from the
    /// environment.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, Config::from_env())
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Config::from_env())
    }

    /// Wraps an existing connection: applies the configuration, registers
    /// the SQL functions and creates the spatial metadata table.
    pub fn from_connection(conn: Connection, config: Config) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        conn.execute_batch(if config.foreign_keys {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        })?;
        functions::register(&conn)?;
        metadata::init_spatial_metadata(&conn)?;
        tracing::debug!(
            foreign_keys = config.foreign_keys,
            statement_cache = config.statement_cache_capacity,
            "session opened"
        );
        Ok(Self {
            conn,
            savepoints: SavepointStack::new(SAVEPOINT_PREFIX),
            config,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of savepoints currently open.
    pub fn savepoint_depth(&self) -> usize {
        self.savepoints.depth()
    }

    pub fn begin_savepoint(&mut self) -> Result<()> {
        self.savepoints.begin(&self.conn)
    }

    pub fn begin_named_savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints.begin_named(&self.conn, name)
    }

    pub fn release_savepoint(&mut self) -> Result<()> {
        self.savepoints.release(&self.conn)
    }

    pub fn rollback_savepoint(&mut self) -> Result<()> {
        self.savepoints.rollback(&self.conn)
    }

    /// Runs `f` inside a fresh savepoint: released when `f` succeeds, rolled
    /// back when it fails. The error of `f` wins over a rollback error.
    pub fn atomic<T, E>(&mut self, f: impl FnOnce(&mut Self) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        self.begin_savepoint()?;
        self.finish(f)
    }

    /// Like [`Session::atomic`] with a caller-chosen savepoint name.
    pub fn atomic_named<T, E>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        self.begin_named_savepoint(name)?;
        self.finish(f)
    }

    fn finish<T, E>(&mut self, f: impl FnOnce(&mut Self) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        match f(self) {
            Ok(value) => match self.release_savepoint() {
                Ok(()) => Ok(value),
                Err(err) => {
                    if let Err(rollback) = self.rollback_savepoint() {
                        tracing::warn!(error = %rollback, "rollback after failed release did not complete");
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                if let Err(rollback) = self.rollback_savepoint() {
                    tracing::warn!(error = %rollback, "rollback after failure did not complete");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Storage,
        Injected,
    }

    impl From<Error> for TestError {
        fn from(_: Error) -> Self {
            TestError::Storage
        }
    }

    fn rows(session: &Session) -> i64 {
        session
            .conn()
            .query_row("SELECT Count(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn atomic_commits_and_rolls_back() {
        let mut session = Session::open_in_memory().unwrap();
        session.conn().execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        session
            .atomic(|s| -> std::result::Result<(), TestError> {
                s.conn().execute("INSERT INTO t VALUES (1)", [])
                    .map_err(|_| TestError::Storage)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(rows(&session), 1);

        let failed = session.atomic(|s| -> std::result::Result<(), TestError> {
            s.conn().execute("INSERT INTO t VALUES (2)", [])
                .map_err(|_| TestError::Storage)?;
            Err(TestError::Injected)
        });
        assert!(matches!(failed, Err(TestError::Injected)));
        assert_eq!(rows(&session), 1);
        assert_eq!(session.savepoint_depth(), 0);
    }

    #[test]
    fn refused_release_rolls_back() {
        let mut session = Session::open_in_memory().unwrap();
        session
            .conn()
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE p (id INTEGER PRIMARY KEY);
                 CREATE TABLE t (v INTEGER REFERENCES p (id) DEFERRABLE INITIALLY DEFERRED);",
            )
            .unwrap();

        let failed = session.atomic(|s| -> std::result::Result<(), TestError> {
            s.conn().execute("INSERT INTO t VALUES (9)", [])
                .map_err(|_| TestError::Storage)?;
            Ok(())
        });
        assert!(matches!(failed, Err(TestError::Storage)));
        assert_eq!(session.savepoint_depth(), 0);
        assert!(session.conn().is_autocommit());
        assert_eq!(rows(&session), 0);
    }

    #[test]
    fn metadata_is_ready() {
        let session = Session::open_in_memory().unwrap();
        let n: i64 = session
            .conn()
            .query_row(
                "SELECT Count(*) FROM sqlite_master WHERE name = 'geometry_columns'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }
}
