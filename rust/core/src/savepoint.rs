// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nested savepoints.
//!
//! Savepoints are pushed and popped in strict LIFO order. Generated names use
//! a wrapping hex counter so that concurrent nesting levels never share a
//! name; callers that need a well-known name (for instance to let a later
//! call recognise it) push a named one instead.

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::sql::quote_identifier;

/// A LIFO stack of open savepoints.
#[derive(Debug)]
pub struct SavepointStack {
    prefix: &'static str,
    counter: u16,
    names: Vec<String>,
}

impl SavepointStack {
    /// Creates an empty stack whose generated names start with `prefix`.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            counter: 0,
            names: Vec::new(),
        }
    }

    /// Number of open savepoints.
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    fn next_name(&mut self) -> String {
        let name = format!("{}{:04x}", self.prefix, self.counter);
        self.counter = self.counter.wrapping_add(1);
        name
    }

    /// Opens a savepoint with a generated name.
    pub fn begin(&mut self, conn: &Connection) -> Result<()> {
        let name = self.next_name();
        self.begin_named(conn, &name)
    }

    /// Opens a savepoint with an explicit name.
    pub fn begin_named(&mut self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute_batch(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        tracing::trace!(savepoint = name, depth = self.names.len() + 1, "savepoint opened");
        self.names.push(name.to_string());
        Ok(())
    }

    /// Releases the innermost savepoint, keeping its changes.
    ///
    /// The savepoint stays on the stack when SQLite refuses the release.
    pub fn release(&mut self, conn: &Connection) -> Result<()> {
        let name = self.names.last().ok_or(Error::NoSavepoint)?;
        conn.execute_batch(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        tracing::trace!(savepoint = %name, "savepoint released");
        self.names.pop();
        Ok(())
    }

    /// Rolls the innermost savepoint back and then releases it.
    pub fn rollback(&mut self, conn: &Connection) -> Result<()> {
        let name = self.names.last().ok_or(Error::NoSavepoint)?;
        let quoted = quote_identifier(name);
        conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {quoted}; RELEASE SAVEPOINT {quoted}"
        ))?;
        tracing::debug!(savepoint = %name, "savepoint rolled back");
        self.names.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT Count(*) FROM t", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn names_wrap() {
        let mut stack = SavepointStack::new("sp");
        stack.counter = u16::MAX;
        assert_eq!(stack.next_name(), "spffff");
        assert_eq!(stack.next_name(), "sp0000");
    }

    #[test]
    fn nested_rollback_keeps_outer_work() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        let mut stack = SavepointStack::new("sp");

        stack.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        stack.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (2)", []).unwrap();
        assert_eq!(count(&conn), 2);
        stack.rollback(&conn).unwrap();
        assert_eq!(count(&conn), 1);
        stack.release(&conn).unwrap();
        assert_eq!(stack.depth(), 0);
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn refused_release_keeps_the_savepoint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE p (id INTEGER PRIMARY KEY);
             CREATE TABLE t (v INTEGER REFERENCES p (id) DEFERRABLE INITIALLY DEFERRED);",
        )
        .unwrap();
        let mut stack = SavepointStack::new("sp");

        stack.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (7)", []).unwrap();
        assert!(stack.release(&conn).is_err());
        assert_eq!(stack.depth(), 1);
        stack.rollback(&conn).unwrap();
        assert_eq!(stack.depth(), 0);
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn empty_stack_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stack = SavepointStack::new("sp");
        assert!(matches!(stack.release(&conn), Err(Error::NoSavepoint)));
        assert!(matches!(stack.rollback(&conn), Err(Error::NoSavepoint)));
    }
}
