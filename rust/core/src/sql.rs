// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifier quoting and small query helpers.
//!
//! Table and column names are the only values ever interpolated into SQL
//! text; they always pass through [`quote_identifier`]. Everything else is
//! bound as a parameter.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use toponet_geometry::Geometry;

use crate::error::{Error, Result};

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quotes a string literal, doubling embedded quotes. Only for places
/// SQLite does not accept parameters (trigger bodies, `RAISE` messages).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A possibly schema-qualified, quoted table reference.
pub fn qualified(db_prefix: Option<&str>, table: &str) -> String {
    match db_prefix {
        Some(prefix) => format!("{}.{}", quote_identifier(prefix), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// `{base}_{suffix}`: names of tables derived from a network or table name.
pub fn derived_name(base: &str, suffix: &str) -> String {
    format!("{base}_{suffix}")
}

/// Schema prefix to use in catalog queries, defaulting to `main`.
pub fn schema(db_prefix: Option<&str>) -> &str {
    db_prefix.unwrap_or("main")
}

/// Case-insensitive lookup of a table or view; returns its stored name.
pub fn find_table(conn: &Connection, db_prefix: Option<&str>, name: &str) -> Result<Option<String>> {
    let sql = format!(
        "SELECT name FROM {}.sqlite_master WHERE type IN ('table', 'view') AND Lower(name) = Lower(?1)",
        quote_identifier(schema(db_prefix))
    );
    Ok(conn
        .query_row(&sql, params![name], |row| row.get(0))
        .optional()?)
}

/// True when any schema object (table, view, index, trigger) is named `name`,
/// compared case-insensitively.
pub fn object_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT Count(*) FROM sqlite_master WHERE Lower(name) = Lower(?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Columns of a table in declaration order.
pub fn table_columns(conn: &Connection, db_prefix: Option<&str>, table: &str) -> Result<Vec<ColumnInfo>> {
    let sql = format!(
        "PRAGMA {}.table_info({})",
        quote_identifier(schema(db_prefix)),
        quote_identifier(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(3)? != 0,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Decodes a nullable geometry column value.
pub fn read_geometry(value: ValueRef<'_>) -> Result<Option<Geometry>> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(bytes) => Ok(Some(toponet_geometry::decode(bytes)?)),
        _ => Err(Error::NotABlob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote_identifier("roads_node"), "\"roads_node\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(qualified(Some("main"), "t"), "\"main\".\"t\"");
        assert_eq!(qualified(None, "t"), "\"t\"");
        assert_eq!(derived_name("roads", "link"), "roads_link");
    }

    #[test]
    fn catalog_lookups_ignore_case() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Roads (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();
        assert_eq!(find_table(&conn, None, "roads").unwrap().as_deref(), Some("Roads"));
        assert!(object_exists(&conn, "ROADS").unwrap());
        assert!(!object_exists(&conn, "rivers").unwrap());

        let cols = table_columns(&conn, None, "roads").unwrap();
        assert_eq!(cols.len(), 2);
        assert!(cols[0].primary_key);
        assert_eq!(cols[1].decl_type, "TEXT");
        assert!(cols[1].not_null);
    }

    #[test]
    fn geometry_values() {
        assert!(read_geometry(ValueRef::Null).unwrap().is_none());
        assert!(matches!(read_geometry(ValueRef::Integer(1)), Err(Error::NotABlob)));
        assert!(read_geometry(ValueRef::Blob(b"junk")).is_err());
    }
}
