// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for storage operations.

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The database rejected a statement.
    #[error("SQL error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored geometry could not be decoded.
    #[error("invalid geometry: {0}")]
    Geometry(#[from] toponet_geometry::Error),

    /// A value that should hold a geometry BLOB holds something else.
    #[error("not a BLOB value")]
    NotABlob,

    /// Release or rollback was requested with no savepoint open.
    #[error("savepoint stack is empty")]
    NoSavepoint,

    /// The geometry column is already registered.
    #[error("geometry column {table}.{column} already exists")]
    ColumnExists { table: String, column: String },

    /// The geometry column is not registered.
    #[error("geometry column {table}.{column} is not registered")]
    ColumnNotFound { table: String, column: String },
}
