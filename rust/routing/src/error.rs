// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for routing graph construction.
//!
//! The display texts are what [`crate::RoutingBuilder::last_error`] reports.

/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or reading a routing graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ========================================================================
    // Argument errors
    // ========================================================================
    /// A required table or column name was not given.
    #[error("{0} is NULL")]
    NullName(&'static str),

    /// Neither a geometry nor a cost column is available to derive costs.
    #[error("Both Geometry Column and Cost Column Names are NULL at the same time")]
    NoCostSource,

    /// Only the to/from oneway column was given.
    #[error("OnewayFromTo is NULL but OnewayToFrom is NOT NULL")]
    MissingOnewayFromTo,

    /// Only the from/to oneway column was given.
    #[error("OnewayFromTo is NOT NULL but OnewayToFrom is NULL")]
    MissingOnewayToFrom,

    /// Oneway columns make no sense on a unidirectional graph.
    #[error("Both OnewayFromTo and OnewayToFrom are NOT NULL but Unidirectional has been specified")]
    OnewayOnUnidirectional,

    /// A* needs node coordinates.
    #[error("Geometry Columns is NULL but A* is enabled")]
    AStarWithoutGeometry,

    // ========================================================================
    // Schema errors
    // ========================================================================
    /// The routing data table is already there.
    #[error("Routing Data Table \"{0}\" already exists")]
    DataTableExists(String),

    /// The query view is already there.
    #[error("VirtualRouting Table \"{0}\" already exists")]
    VirtualTableExists(String),

    /// A named column is missing from the input table.
    #[error("{role} Column \"{column}\" is not defined in the Input Table")]
    ColumnNotDefined { role: &'static str, column: String },

    /// The geometry column is not registered.
    #[error("Unable to find geometry '{table}'.'{column}'")]
    GeometryNotFound { table: String, column: String },

    /// The table has no single registered LINESTRING column.
    #[error("'{0}' is not a valid Spatial Table (LINESTRING)")]
    NotSpatialTable(String),

    /// The given column is not a registered LINESTRING column.
    #[error("'{table}'.'{column}' is not a valid Spatial Table (LINESTRING)")]
    NotSpatialColumn { table: String, column: String },

    /// A column to be added already exists.
    #[error("{role} Column \"{column}\" is already defined in the Spatial Table")]
    ColumnAlreadyDefined { role: &'static str, column: String },

    /// The geometry column named for node derivation is missing.
    #[error("Geometry Column \"{0}\" is not defined in the Spatial Table")]
    GeometryColumnMissing(String),

    // ========================================================================
    // Row errors
    // ========================================================================
    /// A node reference is neither an integer id nor a text code.
    #[error("{role} column \"{column}\": found a value that's neither TEXT nor INTEGER")]
    NodeValueType { role: &'static str, column: String },

    /// A node reference uses the other identity kind than the first row.
    #[error("{role} column \"{column}\": found a mismatching value")]
    NodeValueMismatch { role: &'static str, column: String },

    /// A text node code does not fit the one-byte width field.
    #[error("{role} column \"{column}\": found a code longer than 255 bytes")]
    NodeCodeTooLong { role: &'static str, column: String },

    /// A BLOB in the geometry column does not decode.
    #[error("Geometry column \"{0}\": found a BLOB value that's not a Geometry")]
    NotAGeometry(String),

    /// A geometry is anything but one linestring.
    #[error("Geometry column \"{0}\": found a Geometry that's not a simple Linestring")]
    NotSimpleLinestring(String),

    /// A geometry SRID differs from the registered one.
    #[error("Geometry column \"{0}\": found a mismatching SRID")]
    MismatchingSrid(String),

    /// A geometry dimension model differs from the registered one.
    #[error("Geometry column \"{0}\": found mismatching Dimensions")]
    MismatchingDimensions(String),

    /// The geometry column holds a non-BLOB value.
    #[error("Geometry column \"{0}\": found a value that's not a BLOB")]
    GeometryNotBlob(String),

    /// The length could not be measured.
    #[error("Geometry column \"{0}\": ST_Length() returned an invalid value")]
    InvalidLength(String),

    /// Costs must be strictly positive.
    #[error("Cost column \"{0}\": found a negative or zero value")]
    NonPositiveCost(String),

    /// Costs must be numeric.
    #[error("Cost column \"{0}\": found a value that's not a DOUBLE")]
    CostNotDouble(String),

    /// Names must be text.
    #[error("Name column \"{0}\": found a value that's not a TEXT string")]
    NameNotText(String),

    /// Oneway flags must be integers.
    #[error("{role} column \"{column}\": found a value that's not an INTEGER")]
    OnewayNotInteger { role: &'static str, column: String },

    /// Two rows place the same node id at different coordinates.
    #[error("Node Id={0}: topology error")]
    NodeIdTopology(i64),

    /// Two rows place the same node code at different coordinates.
    #[error("Node Code={0}: topology error")]
    NodeCodeTopology(String),

    /// A node has more outgoing arcs than a record can count.
    #[error("Node {0}: too many outgoing arcs")]
    TooManyArcs(i64),

    // ========================================================================
    // Artifact errors
    // ========================================================================
    /// A stored routing graph is malformed.
    #[error("invalid routing data: {0}")]
    InvalidData(&'static str),

    // ========================================================================
    // Lower layers
    // ========================================================================
    /// Storage layer failure.
    #[error(transparent)]
    Storage(#[from] toponet_core::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(toponet_core::Error::Sqlite(err))
    }
}
