// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for network operations.
//!
//! Messages are part of the public contract: they are what
//! [`crate::Network::last_error`] reports back, so their text is stable.

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating, editing or querying a network.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ========================================================================
    // Usage errors
    // ========================================================================
    /// No correctly registered network has this name.
    #[error("SQL/MM Spatial exception - invalid network name.")]
    InvalidNetworkName,

    /// Clone source is not a network.
    #[error("SQL/MM Spatial exception - invalid network name (origin).")]
    InvalidOriginNetwork,

    /// Clone destination cannot be created.
    #[error("SQL/MM Spatial exception - invalid network name (destination).")]
    InvalidDestinationNetwork,

    /// No topology tables for this name.
    #[error("SQL/MM Spatial exception - invalid topology name.")]
    InvalidTopologyName,

    /// A network, table, index or geometry column already uses a derived name.
    #[error("network name '{0}' collides with an existing network, table or index")]
    NameCollision(String),

    /// A required argument is missing.
    #[error("SQL/MM Spatial exception - null argument.")]
    NullArgument,

    /// An argument has the wrong shape.
    #[error("SQL/MM Spatial exception - invalid argument.")]
    InvalidArgument,

    /// The operation only makes sense on a spatial network.
    #[error("{0}() cannot be applied to Logical Network.")]
    LogicalNetwork(&'static str),

    /// The operation only makes sense on a logical network.
    #[error("{0}() cannot be applied to Spatial Network.")]
    SpatialNetwork(&'static str),

    /// A logical split was requested on a spatial network.
    #[error("SQL/MM Spatial exception - {0} can't support Spatial Network; try using {1}.")]
    SplitNeedsGeometry(&'static str, &'static str),

    /// A geometric split was requested on a logical network.
    #[error("SQL/MM Spatial exception - {0} can't support Logical Network; try using {1}.")]
    SplitNeedsLogical(&'static str, &'static str),

    // ========================================================================
    // Geometry contract errors
    // ========================================================================
    /// Geometry SRID or dimension model differs from the network's.
    #[error("SQL/MM Spatial exception - invalid geometry (mismatching SRID or dimensions).")]
    MismatchingGeometry,

    /// Topology SRID or dimension model differs from the network's.
    #[error("SQL/MM Spatial exception - mismatching SRID or dimensions.")]
    MismatchingTopology,

    /// Spatial networks need a geometry for every node and link.
    #[error("SQL/MM Spatial exception - Spatial Network can't accept null geometry.")]
    NullGeometry,

    /// Logical networks never store geometries.
    #[error("SQL/MM Spatial exception - Logical Network can't accept not null geometry.")]
    NotNullGeometry,

    /// The operation requires an empty network.
    #[error("SQL/MM Spatial exception - non-empty network.")]
    NonEmptyNetwork,

    /// The operation requires at least one node or link.
    #[error("SQL/MM Spatial exception - empty network.")]
    EmptyNetwork,

    // ========================================================================
    // Topological errors raised by the edit primitives
    // ========================================================================
    /// Another node already occupies the position.
    #[error("SQL/MM Spatial exception - coincident node.")]
    CoincidentNode,

    /// The split point is already occupied by a node.
    #[error("SQL/MM Spatial exception - coincident node")]
    SplitCoincidentNode,

    /// A link passes through the position.
    #[error("SQL/MM Spatial exception - link crosses node.")]
    LinkCrossesNode,

    #[error("SQL/MM Spatial exception - non-existent node.")]
    NonExistentNode,

    /// The node has links attached.
    #[error("SQL/MM Spatial exception - not isolated node.")]
    NotIsolatedNode,

    #[error("SQL/MM Spatial exception - self-closed links are forbidden.")]
    SelfClosedLink,

    #[error("SQL/MM Spatial exception - start node not geometry start point.")]
    StartNodeMismatch,

    #[error("SQL/MM Spatial exception - end node not geometry end point.")]
    EndNodeMismatch,

    /// The link geometry passes through a node other than its endpoints.
    #[error("SQL/MM Spatial exception - geometry crosses a node.")]
    GeometryCrossesNode,

    #[error("SQL/MM Spatial exception - non-existent link.")]
    NonExistentLink,

    #[error("SQL/MM Spatial exception - point not on link.")]
    PointNotOnLink,

    #[error("SQL/MM Spatial exception - Cannot heal link with itself.")]
    HealWithItself,

    #[error("SQL/MM Spatial exception - non-existent first link.")]
    NonExistentFirstLink,

    #[error("SQL/MM Spatial exception - non-existent second link.")]
    NonExistentSecondLink,

    /// The shared node has more than the two links being healed.
    #[error("SQL/MM Spatial exception - other links connected.")]
    OtherLinksConnected,

    #[error("SQL/MM Spatial exception - non-connected links.")]
    NonConnectedLinks,

    #[error("SQL/MM Spatial exception - illegal negative tolerance.")]
    NegativeTolerance,

    /// A point lookup matched more than one node.
    #[error("Two or more net-nodes found")]
    TwoOrMoreNodes,

    /// A point lookup matched more than one link.
    #[error("Two or more links found")]
    TwoOrMoreLinks,

    // ========================================================================
    // Import / export
    // ========================================================================
    /// The input table has no registered geometry column of that name.
    #[error("SQL/MM Spatial exception - invalid input GeoTable.")]
    InvalidInputGeoTable,

    #[error("SQL/MM Spatial exception - invalid GeoTable (mismatching SRID, dimensions or class).")]
    MismatchingInputGeoTable,

    /// The reference table has no registered geometry column of that name.
    #[error("{0}: invalid reference GeoTable.")]
    InvalidReferenceGeoTable(&'static str),

    #[error("SQL/MM Spatial exception - invalid reference GeoTable (mismatching SRID or class).")]
    MismatchingReferenceGeoTable,

    #[error("SQL/MM Spatial exception - invalid reference GeoTable (mismatching SRID).")]
    MismatchingReferenceSrid,

    #[error("SQL/MM Spatial exception - invalid reference GeoTable (not of the [MULTI]LINESTRING type).")]
    NotLinearReference,

    #[error("{0}: output GeoTable already exists.")]
    OutputExists(&'static str),

    /// A geometry column holds something other than a BLOB.
    #[error("{0} error: not a BLOB value")]
    NotABlob(&'static str),

    /// A geometry BLOB did not decode.
    #[error("{0} error: Invalid Geometry")]
    InvalidGeometry(&'static str),

    /// A storage failure inside a named bulk operation.
    #[error("{op} error: \"{message}\"")]
    Operation { op: &'static str, message: String },

    #[error("Clone Network failure")]
    CloneFailure,

    // ========================================================================
    // Storage
    // ========================================================================
    #[error(transparent)]
    Storage(#[from] toponet_core::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(toponet_core::Error::Sqlite(err))
    }
}

impl Error {
    /// Re-labels a storage failure with the bulk operation it happened in.
    /// Domain errors pass through unchanged.
    pub(crate) fn within(op: &'static str) -> impl FnOnce(Error) -> Error {
        move |err| match err {
            Error::Storage(inner) => Error::Operation {
                op,
                message: inner.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable() {
        assert_eq!(
            Error::CoincidentNode.to_string(),
            "SQL/MM Spatial exception - coincident node."
        );
        assert_eq!(
            Error::SplitCoincidentNode.to_string(),
            "SQL/MM Spatial exception - coincident node"
        );
        assert_eq!(
            Error::LogicalNetwork("ST_GetNetNodeByPoint").to_string(),
            "ST_GetNetNodeByPoint() cannot be applied to Logical Network."
        );
        assert_eq!(
            Error::SplitNeedsGeometry("ST_NewLogLinkSplit", "ST_NewGeoLinkSplit").to_string(),
            "SQL/MM Spatial exception - ST_NewLogLinkSplit can't support Spatial Network; try using ST_NewGeoLinkSplit."
        );
    }

    #[test]
    fn storage_errors_get_operation_context() {
        let err = Error::from(rusqlite::Error::InvalidQuery);
        let wrapped = Error::within("TopoNet_UpdateSeeds()")(err);
        assert!(wrapped.to_string().starts_with("TopoNet_UpdateSeeds() error: \""));
        let kept = Error::within("TopoNet_UpdateSeeds()")(Error::NonExistentLink);
        assert!(matches!(kept, Error::NonExistentLink));
    }
}
