// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TopoNet Geometry
//!
//! Geometry values and the 2D computational geometry used by topological
//! networks: a collection-shaped [`Geometry`] (points, linestrings, polygons
//! held as ordered vectors), the binary BLOB codec stored in geometry columns,
//! planar and geodesic length, and the predicates and line operations that
//! network editing, validation and export rely on.

pub mod blob;
pub mod error;
pub mod measure;
pub mod ops;
pub mod predicates;
pub mod types;

pub use blob::{decode, encode, read_bounds};
pub use error::{Error, Result};
pub use types::{Bounds, Coord, Geometry, GeometryClass, Polygon};
