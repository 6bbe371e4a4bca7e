// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TopoNet Network
//!
//! Topological networks of nodes and links persisted in SQLite.
//!
//! ## Overview
//!
//! - [`Registry`] / [`Network`]: creating, opening, cloning and dropping
//!   networks, and the atomic public operations on one of them.
//! - [`EditCore`]: the edit primitives (isolated nodes, links, splits, heals,
//!   point lookups) written against the [`NetworkBackend`] storage trait.
//! - [`validate`]: logical and spatial consistency reports.
//! - [`import`] / [`export`]: moving geometries between GeoTables and the
//!   network, with link seeds correlating features to links.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toponet_core::Session;
//! use toponet_geometry::{Coord, Geometry};
//! use toponet_network::{NetworkOptions, Registry};
//!
//! let mut session = Session::open_in_memory()?;
//! let mut registry = Registry::new();
//! registry.create_network(&mut session, "roads", &NetworkOptions::default())?;
//! let mut net = registry.open(&mut session, "roads")?;
//! let a = net.add_iso_net_node(Some(&Geometry::point(-1, false, Coord::xy(0.0, 0.0))))?;
//! ```

pub mod accessor;
pub mod backend;
pub mod catalog;
pub mod edit;
pub mod error;
pub mod export;
pub mod import;
pub mod seeds;
pub mod statements;
pub mod validate;

pub use accessor::{Network, NetworkAccessor, NetworkOptions, Registry};
pub use backend::{NetLink, NetNode, NetworkBackend, SqliteBackend};
pub use catalog::NetworkInfo;
pub use edit::EditCore;
pub use error::{Error, Result};
pub use export::ExportRequest;
pub use validate::{FaceSource, ValidationIssue};
