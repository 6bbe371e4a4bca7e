// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TopoNet Routing
//!
//! Compact binary routing graphs built from edge-list tables.
//!
//! ## Overview
//!
//! - [`RoutingBuilder::create_routing`]: validates an edge list, assigns
//!   dense node indices and writes the graph as a header row plus capped
//!   data blocks, with a view over them for queries.
//! - [`RoutingBuilder::create_routing_nodes`]: derives from/to node columns
//!   for a LINESTRING table from its line end points.
//! - [`RoutingGraph`]: decodes a stored graph and runs shortest paths on it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toponet_core::Session;
//! use toponet_routing::{RoutingBuilder, RoutingGraph, RoutingRequest};
//!
//! let mut session = Session::open("roads.sqlite")?;
//! let request = RoutingRequest::new("roads_data", "roads_net", "roads", "node_from", "node_to")
//!     .geometry("geom");
//! RoutingBuilder::new().create_routing(&mut session, &request)?;
//! let graph = RoutingGraph::load(session.conn(), "roads_net")?;
//! ```

pub mod builder;
pub mod error;
pub mod format;
pub mod graph;
pub mod nodes;

pub use builder::{RoutingBuilder, RoutingRequest, RoutingSummary};
pub use error::{Error, Result};
pub use format::{Arc, Header, NodeKey, NodeRecord};
pub use graph::{Route, RoutingGraph};
pub use nodes::NodesRequest;
