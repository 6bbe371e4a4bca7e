// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TopoNet Core
//!
//! Storage plumbing shared by the network engine and the routing builder.
//!
//! ## Overview
//!
//! - [`Session`]: a SQLite connection configured for spatial work (scalar
//!   functions registered, `geometry_columns` metadata present) together with
//!   the savepoint stack every public operation runs inside.
//! - [`sql`]: identifier quoting and derived-name helpers. Every table or
//!   column name that reaches SQL text goes through these.
//! - [`metadata`]: geometry column registration, geometry constraint triggers
//!   and R*Tree spatial indices with their maintenance triggers.
//! - [`Config`]: environment driven connection settings.

pub mod config;
pub mod error;
pub mod functions;
pub mod metadata;
pub mod savepoint;
pub mod session;
pub mod sql;

pub use config::Config;
pub use error::{Error, Result};
pub use metadata::GeometryColumn;
pub use savepoint::SavepointStack;
pub use session::Session;
