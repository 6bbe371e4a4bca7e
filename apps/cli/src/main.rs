// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TopoNet command line front end.
//!
//! Every subcommand opens the database given by `--database` (or
//! `TOPONET_DB`; in-memory when neither is set), runs one library operation
//! and prints its result as JSON on stdout.
//!
//! # Environment
//!
//! - `RUST_LOG`: log filter, default `info,toponet=debug`
//! - `TOPONET_LOG_JSON=1`: JSON log lines instead of the pretty format
//! - `TOPONET_FOREIGN_KEYS`, `TOPONET_BUSY_TIMEOUT_MS`,
//!   `TOPONET_STATEMENT_CACHE`: connection settings

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use toponet_core::Session;
use toponet_network::{ExportRequest, NetworkOptions, Registry};
use toponet_routing::{NodeKey, NodesRequest, RoutingBuilder, RoutingGraph, RoutingRequest};

#[derive(Parser, Debug)]
#[command(name = "toponet", author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, short = 'd', env = "TOPONET_DB", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, edit, validate, import and export networks
    Network {
        #[command(subcommand)]
        action: NetworkCommand,
    },
    /// Build and query routing graphs
    Routing {
        #[command(subcommand)]
        action: RoutingCommand,
    },
}

#[derive(Subcommand, Debug)]
enum NetworkCommand {
    /// Create an empty network
    Create {
        name: String,
        /// Logical network: no geometries
        #[arg(long)]
        logical: bool,
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        srid: i32,
        /// Store XYZ coordinates
        #[arg(long)]
        z: bool,
        /// Allow nodes at the same position
        #[arg(long)]
        allow_coincident: bool,
    },
    /// Drop a network with all its tables
    Drop { name: String },
    /// Copy a network under a new name
    Clone { from: String, to: String },
    /// Print a network's parameters
    Info { name: String },
    /// Validate a network and print the issues found
    Validate { name: String },
    /// Bring link seeds up to date
    Seeds {
        name: String,
        /// Recompute every seed instead of only stale ones
        #[arg(long)]
        full: bool,
    },
    /// Insert a middle vertex into every two-point link
    Disambiguate { name: String },
    /// Load the lines of a GeoTable into a network
    Import {
        name: String,
        #[command(flatten)]
        source: GeoTable,
    },
    /// Copy the nodes and edges of a topology into a network
    FromTopology { name: String, topology: String },
    /// Rebuild the features of a reference GeoTable from network primitives
    Export {
        name: String,
        #[command(flatten)]
        reference: GeoTable,
        #[arg(long)]
        out_table: String,
        /// Simplification tolerance
        #[arg(long)]
        tolerance: Option<f64>,
        #[arg(long)]
        spatial_index: bool,
    },
    /// List which reference lines each link belongs to
    LineLinks {
        name: String,
        #[command(flatten)]
        reference: GeoTable,
        #[arg(long)]
        out_table: String,
    },
}

#[derive(Args, Debug)]
struct GeoTable {
    /// Attached database holding the table
    #[arg(long)]
    db_prefix: Option<String>,
    #[arg(long)]
    table: String,
    #[arg(long)]
    column: String,
}

#[derive(Subcommand, Debug)]
enum RoutingCommand {
    /// Build a routing graph from an edge-list table
    Build(BuildArgs),
    /// Add node columns to a LINESTRING table
    Nodes {
        #[arg(long)]
        db_prefix: Option<String>,
        #[arg(long)]
        table: String,
        #[arg(long)]
        geometry: Option<String>,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Print a stored routing graph
    Dump { table: String },
    /// Shortest path between two nodes, named by their external id or code
    Path { table: String, from: String, to: String },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Table receiving the graph data
    #[arg(long)]
    data_table: String,
    /// View over the graph data
    #[arg(long)]
    virtual_table: String,
    #[arg(long)]
    input: String,
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    geometry: Option<String>,
    #[arg(long)]
    cost: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    a_star: bool,
    #[arg(long)]
    unidirectional: bool,
    #[arg(long)]
    oneway_from_to: Option<String>,
    #[arg(long)]
    oneway_to_from: Option<String>,
    #[arg(long)]
    overwrite: bool,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,toponet=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("TOPONET_LOG_JSON").is_ok_and(|v| v == "1") {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

fn print(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut session = match &cli.database {
        Some(path) => Session::open(path).with_context(|| format!("opening {}", path.display()))?,
        None => Session::open_in_memory()?,
    };
    tracing::debug!(database = ?cli.database, "session opened");

    match cli.command {
        Command::Network { action } => network(&mut session, action),
        Command::Routing { action } => routing(&mut session, action),
    }
}

fn network(session: &mut Session, action: NetworkCommand) -> Result<()> {
    let mut registry = Registry::new();
    match action {
        NetworkCommand::Create {
            name,
            logical,
            srid,
            z,
            allow_coincident,
        } => {
            let options = NetworkOptions {
                spatial: !logical,
                srid,
                has_z: z,
                allow_coincident,
            };
            registry.create_network(session, &name, &options)?;
            let net = registry.open(session, &name)?;
            print(net.info())
        }
        NetworkCommand::Drop { name } => {
            registry.drop_network(session, &name)?;
            print(&json!({ "dropped": name }))
        }
        NetworkCommand::Clone { from, to } => {
            registry.clone_network(session, &from, &to)?;
            print(&json!({ "cloned": from, "into": to }))
        }
        NetworkCommand::Info { name } => print(registry.open(session, &name)?.info()),
        NetworkCommand::Validate { name } => {
            let mut net = registry.open(session, &name)?;
            let issues = if net.info().spatial {
                net.valid_spatial_net()?
            } else {
                net.valid_logical_net()?
            };
            print(&issues)
        }
        NetworkCommand::Seeds { name, full } => {
            registry.open(session, &name)?.update_seeds(!full)?;
            print(&json!({ "network": name, "incremental": !full }))
        }
        NetworkCommand::Disambiguate { name } => {
            let changed = registry.open(session, &name)?.disambiguate_segment_links()?;
            print(&json!({ "network": name, "changed": changed }))
        }
        NetworkCommand::Import { name, source } => {
            registry
                .open(session, &name)?
                .from_geo_table(source.db_prefix.as_deref(), &source.table, &source.column)?;
            print(&json!({ "network": name, "imported": source.table }))
        }
        NetworkCommand::FromTopology { name, topology } => {
            let mut net = registry.open(session, &name)?;
            if net.info().spatial {
                net.spat_net_from_tgeo(&topology)?;
            } else {
                net.logi_net_from_tgeo(&topology)?;
            }
            print(&json!({ "network": name, "topology": topology }))
        }
        NetworkCommand::Export {
            name,
            reference,
            out_table,
            tolerance,
            spatial_index,
        } => {
            let mut request = ExportRequest::new(&reference.table, &reference.column, &out_table)
                .in_database(reference.db_prefix.as_deref())
                .with_spatial_index(spatial_index);
            if let Some(tolerance) = tolerance {
                request = request.generalized(tolerance);
            }
            registry.open(session, &name)?.to_geo_table(&request)?;
            print(&json!({ "network": name, "out_table": out_table }))
        }
        NetworkCommand::LineLinks {
            name,
            reference,
            out_table,
        } => {
            registry.open(session, &name)?.line_links_list(
                reference.db_prefix.as_deref(),
                &reference.table,
                &reference.column,
                &out_table,
            )?;
            print(&json!({ "network": name, "out_table": out_table }))
        }
    }
}

fn routing(session: &mut Session, action: RoutingCommand) -> Result<()> {
    let mut builder = RoutingBuilder::new();
    match action {
        RoutingCommand::Build(args) => {
            let request = RoutingRequest {
                geom_column: args.geometry.as_deref(),
                cost_column: args.cost.as_deref(),
                name_column: args.name.as_deref(),
                a_star: args.a_star,
                bidirectional: !args.unidirectional,
                oneway_from_to: args.oneway_from_to.as_deref(),
                oneway_to_from: args.oneway_to_from.as_deref(),
                overwrite: args.overwrite,
                ..RoutingRequest::new(&args.data_table, &args.virtual_table, &args.input, &args.from, &args.to)
            };
            let summary = builder.create_routing(session, &request)?;
            print(&summary)
        }
        RoutingCommand::Nodes {
            db_prefix,
            table,
            geometry,
            from,
            to,
        } => {
            let request = NodesRequest {
                db_prefix: db_prefix.as_deref(),
                geom_column: geometry.as_deref(),
                ..NodesRequest::new(&table, &from, &to)
            };
            let nodes = builder.create_routing_nodes(session, &request)?;
            print(&json!({ "table": table, "nodes": nodes }))
        }
        RoutingCommand::Dump { table } => print(&RoutingGraph::load(session.conn(), &table)?),
        RoutingCommand::Path { table, from, to } => {
            let graph = RoutingGraph::load(session.conn(), &table)?;
            let key = |text: &str| -> Result<NodeKey> {
                if graph.header.has_ids {
                    Ok(NodeKey::Id(text.parse().with_context(|| format!("node id {text:?}"))?))
                } else {
                    Ok(NodeKey::Code(text.to_string()))
                }
            };
            let (Some(source), Some(target)) = (graph.find(&key(&from)?), graph.find(&key(&to)?)) else {
                bail!("unknown node");
            };
            match graph.shortest_path(source.index as usize, target.index as usize) {
                Some(route) => print(&route),
                None => bail!("no path from {from} to {to}"),
            }
        }
    }
}
