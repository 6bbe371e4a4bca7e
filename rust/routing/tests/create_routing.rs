// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building routing graphs from edge tables and reading them back.

use approx::assert_relative_eq;
use rusqlite::params;
use toponet_core::metadata::add_geometry_column;
use toponet_core::Session;
use toponet_geometry::{encode, Coord, Geometry, GeometryClass};
use toponet_routing::{Error, NodeKey, NodesRequest, RoutingBuilder, RoutingGraph, RoutingRequest};

const SRID: i32 = 32632;

fn line(coords: &[(f64, f64)]) -> Vec<u8> {
    encode(&Geometry::linestring(
        SRID,
        false,
        coords.iter().map(|&(x, y)| Coord::xy(x, y)).collect(),
    ))
}

fn exists(session: &Session, name: &str) -> bool {
    session
        .conn()
        .query_row(
            "SELECT Count(*) FROM sqlite_master WHERE name = ?1",
            [name],
            |r| r.get::<_, i64>(0),
        )
        .unwrap()
        > 0
}

fn staging_left(session: &Session) -> i64 {
    session
        .conn()
        .query_row(
            "SELECT Count(*) FROM sqlite_temp_master WHERE name LIKE 'create_routing%'",
            [],
            |r| r.get(0),
        )
        .unwrap()
}

/// `edges(node_from, node_to, cost)` without geometry.
fn cost_edges(session: &Session, rows: &[(i64, i64, f64)]) {
    let conn = session.conn();
    conn.execute_batch("CREATE TABLE edges (node_from INTEGER, node_to INTEGER, cost DOUBLE)")
        .unwrap();
    for &(a, b, cost) in rows {
        conn.execute("INSERT INTO edges VALUES (?1, ?2, ?3)", params![a, b, cost])
            .unwrap();
    }
}

/// `roads(id, node_from, node_to, cost, geom)` with a registered LINESTRING column.
fn geo_edges(session: &Session, rows: &[(i64, i64, f64, &[(f64, f64)])]) {
    let conn = session.conn();
    conn.execute_batch(
        "CREATE TABLE roads (id INTEGER PRIMARY KEY, node_from INTEGER, node_to INTEGER, cost DOUBLE)",
    )
    .unwrap();
    add_geometry_column(conn, "roads", "geom", GeometryClass::Linestring, SRID, false).unwrap();
    for &(a, b, cost, coords) in rows {
        conn.execute(
            "INSERT INTO roads (node_from, node_to, cost, geom) VALUES (?1, ?2, ?3, ?4)",
            params![a, b, cost, line(coords)],
        )
        .unwrap();
    }
}

#[test]
fn arcs_are_sorted_by_cost() {
    let mut session = Session::open_in_memory().unwrap();
    cost_edges(&session, &[(1, 2, 5.0), (2, 3, 3.0)]);
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to").cost("cost");
    let summary = RoutingBuilder::new().create_routing(&mut session, &request).unwrap();
    assert_eq!((summary.nodes, summary.arcs, summary.blocks), (3, 4, 1));
    assert!(summary.has_ids);

    let graph = RoutingGraph::load(session.conn(), "graph").unwrap();
    assert_eq!(graph.header.node_count, 3);
    assert_eq!(
        graph.nodes.iter().map(|n| n.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let two = graph.find(&NodeKey::Id(2)).unwrap();
    let arcs: Vec<(i64, u32, f64)> = two.arcs.iter().map(|a| (a.rowid, a.to, a.cost)).collect();
    assert_eq!(arcs, vec![(2, 2, 3.0), (1, 0, 5.0)]);

    let route = graph.shortest_path(0, 2).unwrap();
    assert_relative_eq!(route.cost, 8.0);
    assert_eq!(route.links, vec![1, 2]);
    assert_eq!(staging_left(&session), 0);
}

#[test]
fn conflicting_node_positions_abort_everything() {
    let mut session = Session::open_in_memory().unwrap();
    geo_edges(
        &session,
        &[
            (7, 8, 1.0, &[(0.0, 0.0), (10.0, 0.0)]),
            (7, 9, 1.0, &[(1.0, 0.0), (1.0, 10.0)]),
        ],
    );
    let mut builder = RoutingBuilder::new();
    let request = RoutingRequest::new("graph_data", "graph", "roads", "node_from", "node_to").geometry("geom");
    let err = builder.create_routing(&mut session, &request).unwrap_err();

    assert!(matches!(err, Error::NodeIdTopology(7)));
    assert_eq!(builder.last_error(), Some("Node Id=7: topology error"));
    assert!(!exists(&session, "graph_data"));
    assert!(!exists(&session, "graph"));
    assert_eq!(staging_left(&session), 0);
    assert_eq!(session.savepoint_depth(), 0);
}

#[test]
fn a_star_keeps_coordinates_and_ratio() {
    let mut session = Session::open_in_memory().unwrap();
    geo_edges(
        &session,
        &[
            (1, 2, 5.0, &[(0.0, 0.0), (10.0, 0.0)]),
            (2, 3, 9.0, &[(10.0, 0.0), (10.0, 6.0)]),
        ],
    );
    let request = RoutingRequest::new("graph_data", "graph", "roads", "node_from", "node_to")
        .geometry("geom")
        .cost("cost")
        .a_star(true);
    let summary = RoutingBuilder::new().create_routing(&mut session, &request).unwrap();
    assert_eq!(summary.a_star_coeff, Some(0.5));

    let graph = RoutingGraph::load(session.conn(), "graph_data").unwrap();
    assert_eq!(graph.header.a_star_coeff, Some(0.5));
    assert_eq!(graph.header.geom_column.as_deref(), Some("geom"));
    assert_eq!(graph.find(&NodeKey::Id(3)).unwrap().coords, Some((10.0, 6.0)));
}

#[test]
fn lengths_stand_in_for_missing_costs() {
    let mut session = Session::open_in_memory().unwrap();
    geo_edges(&session, &[(1, 2, 0.0, &[(0.0, 0.0), (3.0, 4.0)])]);
    let request = RoutingRequest::new("graph_data", "graph", "roads", "node_from", "node_to")
        .geometry("geom")
        .bidirectional(false);
    let summary = RoutingBuilder::new().create_routing(&mut session, &request).unwrap();
    assert_eq!(summary.arcs, 1);

    let graph = RoutingGraph::load(session.conn(), "graph").unwrap();
    let arcs = &graph.nodes[0].arcs;
    assert_eq!(arcs.len(), 1);
    assert_relative_eq!(arcs[0].cost, 5.0);
    assert!(graph.nodes[1].arcs.is_empty());
}

#[test]
fn oneway_flags_suppress_directions() {
    let mut session = Session::open_in_memory().unwrap();
    let conn = session.conn();
    conn.execute_batch(
        "CREATE TABLE edges (node_from INTEGER, node_to INTEGER, cost DOUBLE, fwd INTEGER, back INTEGER);
         INSERT INTO edges VALUES (1, 2, 1.0, 1, 0);
         INSERT INTO edges VALUES (2, 3, 1.0, 0, 1);",
    )
    .unwrap();
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to")
        .cost("cost")
        .oneway("fwd", "back");
    RoutingBuilder::new().create_routing(&mut session, &request).unwrap();

    let graph = RoutingGraph::load(session.conn(), "graph").unwrap();
    assert_eq!(graph.arc_count(), 2);
    assert_eq!(graph.shortest_path(0, 1).map(|r| r.links), Some(vec![1]));
    assert!(graph.shortest_path(1, 0).is_none());
    assert_eq!(graph.shortest_path(2, 1).map(|r| r.links), Some(vec![2]));
}

#[test]
fn text_codes_are_fixed_width() {
    let mut session = Session::open_in_memory().unwrap();
    let conn = session.conn();
    conn.execute_batch(
        "CREATE TABLE edges (node_from TEXT, node_to TEXT, cost DOUBLE);
         INSERT INTO edges VALUES ('north', 'b', 2.0);
         INSERT INTO edges VALUES ('b', 'south', 1.0);",
    )
    .unwrap();
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to").cost("cost");
    let summary = RoutingBuilder::new().create_routing(&mut session, &request).unwrap();
    assert!(!summary.has_ids);

    let graph = RoutingGraph::load(session.conn(), "graph").unwrap();
    assert_eq!(graph.header.max_code_length, 5);
    let codes: Vec<String> = graph.nodes.iter().map(|n| n.key.to_string()).collect();
    assert_eq!(codes, vec!["b", "north", "south"]);
    assert_eq!(graph.find(&NodeKey::Code("north".into())).unwrap().index, 1);
}

#[test]
fn mixed_identifier_kinds_are_refused() {
    let mut session = Session::open_in_memory().unwrap();
    let conn = session.conn();
    conn.execute_batch(
        "CREATE TABLE edges (node_from, node_to, cost DOUBLE);
         INSERT INTO edges VALUES (1, 2, 1.0);
         INSERT INTO edges VALUES ('x', 2, 1.0);",
    )
    .unwrap();
    let mut builder = RoutingBuilder::new();
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to").cost("cost");
    assert!(builder.create_routing(&mut session, &request).is_err());
    assert_eq!(
        builder.last_error(),
        Some("NodeFrom column \"node_from\": found a mismatching value")
    );
}

#[test]
fn costs_must_be_positive() {
    let mut session = Session::open_in_memory().unwrap();
    cost_edges(&session, &[(1, 2, 1.0), (2, 3, 0.0)]);
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to").cost("cost");
    let err = RoutingBuilder::new().create_routing(&mut session, &request).unwrap_err();
    assert_eq!(err.to_string(), "Cost column \"cost\": found a negative or zero value");
    assert!(!exists(&session, "graph_data"));
}

#[test]
fn existing_outputs_need_overwrite() {
    let mut session = Session::open_in_memory().unwrap();
    cost_edges(&session, &[(1, 2, 1.0)]);
    let mut builder = RoutingBuilder::new();
    let request = RoutingRequest::new("graph_data", "graph", "edges", "node_from", "node_to").cost("cost");
    builder.create_routing(&mut session, &request).unwrap();

    assert!(matches!(
        builder.create_routing(&mut session, &request),
        Err(Error::DataTableExists(_))
    ));
    assert_eq!(
        builder.last_error(),
        Some("Routing Data Table \"graph_data\" already exists")
    );
    builder.create_routing(&mut session, &request.overwrite(true)).unwrap();
    assert!(builder.last_error().is_none());
    assert!(exists(&session, "graph"));
}

#[test]
fn derived_node_columns_feed_the_builder() {
    let mut session = Session::open_in_memory().unwrap();
    let conn = session.conn();
    conn.execute_batch("CREATE TABLE streets (id INTEGER PRIMARY KEY)").unwrap();
    add_geometry_column(conn, "streets", "geom", GeometryClass::Linestring, SRID, false).unwrap();
    for coords in [
        &[(0.0, 0.0), (4.0, 0.0)][..],
        &[(4.0, 0.0), (4.0, 3.0)][..],
        &[(0.0, 0.0), (4.0, 3.0)][..],
    ] {
        conn.execute("INSERT INTO streets (geom) VALUES (?1)", [line(coords)])
            .unwrap();
    }

    let mut builder = RoutingBuilder::new();
    let nodes = builder
        .create_routing_nodes(&mut session, &NodesRequest::new("streets", "node_from", "node_to"))
        .unwrap();
    assert_eq!(nodes, 3);

    let request = RoutingRequest::new("streets_data", "streets_net", "streets", "node_from", "node_to")
        .geometry("geom");
    builder.create_routing(&mut session, &request).unwrap();
    let graph = RoutingGraph::load(session.conn(), "streets_net").unwrap();
    let route = graph.shortest_path(0, 2).unwrap();
    assert_relative_eq!(route.cost, 5.0);
    assert_eq!(route.links, vec![3]);
}
