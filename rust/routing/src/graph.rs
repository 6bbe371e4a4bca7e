// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading a serialized routing graph back and searching it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use toponet_core::sql::quote_identifier;

use crate::error::{Error, Result};
use crate::format::{decode_block, decode_header, Header, NodeKey, NodeRecord};

/// A routing graph as stored in a data table, fully decoded.
///
/// `nodes[i].index == i`; since dense indices are assigned in identifier
/// order, `nodes` is also sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingGraph {
    pub header: Header,
    pub nodes: Vec<NodeRecord>,
}

/// A shortest path found by [`RoutingGraph::shortest_path`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub cost: f64,
    /// Dense node indices from source to target.
    pub nodes: Vec<u32>,
    /// Input ROWIDs of the traversed arcs.
    pub links: Vec<i64>,
}

impl RoutingGraph {
    /// Loads a graph from its data table or from the view over it.
    pub fn load(conn: &Connection, table: &str) -> Result<Self> {
        let mut stmt = conn.prepare(&format!(
            "SELECT Id, NetworkData FROM {} ORDER BY Id",
            quote_identifier(table)
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let graph = Self::from_rows(rows)?;
        tracing::debug!(table, nodes = graph.nodes.len(), "routing graph loaded");
        Ok(graph)
    }

    /// Decodes `(Id, NetworkData)` rows ordered by `Id`.
    pub fn from_rows(rows: impl IntoIterator<Item = (i64, Vec<u8>)>) -> Result<Self> {
        let mut rows = rows.into_iter();
        let header = match rows.next() {
            Some((0, blob)) => decode_header(&blob)?,
            _ => return Err(Error::InvalidData("missing header row")),
        };
        let mut nodes = Vec::with_capacity(header.node_count as usize);
        for (_, blob) in rows {
            nodes.extend(decode_block(&header, &blob)?);
        }
        if nodes.len() != header.node_count as usize {
            return Err(Error::InvalidData("node count differs from header"));
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.index as usize != i {
                return Err(Error::InvalidData("node indices are not dense"));
            }
            if node.arcs.iter().any(|a| a.to as usize >= nodes.len()) {
                return Err(Error::InvalidData("arc points past the last node"));
            }
        }
        Ok(Self { header, nodes })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn arc_count(&self) -> usize {
        self.nodes.iter().map(|n| n.arcs.len()).sum()
    }

    /// The node with this external identity.
    pub fn find(&self, key: &NodeKey) -> Option<&NodeRecord> {
        self.nodes
            .binary_search_by(|n| n.key.cmp(key))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Dijkstra's shortest path between two dense indices.
    ///
    /// Returns `None` if either index is out of range or no path exists.
    pub fn shortest_path(&self, source: usize, target: usize) -> Option<Route> {
        let n = self.node_count();
        if source >= n || target >= n {
            return None;
        }
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<(usize, i64)>> = vec![None; n];
        let mut heap = BinaryHeap::new();

        dist[source] = 0.0;
        heap.push(DijkstraState {
            cost: 0.0,
            node: source,
        });

        while let Some(DijkstraState { cost, node }) = heap.pop() {
            if node == target {
                break;
            }
            if cost > dist[node] {
                continue;
            }
            for arc in &self.nodes[node].arcs {
                let next = arc.to as usize;
                let next_cost = cost + arc.cost;
                if next_cost < dist[next] {
                    dist[next] = next_cost;
                    prev[next] = Some((node, arc.rowid));
                    heap.push(DijkstraState {
                        cost: next_cost,
                        node: next,
                    });
                }
            }
        }

        if dist[target].is_infinite() {
            return None;
        }

        let mut nodes = vec![target as u32];
        let mut links = Vec::new();
        let mut current = target;
        while let Some((p, rowid)) = prev[current] {
            nodes.push(p as u32);
            links.push(rowid);
            current = p;
        }
        nodes.reverse();
        links.reverse();
        Some(Route {
            cost: dist[target],
            nodes,
            links,
        })
    }
}

/// Min-heap entry for Dijkstra.
#[derive(Debug, Clone, PartialEq)]
struct DijkstraState {
    cost: f64,
    node: usize,
}

impl Eq for DijkstraState {}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for a min-heap
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_header, encode_node, Arc, BlockWriter};
    use approx::assert_relative_eq;

    fn header(nodes: u32) -> Header {
        Header {
            node_count: nodes,
            has_ids: true,
            max_code_length: 0,
            table: "edges".into(),
            from_column: "a".into(),
            to_column: "b".into(),
            geom_column: None,
            name_column: None,
            a_star_coeff: None,
        }
    }

    fn node(index: u32, id: i64, arcs: &[(i64, u32, f64)]) -> NodeRecord {
        NodeRecord {
            index,
            key: NodeKey::Id(id),
            coords: None,
            arcs: arcs
                .iter()
                .map(|&(rowid, to, cost)| Arc { rowid, to, cost })
                .collect(),
        }
    }

    /// 0 -> 1 -> 3 is cheaper than the direct 0 -> 3 arc; 2 is unreachable.
    fn diamond() -> RoutingGraph {
        let h = header(4);
        let nodes = [
            node(0, 10, &[(1, 1, 1.0), (2, 3, 5.0)]),
            node(1, 20, &[(3, 3, 1.5)]),
            node(2, 30, &[(4, 0, 1.0)]),
            node(3, 40, &[]),
        ];
        let mut first = BlockWriter::new();
        let mut second = BlockWriter::new();
        for (i, n) in nodes.iter().enumerate() {
            let record = encode_node(&h, n).unwrap();
            if i < 2 { first.push(&record) } else { second.push(&record) }
        }
        RoutingGraph::from_rows(vec![
            (0, encode_header(&h)),
            (1, first.finish()),
            (2, second.finish()),
        ])
        .unwrap()
    }

    #[test]
    fn blocks_are_concatenated() {
        let graph = diamond();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.arc_count(), 4);
        assert_eq!(graph.find(&NodeKey::Id(30)).map(|n| n.index), Some(2));
        assert!(graph.find(&NodeKey::Id(35)).is_none());
    }

    #[test]
    fn cheapest_route_wins() {
        let graph = diamond();
        let route = graph.shortest_path(0, 3).unwrap();
        assert_relative_eq!(route.cost, 2.5);
        assert_eq!(route.nodes, vec![0, 1, 3]);
        assert_eq!(route.links, vec![1, 3]);
        assert!(graph.shortest_path(0, 2).is_none());
        assert!(graph.shortest_path(0, 9).is_none());
    }

    #[test]
    fn header_row_is_required() {
        assert!(matches!(
            RoutingGraph::from_rows(Vec::new()),
            Err(Error::InvalidData("missing header row"))
        ));
        let h = header(2);
        assert!(matches!(
            RoutingGraph::from_rows(vec![(0, encode_header(&h))]),
            Err(Error::InvalidData(_))
        ));
    }
}
