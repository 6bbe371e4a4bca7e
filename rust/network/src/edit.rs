// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topology edit primitives.
//!
//! [`EditCore`] validates every request against the stored graph and then
//! performs the structural change through a [`NetworkBackend`]. It does not
//! open savepoints itself: the caller wraps each primitive so that a failure
//! at any step discards the partial writes.
//!
//! Geometry arguments have already been checked by the caller for presence
//! (spatial vs logical), SRID and dimensions; the primitives only enforce the
//! topological rules.

use toponet_geometry::ops::split_linestring;
use toponet_geometry::predicates::{point_linestring_distance, point_on_linestring};
use toponet_geometry::{Bounds, Coord};

use crate::backend::{NetLink, NetNode, NetworkBackend};
use crate::catalog::NetworkInfo;
use crate::error::{Error, Result};

/// Edit primitives over one network.
pub struct EditCore<'a, B: NetworkBackend + ?Sized> {
    backend: &'a B,
    net: &'a NetworkInfo,
}

/// Result of matching two links for a heal.
struct HealPlan {
    common_node: i64,
    start_node: i64,
    end_node: i64,
    geom: Option<Vec<Coord>>,
}

impl<'a, B: NetworkBackend + ?Sized> EditCore<'a, B> {
    pub fn new(backend: &'a B, net: &'a NetworkInfo) -> Self {
        Self { backend, net }
    }

    pub fn backend(&self) -> &B {
        self.backend
    }

    // ========================================================================
    // Spatial searches
    // ========================================================================

    /// Nodes whose position equals `p` in 2D.
    fn nodes_at(&self, p: &Coord) -> Result<Vec<NetNode>> {
        Ok(self
            .backend
            .get_nodes_in_frame(&Bounds::of(p))?
            .into_iter()
            .filter(|n| n.geom.is_some_and(|g| g.same_xy(p)))
            .collect())
    }

    /// Links whose geometry passes through `p`.
    fn links_through(&self, p: &Coord) -> Result<Vec<NetLink>> {
        Ok(self
            .backend
            .get_links_in_frame(&Bounds::of(p))?
            .into_iter()
            .filter(|l| l.geom.as_deref().is_some_and(|g| point_on_linestring(p, g)))
            .collect())
    }

    /// Rejects a node position already taken by another node or lying on a
    /// link. No-op when the network allows coincident nodes.
    fn check_free_position(&self, p: &Coord, moving: Option<i64>) -> Result<()> {
        if !self.net.spatial || self.net.allow_coincident {
            return Ok(());
        }
        if self.nodes_at(p)?.iter().any(|n| Some(n.node_id) != moving) {
            return Err(Error::CoincidentNode);
        }
        if !self.links_through(p)?.is_empty() {
            return Err(Error::LinkCrossesNode);
        }
        Ok(())
    }

    /// Rejects a link geometry whose interior passes through a node other
    /// than its own endpoints.
    fn check_link_crossing(&self, start_node: i64, end_node: i64, line: &[Coord]) -> Result<()> {
        if !self.net.spatial || self.net.allow_coincident {
            return Ok(());
        }
        let Some(frame) = Bounds::of_coords(line) else {
            return Ok(());
        };
        let (first, last) = (line[0], line[line.len() - 1]);
        for node in self.backend.get_nodes_in_frame(&frame)? {
            if node.node_id == start_node || node.node_id == end_node {
                continue;
            }
            let Some(p) = node.geom else { continue };
            let on_boundary = p.same_xy(&first) || p.same_xy(&last);
            if !on_boundary && point_on_linestring(&p, line) {
                return Err(Error::GeometryCrossesNode);
            }
        }
        Ok(())
    }

    /// Checks that a link geometry starts on its start node and ends on its
    /// end node (exact 2D comparison).
    fn check_endpoints(&self, start: &NetNode, end: &NetNode, line: &[Coord]) -> Result<()> {
        let (Some(first), Some(last)) = (line.first(), line.last()) else {
            return Err(Error::InvalidArgument);
        };
        if !start.geom.is_some_and(|g| g.same_xy(first)) {
            return Err(Error::StartNodeMismatch);
        }
        if !end.geom.is_some_and(|g| g.same_xy(last)) {
            return Err(Error::EndNodeMismatch);
        }
        Ok(())
    }

    fn isolated_node(&self, node_id: i64) -> Result<NetNode> {
        let node = self
            .backend
            .get_node_by_id(node_id)?
            .ok_or(Error::NonExistentNode)?;
        if !self.backend.get_links_by_node(node_id)?.is_empty() {
            return Err(Error::NotIsolatedNode);
        }
        Ok(node)
    }

    fn existing_link(&self, link_id: i64) -> Result<NetLink> {
        self.backend
            .get_link_by_id(link_id)?
            .ok_or(Error::NonExistentLink)
    }

    fn endpoint_nodes(&self, start_node: i64, end_node: i64) -> Result<(NetNode, NetNode)> {
        let start = self.backend.get_node_by_id(start_node)?;
        let end = self.backend.get_node_by_id(end_node)?;
        match (start, end) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(Error::NonExistentNode),
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Adds an isolated node and returns its id.
    pub fn add_iso_net_node(&self, point: Option<Coord>) -> Result<i64> {
        if let Some(p) = &point {
            self.check_free_position(p, None)?;
        }
        let node_id = self.backend.insert_node(point.as_ref())?;
        tracing::debug!(network = %self.net.name, node_id, "isolated node added");
        Ok(node_id)
    }

    /// Moves an isolated node.
    pub fn move_iso_net_node(&self, node_id: i64, point: Option<Coord>) -> Result<()> {
        let mut node = self.isolated_node(node_id)?;
        if let Some(p) = &point {
            self.check_free_position(p, Some(node_id))?;
        }
        node.geom = point;
        self.backend.update_node(&node)
    }

    /// Removes an isolated node.
    pub fn rem_iso_net_node(&self, node_id: i64) -> Result<()> {
        self.isolated_node(node_id)?;
        if !self.backend.delete_node(node_id)? {
            return Err(Error::NonExistentNode);
        }
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Adds a link between two existing nodes and returns its id.
    pub fn add_link(&self, start_node: i64, end_node: i64, geom: Option<Vec<Coord>>) -> Result<i64> {
        if start_node == end_node {
            return Err(Error::SelfClosedLink);
        }
        let (start, end) = self.endpoint_nodes(start_node, end_node)?;
        if self.net.spatial {
            let line = geom.as_deref().ok_or(Error::NullGeometry)?;
            self.check_endpoints(&start, &end, line)?;
            self.check_link_crossing(start_node, end_node, line)?;
        }
        let link = NetLink {
            link_id: self.backend.get_next_link_id()?,
            start_node,
            end_node,
            geom,
        };
        self.backend.insert_link(&link)?;
        tracing::debug!(network = %self.net.name, link_id = link.link_id, start_node, end_node, "link added");
        Ok(link.link_id)
    }

    /// Replaces the geometry of a link, keeping its endpoints.
    pub fn change_link_geom(&self, link_id: i64, geom: Option<Vec<Coord>>) -> Result<()> {
        let mut link = self.existing_link(link_id)?;
        let (start, end) = self.endpoint_nodes(link.start_node, link.end_node)?;
        if self.net.spatial {
            let line = geom.as_deref().ok_or(Error::NullGeometry)?;
            self.check_endpoints(&start, &end, line)?;
            self.check_link_crossing(link.start_node, link.end_node, line)?;
        }
        link.geom = geom;
        self.backend.update_link(&link)
    }

    /// Deletes a link; its endpoint nodes stay.
    pub fn remove_link(&self, link_id: i64) -> Result<()> {
        if !self.backend.delete_link(link_id)? {
            return Err(Error::NonExistentLink);
        }
        Ok(())
    }

    // ========================================================================
    // Split
    // ========================================================================

    /// Replaces a link by two new links joined at a new node.
    pub fn new_log_link_split(&self, link_id: i64) -> Result<i64> {
        let link = self.existing_link(link_id)?;
        let node_id = self.backend.insert_node(None)?;
        self.backend.delete_link(link_id)?;
        self.insert_halves(&link, node_id, None, None)?;
        Ok(node_id)
    }

    /// Shortens a link to end at a new node and adds one link from that node
    /// to the old end.
    pub fn mod_log_link_split(&self, link_id: i64) -> Result<i64> {
        let mut link = self.existing_link(link_id)?;
        let node_id = self.backend.insert_node(None)?;
        let old_end = link.end_node;
        link.end_node = node_id;
        self.backend.update_link(&link)?;
        self.insert_tail(node_id, old_end, None)?;
        Ok(node_id)
    }

    /// Geometric version of [`EditCore::new_log_link_split`]: the split
    /// point becomes the new node.
    pub fn new_geo_link_split(&self, link_id: i64, point: Coord) -> Result<i64> {
        let link = self.existing_link(link_id)?;
        let (head, tail) = self.split_geometry(&link, &point)?;
        let node_id = self.backend.insert_node(Some(&point))?;
        self.backend.delete_link(link_id)?;
        self.insert_halves(&link, node_id, Some(head), Some(tail))?;
        tracing::debug!(network = %self.net.name, link_id, node_id, "link split");
        Ok(node_id)
    }

    /// Geometric version of [`EditCore::mod_log_link_split`].
    pub fn mod_geo_link_split(&self, link_id: i64, point: Coord) -> Result<i64> {
        let mut link = self.existing_link(link_id)?;
        let (head, tail) = self.split_geometry(&link, &point)?;
        let node_id = self.backend.insert_node(Some(&point))?;
        let old_end = link.end_node;
        link.end_node = node_id;
        link.geom = Some(head);
        self.backend.update_link(&link)?;
        self.insert_tail(node_id, old_end, Some(tail))?;
        tracing::debug!(network = %self.net.name, link_id, node_id, "link split in place");
        Ok(node_id)
    }

    fn insert_halves(
        &self,
        link: &NetLink,
        node_id: i64,
        head: Option<Vec<Coord>>,
        tail: Option<Vec<Coord>>,
    ) -> Result<()> {
        let first = NetLink {
            link_id: self.backend.get_next_link_id()?,
            start_node: link.start_node,
            end_node: node_id,
            geom: head,
        };
        let second = NetLink {
            link_id: self.backend.get_next_link_id()?,
            start_node: node_id,
            end_node: link.end_node,
            geom: tail,
        };
        self.backend.insert_link(&first)?;
        self.backend.insert_link(&second)
    }

    fn insert_tail(&self, node_id: i64, end_node: i64, geom: Option<Vec<Coord>>) -> Result<()> {
        let link = NetLink {
            link_id: self.backend.get_next_link_id()?,
            start_node: node_id,
            end_node,
            geom,
        };
        self.backend.insert_link(&link)
    }

    /// Splits a link geometry at `point` and checks the split position is
    /// free. The shared vertex of both parts is forced to `point`.
    fn split_geometry(&self, link: &NetLink, point: &Coord) -> Result<(Vec<Coord>, Vec<Coord>)> {
        let line = link.geom.as_deref().ok_or(Error::PointNotOnLink)?;
        let (mut head, mut tail) = split_linestring(line, point).ok_or(Error::PointNotOnLink)?;
        if !self.net.allow_coincident && !self.nodes_at(point)?.is_empty() {
            return Err(Error::SplitCoincidentNode);
        }
        pin_split_vertex(&mut head, &mut tail, point, self.net.has_z);
        Ok((head, tail))
    }

    // ========================================================================
    // Heal
    // ========================================================================

    fn plan_heal(&self, first_id: i64, second_id: i64) -> Result<HealPlan> {
        if first_id == second_id {
            return Err(Error::HealWithItself);
        }
        let e1 = self
            .backend
            .get_link_by_id(first_id)?
            .ok_or(Error::NonExistentFirstLink)?;
        let e2 = self
            .backend
            .get_link_by_id(second_id)?
            .ok_or(Error::NonExistentSecondLink)?;

        let (common_node, start_node, end_node, geom) = if e1.end_node == e2.start_node {
            let geom = join(e1.geom.as_deref(), e2.geom.as_deref(), false, false);
            (e1.end_node, e1.start_node, e2.end_node, geom)
        } else if e1.end_node == e2.end_node {
            let geom = join(e1.geom.as_deref(), e2.geom.as_deref(), false, true);
            (e1.end_node, e1.start_node, e2.start_node, geom)
        } else if e1.start_node == e2.start_node {
            let geom = join(e2.geom.as_deref(), e1.geom.as_deref(), true, false);
            (e1.start_node, e2.end_node, e1.end_node, geom)
        } else if e1.start_node == e2.end_node {
            let geom = join(e2.geom.as_deref(), e1.geom.as_deref(), false, false);
            (e1.start_node, e2.start_node, e1.end_node, geom)
        } else {
            return Err(Error::NonConnectedLinks);
        };

        let others = self
            .backend
            .get_links_by_node(common_node)?
            .iter()
            .filter(|l| l.link_id != first_id && l.link_id != second_id)
            .count();
        if others > 0 {
            return Err(Error::OtherLinksConnected);
        }
        Ok(HealPlan {
            common_node,
            start_node,
            end_node,
            geom,
        })
    }

    /// Replaces two links sharing a node by one new link and removes the
    /// shared node. Returns the removed node id.
    pub fn new_link_heal(&self, first_id: i64, second_id: i64) -> Result<i64> {
        let plan = self.plan_heal(first_id, second_id)?;
        self.backend.delete_link(first_id)?;
        self.backend.delete_link(second_id)?;
        self.backend.delete_node(plan.common_node)?;
        let link = NetLink {
            link_id: self.backend.get_next_link_id()?,
            start_node: plan.start_node,
            end_node: plan.end_node,
            geom: plan.geom,
        };
        self.backend.insert_link(&link)?;
        tracing::debug!(network = %self.net.name, node_id = plan.common_node, link_id = link.link_id, "links healed");
        Ok(plan.common_node)
    }

    /// Extends the first link over the second, deletes the second and the
    /// shared node. Returns the removed node id.
    pub fn mod_link_heal(&self, first_id: i64, second_id: i64) -> Result<i64> {
        let plan = self.plan_heal(first_id, second_id)?;
        self.backend.delete_link(second_id)?;
        let link = NetLink {
            link_id: first_id,
            start_node: plan.start_node,
            end_node: plan.end_node,
            geom: plan.geom,
        };
        self.backend.update_link(&link)?;
        self.backend.delete_node(plan.common_node)?;
        tracing::debug!(network = %self.net.name, node_id = plan.common_node, link_id = first_id, "links healed in place");
        Ok(plan.common_node)
    }

    // ========================================================================
    // Point lookups
    // ========================================================================

    /// The node within `tolerance` of `point`, 0 when there is none.
    pub fn get_net_node_by_point(&self, point: &Coord, tolerance: f64) -> Result<i64> {
        if tolerance < 0.0 {
            return Err(Error::NegativeTolerance);
        }
        let hits: Vec<i64> = self
            .backend
            .get_nodes_in_frame(&Bounds::of(point).expanded(tolerance))?
            .into_iter()
            .filter(|n| n.geom.is_some_and(|g| g.distance_2d(point) <= tolerance))
            .map(|n| n.node_id)
            .collect();
        match hits.as_slice() {
            [] => Ok(0),
            [id] => Ok(*id),
            _ => Err(Error::TwoOrMoreNodes),
        }
    }

    /// The link within `tolerance` of `point`, 0 when there is none.
    pub fn get_link_by_point(&self, point: &Coord, tolerance: f64) -> Result<i64> {
        if tolerance < 0.0 {
            return Err(Error::NegativeTolerance);
        }
        let hits: Vec<i64> = self
            .backend
            .get_links_in_frame(&Bounds::of(point).expanded(tolerance))?
            .into_iter()
            .filter(|l| {
                l.geom
                    .as_deref()
                    .is_some_and(|g| point_linestring_distance(point, g) <= tolerance)
            })
            .map(|l| l.link_id)
            .collect();
        match hits.as_slice() {
            [] => Ok(0),
            [id] => Ok(*id),
            _ => Err(Error::TwoOrMoreLinks),
        }
    }
}

/// Concatenates two linestrings sharing a vertex, optionally reversing
/// either one first. `None` unless both are present.
fn join(
    first: Option<&[Coord]>,
    second: Option<&[Coord]>,
    reverse_first: bool,
    reverse_second: bool,
) -> Option<Vec<Coord>> {
    let (first, second) = (first?, second?);
    let mut out: Vec<Coord> = if reverse_first {
        first.iter().rev().copied().collect()
    } else {
        first.to_vec()
    };
    let tail: Vec<Coord> = if reverse_second {
        second.iter().rev().copied().collect()
    } else {
        second.to_vec()
    };
    out.extend(tail.into_iter().skip(1));
    Some(out)
}

/// Makes the last vertex of `head` and the first vertex of `tail` exactly
/// `point`. Returns whether anything had to be corrected.
fn pin_split_vertex(head: &mut [Coord], tail: &mut [Coord], point: &Coord, has_z: bool) -> bool {
    let same = |c: &Coord| c.same_xy(point) && (!has_z || c.z == point.z);
    let mut fixed = false;
    if let Some(last) = head.last_mut() {
        if !same(last) {
            *last = *point;
            fixed = true;
        }
    }
    if let Some(first) = tail.first_mut() {
        if !same(first) {
            *first = *point;
            fixed = true;
        }
    }
    if fixed {
        tracing::warn!(x = point.x, y = point.y, "split vertex relocated; pinned to split point");
    }
    fixed
}
