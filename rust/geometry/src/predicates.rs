// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 2D spatial predicates.
//!
//! All predicates work on the X/Y plane with exact arithmetic comparisons (no
//! snapping tolerance): a distance of zero means the point lies on the
//! geometry as far as IEEE doubles can tell.

use nalgebra::Vector2;

use crate::types::{Coord, Geometry, Polygon};

/// Position of a point relative to an areal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside,
    Boundary,
    Outside,
}

/// Outcome of intersecting two segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentIntersection {
    None,
    Point(Coord),
    /// The segments are collinear and share more than one point.
    Overlap,
}

fn vec2(from: &Coord, to: &Coord) -> Vector2<f64> {
    Vector2::new(to.x - from.x, to.y - from.y)
}

/// Signed area of the triangle `o, a, b` (times two).
fn orient(o: &Coord, a: &Coord, b: &Coord) -> f64 {
    vec2(o, a).perp(&vec2(o, b))
}

fn within_box(p: &Coord, a: &Coord, b: &Coord) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_segment_distance(p: &Coord, a: &Coord, b: &Coord) -> f64 {
    let ab = vec2(a, b);
    let ap = vec2(a, p);
    let len_sq = ab.norm_squared();
    if len_sq == 0.0 {
        return ap.norm();
    }
    if orient(a, b, p) == 0.0 && within_box(p, a, b) {
        return 0.0;
    }
    let t = (ap.dot(&ab) / len_sq).clamp(0.0, 1.0);
    let proj = Vector2::new(a.x, a.y) + ab * t;
    (Vector2::new(p.x, p.y) - proj).norm()
}

/// Distance from `p` to a vertex sequence.
pub fn point_linestring_distance(p: &Coord, line: &[Coord]) -> f64 {
    match line {
        [] => f64::INFINITY,
        [single] => p.distance_2d(single),
        _ => line
            .windows(2)
            .map(|w| point_segment_distance(p, &w[0], &w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// True when `p` lies exactly on the linestring.
pub fn point_on_linestring(p: &Coord, line: &[Coord]) -> bool {
    point_linestring_distance(p, line) == 0.0
}

/// Intersects two segments.
pub fn segment_intersection(a1: &Coord, a2: &Coord, b1: &Coord, b2: &Coord) -> SegmentIntersection {
    let d1 = orient(b1, b2, a1);
    let d2 = orient(b1, b2, a2);
    let d3 = orient(a1, a2, b1);
    let d4 = orient(a1, a2, b2);

    if d1 == 0.0 && d2 == 0.0 && d3 == 0.0 && d4 == 0.0 {
        // collinear: collect the shared endpoints
        let mut shared: Vec<Coord> = Vec::with_capacity(4);
        for (p, s, e) in [(a1, b1, b2), (a2, b1, b2), (b1, a1, a2), (b2, a1, a2)] {
            if within_box(p, s, e) && !shared.iter().any(|q| q.same_xy(p)) {
                shared.push(*p);
            }
        }
        return match shared.as_slice() {
            [] => SegmentIntersection::None,
            [p] => SegmentIntersection::Point(*p),
            _ => SegmentIntersection::Overlap,
        };
    }

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        let t = d1 / (d1 - d2);
        return SegmentIntersection::Point(Coord::xy(
            a1.x + t * (a2.x - a1.x),
            a1.y + t * (a2.y - a1.y),
        ));
    }

    for (p, s, e, d) in [(a1, b1, b2, d1), (a2, b1, b2, d2), (b1, a1, a2, d3), (b2, a1, a2, d4)] {
        if d == 0.0 && within_box(p, s, e) {
            return SegmentIntersection::Point(*p);
        }
    }
    SegmentIntersection::None
}

fn is_closed(line: &[Coord]) -> bool {
    line.len() > 2 && line[0].same_xy(&line[line.len() - 1])
}

fn dedup(line: &[Coord]) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::with_capacity(line.len());
    for c in line {
        if out.last().map_or(true, |last| !last.same_xy(c)) {
            out.push(*c);
        }
    }
    out
}

/// True when the linestring does not touch itself anywhere except at the
/// shared first/last vertex of a closed ring.
pub fn is_simple(line: &[Coord]) -> bool {
    let pts = dedup(line);
    let n = pts.len();
    if n < 3 {
        return true;
    }
    let closed = is_closed(&pts);
    let segs = n - 1;
    for i in 0..segs {
        for j in (i + 1)..segs {
            let hit = segment_intersection(&pts[i], &pts[i + 1], &pts[j], &pts[j + 1]);
            match hit {
                SegmentIntersection::None => {}
                SegmentIntersection::Overlap => return false,
                SegmentIntersection::Point(p) => {
                    let adjacent = j == i + 1 && p.same_xy(&pts[j]);
                    let ring_closure =
                        closed && i == 0 && j == segs - 1 && p.same_xy(&pts[0]);
                    if !adjacent && !ring_closure {
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// True when both linestrings' interiors meet at isolated points only: the
/// lines share at least one point that is an endpoint of neither, and never
/// run along each other.
pub fn lines_cross(a: &[Coord], b: &[Coord]) -> bool {
    if a.len() < 2 || b.len() < 2 {
        return false;
    }
    let boundary = |line: &[Coord], p: &Coord| {
        !is_closed(line) && (line[0].same_xy(p) || line[line.len() - 1].same_xy(p))
    };
    let mut crossing = false;
    for sa in a.windows(2) {
        for sb in b.windows(2) {
            match segment_intersection(&sa[0], &sa[1], &sb[0], &sb[1]) {
                SegmentIntersection::None => {}
                SegmentIntersection::Overlap => return false,
                SegmentIntersection::Point(p) => {
                    if !boundary(a, &p) && !boundary(b, &p) {
                        crossing = true;
                    }
                }
            }
        }
    }
    crossing
}

/// Locates a point against a closed ring (even-odd rule).
pub fn point_in_ring(p: &Coord, ring: &[Coord]) -> Location {
    if ring.len() < 3 {
        return Location::Outside;
    }
    if point_on_linestring(p, ring) {
        return Location::Boundary;
    }
    let mut inside = false;
    let n = ring.len();
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (&ring[i], &ring[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x = pj.x + (p.y - pj.y) * (pi.x - pj.x) / (pi.y - pj.y);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    if inside {
        Location::Inside
    } else {
        Location::Outside
    }
}

/// Locates a point against a polygon, honouring holes.
pub fn point_in_polygon(p: &Coord, poly: &Polygon) -> Location {
    match point_in_ring(p, &poly.exterior) {
        Location::Inside => {}
        other => return other,
    }
    for hole in &poly.interiors {
        match point_in_ring(p, hole) {
            Location::Inside => return Location::Outside,
            Location::Boundary => return Location::Boundary,
            Location::Outside => {}
        }
    }
    Location::Inside
}

fn rings(poly: &Polygon) -> impl Iterator<Item = &Vec<Coord>> {
    std::iter::once(&poly.exterior).chain(poly.interiors.iter())
}

fn boundaries_cross(a: &Polygon, b: &Polygon) -> bool {
    rings(a).any(|ra| {
        rings(b).any(|rb| {
            ra.windows(2).any(|sa| {
                rb.windows(2).any(|sb| {
                    matches!(
                        segment_intersection(&sa[0], &sa[1], &sb[0], &sb[1]),
                        SegmentIntersection::Point(p)
                            if !is_vertex(&p, ra) && !is_vertex(&p, rb)
                    )
                })
            })
        })
    })
}

fn is_vertex(p: &Coord, ring: &[Coord]) -> bool {
    ring.iter().any(|c| c.same_xy(p))
}

fn segment_midpoints(ring: &[Coord]) -> impl Iterator<Item = Coord> + '_ {
    ring.windows(2)
        .map(|w| Coord::xy((w[0].x + w[1].x) / 2.0, (w[0].y + w[1].y) / 2.0))
}

/// True when `a` lies entirely inside `b` (touching the boundary allowed)
/// and the interiors share at least one point.
pub fn polygon_within(a: &Polygon, b: &Polygon) -> bool {
    if a.exterior.len() < 3 || b.exterior.len() < 3 {
        return false;
    }
    if boundaries_cross(a, b) {
        return false;
    }
    let mut interior_hit = false;
    for p in a.exterior.iter().copied().chain(segment_midpoints(&a.exterior)) {
        match point_in_polygon(&p, b) {
            Location::Outside => return false,
            Location::Inside => interior_hit = true,
            Location::Boundary => {}
        }
    }
    // a ring made only of b's boundary still shares interior with b
    interior_hit || a.exterior.iter().any(|p| is_vertex(p, &b.exterior))
}

/// True when the interiors intersect and neither polygon contains the other.
pub fn polygons_overlap(a: &Polygon, b: &Polygon) -> bool {
    if a.exterior.len() < 3 || b.exterior.len() < 3 {
        return false;
    }
    if polygon_within(a, b) || polygon_within(b, a) {
        return false;
    }
    if boundaries_cross(a, b) {
        return true;
    }
    let probe = |x: &Polygon, y: &Polygon| {
        x.exterior
            .iter()
            .copied()
            .chain(segment_midpoints(&x.exterior))
            .any(|p| point_in_polygon(&p, y) == Location::Inside)
    };
    probe(a, b) || probe(b, a)
}

/// True when `p` touches any member of `geom`.
pub fn point_intersects(p: &Coord, geom: &Geometry) -> bool {
    geom.points.iter().any(|q| q.same_xy(p))
        || geom.linestrings.iter().any(|l| point_on_linestring(p, l))
        || geom
            .polygons
            .iter()
            .any(|poly| point_in_polygon(p, poly) != Location::Outside)
}

/// True when the two points differ in X or Y.
pub fn points_disjoint(a: &Coord, b: &Coord) -> bool {
    !a.same_xy(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(x: f64, y: f64) -> Coord {
        Coord::xy(x, y)
    }

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            c(x0, y0),
            c(x0 + size, y0),
            c(x0 + size, y0 + size),
            c(x0, y0 + size),
            c(x0, y0),
        ])
    }

    #[test]
    fn distances() {
        assert_relative_eq!(point_segment_distance(&c(5.0, 3.0), &c(0.0, 0.0), &c(10.0, 0.0)), 3.0);
        assert_relative_eq!(point_segment_distance(&c(13.0, 4.0), &c(0.0, 0.0), &c(10.0, 0.0)), 5.0);
        assert_eq!(point_segment_distance(&c(5.0, 5.0), &c(0.0, 0.0), &c(10.0, 10.0)), 0.0);
        assert!(point_on_linestring(&c(10.0, 5.0), &[c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)]));
        assert!(!point_on_linestring(&c(10.0, 11.0), &[c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)]));
    }

    #[test]
    fn segment_cases() {
        assert_eq!(
            segment_intersection(&c(0.0, 0.0), &c(2.0, 2.0), &c(0.0, 2.0), &c(2.0, 0.0)),
            SegmentIntersection::Point(c(1.0, 1.0))
        );
        assert_eq!(
            segment_intersection(&c(0.0, 0.0), &c(1.0, 0.0), &c(1.0, 0.0), &c(1.0, 5.0)),
            SegmentIntersection::Point(c(1.0, 0.0))
        );
        assert_eq!(
            segment_intersection(&c(0.0, 0.0), &c(3.0, 0.0), &c(1.0, 0.0), &c(5.0, 0.0)),
            SegmentIntersection::Overlap
        );
        assert_eq!(
            segment_intersection(&c(0.0, 0.0), &c(1.0, 0.0), &c(2.0, 0.0), &c(3.0, 0.0)),
            SegmentIntersection::None
        );
    }

    #[test]
    fn simplicity() {
        assert!(is_simple(&[c(0.0, 0.0), c(5.0, 0.0), c(5.0, 5.0)]));
        // bow tie
        assert!(!is_simple(&[c(0.0, 0.0), c(4.0, 4.0), c(4.0, 0.0), c(0.0, 4.0)]));
        // closed ring is simple
        assert!(is_simple(&square(0.0, 0.0, 1.0).exterior));
        // doubling back
        assert!(!is_simple(&[c(0.0, 0.0), c(4.0, 0.0), c(2.0, 0.0)]));
    }

    #[test]
    fn crossing_lines() {
        let a = [c(0.0, 0.0), c(10.0, 10.0)];
        let b = [c(0.0, 10.0), c(10.0, 0.0)];
        assert!(lines_cross(&a, &b));
        // touching at an endpoint is not a crossing
        let d = [c(10.0, 10.0), c(20.0, 0.0)];
        assert!(!lines_cross(&a, &d));
        // T junction at b's endpoint
        let t = [c(5.0, 5.0), c(10.0, 0.0)];
        assert!(!lines_cross(&a, &t));
    }

    #[test]
    fn polygon_relations() {
        let big = square(0.0, 0.0, 10.0);
        let small = square(2.0, 2.0, 3.0);
        let shifted = square(5.0, 5.0, 10.0);
        let far = square(50.0, 50.0, 1.0);

        assert!(polygon_within(&small, &big));
        assert!(!polygon_within(&big, &small));
        assert!(!polygons_overlap(&small, &big));

        assert!(polygons_overlap(&big, &shifted));
        assert!(!polygon_within(&shifted, &big));

        assert!(!polygons_overlap(&big, &far));
        assert_eq!(point_in_polygon(&c(0.0, 5.0), &big), Location::Boundary);
        assert_eq!(point_in_polygon(&c(1.0, 5.0), &big), Location::Inside);
    }

    #[test]
    fn holes_are_outside() {
        let mut poly = square(0.0, 0.0, 10.0);
        poly.interiors.push(square(4.0, 4.0, 2.0).exterior);
        assert_eq!(point_in_polygon(&c(5.0, 5.0), &poly), Location::Outside);
        assert_eq!(point_in_polygon(&c(1.0, 1.0), &poly), Location::Inside);
    }
}
