// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line operations: splitting, merging, simplification, interpolation.

use rustc_hash::FxHashMap;

use crate::predicates::point_segment_distance;
use crate::types::Coord;

/// Splits a linestring at a point lying on it.
///
/// Returns `None` unless the split yields exactly two non-degenerate parts,
/// i.e. when the point is off the line or coincides with either endpoint.
/// A split on an existing vertex reuses that vertex as-is, so its Z may
/// differ from `at`.
pub fn split_linestring(line: &[Coord], at: &Coord) -> Option<(Vec<Coord>, Vec<Coord>)> {
    if line.len() < 2 {
        return None;
    }
    let last = line.len() - 1;
    if line[0].same_xy(at) || line[last].same_xy(at) {
        return None;
    }
    for i in 0..last {
        if point_segment_distance(at, &line[i], &line[i + 1]) != 0.0 {
            continue;
        }
        // split on an interior vertex
        let vertex = if line[i].same_xy(at) {
            Some(i)
        } else if line[i + 1].same_xy(at) {
            Some(i + 1)
        } else {
            None
        };
        let parts = match vertex {
            Some(v) => (line[..=v].to_vec(), line[v..].to_vec()),
            None => {
                let mut first = line[..=i].to_vec();
                first.push(*at);
                let mut second = vec![*at];
                second.extend_from_slice(&line[i + 1..]);
                (first, second)
            }
        };
        return Some(parts);
    }
    None
}

/// Returns the sequence with its vertex order reversed.
pub fn reversed(line: &[Coord]) -> Vec<Coord> {
    line.iter().rev().copied().collect()
}

type NodeKey = (u64, u64);

fn key(c: &Coord) -> NodeKey {
    // -0.0 and 0.0 must hash alike
    ((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
}

/// Sews linestrings that share endpoints into maximal chains.
///
/// Two lines are joined through an endpoint only when exactly two line ends
/// meet there; lines are reversed as needed so that chains are continuous.
/// Output order follows the first line of each chain in input order.
pub fn line_merge(lines: &[Vec<Coord>]) -> Vec<Vec<Coord>> {
    let lines: Vec<&Vec<Coord>> = lines.iter().filter(|l| l.len() >= 2).collect();
    let mut degree: FxHashMap<NodeKey, Vec<usize>> = FxHashMap::default();
    for (idx, line) in lines.iter().enumerate() {
        degree.entry(key(&line[0])).or_default().push(idx);
        degree.entry(key(&line[line.len() - 1])).or_default().push(idx);
    }

    let mut used = vec![false; lines.len()];
    let mut merged = Vec::new();

    let next_line = |node: &NodeKey, from: usize, used: &[bool]| -> Option<usize> {
        let at = degree.get(node)?;
        if at.len() != 2 {
            return None;
        }
        at.iter().copied().find(|&l| l != from && !used[l])
    };

    // chains are started from ends where the merge cannot continue, then
    // leftover closed loops are started anywhere
    for pass in 0..2 {
        for start in 0..lines.len() {
            if used[start] {
                continue;
            }
            let line = lines[start];
            let head_open = degree.get(&key(&line[0])).map_or(0, Vec::len) != 2;
            let tail_open = degree.get(&key(&line[line.len() - 1])).map_or(0, Vec::len) != 2;
            let mut chain: Vec<Coord> = if pass == 0 {
                if head_open {
                    line.clone()
                } else if tail_open {
                    reversed(line)
                } else {
                    continue;
                }
            } else {
                line.clone()
            };
            used[start] = true;
            let mut current = start;
            loop {
                let Some(end) = chain.last().copied() else {
                    break;
                };
                let Some(next) = next_line(&key(&end), current, used.as_slice()) else {
                    break;
                };
                let candidate = lines[next];
                let oriented = if candidate[0].same_xy(&end) {
                    candidate.clone()
                } else {
                    reversed(candidate)
                };
                chain.extend_from_slice(&oriented[1..]);
                used[next] = true;
                current = next;
            }
            merged.push(chain);
        }
    }
    merged
}

/// Distance along `line` from its start to the point `p`, which must lie on
/// the line (within 2D distance zero). `None` when `p` is off the line.
pub fn locate_along(line: &[Coord], p: &Coord) -> Option<f64> {
    let mut walked = 0.0;
    for pair in line.windows(2) {
        if point_segment_distance(p, &pair[0], &pair[1]) == 0.0 {
            return Some(walked + pair[0].distance_2d(p));
        }
        walked += pair[0].distance_2d(&pair[1]);
    }
    None
}

/// Douglas-Peucker simplification. Endpoints are always kept.
pub fn simplify(line: &[Coord], tolerance: f64) -> Vec<Coord> {
    if line.len() < 3 || tolerance <= 0.0 {
        return line.to_vec();
    }
    let mut keep = vec![false; line.len()];
    keep[0] = true;
    keep[line.len() - 1] = true;
    let mut stack = vec![(0usize, line.len() - 1)];
    while let Some((lo, hi)) = stack.pop() {
        if hi <= lo + 1 {
            continue;
        }
        let mut worst = (0.0, lo);
        for i in (lo + 1)..hi {
            let d = point_segment_distance(&line[i], &line[lo], &line[hi]);
            if d > worst.0 {
                worst = (d, i);
            }
        }
        if worst.0 > tolerance {
            keep[worst.1] = true;
            stack.push((lo, worst.1));
            stack.push((worst.1, hi));
        }
    }
    line.iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(*c))
        .collect()
}

/// Midpoint of two coordinates, computed per axis as `min + |delta| / 2`.
pub fn midpoint(a: &Coord, b: &Coord) -> Coord {
    let mid = |p: f64, q: f64| p.min(q) + (p - q).abs() / 2.0;
    Coord::xyz(mid(a.x, b.x), mid(a.y, b.y), mid(a.z, b.z))
}

/// Representative interior point of a linestring: the vertex at `len / 2`.
pub fn seed_point(line: &[Coord]) -> Option<Coord> {
    line.get(line.len() / 2).copied()
}
