// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link seeds.
//!
//! A seed is one point known to lie on a link: the vertex at index
//! `points / 2`. Export matches reference features to links by testing which
//! seeds they contain. Seed rows carry a timestamp; a seed is stale when its
//! link has been stamped later.

use rusqlite::params;
use toponet_core::sql::quote_identifier;
use toponet_geometry::ops::{midpoint, seed_point};
use toponet_geometry::{encode, Coord, Geometry};

use crate::backend::{NetworkBackend, SqliteBackend};
use crate::edit::EditCore;
use crate::error::{Error, Result};

fn seed_blob(backend: &SqliteBackend<'_>, line: &[Coord]) -> Option<Vec<u8>> {
    let info = backend.info();
    seed_point(line).map(|p| encode(&Geometry::point(info.srid, info.has_z, p)))
}

/// Brings the seeds table up to date.
///
/// A full update first deletes every seed. Then seeds of deleted links are
/// removed, stale seeds recomputed and links without a seed given one.
pub fn update_seeds(backend: &SqliteBackend<'_>, incremental: bool) -> Result<()> {
    refresh(backend, incremental).map_err(Error::within("TopoNet_UpdateSeeds()"))
}

fn refresh(backend: &SqliteBackend<'_>, incremental: bool) -> Result<()> {
    let conn = backend.conn();
    let info = backend.info();
    let seeds = quote_identifier(&info.seeds_table());
    let links = quote_identifier(&info.link_table());

    if !incremental {
        conn.execute(&format!("DELETE FROM {seeds}"), [])?;
    }
    let orphans = conn.execute(
        &format!("DELETE FROM {seeds} WHERE link_id NOT IN (SELECT link_id FROM {links})"),
        [],
    )?;

    let stale: Vec<i64> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT s.link_id FROM {seeds} AS s JOIN {links} AS l ON (l.link_id = s.link_id)
             WHERE l.timestamp > s.timestamp"
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids
    };
    let mut update = conn.prepare(&format!("UPDATE {seeds} SET geometry = ?2 WHERE link_id = ?1"))?;
    for link_id in &stale {
        let blob = backend
            .get_link_by_id(*link_id)?
            .and_then(|l| l.geom)
            .and_then(|g| seed_blob(backend, &g));
        update.execute(params![link_id, blob])?;
    }

    let missing: Vec<i64> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT l.link_id FROM {links} AS l LEFT JOIN {seeds} AS s ON (l.link_id = s.link_id)
             WHERE s.link_id IS NULL AND l.geometry IS NOT NULL"
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids
    };
    let mut insert = conn.prepare(&format!(
        "INSERT INTO {seeds} (seed_id, link_id, geometry) VALUES (NULL, ?1, ?2)"
    ))?;
    for link_id in &missing {
        let Some(line) = backend.get_link_by_id(*link_id)?.and_then(|l| l.geom) else {
            continue;
        };
        insert.execute(params![link_id, seed_blob(backend, &line)])?;
    }

    tracing::debug!(
        network = %info.name,
        incremental,
        removed = orphans,
        refreshed = stale.len(),
        added = missing.len(),
        "seeds updated"
    );
    Ok(())
}

/// The seed point of a link.
pub fn link_seed(backend: &SqliteBackend<'_>, link_id: i64) -> Result<Geometry> {
    let link = backend
        .get_link_by_id(link_id)
        .map_err(Error::within("GetLinkSeed"))?
        .ok_or(Error::NonExistentLink)?;
    let line = link.geom.ok_or(Error::InvalidGeometry("TopoNet_GetLinkSeed"))?;
    let p = seed_point(&line).ok_or(Error::InvalidGeometry("TopoNet_GetLinkSeed"))?;
    let info = backend.info();
    Ok(Geometry::point(info.srid, info.has_z, p))
}

/// Inserts a middle vertex into every link made of a single segment.
/// Returns the number of links changed.
pub fn disambiguate_segment_links(core: &EditCore<'_, SqliteBackend<'_>>) -> Result<i64> {
    let mut changed = 0;
    for link in core.backend().all_links()? {
        let Some(line) = link.geom else { continue };
        let [a, b] = line.as_slice() else { continue };
        let middle = vec![*a, midpoint(a, b), *b];
        core.change_link_geom(link.link_id, Some(middle))?;
        changed += 1;
    }
    tracing::debug!(changed, "segment links disambiguated");
    Ok(changed)
}
