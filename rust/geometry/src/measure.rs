// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length measures: planar and geodesic.

use crate::types::{Coord, Geometry};

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 inverse flattening.
const WGS84_RF: f64 = 298.257_223_563;

/// Geographic (longitude/latitude) reference systems recognised by code.
const GEOGRAPHIC_SRIDS: &[i32] = &[
    4019, 4030, 4043, 4047, 4055, 4148, 4150, 4152, 4167, 4202, 4203, 4230, 4258, 4267, 4269,
    4283, 4312, 4314, 4322, 4324, 4326, 4610, 4612, 4617, 4619, 4624, 4659, 4674, 4686, 4755,
    4759, 4806, 4807, 4965,
];

/// True when `srid` is a geographic (degree based) reference system.
pub fn is_geographic(srid: i32) -> bool {
    GEOGRAPHIC_SRIDS.contains(&srid)
}

/// Planar 2D length of a vertex sequence.
pub fn linestring_length(coords: &[Coord]) -> f64 {
    coords.windows(2).map(|w| w[0].distance_2d(&w[1])).sum()
}

/// Planar 2D length of every linestring in a geometry.
pub fn length(geom: &Geometry) -> f64 {
    geom.linestrings.iter().map(|l| linestring_length(l)).sum()
}

/// Length in metres of every linestring in a geometry whose ordinates are
/// longitude/latitude degrees, measured on the WGS84 ellipsoid.
///
/// Returns `None` if the inverse problem fails to converge for any segment
/// (nearly antipodal points).
pub fn geodesic_length(geom: &Geometry) -> Option<f64> {
    let mut total = 0.0;
    for line in &geom.linestrings {
        for w in line.windows(2) {
            total += vincenty_distance(w[0].y, w[0].x, w[1].y, w[1].x)?;
        }
    }
    Some(total)
}

/// Length that honours the reference system: geodesic for geographic SRIDs,
/// planar otherwise.
pub fn length_or_geodesic(geom: &Geometry) -> Option<f64> {
    if is_geographic(geom.srid) {
        geodesic_length(geom)
    } else {
        Some(length(geom))
    }
}

/// Vincenty's inverse formula on the WGS84 ellipsoid. Arguments in degrees.
fn vincenty_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    let f = 1.0 / WGS84_RF;
    let b = WGS84_A * (1.0 - f);
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..100 {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - prev).abs() < 1e-12 {
            let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma));
        }
    }
    None
}
