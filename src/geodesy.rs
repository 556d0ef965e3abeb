//! WGS84 earth geometry and pixel/meter conversions.
//!
//! Everything in this module is a pure function over the current
//! [`MapProjection`]: no state, no side effects. The selected print area is
//! stored in real-world meters and only converted to screen pixels (and back)
//! at the exact moment a viewport or rectangle needs updating.

use serde::{Deserialize, Serialize};

use crate::projection::MapProjection;

// WGS84 ellipsoid.
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const SEMI_MINOR_AXIS: f64 = 6_356_752.314245;
const FLATTENING: f64 = 1.0 / 298.257223563;

// Mean earth radius, used only by the spherical fallback.
const MEAN_RADIUS: f64 = 6_371_008.8;

/// A geographical coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, in `[-90, 90]`.
    pub lat: f64,

    /// Longitude in degrees, in `[-180, 180]`.
    pub lon: f64,
}

impl GeoPoint {
    /// Creates a new `GeoPoint`.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Returns `true` if the coordinate is within the valid WGS84 range.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A width and height in screen pixels.
///
/// Ephemeral: recomputed whenever the projection changes, never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelDimension {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

/// A width and height in meters on the ground, independent of zoom level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RealDimension {
    /// Width in meters.
    pub width: f64,

    /// Height in meters.
    pub height: f64,
}

/// Solves the direct geodesic problem on the WGS84 ellipsoid: the point
/// `distance` meters from `origin` along the initial `bearing` (degrees,
/// clockwise from north). Vincenty's formulae.
pub fn destination_point(origin: GeoPoint, distance: f64, bearing: f64) -> GeoPoint {
    if distance == 0.0 {
        return origin;
    }

    let alpha1 = bearing.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - FLATTENING) * origin.lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (SEMI_MAJOR_AXIS * SEMI_MAJOR_AXIS - SEMI_MINOR_AXIS * SEMI_MINOR_AXIS)
        / (SEMI_MINOR_AXIS * SEMI_MINOR_AXIS);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let mut sigma = distance / (SEMI_MINOR_AXIS * a);
    for _ in 0..100 {
        let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let sin_sigma = sigma.sin();
        let cos_sigma = sigma.cos();
        let delta_sigma = b
            * sin_sigma
            * (cos_2sigma_m
                + b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
        let next = distance / (SEMI_MINOR_AXIS * a) + delta_sigma;
        let done = (next - sigma).abs() < 1e-12;
        sigma = next;
        if done {
            break;
        }
    }

    let sin_sigma = sigma.sin();
    let cos_sigma = sigma.cos();
    let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();

    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - FLATTENING) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = FLATTENING / 16.0 * cos_sq_alpha * (4.0 + FLATTENING * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * FLATTENING
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

    GeoPoint::new(
        lat2.to_degrees(),
        normalize_lon(origin.lon + l.to_degrees()),
    )
}

/// Solves the inverse geodesic problem on the WGS84 ellipsoid: the distance
/// in meters between `a` and `b` along the geodesic connecting them.
///
/// Vincenty's iteration does not converge for near-antipodal points; those
/// fall back to the spherical great-circle distance, which is accurate enough
/// for any input this crate can produce.
pub fn inverse_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let l = (b.lon - a.lon).to_radians();
    let tan_u1 = (1.0 - FLATTENING) * a.lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;
    let tan_u2 = (1.0 - FLATTENING) * b.lat.to_radians().tan();
    let cos_u2 = 1.0 / (1.0 + tan_u2 * tan_u2).sqrt();
    let sin_u2 = tan_u2 * cos_u2;

    let mut lambda = l;
    let mut converged = false;
    let mut sin_sigma = 0.0;
    let mut cos_sigma = 0.0;
    let mut sigma = 0.0;
    let mut cos_sq_alpha = 0.0;
    let mut cos_2sigma_m = 0.0;

    for _ in 0..200 {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // Coincident points.
            return 0.0;
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            // Both points on the equator.
            0.0
        };
        let c = FLATTENING / 16.0 * cos_sq_alpha * (4.0 + FLATTENING * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * FLATTENING
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m
                            + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
        if (lambda - previous).abs() < 1e-12 {
            converged = true;
            break;
        }
    }

    if !converged {
        return great_circle_distance(a, b);
    }

    let u_sq = cos_sq_alpha * (SEMI_MAJOR_AXIS * SEMI_MAJOR_AXIS - SEMI_MINOR_AXIS * SEMI_MINOR_AXIS)
        / (SEMI_MINOR_AXIS * SEMI_MINOR_AXIS);
    let a_coef = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b_coef = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = b_coef
        * sin_sigma
        * (cos_2sigma_m
            + b_coef / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                    - b_coef / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

    SEMI_MINOR_AXIS * a_coef * (sigma - delta_sigma)
}

/// Spherical great-circle distance (haversine). Fallback only.
fn great_circle_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * MEAN_RADIUS * h.sqrt().asin()
}

/// Measures the real-world length in meters spanned by a horizontal run of
/// `width` pixels centered on the current view center.
pub fn pixel_width_to_real_length(projection: &MapProjection, width: u32) -> f64 {
    let center = projection.project(projection.center());
    let half = width as f32 / 2.0;
    let west = projection.unproject(center - egui::vec2(half, 0.0));
    let east = projection.unproject(center + egui::vec2(half, 0.0));
    inverse_distance(west, east)
}

/// Measures the real-world length in meters spanned by a vertical run of
/// `height` pixels centered on the current view center.
pub fn pixel_height_to_real_length(projection: &MapProjection, height: u32) -> f64 {
    let center = projection.project(projection.center());
    let half = height as f32 / 2.0;
    let north = projection.unproject(center - egui::vec2(0.0, half));
    let south = projection.unproject(center + egui::vec2(0.0, half));
    inverse_distance(north, south)
}

/// Converts a real-world width in meters into the horizontal pixel span it
/// covers in the current view: destination points east and west of the view
/// center at half the width, projected and differenced, floored to an
/// integer.
pub fn real_width_to_pixels(projection: &MapProjection, width: f64) -> u32 {
    let center = projection.center();
    let east = destination_point(center, width / 2.0, 90.0);
    let west = destination_point(center, width / 2.0, 270.0);
    let delta = (projection.project(east).x - projection.project(west).x).abs();
    delta.floor() as u32
}

/// Converts a real-world height in meters into the vertical pixel span it
/// covers in the current view. Counterpart of [`real_width_to_pixels`] using
/// north/south bearings.
pub fn real_height_to_pixels(projection: &MapProjection, height: f64) -> u32 {
    let center = projection.center();
    let north = destination_point(center, height / 2.0, 0.0);
    let south = destination_point(center, height / 2.0, 180.0);
    let delta = (projection.project(south).y - projection.project(north).y).abs();
    delta.floor() as u32
}

/// Wraps a longitude into `[-180, 180]`.
fn normalize_lon(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{Rect, pos2};

    // Vincenty's own test line: Flinders Peak to Buninyong.
    const FLINDERS: GeoPoint = GeoPoint {
        lat: -37.951033417,
        lon: 144.424867889,
    };
    const BUNINYONG: GeoPoint = GeoPoint {
        lat: -37.652821139,
        lon: 143.926495528,
    };
    const LINE_LENGTH: f64 = 54_972.271;
    const FORWARD_AZIMUTH: f64 = 306.868158056;

    fn view(center: GeoPoint, zoom: u8) -> MapProjection {
        MapProjection::new(
            zoom,
            center,
            Rect::from_min_max(pos2(0.0, 0.0), pos2(800.0, 600.0)),
        )
    }

    #[test]
    fn direct_problem_reference_line() {
        let destination = destination_point(FLINDERS, LINE_LENGTH, FORWARD_AZIMUTH);
        assert!((destination.lat - BUNINYONG.lat).abs() < 1e-6);
        assert!((destination.lon - BUNINYONG.lon).abs() < 1e-6);
    }

    #[test]
    fn inverse_problem_reference_line() {
        let distance = inverse_distance(FLINDERS, BUNINYONG);
        assert!((distance - LINE_LENGTH).abs() < 1e-2);
    }

    #[test]
    fn direct_zero_distance_is_identity() {
        let origin = GeoPoint::new(46.01, 12.01);
        assert_eq!(destination_point(origin, 0.0, 123.0), origin);
    }

    #[test]
    fn direct_and_inverse_are_consistent() {
        let origin = GeoPoint::new(46.01, 12.01);
        for bearing in [0.0, 90.0, 180.0, 270.0, 37.5] {
            let destination = destination_point(origin, 1000.0, bearing);
            let distance = inverse_distance(origin, destination);
            assert!(
                (distance - 1000.0).abs() < 1e-3,
                "bearing {bearing}: {distance}"
            );
        }
    }

    #[test]
    fn inverse_coincident_points_is_zero() {
        let p = GeoPoint::new(60.16952, 24.93545);
        assert_eq!(inverse_distance(p, p), 0.0);
    }

    #[test]
    fn inverse_near_antipodal_does_not_hang() {
        // Vincenty fails to converge here; the spherical fallback answers.
        let distance = inverse_distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.5, 179.7));
        assert!(distance > 1.9e7 && distance < 2.1e7, "{distance}");
    }

    #[test]
    fn longitude_wraps_across_the_date_line() {
        let destination = destination_point(GeoPoint::new(0.0, 179.999), 10_000.0, 90.0);
        assert!(destination.lon < 0.0, "{}", destination.lon);
        assert!(destination.is_valid());
    }

    #[test]
    fn pixel_real_round_trip_within_one_pixel() {
        // Tolerance is the ground distance of two pixels: one for the
        // integer floor, one for projection rounding.
        for &zoom in &[12u8, 14, 16] {
            for &lat in &[0.0, 46.01, 60.17] {
                let projection = view(GeoPoint::new(lat, 12.01), zoom);
                let meters_per_pixel = pixel_width_to_real_length(&projection, 1);
                for &width in &[500.0, 1500.0, 3000.0] {
                    let pixels = real_width_to_pixels(&projection, width);
                    if pixels == 0 {
                        continue;
                    }
                    let measured = pixel_width_to_real_length(&projection, pixels);
                    assert!(
                        (measured - width).abs() <= 2.0 * meters_per_pixel,
                        "zoom {zoom} lat {lat} width {width}: measured {measured}"
                    );
                }
            }
        }
    }

    #[test]
    fn pixel_real_round_trip_height() {
        let projection = view(GeoPoint::new(46.01, 12.01), 14);
        let meters_per_pixel = pixel_height_to_real_length(&projection, 1);
        for &height in &[500.0, 1500.0, 3000.0] {
            let pixels = real_height_to_pixels(&projection, height);
            let measured = pixel_height_to_real_length(&projection, pixels);
            assert!(
                (measured - height).abs() <= 2.0 * meters_per_pixel,
                "height {height}: measured {measured}"
            );
        }
    }

    #[test]
    fn geo_point_validity() {
        assert!(GeoPoint::new(46.01, 12.01).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
    }
}
