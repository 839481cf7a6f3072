use crate::types::{
    CorrResult, CorrectionError, Footprint, GeoTransform, MaskImage, SceneMetadata,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::Array2;
use std::f64::consts::PI;

/// Largest off-nadir scan angle of the supported sensors (degrees)
pub const MAX_SATELLITE_ZENITH: f64 = 7.5;

/// Cap on point-to-edge distances when weighting the cross-track
/// position, in CRS units
const MAX_DISTANCE: f64 = 1_000_000.0;

/// Hour angle of the sun changes by 15 degrees per true solar hour
const DEGREES_PER_HOUR: f64 = 15.0;

/// Equation-of-time Fourier coefficients over the day angle
const EQUATION_OF_TIME: [f64; 5] = [0.000075, 0.001868, 0.032077, 0.014615, 0.040849];

/// Solar declination Fourier coefficients over the day angle
const DECLINATION: [f64; 7] = [
    0.006918, 0.399912, 0.070257, 0.006758, 0.000907, 0.002697, 0.001480,
];

/// Per-pixel solar and sensor angles for one scene, in radians.
///
/// Azimuths are north-referenced, turning clockwise, in [0, 2pi).
/// Only pixels inside the footprint polygon carry meaningful angles.
#[derive(Debug, Clone)]
pub struct ViewingGeometry {
    pub sun_azimuth: Array2<f32>,
    pub sun_zenith: Array2<f32>,
    pub view_azimuth: Array2<f32>,
    pub view_zenith: Array2<f32>,
    pub footprint_mask: MaskImage,
}

/// Compute solar and sensor viewing geometry for a scene grid from its
/// acquisition timestamp and footprint.
pub fn compute_viewing_geometry(
    metadata: &SceneMetadata,
    dim: (usize, usize),
) -> CorrResult<ViewingGeometry> {
    if metadata.epsg != 4326 {
        return Err(CorrectionError::Geometry(format!(
            "per-pixel solar geometry needs a geographic grid (EPSG:4326), scene {} is EPSG:{}",
            metadata.scene_id, metadata.epsg
        )));
    }

    let (lon, lat) = world_grids(&metadata.geo_transform, dim);
    let (sun_azimuth, sun_zenith) = sun_angles(metadata.acquired, &lon, &lat);
    let va = view_azimuth(&metadata.footprint)?;
    let view_zenith = view_zenith(&metadata.footprint, &lon, &lat)?;

    let mut footprint_mask = Array2::from_elem(dim, false);
    for ((r, c), inside) in footprint_mask.indexed_iter_mut() {
        *inside = metadata.footprint.contains(lon[[r, c]], lat[[r, c]]);
    }

    log::debug!(
        "Viewing geometry for {}: view azimuth {:.4} rad",
        metadata.scene_id,
        va
    );

    Ok(ViewingGeometry {
        sun_azimuth,
        sun_zenith,
        view_azimuth: Array2::from_elem(dim, va as f32),
        view_zenith,
        footprint_mask,
    })
}

/// Per-pixel world coordinate grids (x, y) of a scene grid
pub fn world_grids(gt: &GeoTransform, dim: (usize, usize)) -> (Array2<f64>, Array2<f64>) {
    let mut xs = Array2::zeros(dim);
    let mut ys = Array2::zeros(dim);
    for r in 0..dim.0 {
        for c in 0..dim.1 {
            let (x, y) = gt.pixel_to_geo(r as f64, c as f64);
            xs[[r, c]] = x;
            ys[[r, c]] = y;
        }
    }
    (xs, ys)
}

/// Fraction of the year elapsed at the given instant, in [0, 1)
pub fn year_fraction(t: DateTime<Utc>) -> f64 {
    let days_in_year = if t.date_naive().leap_year() { 366.0 } else { 365.0 };
    let seconds_of_day = t.num_seconds_from_midnight() as f64;
    ((t.ordinal() - 1) as f64 + seconds_of_day / 86_400.0) / days_in_year
}

/// Per-pixel sun azimuth and zenith (radians) from the acquisition
/// timestamp and longitude/latitude grids in degrees.
///
/// Local solar time is mean solar time (longitude and GMT hour) corrected
/// by the equation of time; declination comes from the 7-term Fourier
/// series. The azimuth is first computed south-referenced turning west,
/// quadrant-corrected, then shifted to north-referenced in [0, 2pi).
pub fn sun_angles(
    acquired: DateTime<Utc>,
    lon_deg: &Array2<f64>,
    lat_deg: &Array2<f64>,
) -> (Array2<f32>, Array2<f32>) {
    let dim = lon_deg.dim();
    let jdpr = year_fraction(acquired) * 2.0 * PI;
    let hour_gmt = acquired.num_seconds_from_midnight() as f64 / 3600.0;

    let a = EQUATION_OF_TIME;
    let eot = a[0] + a[1] * jdpr.cos() - a[2] * jdpr.sin() - a[3] * (2.0 * jdpr).cos()
        - a[4] * (2.0 * jdpr).sin();
    let solar_diff_minutes = eot * 12.0 * 60.0 / PI;

    let b = DECLINATION;
    let declination = b[0] - b[1] * jdpr.cos() + b[2] * jdpr.sin()
        - b[3] * (2.0 * jdpr).cos()
        + b[4] * (2.0 * jdpr).sin()
        - b[5] * (3.0 * jdpr).cos()
        + b[6] * (3.0 * jdpr).sin();

    let mut azimuth = Array2::zeros(dim);
    let mut zenith = Array2::zeros(dim);

    for ((r, c), az_out) in azimuth.indexed_iter_mut() {
        let lat = lat_deg[[r, c]].to_radians();
        let mean_solar_time = lon_deg[[r, c]] / DEGREES_PER_HOUR + hour_gmt;
        let true_solar_time = mean_solar_time + solar_diff_minutes / 60.0 - 12.0;
        let hour_angle = (true_solar_time * DEGREES_PER_HOUR).to_radians();

        let cos_zen = (lat.sin() * declination.sin()
            + lat.cos() * hour_angle.cos() * declination.cos())
        .clamp(-1.0, 1.0);
        let zen = cos_zen.acos();
        zenith[[r, c]] = zen as f32;

        let sin_zen = zen.sin();
        let az = if sin_zen < 1e-9 {
            // Sun at the exact zenith; azimuth is arbitrary
            PI
        } else {
            // South-referenced azimuth, turning west
            let sin_az_sw = (hour_angle.sin() * declination.cos() / sin_zen).clamp(-1.0, 1.0);
            let cos_az_sw = (-lat.cos() * declination.sin()
                + lat.sin() * declination.cos() * hour_angle.cos())
                / sin_zen;
            let mut az_sw = sin_az_sw.asin();
            if cos_az_sw <= 0.0 {
                az_sw = PI - az_sw;
            } else if sin_az_sw <= 0.0 {
                az_sw += 2.0 * PI;
            }
            let mut az = az_sw + PI;
            if az > 2.0 * PI {
                az -= 2.0 * PI;
            }
            az
        };
        *az_out = az as f32;
    }

    (azimuth, zenith)
}

/// Sensor view azimuth (radians) from the footprint shape: the midpoint of
/// the top edge minus the midpoint of the bottom edge gives the
/// along-track direction; the view azimuth is its perpendicular, offset by
/// pi/2.
pub fn view_azimuth(footprint: &Footprint) -> CorrResult<f64> {
    let [ulx, uly] = footprint.upper_left();
    let [urx, ury] = footprint.upper_right();
    let [llx, lly] = footprint.lower_left();
    let [lrx, lry] = footprint.lower_right();

    let upper_center = [(ulx + urx) / 2.0, (uly + ury) / 2.0];
    let lower_center = [(llx + lrx) / 2.0, (lly + lry) / 2.0];

    let dx = lower_center[0] - upper_center[0];
    let dy = lower_center[1] - upper_center[1];
    if dx == 0.0 && dy == 0.0 {
        return Err(CorrectionError::Geometry(
            "degenerate footprint: top and bottom edge midpoints coincide".to_string(),
        ));
    }

    // Perpendicular of the along-track slope dy/dx
    let slope_perp = -dx / dy;
    Ok(PI / 2.0 - slope_perp.atan())
}

/// Per-pixel sensor view zenith (radians): linear across the scan width
/// between +max and -max zenith, weighted by each pixel's distance to the
/// left and right scene-edge lines.
pub fn view_zenith(
    footprint: &Footprint,
    x: &Array2<f64>,
    y: &Array2<f64>,
) -> CorrResult<Array2<f32>> {
    let left_a = footprint.upper_left();
    let left_b = footprint.lower_left();
    let right_a = footprint.upper_right();
    let right_b = footprint.lower_right();

    let dim = x.dim();
    let mut zenith = Array2::zeros(dim);
    for ((r, c), out) in zenith.indexed_iter_mut() {
        let p = [x[[r, c]], y[[r, c]]];
        let left = point_segment_distance(p, left_a, left_b).min(MAX_DISTANCE);
        let right = point_segment_distance(p, right_a, right_b).min(MAX_DISTANCE);
        let width = left + right;
        let deg = if width < f64::EPSILON {
            0.0
        } else {
            right * (2.0 * MAX_SATELLITE_ZENITH) / width - MAX_SATELLITE_ZENITH
        };
        *out = deg.to_radians() as f32;
    }
    Ok(zenith)
}

/// Euclidean distance from a point to a line segment
fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let apx = p[0] - a[0];
    let apy = p[1] - a[1];
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq < f64::EPSILON {
        0.0
    } else {
        ((apx * abx + apy * aby) / len_sq).clamp(0.0, 1.0)
    };
    let cx = a[0] + t * abx - p[0];
    let cy = a[1] + t * aby - p[1];
    (cx * cx + cy * cy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grid_of(value: f64) -> Array2<f64> {
        Array2::from_elem((1, 1), value)
    }

    #[test]
    fn test_sun_angles_no_nan_over_latitudes() {
        let t = Utc.with_ymd_and_hms(2019, 6, 21, 12, 0, 0).unwrap();
        for lat10 in -900..=900 {
            let lat = lat10 as f64 / 10.0;
            let (az, zen) = sun_angles(t, &grid_of(0.0), &grid_of(lat));
            assert!(az[[0, 0]].is_finite(), "azimuth NaN at lat {}", lat);
            assert!(zen[[0, 0]].is_finite(), "zenith NaN at lat {}", lat);
            assert!(az[[0, 0]] >= 0.0 && az[[0, 0]] < 2.0 * std::f32::consts::PI + 1e-6);
        }
    }

    #[test]
    fn test_sun_angles_no_nan_over_day_fractions() {
        for day in 1..=365 {
            let t = Utc.with_ymd_and_hms(2019, 1, 1, 15, 30, 0).unwrap()
                + chrono::Duration::days(day - 1);
            let (az, zen) = sun_angles(t, &grid_of(-43.0), &grid_of(-22.9));
            assert!(az[[0, 0]].is_finite());
            assert!(zen[[0, 0]].is_finite());
        }
    }

    #[test]
    fn test_longitude_wrap_invariance() {
        let t = Utc.with_ymd_and_hms(2019, 9, 10, 14, 0, 0).unwrap();
        let (az_a, zen_a) = sun_angles(t, &grid_of(-43.0), &grid_of(-22.9));
        // A longitude shifted by 360 degrees is the same meridian one mean
        // solar day later in hour angle terms; the trig must agree.
        let (az_b, zen_b) = sun_angles(t, &grid_of(-43.0 + 360.0), &grid_of(-22.9));
        let two_pi = 2.0 * std::f32::consts::PI;
        let d_az = (az_a[[0, 0]] - az_b[[0, 0]]).rem_euclid(two_pi);
        assert!(d_az.min(two_pi - d_az) < 1e-4);
        assert!((zen_a[[0, 0]] - zen_b[[0, 0]]).abs() < 1e-5);
    }

    #[test]
    fn test_noon_equator_equinox_is_near_zenith() {
        // Around the March equinox, local solar noon at the prime meridian
        // puts the sun close to straight overhead at the equator.
        let t = Utc.with_ymd_and_hms(2019, 3, 21, 12, 0, 0).unwrap();
        let (_, zen) = sun_angles(t, &grid_of(0.0), &grid_of(0.0));
        assert!(zen[[0, 0]].abs() < 0.05, "zenith was {}", zen[[0, 0]]);
    }

    #[test]
    fn test_view_azimuth_north_south_track() {
        // A perfectly north-south rectangular footprint: along-track points
        // due south, so the cross-track view azimuth is pi/2 (due east).
        let footprint = Footprint::from_coords(&[
            [0.0, 1.0],
            [0.0, 0.0],
            [0.5, 0.0],
            [0.5, 1.0],
        ])
        .unwrap();
        let az = view_azimuth(&footprint).unwrap();
        assert!((az - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_view_zenith_spans_scan_width() {
        let footprint = Footprint::from_coords(&[
            [0.0, 1.0],
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
        ])
        .unwrap();
        let max_rad = MAX_SATELLITE_ZENITH.to_radians() as f32;

        // On the left edge the zenith is +max, on the right edge -max,
        // in the middle zero.
        let left = view_zenith(&footprint, &grid_of(0.0), &grid_of(0.5)).unwrap();
        assert!((left[[0, 0]] - max_rad).abs() < 1e-6);
        let right = view_zenith(&footprint, &grid_of(1.0), &grid_of(0.5)).unwrap();
        assert!((right[[0, 0]] + max_rad).abs() < 1e-6);
        let center = view_zenith(&footprint, &grid_of(0.5), &grid_of(0.5)).unwrap();
        assert!(center[[0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_point_segment_distance() {
        let d = point_segment_distance([1.0, 1.0], [0.0, 0.0], [0.0, 2.0]);
        assert!((d - 1.0).abs() < 1e-12);
        // Beyond the segment end the distance is to the endpoint
        let d = point_segment_distance([0.0, 3.0], [0.0, 0.0], [0.0, 2.0]);
        assert!((d - 1.0).abs() < 1e-12);
    }
}
