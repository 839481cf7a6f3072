use crate::types::{BoundingBox, CorrResult, CorrectionError, GeoTransform};
use ndarray::Array2;

/// Shared, read-only digital elevation model.
///
/// The elevation raster lives on its own grid and is queried per scene:
/// bilinear sampling at world coordinates, and slope/aspect rasters derived
/// on a scene grid by central-difference gradients. The raster itself is
/// supplied by the data source; this type never touches storage.
#[derive(Debug, Clone)]
pub struct TerrainModel {
    elevation: Array2<f32>,
    transform: GeoTransform,
    nodata: f32,
}

impl TerrainModel {
    pub fn new(elevation: Array2<f32>, transform: GeoTransform, nodata: f32) -> Self {
        Self {
            elevation,
            transform,
            nodata,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.elevation.dim()
    }

    /// Bounding box of the elevation grid in world coordinates
    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.elevation.dim();
        let (x0, y0) = self.transform.pixel_to_geo(0.0, 0.0);
        let (x1, y1) = self
            .transform
            .pixel_to_geo(rows as f64 - 1.0, cols as f64 - 1.0);
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    /// Bilinearly interpolated elevation at a world coordinate, or None
    /// outside the grid or over nodata cells.
    pub fn elevation_at(&self, x: f64, y: f64) -> Option<f64> {
        let (rows, cols) = self.elevation.dim();
        let (row, col) = self.transform.geo_to_pixel(x, y).ok()?;
        if row < 0.0 || col < 0.0 {
            return None;
        }

        let r0 = row.floor() as usize;
        let c0 = col.floor() as usize;
        if r0 + 1 >= rows || c0 + 1 >= cols {
            // On the last row/column fall back to the nearest cell
            let rn = (row.round() as usize).min(rows - 1);
            let cn = (col.round() as usize).min(cols - 1);
            let v = self.elevation[[rn, cn]];
            return (v != self.nodata).then_some(v as f64);
        }

        let fr = row - r0 as f64;
        let fc = col - c0 as f64;
        let v00 = self.elevation[[r0, c0]];
        let v01 = self.elevation[[r0, c0 + 1]];
        let v10 = self.elevation[[r0 + 1, c0]];
        let v11 = self.elevation[[r0 + 1, c0 + 1]];
        if v00 == self.nodata || v01 == self.nodata || v10 == self.nodata || v11 == self.nodata {
            return None;
        }

        Some(
            v00 as f64 * (1.0 - fr) * (1.0 - fc)
                + v01 as f64 * (1.0 - fr) * fc
                + v10 as f64 * fr * (1.0 - fc)
                + v11 as f64 * fr * fc,
        )
    }

    /// Slope and aspect rasters (radians) on a scene grid.
    ///
    /// Gradients are central differences over one metric pixel in each
    /// direction. On a geographic grid (EPSG:4326) the metric step is
    /// converted to degrees, with the longitude step shrunk by cos(lat),
    /// so elevation-in-meters DEMs yield true slopes. Aspect is the
    /// downslope direction measured clockwise from north in [0, 2pi);
    /// cells with missing elevation support come out flat (slope 0).
    pub fn slope_aspect(
        &self,
        scene_transform: &GeoTransform,
        dim: (usize, usize),
        pixel_size_m: f64,
        epsg: u32,
    ) -> CorrResult<(Array2<f32>, Array2<f32>)> {
        if pixel_size_m <= 0.0 {
            return Err(CorrectionError::Geometry(format!(
                "pixel size must be positive, got {}",
                pixel_size_m
            )));
        }

        // Meridian arc length of one degree of latitude
        const METERS_PER_DEGREE: f64 = 111_320.0;
        let geographic = epsg == 4326;

        let mut slope = Array2::<f32>::zeros(dim);
        let mut aspect = Array2::<f32>::zeros(dim);

        for r in 0..dim.0 {
            for c in 0..dim.1 {
                let (x, y) = scene_transform.pixel_to_geo(r as f64, c as f64);
                let (step_x, step_y) = if geographic {
                    let cos_lat = y.to_radians().cos().abs().max(1e-6);
                    (
                        pixel_size_m / (METERS_PER_DEGREE * cos_lat),
                        pixel_size_m / METERS_PER_DEGREE,
                    )
                } else {
                    (pixel_size_m, pixel_size_m)
                };

                let east = self.elevation_at(x + step_x, y);
                let west = self.elevation_at(x - step_x, y);
                let north = self.elevation_at(x, y + step_y);
                let south = self.elevation_at(x, y - step_y);

                let (east, west, north, south) = match (east, west, north, south) {
                    (Some(e), Some(w), Some(n), Some(s)) => (e, w, n, s),
                    _ => continue, // leave the cell flat
                };

                let dz_dx = (east - west) / (2.0 * pixel_size_m);
                let dz_dy = (north - south) / (2.0 * pixel_size_m);

                slope[[r, c]] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan() as f32;
                let asp = (-dz_dx).atan2(-dz_dy).rem_euclid(2.0 * std::f64::consts::PI);
                aspect[[r, c]] = asp as f32;
            }
        }

        Ok((slope, aspect))
    }
}
