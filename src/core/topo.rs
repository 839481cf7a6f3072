use crate::io::dem::TerrainModel;
use crate::types::{
    BandImage, CorrResult, CorrectionError, MaskImage, RasterImage, STANDARD_BANDS,
};
use ndarray::Array2;

/// Parameters for the SCS+C topographic correction
#[derive(Debug, Clone)]
pub struct TopoCorrectionParams {
    /// Terrain flatter than this never enters the fit sample (degrees)
    pub min_slope_deg: f32,
    /// Lower bound on the illumination condition for fit samples
    pub min_illumination: f32,
    /// Lower bound on nir reflectance for fit samples
    pub min_nir: f32,
    /// Interior erosion of the scene before fitting, in CRS units
    pub edge_buffer: f64,
    /// Below this many fit samples the band passes through uncorrected
    pub min_fit_samples: usize,
}

impl Default for TopoCorrectionParams {
    fn default() -> Self {
        Self {
            min_slope_deg: 5.0,
            min_illumination: 0.0,
            min_nir: -0.1,
            edge_buffer: 100.0,
            min_fit_samples: 10,
        }
    }
}

/// Sun-Canopy-Sensor + C topographic normalization.
///
/// Fits a per-band linear relationship between the illumination condition
/// and reflectance over well-illuminated sloped terrain, then rescales each
/// band by (cos(slope)cos(Z) + c)/(IC + c). Pixels outside the fit
/// sub-mask keep their original values; the image mask is not narrowed.
pub struct TopoCorrector {
    params: TopoCorrectionParams,
}

impl TopoCorrector {
    pub fn new() -> Self {
        Self {
            params: TopoCorrectionParams::default(),
        }
    }

    pub fn with_params(params: TopoCorrectionParams) -> Self {
        Self { params }
    }

    /// Correct the six standard bands of a scene against the terrain model.
    /// Bands outside the standard list pass through unchanged.
    pub fn apply(&self, image: &RasterImage, terrain: &TerrainModel) -> CorrResult<RasterImage> {
        let metadata = &image.metadata;
        let sun_zenith = metadata
            .sun_zenith_deg
            .ok_or_else(|| {
                CorrectionError::MissingInput(format!(
                    "scene {} carries no solar zenith angle",
                    metadata.scene_id
                ))
            })?
            .to_radians();
        let sun_azimuth = metadata
            .sun_azimuth_deg
            .ok_or_else(|| {
                CorrectionError::MissingInput(format!(
                    "scene {} carries no solar azimuth angle",
                    metadata.scene_id
                ))
            })?
            .to_radians();

        let (slope, aspect) = terrain.slope_aspect(
            &metadata.geo_transform,
            image.dim(),
            metadata.pixel_size,
            metadata.epsg,
        )?;
        let ic = illumination_condition(sun_zenith, sun_azimuth, &slope, &aspect);

        let cos_z = sun_zenith.cos() as f32;
        let cos_slope = slope.mapv(f32::cos);

        let sample_mask = self.sample_mask(image, &slope, &ic)?;
        let interior = self.interior_mask(image.dim(), metadata.pixel_size);

        log::info!(
            "Topographic correction for scene {}: {} fit-sample pixels",
            metadata.scene_id,
            sample_mask.iter().filter(|&&m| m).count()
        );

        let mut bands = Vec::with_capacity(image.band_names().len());
        for (name, band) in image.iter_bands() {
            if !STANDARD_BANDS.contains(&name) {
                bands.push((name.to_string(), band.clone()));
                continue;
            }
            let corrected = match self.fit_band(name, band, &ic, &sample_mask, &interior) {
                Ok((fit_slope, fit_offset)) => {
                    let c = fit_offset / fit_slope;
                    apply_scs_c(band, &ic, &cos_slope, cos_z, c, &sample_mask)
                }
                Err(CorrectionError::DegenerateFit { reason, .. }) => {
                    log::warn!(
                        "scene {}: band '{}' passes through uncorrected ({})",
                        metadata.scene_id,
                        name,
                        reason
                    );
                    band.clone()
                }
                Err(e) => return Err(e),
            };
            bands.push((name.to_string(), corrected));
        }

        image.with_bands(bands)
    }

    /// Sub-mask governing the linear-fit sample population: sloped,
    /// positively illuminated, positive-nir pixels that are also valid.
    fn sample_mask(
        &self,
        image: &RasterImage,
        slope: &Array2<f32>,
        ic: &Array2<f32>,
    ) -> CorrResult<MaskImage> {
        let nir = image.band("nir")?;
        let min_slope = self.params.min_slope_deg.to_radians();

        let mut mask = image.mask().clone();
        for ((r, c), m) in mask.indexed_iter_mut() {
            *m = *m
                && slope[[r, c]] >= min_slope
                && ic[[r, c]] >= self.params.min_illumination
                && nir[[r, c]] > self.params.min_nir;
        }
        Ok(mask)
    }

    /// Pixels at least edge_buffer away from the grid border
    fn interior_mask(&self, dim: (usize, usize), pixel_size: f64) -> MaskImage {
        let margin = (self.params.edge_buffer / pixel_size).ceil() as usize;
        let mut mask = Array2::from_elem(dim, false);
        if dim.0 > 2 * margin && dim.1 > 2 * margin {
            for r in margin..dim.0 - margin {
                for c in margin..dim.1 - margin {
                    mask[[r, c]] = true;
                }
            }
        }
        mask
    }

    /// Ordinary least-squares line reflectance = a * IC + b over the
    /// sampled interior pixels.
    fn fit_band(
        &self,
        name: &str,
        band: &BandImage,
        ic: &Array2<f32>,
        sample_mask: &MaskImage,
        interior: &MaskImage,
    ) -> CorrResult<(f32, f32)> {
        let mut n = 0usize;
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut sum_xx = 0.0f64;
        let mut sum_xy = 0.0f64;

        for ((r, c), &keep) in sample_mask.indexed_iter() {
            if !keep || !interior[[r, c]] {
                continue;
            }
            let x = ic[[r, c]] as f64;
            let y = band[[r, c]] as f64;
            n += 1;
            sum_x += x;
            sum_y += y;
            sum_xx += x * x;
            sum_xy += x * y;
        }

        if n < self.params.min_fit_samples {
            return Err(CorrectionError::DegenerateFit {
                band: name.to_string(),
                reason: format!("{} samples, need {}", n, self.params.min_fit_samples),
            });
        }

        let nf = n as f64;
        let denom = nf * sum_xx - sum_x * sum_x;
        if denom.abs() < 1e-12 {
            return Err(CorrectionError::DegenerateFit {
                band: name.to_string(),
                reason: "illumination has no variance over the sample".to_string(),
            });
        }

        let a = (nf * sum_xy - sum_x * sum_y) / denom;
        let b = (sum_y - a * sum_x) / nf;
        if a.abs() < 1e-12 {
            return Err(CorrectionError::DegenerateFit {
                band: name.to_string(),
                reason: "fitted slope is zero".to_string(),
            });
        }

        Ok((a as f32, b as f32))
    }
}

impl Default for TopoCorrector {
    fn default() -> Self {
        Self::new()
    }
}

/// Illumination condition raster:
/// IC = cos(slope)cos(Z) + sin(Z)sin(slope)cos(sunAz - aspect)
pub fn illumination_condition(
    sun_zenith: f64,
    sun_azimuth: f64,
    slope: &Array2<f32>,
    aspect: &Array2<f32>,
) -> Array2<f32> {
    let cos_z = sun_zenith.cos();
    let sin_z = sun_zenith.sin();
    let mut ic = Array2::zeros(slope.dim());
    for ((r, c), out) in ic.indexed_iter_mut() {
        let s = slope[[r, c]] as f64;
        let a = aspect[[r, c]] as f64;
        *out = (s.cos() * cos_z + sin_z * s.sin() * (sun_azimuth - a).cos()) as f32;
    }
    ic
}

/// corrected = band * (cos(slope)cos(Z) + c) / (IC + c), only where the
/// sample sub-mask holds; elsewhere (and for non-finite output) the
/// original value is restored.
fn apply_scs_c(
    band: &BandImage,
    ic: &Array2<f32>,
    cos_slope: &Array2<f32>,
    cos_z: f32,
    c: f32,
    sample_mask: &MaskImage,
) -> BandImage {
    let mut out = band.clone();
    for ((r, col), v) in out.indexed_iter_mut() {
        if !sample_mask[[r, col]] {
            continue;
        }
        let corrected = *v * (cos_slope[[r, col]] * cos_z + c) / (ic[[r, col]] + c);
        if corrected.is_finite() {
            *v = corrected;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Footprint, GeoTransform, SceneMetadata, Sensor};
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn scene_metadata(dim: (usize, usize), pixel_size: f64) -> SceneMetadata {
        SceneMetadata {
            scene_id: "TOPO_TEST".to_string(),
            sensor: Sensor::Landsat8,
            acquired: Utc.with_ymd_and_hms(2019, 5, 20, 13, 0, 0).unwrap(),
            footprint: Footprint::from_coords(&[
                [0.0, 0.0],
                [0.0, -(dim.0 as f64) * pixel_size],
                [dim.1 as f64 * pixel_size, -(dim.0 as f64) * pixel_size],
                [dim.1 as f64 * pixel_size, 0.0],
            ])
            .unwrap(),
            epsg: 32723,
            pixel_size,
            geo_transform: GeoTransform::north_up(0.0, 0.0, pixel_size),
            sun_zenith_deg: Some(42.0),
            sun_azimuth_deg: Some(80.0),
        }
    }

    fn standard_image(dim: (usize, usize), pixel_size: f64) -> RasterImage {
        let bands = STANDARD_BANDS
            .iter()
            .enumerate()
            .map(|(i, n)| {
                (
                    n.to_string(),
                    Array2::from_elem(dim, 0.1 + 0.05 * i as f32),
                )
            })
            .collect();
        RasterImage::new(scene_metadata(dim, pixel_size), bands).unwrap()
    }

    #[test]
    fn test_flat_scene_passes_through_unchanged() {
        // Flat terrain never reaches the 5 degree slope gate, so every
        // pixel keeps its original value.
        let dim = (12, 12);
        let image = standard_image(dim, 30.0);
        let dem = Array2::<f32>::from_elem((40, 40), 500.0);
        let terrain = TerrainModel::new(
            dem,
            GeoTransform::north_up(-300.0, 300.0, 30.0),
            -32768.0,
        );

        let corrected = TopoCorrector::new().apply(&image, &terrain).unwrap();
        for name in STANDARD_BANDS {
            let orig = image.band(name).unwrap();
            let corr = corrected.band(name).unwrap();
            for (&a, &b) in orig.iter().zip(corr.iter()) {
                assert_eq!(a, b);
            }
        }
        // The output mask is the input mask, not narrowed by the sub-mask
        assert_eq!(corrected.valid_count(), image.valid_count());
    }

    #[test]
    fn test_flat_ic_equals_cos_zenith() {
        let slope = Array2::<f32>::zeros((3, 3));
        let aspect = Array2::<f32>::zeros((3, 3));
        let sun_zenith = 42.0f64.to_radians();
        let ic = illumination_condition(sun_zenith, 1.5, &slope, &aspect);
        for &v in ic.iter() {
            assert_abs_diff_eq!(v, sun_zenith.cos() as f32, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_scsc_identity_when_ic_matches_flat_cosine() {
        // With slope = 0, cosB = 1 and IC = cosZ: the ratio collapses to 1
        // for any finite c.
        let band = Array2::from_elem((4, 4), 0.3f32);
        let cos_z = 42.0f32.to_radians().cos();
        let ic = Array2::from_elem((4, 4), cos_z);
        let cos_slope = Array2::from_elem((4, 4), 1.0f32);
        let mask = Array2::from_elem((4, 4), true);

        let corrected = apply_scs_c(&band, &ic, &cos_slope, cos_z, 0.7, &mask);
        for (&a, &b) in corrected.iter().zip(band.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_missing_sun_angles_fail_scene() {
        let dim = (6, 6);
        let mut image = standard_image(dim, 30.0);
        image.metadata.sun_zenith_deg = None;
        let dem = Array2::<f32>::zeros((20, 20));
        let terrain =
            TerrainModel::new(dem, GeoTransform::north_up(-150.0, 150.0, 30.0), -32768.0);

        let result = TopoCorrector::new().apply(&image, &terrain);
        assert!(matches!(result, Err(CorrectionError::MissingInput(_))));
    }

    #[test]
    fn test_degenerate_fit_passes_band_through() {
        // A tilted-plane DEM gives slope above the gate, but a tiny scene
        // leaves no interior samples after the 100 m erosion, so the fit is
        // degenerate and bands pass through.
        let dim = (6, 6);
        let image = standard_image(dim, 30.0);
        let mut dem = Array2::<f32>::zeros((30, 30));
        for ((_, c), v) in dem.indexed_iter_mut() {
            *v = c as f32 * 30.0 * 0.3; // ~17 degree east-facing ramp
        }
        let terrain =
            TerrainModel::new(dem, GeoTransform::north_up(-300.0, 300.0, 30.0), -32768.0);

        let corrected = TopoCorrector::new().apply(&image, &terrain).unwrap();
        for name in STANDARD_BANDS {
            let orig = image.band(name).unwrap();
            let corr = corrected.band(name).unwrap();
            for (&a, &b) in orig.iter().zip(corr.iter()) {
                assert_eq!(a, b);
            }
        }
    }
}
