use crate::types::{CorrResult, CorrectionError, RasterImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Bands summed and z-scored for temporal shadow detection
const SHADOW_SUM_BANDS: [&str; 2] = ["nir", "swir1"];

/// Thresholds for the temporal dark-outlier shadow filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdomParams {
    /// A pixel is a shadow candidate when both bands fall below this
    /// z-score relative to the series
    pub z_shadow_threshold: f32,
    /// Upper bound on nir + swir1 reflectance for a shadow candidate
    pub sum_threshold: f32,
    /// Minimum valid observations per pixel before the statistics are used
    pub min_samples: usize,
}

impl Default for TdomParams {
    fn default() -> Self {
        Self {
            z_shadow_threshold: -1.2,
            sum_threshold: 0.4,
            min_samples: 2,
        }
    }
}

/// Temporal dark-outlier filter over a series of co-located scenes.
///
/// Masks pixels that are dark outliers of the series, and dark: a pixel is
/// flagged only when both nir and swir1 drop below the z-score threshold
/// AND the summed reflectance is low. Genuinely dark surfaces with low
/// temporal variance never cross the z-score gate.
///
/// This is a reduce-then-map pass: the whole series is needed before any
/// per-scene mask can be produced.
pub struct TdomFilter {
    params: TdomParams,
}

impl TdomFilter {
    pub fn new() -> Self {
        Self {
            params: TdomParams::default(),
        }
    }

    pub fn with_params(params: TdomParams) -> Self {
        Self { params }
    }

    /// Apply the filter, returning a new series with shadow outliers ANDed
    /// out of each scene's mask. Scene order is preserved.
    pub fn apply(&self, scenes: &[RasterImage]) -> CorrResult<Vec<RasterImage>> {
        if scenes.is_empty() {
            return Ok(Vec::new());
        }
        let dim = scenes[0].dim();
        for scene in scenes {
            if scene.dim() != dim {
                return Err(CorrectionError::ShapeMismatch(format!(
                    "scene {} is {:?}, series grid is {:?}",
                    scene.metadata.scene_id,
                    scene.dim(),
                    dim
                )));
            }
            for name in SHADOW_SUM_BANDS {
                scene.band(name)?;
            }
        }

        log::info!(
            "TDOM filter over {} scenes ({} x {})",
            scenes.len(),
            dim.0,
            dim.1
        );

        // Per-pixel temporal mean and population stddev for each band,
        // accumulated over valid pixels only so the statistics stay correct
        // under earlier masking.
        let stats: Vec<BandStats> = SHADOW_SUM_BANDS
            .iter()
            .map(|name| self.accumulate(scenes, name))
            .collect::<CorrResult<_>>()?;

        let mut output = Vec::with_capacity(scenes.len());
        for scene in scenes {
            let nir = scene.band(SHADOW_SUM_BANDS[0])?;
            let swir1 = scene.band(SHADOW_SUM_BANDS[1])?;

            let mut keep = Array2::from_elem(dim, true);
            for ((r, c), keep_px) in keep.indexed_iter_mut() {
                let z_nir = stats[0].z_score(r, c, nir[[r, c]], self.params.min_samples);
                let z_swir = stats[1].z_score(r, c, swir1[[r, c]], self.params.min_samples);
                let dark_sum = nir[[r, c]] + swir1[[r, c]] < self.params.sum_threshold;
                let outlier = match (z_nir, z_swir) {
                    (Some(zn), Some(zs)) => {
                        zn < self.params.z_shadow_threshold
                            && zs < self.params.z_shadow_threshold
                    }
                    _ => false,
                };
                *keep_px = !(outlier && dark_sum);
            }

            let flagged = keep.iter().filter(|&&k| !k).count();
            if flagged > 0 {
                log::debug!(
                    "TDOM flagged {} pixels in scene {}",
                    flagged,
                    scene.metadata.scene_id
                );
            }
            output.push(scene.and_mask(&keep)?);
        }
        Ok(output)
    }

    fn accumulate(&self, scenes: &[RasterImage], band: &str) -> CorrResult<BandStats> {
        let dim = scenes[0].dim();
        let mut sum = Array2::<f64>::zeros(dim);
        let mut sum_sq = Array2::<f64>::zeros(dim);
        let mut count = Array2::<u32>::zeros(dim);

        for scene in scenes {
            let data = scene.band(band)?;
            let mask = scene.mask();
            for ((r, c), &v) in data.indexed_iter() {
                if mask[[r, c]] {
                    let v = v as f64;
                    sum[[r, c]] += v;
                    sum_sq[[r, c]] += v * v;
                    count[[r, c]] += 1;
                }
            }
        }
        Ok(BandStats { sum, sum_sq, count })
    }
}

impl Default for TdomFilter {
    fn default() -> Self {
        Self::new()
    }
}

struct BandStats {
    sum: Array2<f64>,
    sum_sq: Array2<f64>,
    count: Array2<u32>,
}

impl BandStats {
    /// z-score of a value against the pixel's temporal statistics, or None
    /// when the sample count or the variance is too small to support one.
    fn z_score(&self, r: usize, c: usize, value: f32, min_samples: usize) -> Option<f32> {
        let n = self.count[[r, c]] as f64;
        if (n as usize) < min_samples {
            return None;
        }
        let mean = self.sum[[r, c]] / n;
        let variance = (self.sum_sq[[r, c]] / n - mean * mean).max(0.0);
        let std_dev = variance.sqrt();
        if std_dev < 1e-12 {
            return None;
        }
        Some(((value as f64 - mean) / std_dev) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Footprint, GeoTransform, SceneMetadata, Sensor};
    use chrono::{Duration, TimeZone, Utc};
    use ndarray::Array2;

    fn series_scene(index: usize, nir: f32, swir1: f32) -> RasterImage {
        let metadata = SceneMetadata {
            scene_id: format!("S2_{:03}", index),
            sensor: Sensor::Sentinel2,
            acquired: Utc.with_ymd_and_hms(2019, 1, 1, 10, 30, 0).unwrap()
                + Duration::days(10 * index as i64),
            footprint: Footprint::from_coords(&[
                [0.0, 1.0],
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
            ])
            .unwrap(),
            epsg: 32723,
            pixel_size: 10.0,
            geo_transform: GeoTransform::north_up(0.0, 1.0, 10.0),
            sun_zenith_deg: None,
            sun_azimuth_deg: None,
        };
        RasterImage::new(
            metadata,
            vec![
                ("nir".to_string(), Array2::from_elem((2, 2), nir)),
                ("swir1".to_string(), Array2::from_elem((2, 2), swir1)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_dark_outlier_scene_is_masked() {
        // Nine bright scenes and one dark outlier well below the series mean
        let mut scenes: Vec<RasterImage> =
            (0..9).map(|i| series_scene(i, 0.30, 0.25)).collect();
        scenes.push(series_scene(9, 0.02, 0.01));

        let filtered = TdomFilter::new().apply(&scenes).unwrap();
        assert_eq!(filtered.len(), 10);
        for scene in &filtered[..9] {
            assert_eq!(scene.valid_count(), 4, "bright scenes must stay valid");
        }
        assert_eq!(filtered[9].valid_count(), 0, "outlier scene must be masked");
    }

    #[test]
    fn test_dark_but_stable_pixels_survive() {
        // Uniformly dark series: sum < 0.4 everywhere, but no temporal
        // outlier, so nothing may be flagged.
        let scenes: Vec<RasterImage> = (0..10).map(|i| series_scene(i, 0.05, 0.04)).collect();
        let filtered = TdomFilter::new().apply(&scenes).unwrap();
        for scene in &filtered {
            assert_eq!(scene.valid_count(), 4);
        }
    }

    #[test]
    fn test_bright_outlier_not_flagged() {
        // An outlier on the bright side fails the dark-sum gate
        let mut scenes: Vec<RasterImage> =
            (0..9).map(|i| series_scene(i, 0.10, 0.08)).collect();
        scenes.push(series_scene(9, 0.90, 0.80));

        let filtered = TdomFilter::new().apply(&scenes).unwrap();
        assert_eq!(filtered[9].valid_count(), 4);
    }

    #[test]
    fn test_missing_band_fails_fast() {
        let metadata = series_scene(0, 0.3, 0.3).metadata.clone();
        let incomplete = RasterImage::new(
            metadata,
            vec![("nir".to_string(), Array2::from_elem((2, 2), 0.3))],
        )
        .unwrap();
        let result = TdomFilter::new().apply(&[incomplete]);
        assert!(matches!(result, Err(CorrectionError::MissingInput(_))));
    }
}
