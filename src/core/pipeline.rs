use crate::core::brdf::BrdfCorrector;
use crate::core::cloud_mask::{CloudMaskParams, CloudMasker};
use crate::core::coregister::CoRegistration;
use crate::core::harmonize::band_adjustment_landsat8;
use crate::core::resample::Resampler;
use crate::core::tdom::{TdomFilter, TdomParams};
use crate::core::topo::TopoCorrector;
use crate::io::dem::TerrainModel;
use crate::types::{
    BandImage, CorrResult, CorrectionError, MaskImage, RasterImage, Sensor,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Source-to-common band name mapping for one sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandMapping {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

impl BandMapping {
    fn landsat7() -> Self {
        Self {
            input: ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7"]
                .map(String::from)
                .to_vec(),
            output: ["blue", "green", "red", "nir", "swir1", "swir2"]
                .map(String::from)
                .to_vec(),
        }
    }

    fn landsat8() -> Self {
        Self {
            input: ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"]
                .map(String::from)
                .to_vec(),
            output: ["blue", "green", "red", "nir", "swir1", "swir2"]
                .map(String::from)
                .to_vec(),
        }
    }

    fn sentinel2() -> Self {
        Self {
            input: ["B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B11", "B12"]
                .map(String::from)
                .to_vec(),
            output: [
                "blue", "green", "red", "re1", "re2", "re3", "nir", "re4", "swir1", "swir2",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Externally supplied pipeline configuration.
///
/// Region of interest and date range are query parameters for the raster
/// source and pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Point of interest (lon, lat) handed to the raster source
    pub roi: Option<[f64; 2]>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Sentinel-2 cloud probability threshold (percent)
    pub max_cloud_probability: f32,
    pub tdom: TdomParams,
    /// Run the SCS+C terrain normalization after BRDF correction
    pub apply_topographic_correction: bool,
    /// Rescale Landsat-8 output onto the Sentinel-2 radiometric scale
    pub harmonize_landsat8: bool,
    pub landsat7_bands: BandMapping,
    pub landsat8_bands: BandMapping,
    pub sentinel2_bands: BandMapping,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roi: None,
            start_date: None,
            end_date: None,
            max_cloud_probability: 65.0,
            tdom: TdomParams::default(),
            apply_topographic_correction: false,
            harmonize_landsat8: false,
            landsat7_bands: BandMapping::landsat7(),
            landsat8_bands: BandMapping::landsat8(),
            sentinel2_bands: BandMapping::sentinel2(),
        }
    }
}

/// One Sentinel-2 scene with its companion rasters, joined upstream by the
/// shared scene identifier.
#[derive(Debug, Clone)]
pub struct SentinelSceneInput {
    pub image: RasterImage,
    /// Per-pixel cloud probability (0-100)
    pub cloud_probability: Option<BandImage>,
    /// Coverage masks of the 20 m and 60 m companion bands
    pub edge_coverage: Option<(MaskImage, MaskImage)>,
}

/// Per-scene processing outcome; failures stay scene-scoped
#[derive(Debug)]
pub struct SceneResult {
    pub scene_id: String,
    pub outcome: CorrResult<RasterImage>,
}

/// Composes the correction components into ordered per-scene transforms,
/// one chain per sensor family.
pub struct Pipeline {
    config: PipelineConfig,
    terrain: Option<TerrainModel>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            terrain: None,
        }
    }

    pub fn with_terrain(mut self, terrain: TerrainModel) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn cloud_masker(&self) -> CloudMasker {
        CloudMasker::with_params(CloudMaskParams {
            max_cloud_probability: self.config.max_cloud_probability,
            ..CloudMaskParams::default()
        })
    }

    fn mapping_for(&self, sensor: Sensor) -> &BandMapping {
        match sensor {
            Sensor::Landsat7 => &self.config.landsat7_bands,
            Sensor::Landsat8 => &self.config.landsat8_bands,
            Sensor::Sentinel2 => &self.config.sentinel2_bands,
        }
    }

    fn rename(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        let mapping = self.mapping_for(image.metadata.sensor);
        let input: Vec<&str> = mapping.input.iter().map(String::as_str).collect();
        let output: Vec<&str> = mapping.output.iter().map(String::as_str).collect();
        image.select_rename(&input, &output)
    }

    fn topo_correct(&self, image: RasterImage) -> CorrResult<RasterImage> {
        if !self.config.apply_topographic_correction {
            return Ok(image);
        }
        let terrain = self.terrain.as_ref().ok_or_else(|| {
            CorrectionError::MissingInput(
                "topographic correction requested but no terrain model supplied".to_string(),
            )
        })?;
        TopoCorrector::new().apply(&image, terrain)
    }

    /// Landsat chain: rename, QA cloud/shadow mask, BRDF, optional terrain
    /// normalization, optional band adjustment onto the Sentinel-2 scale.
    pub fn process_landsat_scene(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        let sensor = image.metadata.sensor;
        if sensor == Sensor::Sentinel2 {
            return Err(CorrectionError::Processing(format!(
                "scene {} is Sentinel-2, expected a Landsat scene",
                image.metadata.scene_id
            )));
        }

        let renamed = self.rename(image)?;
        let masked = self.cloud_masker().mask_landsat_qa(&renamed)?;
        let corrected = BrdfCorrector::for_sensor(sensor).apply(&masked)?;
        let corrected = self.topo_correct(corrected)?;

        if self.config.harmonize_landsat8 && sensor == Sensor::Landsat8 {
            band_adjustment_landsat8(&corrected)
        } else {
            Ok(corrected)
        }
    }

    /// Process independent Landsat scenes, reporting failures per scene
    pub fn process_landsat_collection(&self, scenes: &[RasterImage]) -> Vec<SceneResult> {
        scenes
            .par_iter()
            .map(|scene| SceneResult {
                scene_id: scene.metadata.scene_id.clone(),
                outcome: self.process_landsat_scene(scene),
            })
            .collect()
    }

    /// Sentinel-2 chain: edge mask, rename, probability mask, temporal
    /// dark-outlier filter over the whole series, BRDF, optional terrain
    /// normalization.
    ///
    /// The dark-outlier filter is the one serialization point: it reduces
    /// over every surviving scene before any per-scene mask is final.
    pub fn process_sentinel_series(&self, inputs: &[SentinelSceneInput]) -> Vec<SceneResult> {
        let masker = self.cloud_masker();

        let prepared: Vec<(String, CorrResult<RasterImage>)> = inputs
            .par_iter()
            .map(|input| {
                let id = input.image.metadata.scene_id.clone();
                (id, self.prepare_sentinel_scene(input, &masker))
            })
            .collect();

        let survivors: Vec<RasterImage> = prepared
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok().cloned())
            .collect();

        let filtered = match TdomFilter::with_params(self.config.tdom.clone()).apply(&survivors) {
            Ok(filtered) => filtered,
            Err(e) => {
                // A series-level failure fails every surviving scene
                let message = e.to_string();
                return prepared
                    .into_iter()
                    .map(|(scene_id, outcome)| SceneResult {
                        scene_id,
                        outcome: outcome
                            .and(Err(CorrectionError::Processing(message.clone()))),
                    })
                    .collect();
            }
        };

        let corrector = BrdfCorrector::for_sensor(Sensor::Sentinel2);
        let corrected: Vec<CorrResult<RasterImage>> = filtered
            .par_iter()
            .map(|scene| {
                let image = corrector.apply(scene)?;
                self.topo_correct(image)
            })
            .collect();

        let mut corrected = corrected.into_iter();
        prepared
            .into_iter()
            .map(|(scene_id, outcome)| SceneResult {
                scene_id,
                outcome: match outcome {
                    Ok(_) => corrected
                        .next()
                        .unwrap_or_else(|| Err(CorrectionError::Processing(
                            "scene dropped from the series".to_string(),
                        ))),
                    Err(e) => Err(e),
                },
            })
            .collect()
    }

    fn prepare_sentinel_scene(
        &self,
        input: &SentinelSceneInput,
        masker: &CloudMasker,
    ) -> CorrResult<RasterImage> {
        let image = match &input.edge_coverage {
            Some((coverage_20m, coverage_60m)) => {
                masker.mask_scene_edges(&input.image, coverage_20m, coverage_60m)?
            }
            None => input.image.clone(),
        };

        let renamed = self.rename(&image)?;

        let probability = input.cloud_probability.as_ref().ok_or_else(|| {
            CorrectionError::MissingInput(format!(
                "scene {} has no joined cloud probability raster",
                renamed.metadata.scene_id
            ))
        })?;
        masker.mask_sentinel_probability(&renamed, probability)
    }

    /// Align a Landsat scene to a Sentinel-2 reference by red-band patch
    /// matching; every band is warped by the shared displacement field.
    pub fn coregister_landsat(
        &self,
        landsat: &RasterImage,
        sentinel: &RasterImage,
    ) -> CorrResult<RasterImage> {
        CoRegistration::new().register(sentinel, landsat)
    }

    /// Resample a Sentinel-2 scene onto a Landsat grid (bicubic)
    pub fn resample_sentinel(
        &self,
        sentinel: &RasterImage,
        landsat: &RasterImage,
    ) -> CorrResult<RasterImage> {
        Resampler::bicubic().resample_to(sentinel, landsat)
    }
}
