use crate::types::{CorrResult, CorrectionError, RasterImage, STANDARD_BANDS};

/// Per-band linear rescale model: band * slope + intercept, matched to the
/// image's bands by index order.
#[derive(Debug, Clone)]
pub struct HarmonizationModel {
    slopes: Vec<f32>,
    intercepts: Vec<f32>,
}

impl HarmonizationModel {
    /// Create a model from equal-length slope and intercept arrays
    pub fn new(slopes: Vec<f32>, intercepts: Vec<f32>) -> CorrResult<Self> {
        if slopes.len() != intercepts.len() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "{} slopes vs {} intercepts",
                slopes.len(),
                intercepts.len()
            )));
        }
        Ok(Self { slopes, intercepts })
    }

    /// OLI to MSI adjustment: rescales Landsat-8 surface reflectance onto
    /// the Sentinel-2 radiometric scale, over the six standard bands
    /// (blue, green, red, nir, swir1, swir2).
    pub fn landsat8_to_sentinel2() -> Self {
        Self {
            slopes: vec![1.0946, 1.0043, 1.0524, 0.8954, 1.0049, 1.0002],
            intercepts: vec![-0.0107, 0.0026, -0.0015, 0.0033, 0.0065, 0.0046],
        }
    }

    pub fn len(&self) -> usize {
        self.slopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slopes.is_empty()
    }
}

/// Rescales one sensor's reflectance bands onto another sensor's
/// radiometric scale.
pub struct BandHarmonizer {
    model: HarmonizationModel,
}

impl BandHarmonizer {
    pub fn new(model: HarmonizationModel) -> Self {
        Self { model }
    }

    /// Apply the per-band linear model. The image must carry exactly as
    /// many bands as the model, in model order; scene metadata (notably the
    /// acquisition timestamp) and the validity mask are preserved.
    pub fn apply(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        if image.band_names().len() != self.model.len() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "image has {} bands, model has {} coefficient pairs",
                image.band_names().len(),
                self.model.len()
            )));
        }

        log::debug!(
            "Harmonizing {} bands of scene {}",
            self.model.len(),
            image.metadata.scene_id
        );

        let bands = image
            .iter_bands()
            .zip(self.model.slopes.iter().zip(&self.model.intercepts))
            .map(|((name, band), (&slope, &intercept))| {
                (name.to_string(), band.mapv(|v| v * slope + intercept))
            })
            .collect();

        image.with_bands(bands)
    }
}

/// Convenience wrapper: apply the OLI to MSI band adjustment to a Landsat-8
/// image carrying the six standard bands.
pub fn band_adjustment_landsat8(image: &RasterImage) -> CorrResult<RasterImage> {
    for name in STANDARD_BANDS {
        image.band(name)?;
    }
    BandHarmonizer::new(HarmonizationModel::landsat8_to_sentinel2()).apply(image)
}
