use crate::types::{BandImage, CorrResult, CorrectionError, MaskImage, RasterImage};
use ndarray::Array2;

/// QA bit positions and thresholds for the cloud/shadow strategies
#[derive(Debug, Clone)]
pub struct CloudMaskParams {
    /// QA bit carrying the cloud-shadow flag (Landsat QA_PIXEL)
    pub shadow_bit: u32,
    /// QA bit carrying the cloud flag (Landsat QA_PIXEL)
    pub cloud_bit: u32,
    /// Opaque/cirrus cloud bits of a QA60-style band (Sentinel-2)
    pub qa60_cloud_bits: [u32; 2],
    /// Pixels at or above this cloud probability are masked out (percent)
    pub max_cloud_probability: f32,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            shadow_bit: 3,
            cloud_bit: 5,
            qa60_cloud_bits: [10, 11],
            max_cloud_probability: 65.0,
        }
    }
}

/// Extract the unsigned integer formed by bits [start, end] of each QA
/// word, bits numbered from the least-significant bit = 0.
pub fn extract_qa_bits(qa: &Array2<u16>, start: u32, end: u32) -> CorrResult<Array2<u16>> {
    if start > end || end >= 16 {
        return Err(CorrectionError::Processing(format!(
            "invalid QA bit range [{}, {}]",
            start, end
        )));
    }
    let mut pattern: u16 = 0;
    for i in start..=end {
        pattern |= 1 << i;
    }
    Ok(qa.mapv(|v| (v & pattern) >> start))
}

/// Derives per-pixel validity masks from QA bitmasks, cloud-probability
/// rasters and companion-band coverage.
pub struct CloudMasker {
    params: CloudMaskParams,
}

impl CloudMasker {
    pub fn new() -> Self {
        Self {
            params: CloudMaskParams::default(),
        }
    }

    pub fn with_params(params: CloudMaskParams) -> Self {
        Self { params }
    }

    /// QA-bitmask strategy (Landsat): a pixel stays valid only if both the
    /// cloud-shadow flag and the cloud flag are zero. A missing QA raster
    /// fails the scene.
    pub fn mask_landsat_qa(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        let qa = image.qa()?;
        let shadow = extract_qa_bits(qa, self.params.shadow_bit, self.params.shadow_bit)?;
        let cloud = extract_qa_bits(qa, self.params.cloud_bit, self.params.cloud_bit)?;

        let mut valid = Array2::from_elem(image.dim(), true);
        ndarray::Zip::from(&mut valid)
            .and(&shadow)
            .and(&cloud)
            .for_each(|v, &s, &c| *v = s == 0 && c == 0);

        let masked = image.and_mask(&valid)?;
        log::debug!(
            "Landsat QA mask for {}: {} of {} pixels valid",
            image.metadata.scene_id,
            masked.valid_count(),
            valid.len()
        );
        Ok(masked)
    }

    /// Probability strategy (Sentinel-2): mask out pixels whose companion
    /// cloud probability (0-100) reaches the configured threshold.
    pub fn mask_sentinel_probability(
        &self,
        image: &RasterImage,
        probability: &BandImage,
    ) -> CorrResult<RasterImage> {
        if probability.dim() != image.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "cloud probability raster is {:?}, expected {:?}",
                probability.dim(),
                image.dim()
            )));
        }
        let valid = probability.mapv(|p| p < self.params.max_cloud_probability);
        image.and_mask(&valid)
    }

    /// Simple bit-flag strategy (Sentinel-2): treat the QA60 opaque and
    /// cirrus bits as cloud flags; either one set masks the pixel out.
    pub fn mask_sentinel_bit_flags(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        let qa = image.qa()?;
        let [b0, b1] = self.params.qa60_cloud_bits;
        let valid = qa.mapv(|v| v & (1 << b0) == 0 && v & (1 << b1) == 0);
        image.and_mask(&valid)
    }

    /// Scene-edge mask: the 10 m band masks sometimes keep bad data at
    /// scene edges, so the 20 m and 60 m companion coverage masks are
    /// ANDed in as well.
    pub fn mask_scene_edges(
        &self,
        image: &RasterImage,
        coverage_20m: &MaskImage,
        coverage_60m: &MaskImage,
    ) -> CorrResult<RasterImage> {
        image.and_mask(coverage_20m)?.and_mask(coverage_60m)
    }
}

impl Default for CloudMasker {
    fn default() -> Self {
        Self::new()
    }
}
