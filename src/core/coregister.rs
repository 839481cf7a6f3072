use crate::types::{BandImage, CorrResult, CorrectionError, MaskImage, RasterImage};
use ndarray::Array2;
use rayon::prelude::*;

/// Parameters for patch-based displacement estimation
#[derive(Debug, Clone)]
pub struct CoRegistrationParams {
    /// Largest displacement searched for, in CRS units (meters)
    pub max_offset: f64,
    /// Matching patch edge length in CRS units; picked automatically
    /// from the search bound when unset
    pub patch_size: Option<f64>,
    /// Matches weaker than this normalized correlation stay unregistered
    pub min_correlation: f32,
    /// Fraction of a patch that must be valid in both images
    pub min_valid_fraction: f32,
}

impl Default for CoRegistrationParams {
    fn default() -> Self {
        Self {
            max_offset: 50.0,
            patch_size: Some(100.0),
            min_correlation: 0.2,
            min_valid_fraction: 0.5,
        }
    }
}

/// Dense 2-D pixel displacement field.
///
/// Sampling convention: the registered output reads the target at
/// out[r, c] = target[r + dy[r, c], c + dx[r, c]].
#[derive(Debug, Clone)]
pub struct DisplacementField {
    pub dx: Array2<f32>,
    pub dy: Array2<f32>,
}

/// Estimates a displacement field between a reference and a target image
/// by local patch matching on the shared red band, then warps every band
/// of the target by that field.
pub struct CoRegistration {
    params: CoRegistrationParams,
}

impl CoRegistration {
    pub fn new() -> Self {
        Self {
            params: CoRegistrationParams::default(),
        }
    }

    pub fn with_params(params: CoRegistrationParams) -> Self {
        Self { params }
    }

    /// Estimate the displacement field aligning `target` to `reference`.
    ///
    /// Patch offsets are found by exhaustive normalized cross-correlation
    /// within the search bound; a patch whose best match sits on the bound
    /// or correlates too weakly is left unregistered (zero displacement).
    pub fn estimate_displacement(
        &self,
        reference: &RasterImage,
        target: &RasterImage,
    ) -> CorrResult<DisplacementField> {
        let ref_red = reference.band("red")?;
        let tgt_red = target.band("red")?;
        if ref_red.dim() != tgt_red.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "reference grid {:?} vs target grid {:?}",
                ref_red.dim(),
                tgt_red.dim()
            )));
        }

        let pixel_size = target.metadata.pixel_size;
        let max_px = ((self.params.max_offset / pixel_size).round() as isize).max(1);
        let patch_px = self
            .params
            .patch_size
            .map(|s| (s / pixel_size).round() as usize)
            .unwrap_or((4 * max_px) as usize)
            .max(8);

        let (rows, cols) = tgt_red.dim();
        let patches_r = (rows + patch_px - 1) / patch_px;
        let patches_c = (cols + patch_px - 1) / patch_px;

        log::info!(
            "Co-registering {} to {}: {}x{} patches of {} px, search bound {} px",
            target.metadata.scene_id,
            reference.metadata.scene_id,
            patches_r,
            patches_c,
            patch_px,
            max_px
        );

        let ref_mask = reference.mask();
        let tgt_mask = target.mask();

        let offsets: Vec<Option<(f32, f32)>> = (0..patches_r * patches_c)
            .into_par_iter()
            .map(|idx| {
                let pr = idx / patches_c;
                let pc = idx % patches_c;
                let r0 = pr * patch_px;
                let c0 = pc * patch_px;
                let r1 = (r0 + patch_px).min(rows);
                let c1 = (c0 + patch_px).min(cols);
                self.match_patch(
                    ref_red, ref_mask, tgt_red, tgt_mask, r0, r1, c0, c1, max_px,
                )
            })
            .collect();

        let unregistered = offsets.iter().filter(|o| o.is_none()).count();
        if unregistered == offsets.len() {
            return Err(CorrectionError::Alignment(format!(
                "no patch of {} could be registered within {} px of {}",
                offsets.len(),
                max_px,
                reference.metadata.scene_id
            )));
        }
        if unregistered > 0 {
            log::warn!(
                "{} of {} patches stay unregistered",
                unregistered,
                offsets.len()
            );
        }

        Ok(self.densify(&offsets, (rows, cols), patch_px, patches_r, patches_c))
    }

    /// Warp every band of an image by the displacement field. The validity
    /// mask is warped by nearest neighbor; samples landing outside the grid
    /// come out masked.
    pub fn warp(&self, image: &RasterImage, field: &DisplacementField) -> CorrResult<RasterImage> {
        if field.dx.dim() != image.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "displacement field is {:?}, image is {:?}",
                field.dx.dim(),
                image.dim()
            )));
        }

        let (rows, cols) = image.dim();
        let bands = image
            .iter_bands()
            .map(|(name, band)| {
                let mut out = Array2::zeros((rows, cols));
                for ((r, c), v) in out.indexed_iter_mut() {
                    let src_r = r as f64 + field.dy[[r, c]] as f64;
                    let src_c = c as f64 + field.dx[[r, c]] as f64;
                    *v = bilinear_sample(band, src_r, src_c);
                }
                (name.to_string(), out)
            })
            .collect();

        let mut mask = Array2::from_elem((rows, cols), false);
        for ((r, c), m) in mask.indexed_iter_mut() {
            let src_r = (r as f64 + field.dy[[r, c]] as f64).round() as isize;
            let src_c = (c as f64 + field.dx[[r, c]] as f64).round() as isize;
            *m = src_r >= 0
                && src_r < rows as isize
                && src_c >= 0
                && src_c < cols as isize
                && image.mask()[[src_r as usize, src_c as usize]];
        }

        image.with_bands(bands)?.with_mask(mask)
    }

    /// Estimate and apply in one step
    pub fn register(
        &self,
        reference: &RasterImage,
        target: &RasterImage,
    ) -> CorrResult<RasterImage> {
        let field = self.estimate_displacement(reference, target)?;
        self.warp(target, &field)
    }

    /// Best integer offset for one patch, or None when unregistered
    #[allow(clippy::too_many_arguments)]
    fn match_patch(
        &self,
        reference: &BandImage,
        ref_mask: &MaskImage,
        target: &BandImage,
        tgt_mask: &MaskImage,
        r0: usize,
        r1: usize,
        c0: usize,
        c1: usize,
        max_px: isize,
    ) -> Option<(f32, f32)> {
        let patch_area = (r1 - r0) * (c1 - c0);
        let min_count = ((patch_area as f32) * self.params.min_valid_fraction) as usize;

        let mut best: Option<(f32, isize, isize)> = None;
        for oy in -max_px..=max_px {
            for ox in -max_px..=max_px {
                if let Some(score) = zncc(
                    reference, ref_mask, target, tgt_mask, r0, r1, c0, c1, oy, ox, min_count,
                ) {
                    if best.map_or(true, |(s, _, _)| score > s) {
                        best = Some((score, oy, ox));
                    }
                }
            }
        }

        let (score, oy, ox) = best?;
        if score < self.params.min_correlation {
            return None;
        }
        // A peak on the search boundary means the true displacement may
        // exceed the configured maximum; leave the patch unregistered
        // rather than extrapolate.
        if oy.abs() == max_px || ox.abs() == max_px {
            return None;
        }
        Some((ox as f32, oy as f32))
    }

    /// Bilinear densification of per-patch offsets to a per-pixel field
    fn densify(
        &self,
        offsets: &[Option<(f32, f32)>],
        dim: (usize, usize),
        patch_px: usize,
        patches_r: usize,
        patches_c: usize,
    ) -> DisplacementField {
        let node = |pr: usize, pc: usize| -> (f32, f32) {
            offsets[pr * patches_c + pc].unwrap_or((0.0, 0.0))
        };

        let mut dx = Array2::zeros(dim);
        let mut dy = Array2::zeros(dim);
        let half = patch_px as f64 / 2.0;

        for ((r, c), out) in dx.indexed_iter_mut() {
            // Position in patch-center coordinates
            let pr = ((r as f64 - half) / patch_px as f64).max(0.0);
            let pc = ((c as f64 - half) / patch_px as f64).max(0.0);
            let pr0 = (pr.floor() as usize).min(patches_r - 1);
            let pc0 = (pc.floor() as usize).min(patches_c - 1);
            let pr1 = (pr0 + 1).min(patches_r - 1);
            let pc1 = (pc0 + 1).min(patches_c - 1);
            let fr = (pr - pr0 as f64).clamp(0.0, 1.0) as f32;
            let fc = (pc - pc0 as f64).clamp(0.0, 1.0) as f32;

            let (x00, y00) = node(pr0, pc0);
            let (x01, y01) = node(pr0, pc1);
            let (x10, y10) = node(pr1, pc0);
            let (x11, y11) = node(pr1, pc1);

            *out = x00 * (1.0 - fr) * (1.0 - fc)
                + x01 * (1.0 - fr) * fc
                + x10 * fr * (1.0 - fc)
                + x11 * fr * fc;
            dy[[r, c]] = y00 * (1.0 - fr) * (1.0 - fc)
                + y01 * (1.0 - fr) * fc
                + y10 * fr * (1.0 - fc)
                + y11 * fr * fc;
        }

        DisplacementField { dx, dy }
    }
}

impl Default for CoRegistration {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-normalized cross-correlation of target[p + o] against reference[p]
/// over one patch, restricted to pixels valid in both images. None when
/// the overlap is too small or either side has no contrast.
#[allow(clippy::too_many_arguments)]
fn zncc(
    reference: &BandImage,
    ref_mask: &MaskImage,
    target: &BandImage,
    tgt_mask: &MaskImage,
    r0: usize,
    r1: usize,
    c0: usize,
    c1: usize,
    oy: isize,
    ox: isize,
    min_count: usize,
) -> Option<f32> {
    let (rows, cols) = reference.dim();
    let mut n = 0usize;
    let mut sum_a = 0.0f64;
    let mut sum_b = 0.0f64;
    let mut sum_aa = 0.0f64;
    let mut sum_bb = 0.0f64;
    let mut sum_ab = 0.0f64;

    for r in r0..r1 {
        for c in c0..c1 {
            let tr = r as isize + oy;
            let tc = c as isize + ox;
            if tr < 0 || tr >= rows as isize || tc < 0 || tc >= cols as isize {
                continue;
            }
            let (tr, tc) = (tr as usize, tc as usize);
            if !ref_mask[[r, c]] || !tgt_mask[[tr, tc]] {
                continue;
            }
            let a = reference[[r, c]] as f64;
            let b = target[[tr, tc]] as f64;
            n += 1;
            sum_a += a;
            sum_b += b;
            sum_aa += a * a;
            sum_bb += b * b;
            sum_ab += a * b;
        }
    }

    if n < min_count.max(4) {
        return None;
    }
    let nf = n as f64;
    let var_a = sum_aa - sum_a * sum_a / nf;
    let var_b = sum_bb - sum_b * sum_b / nf;
    if var_a < 1e-12 || var_b < 1e-12 {
        return None;
    }
    let cov = sum_ab - sum_a * sum_b / nf;
    Some((cov / (var_a * var_b).sqrt()) as f32)
}

/// Bilinear sample with zero fill outside the grid
pub fn bilinear_sample(data: &BandImage, row: f64, col: f64) -> f32 {
    let (rows, cols) = data.dim();
    let r0 = row.floor() as i64;
    let c0 = col.floor() as i64;
    let fr = (row - r0 as f64) as f32;
    let fc = (col - c0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < rows as i64 && c >= 0 && c < cols as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    let v00 = sample(r0, c0);
    let v01 = sample(r0, c0 + 1);
    let v10 = sample(r0 + 1, c0);
    let v11 = sample(r0 + 1, c0 + 1);

    v00 * (1.0 - fr) * (1.0 - fc)
        + v01 * (1.0 - fr) * fc
        + v10 * fr * (1.0 - fc)
        + v11 * fr * fc
}
