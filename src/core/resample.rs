use crate::types::{BandImage, CorrResult, CorrectionError, RasterImage};
use ndarray::Array2;

/// Interpolation kernels for grid-to-grid resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplingKernel {
    Nearest,
    Bilinear,
    /// Cubic convolution (a = -0.5)
    Bicubic,
}

/// Resamples one image onto another image's grid (pixel size and
/// coordinate reference), preserving the source acquisition timestamp.
pub struct Resampler {
    kernel: ResamplingKernel,
}

impl Resampler {
    pub fn new(kernel: ResamplingKernel) -> Self {
        Self { kernel }
    }

    pub fn bicubic() -> Self {
        Self::new(ResamplingKernel::Bicubic)
    }

    /// Resample `source` onto the grid of `reference`.
    ///
    /// Both images must share a coordinate reference system; mapping
    /// between grids goes through their geotransforms. The output carries
    /// the reference grid with the source's scene metadata, and a pixel is
    /// valid only where its nearest source pixel is in bounds and valid.
    pub fn resample_to(
        &self,
        source: &RasterImage,
        reference: &RasterImage,
    ) -> CorrResult<RasterImage> {
        if source.metadata.epsg != reference.metadata.epsg {
            return Err(CorrectionError::Geometry(format!(
                "cannot resample across reference systems (EPSG:{} vs EPSG:{})",
                source.metadata.epsg, reference.metadata.epsg
            )));
        }

        let out_dim = reference.dim();
        let (src_rows, src_cols) = source.dim();

        log::info!(
            "Resampling {} onto the {} grid ({:?} -> {:?}, {:?})",
            source.metadata.scene_id,
            reference.metadata.scene_id,
            source.dim(),
            out_dim,
            self.kernel
        );

        // Source pixel coordinates for every output pixel
        let mut src_pos = Array2::from_elem(out_dim, (0.0f64, 0.0f64));
        for ((r, c), pos) in src_pos.indexed_iter_mut() {
            let (x, y) = reference.metadata.geo_transform.pixel_to_geo(r as f64, c as f64);
            *pos = source.metadata.geo_transform.geo_to_pixel(x, y)?;
        }

        let bands = source
            .iter_bands()
            .map(|(name, band)| {
                let mut out = Array2::zeros(out_dim);
                for ((r, c), v) in out.indexed_iter_mut() {
                    let (sr, sc) = src_pos[[r, c]];
                    *v = match self.kernel {
                        ResamplingKernel::Nearest => sample_nearest(band, sr, sc),
                        ResamplingKernel::Bilinear => sample_bilinear(band, sr, sc),
                        ResamplingKernel::Bicubic => sample_bicubic(band, sr, sc),
                    };
                }
                (name.to_string(), out)
            })
            .collect();

        let mut mask = Array2::from_elem(out_dim, false);
        for ((r, c), m) in mask.indexed_iter_mut() {
            let (sr, sc) = src_pos[[r, c]];
            let rr = sr.round();
            let cc = sc.round();
            *m = rr >= 0.0
                && rr < src_rows as f64
                && cc >= 0.0
                && cc < src_cols as f64
                && source.mask()[[rr as usize, cc as usize]];
        }

        let mut metadata = source.metadata.clone();
        metadata.geo_transform = reference.metadata.geo_transform.clone();
        metadata.pixel_size = reference.metadata.pixel_size;

        RasterImage::new(metadata, bands)?.with_mask(mask)
    }
}

fn clamp_index(v: i64, len: usize) -> usize {
    v.clamp(0, len as i64 - 1) as usize
}

fn sample_nearest(band: &BandImage, row: f64, col: f64) -> f32 {
    let (rows, cols) = band.dim();
    band[[
        clamp_index(row.round() as i64, rows),
        clamp_index(col.round() as i64, cols),
    ]]
}

fn sample_bilinear(band: &BandImage, row: f64, col: f64) -> f32 {
    let (rows, cols) = band.dim();
    let r0 = row.floor() as i64;
    let c0 = col.floor() as i64;
    let fr = (row - r0 as f64) as f32;
    let fc = (col - c0 as f64) as f32;

    let v00 = band[[clamp_index(r0, rows), clamp_index(c0, cols)]];
    let v01 = band[[clamp_index(r0, rows), clamp_index(c0 + 1, cols)]];
    let v10 = band[[clamp_index(r0 + 1, rows), clamp_index(c0, cols)]];
    let v11 = band[[clamp_index(r0 + 1, rows), clamp_index(c0 + 1, cols)]];

    v00 * (1.0 - fr) * (1.0 - fc)
        + v01 * (1.0 - fr) * fc
        + v10 * fr * (1.0 - fc)
        + v11 * fr * fc
}

/// Cubic convolution weight, a = -0.5
fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

fn sample_bicubic(band: &BandImage, row: f64, col: f64) -> f32 {
    let (rows, cols) = band.dim();
    let r0 = row.floor() as i64;
    let c0 = col.floor() as i64;
    let fr = row - r0 as f64;
    let fc = col - c0 as f64;

    let mut acc = 0.0f64;
    for dr in -1i64..=2 {
        let wr = cubic_weight(dr as f64 - fr);
        if wr == 0.0 {
            continue;
        }
        for dc in -1i64..=2 {
            let wc = cubic_weight(dc as f64 - fc);
            if wc == 0.0 {
                continue;
            }
            let v = band[[clamp_index(r0 + dr, rows), clamp_index(c0 + dc, cols)]];
            acc += wr * wc * v as f64;
        }
    }
    acc as f32
}
