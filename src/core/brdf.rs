use crate::core::solar_geometry::{compute_viewing_geometry, ViewingGeometry};
use crate::types::{BandImage, CorrResult, RasterImage, Sensor};
use ndarray::Array2;
use std::f64::consts::PI;

/// Fixed empirical kernel weights for one band: (f_iso, f_geo, f_vol)
#[derive(Debug, Clone, Copy)]
pub struct KernelCoefficients {
    pub f_iso: f64,
    pub f_geo: f64,
    pub f_vol: f64,
}

const fn kc(f_iso: f64, f_geo: f64, f_vol: f64) -> KernelCoefficients {
    KernelCoefficients { f_iso, f_geo, f_vol }
}

/// Kernel weights for the six Landsat reflectance bands
pub const LANDSAT_COEFFICIENTS: [(&str, KernelCoefficients); 6] = [
    ("blue", kc(0.0774, 0.0079, 0.0372)),
    ("green", kc(0.1306, 0.0178, 0.0580)),
    ("red", kc(0.1690, 0.0227, 0.0574)),
    ("nir", kc(0.3093, 0.0330, 0.1535)),
    ("swir1", kc(0.3430, 0.0453, 0.1154)),
    ("swir2", kc(0.2658, 0.0387, 0.0639)),
];

/// Kernel weights for the Sentinel-2 reflectance bands, red-edge included
pub const SENTINEL2_COEFFICIENTS: [(&str, KernelCoefficients); 10] = [
    ("blue", kc(0.0774, 0.0079, 0.0372)),
    ("green", kc(0.1306, 0.0178, 0.0580)),
    ("red", kc(0.1690, 0.0227, 0.0574)),
    ("nir", kc(0.3093, 0.0330, 0.1535)),
    ("re1", kc(0.2085, 0.0256, 0.0845)),
    ("re2", kc(0.2316, 0.0273, 0.1003)),
    ("re3", kc(0.2599, 0.0294, 0.1197)),
    ("re4", kc(0.2907, 0.0410, 0.1611)),
    ("swir1", kc(0.3430, 0.0453, 0.1154)),
    ("swir2", kc(0.2658, 0.0387, 0.0639)),
];

/// Ross-Thick volumetric kernel rasters at the actual view zenith (kvol)
/// and with the view zenith forced to nadir (kvol0).
#[derive(Debug, Clone)]
pub struct RossThickKernels {
    pub kvol: Array2<f32>,
    pub kvol0: Array2<f32>,
}

/// Compute the reciprocal Ross-Thick kernel per pixel.
///
/// phase = acos(cos(vz)cos(sz) + sin(vz)sin(sz)cos(sunAz - viewAz))
/// kvol  = ((pi/2 - phase)cos(phase) + sin(phase)) / (cos(sz) + cos(vz)) - pi/4
///
/// kvol0 is the identical formula with the view zenith set to zero.
pub fn ross_thick_kernels(geometry: &ViewingGeometry) -> RossThickKernels {
    let dim = geometry.sun_zenith.dim();
    let mut kvol = Array2::zeros(dim);
    let mut kvol0 = Array2::zeros(dim);

    for ((r, c), out) in kvol.indexed_iter_mut() {
        let sun_zen = geometry.sun_zenith[[r, c]] as f64;
        let view_zen = geometry.view_zenith[[r, c]] as f64;
        let rel_az = geometry.sun_azimuth[[r, c]] as f64 - geometry.view_azimuth[[r, c]] as f64;

        *out = ross_thick(sun_zen, view_zen, rel_az) as f32;
        kvol0[[r, c]] = ross_thick(sun_zen, 0.0, rel_az) as f32;
    }

    RossThickKernels { kvol, kvol0 }
}

fn ross_thick(sun_zen: f64, view_zen: f64, rel_az: f64) -> f64 {
    let cos_phase = (view_zen.cos() * sun_zen.cos()
        + view_zen.sin() * sun_zen.sin() * rel_az.cos())
    .clamp(-1.0, 1.0);
    let phase = cos_phase.acos();
    ((PI / 2.0 - phase) * cos_phase + phase.sin()) / (sun_zen.cos() + view_zen.cos()) - PI / 4.0
}

/// Applies the per-band anisotropy correction using the Ross-Thick kernel
/// and fixed empirical coefficients. Output images carry only the corrected
/// bands, with the original scene metadata.
pub struct BrdfCorrector {
    coefficients: &'static [(&'static str, KernelCoefficients)],
}

impl BrdfCorrector {
    /// Pick the coefficient table for a sensor
    pub fn for_sensor(sensor: Sensor) -> Self {
        let coefficients: &'static [_] = match sensor {
            Sensor::Landsat7 | Sensor::Landsat8 => &LANDSAT_COEFFICIENTS,
            Sensor::Sentinel2 => &SENTINEL2_COEFFICIENTS,
        };
        Self { coefficients }
    }

    /// Correct every band in the coefficient table. The viewing geometry is
    /// derived from the scene timestamp and footprint; pixels outside the
    /// footprint polygon are masked out of the result.
    pub fn apply(&self, image: &RasterImage) -> CorrResult<RasterImage> {
        let geometry = compute_viewing_geometry(&image.metadata, image.dim())?;
        self.apply_with_geometry(image, &geometry)
    }

    /// Correct using precomputed viewing geometry
    pub fn apply_with_geometry(
        &self,
        image: &RasterImage,
        geometry: &ViewingGeometry,
    ) -> CorrResult<RasterImage> {
        log::info!(
            "BRDF correction of {} bands for scene {} ({})",
            self.coefficients.len(),
            image.metadata.scene_id,
            image.metadata.sensor
        );

        let kernels = ross_thick_kernels(geometry);
        // Both kernels are scaled by pi before the coefficient model
        let kvol = kernels.kvol.mapv(|v| v * PI as f32);
        let kvol0 = kernels.kvol0.mapv(|v| v * PI as f32);

        let mut bands = Vec::with_capacity(self.coefficients.len());
        for (name, coefficients) in self.coefficients {
            let band = image.band(name)?;
            bands.push((name.to_string(), correct_band(band, &kvol, &kvol0, coefficients)));
        }

        image
            .with_bands(bands)?
            .and_mask(&geometry.footprint_mask)
    }
}

/// Apply the anisotropy correction factor to one band.
///
/// pred = f_iso + f_vol * kvol + f_geo * kvol, pred0 likewise with kvol0;
/// the corrected value is band * pred0 / pred.
fn correct_band(
    band: &BandImage,
    kvol: &Array2<f32>,
    kvol0: &Array2<f32>,
    c: &KernelCoefficients,
) -> BandImage {
    let mut out = band.clone();
    ndarray::Zip::from(&mut out)
        .and(kvol)
        .and(kvol0)
        .for_each(|v, &k, &k0| {
            let pred = c.f_vol * k as f64 + c.f_geo * k as f64 + c.f_iso;
            let pred0 = c.f_vol * k0 as f64 + c.f_geo * k0 as f64 + c.f_iso;
            let cfac = pred0 / pred;
            if cfac.is_finite() {
                *v = (*v as f64 * cfac) as f32;
            }
        });
    out
}
