//! surfcor: A Fast, Modular Surface Reflectance Correction Toolkit
//!
//! This library processes Landsat 7/8 and Sentinel-2 surface reflectance
//! scenes into cloud-masked, BRDF- and terrain-corrected products: QA and
//! probability based cloud/shadow masking, temporal dark-outlier shadow
//! detection, Ross-Thick kernel anisotropy correction, SCS+C topographic
//! normalization, cross-sensor band harmonization, co-registration and
//! grid resampling.
//!
//! All computation is eager, in-memory raster math; validity travels as an
//! explicit per-pixel mask alongside the data so series statistics stay
//! correct under masking.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BandImage, CorrResult, CorrectionError, Footprint, GeoTransform, MaskImage, RasterImage,
    Reflectance, SceneMetadata, Sensor, STANDARD_BANDS,
};

pub use crate::core::{
    band_adjustment_landsat8, compute_viewing_geometry, extract_qa_bits, BandHarmonizer,
    BrdfCorrector, CloudMasker, CoRegistration, HarmonizationModel, Pipeline, PipelineConfig,
    Resampler, ResamplingKernel, SceneResult, SentinelSceneInput, TdomFilter, TopoCorrector,
    ViewingGeometry,
};

pub use io::TerrainModel;
