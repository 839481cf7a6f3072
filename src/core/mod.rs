//! Core reflectance correction modules

pub mod brdf;
pub mod cloud_mask;
pub mod coregister;
pub mod harmonize;
pub mod pipeline;
pub mod resample;
pub mod solar_geometry;
pub mod tdom;
pub mod topo;

// Re-export main types
pub use brdf::{BrdfCorrector, KernelCoefficients, RossThickKernels};
pub use cloud_mask::{extract_qa_bits, CloudMaskParams, CloudMasker};
pub use coregister::{CoRegistration, CoRegistrationParams, DisplacementField};
pub use harmonize::{band_adjustment_landsat8, BandHarmonizer, HarmonizationModel};
pub use pipeline::{BandMapping, Pipeline, PipelineConfig, SceneResult, SentinelSceneInput};
pub use resample::{Resampler, ResamplingKernel};
pub use solar_geometry::{compute_viewing_geometry, ViewingGeometry, MAX_SATELLITE_ZENITH};
pub use tdom::{TdomFilter, TdomParams};
pub use topo::{illumination_condition, TopoCorrectionParams, TopoCorrector};
