use chrono::{Duration, TimeZone, Utc};
use ndarray::Array2;
use surfcor::core::{Pipeline, PipelineConfig, SentinelSceneInput};
use surfcor::types::{
    CorrectionError, Footprint, GeoTransform, RasterImage, SceneMetadata, Sensor,
};
use surfcor::TerrainModel;

const LANDSAT_RAW: [&str; 6] = ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"];
const SENTINEL_RAW: [&str; 10] = [
    "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B11", "B12",
];

fn metadata(id: &str, sensor: Sensor, cols: usize) -> SceneMetadata {
    SceneMetadata {
        scene_id: id.to_string(),
        sensor,
        acquired: Utc.with_ymd_and_hms(2019, 6, 15, 13, 0, 0).unwrap(),
        footprint: Footprint::from_coords(&[
            [-43.25, -22.75],
            [-43.25, -22.95],
            [-43.05, -22.95],
            [-43.05, -22.75],
        ])
        .unwrap(),
        epsg: 4326,
        pixel_size: 30.0,
        geo_transform: GeoTransform::north_up(-43.20, -22.80, 0.06 / cols as f64),
        sun_zenith_deg: Some(44.0),
        sun_azimuth_deg: Some(47.0),
    }
}

fn landsat_scene(id: &str, dim: (usize, usize), cloudy: Option<(usize, usize)>) -> RasterImage {
    let bands = LANDSAT_RAW
        .iter()
        .enumerate()
        .map(|(i, n)| {
            (
                n.to_string(),
                Array2::from_elem(dim, 0.08 + 0.04 * i as f32),
            )
        })
        .collect();
    let image = RasterImage::new(metadata(id, Sensor::Landsat8, dim.1), bands).unwrap();

    let mut qa = Array2::from_elem(dim, 0u16);
    if let Some((r, c)) = cloudy {
        qa[[r, c]] = 1 << 5;
    }
    image.with_qa(qa).unwrap()
}

fn sentinel_scene(id: &str, dim: (usize, usize), day_offset: i64) -> RasterImage {
    let bands = SENTINEL_RAW
        .iter()
        .enumerate()
        .map(|(i, n)| {
            (
                n.to_string(),
                Array2::from_elem(dim, 0.10 + 0.03 * i as f32),
            )
        })
        .collect();
    let mut image = RasterImage::new(metadata(id, Sensor::Sentinel2, dim.1), bands).unwrap();
    image.metadata.acquired = image.metadata.acquired + Duration::days(day_offset);
    image
}

#[test]
fn test_landsat_chain_masks_and_corrects() {
    let _ = env_logger::builder().is_test(true).try_init();

    let scene = landsat_scene("LC08_001", (6, 6), Some((2, 2)));
    let pipeline = Pipeline::new(PipelineConfig::default());

    let out = pipeline.process_landsat_scene(&scene).unwrap();

    println!(
        "output bands: {:?}, valid {} of 36",
        out.band_names(),
        out.valid_count()
    );
    assert_eq!(
        out.band_names(),
        &["blue", "green", "red", "nir", "swir1", "swir2"]
    );
    assert!(!out.mask()[[2, 2]], "cloudy pixel must stay excluded");
    assert_eq!(out.metadata.acquired, scene.metadata.acquired);

    for (_, band) in out.iter_bands() {
        for ((r, c), &v) in band.indexed_iter() {
            if out.mask()[[r, c]] {
                assert!(v.is_finite());
                assert!(v > 0.0, "corrected reflectance stays positive at ({}, {})", r, c);
            }
        }
    }
}

#[test]
fn test_landsat8_harmonization_applies_linear_model() {
    let scene = landsat_scene("LC08_002", (5, 5), None);

    let plain = Pipeline::new(PipelineConfig::default())
        .process_landsat_scene(&scene)
        .unwrap();

    let config = PipelineConfig {
        harmonize_landsat8: true,
        ..PipelineConfig::default()
    };
    let harmonized = Pipeline::new(config).process_landsat_scene(&scene).unwrap();

    let slopes = [1.0946, 1.0043, 1.0524, 0.8954, 1.0049, 1.0002];
    let intercepts = [-0.0107, 0.0026, -0.0015, 0.0033, 0.0065, 0.0046];
    for (i, name) in ["blue", "green", "red", "nir", "swir1", "swir2"]
        .iter()
        .enumerate()
    {
        let a = plain.band(name).unwrap();
        let b = harmonized.band(name).unwrap();
        for (&x, &y) in a.iter().zip(b.iter()) {
            assert!((y - (x * slopes[i] + intercepts[i])).abs() < 1e-6);
        }
    }
}

#[test]
fn test_missing_qa_fails_scene_not_collection() {
    let good = landsat_scene("LC08_GOOD", (4, 4), None);
    // A scene without its QA raster must fail alone
    let bands = LANDSAT_RAW
        .iter()
        .map(|n| (n.to_string(), Array2::from_elem((4, 4), 0.2f32)))
        .collect();
    let bad = RasterImage::new(metadata("LC08_BAD", Sensor::Landsat8, 4), bands).unwrap();

    let pipeline = Pipeline::new(PipelineConfig::default());
    let results = pipeline.process_landsat_collection(&[good, bad]);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].scene_id, "LC08_GOOD");
    assert!(results[0].outcome.is_ok());
    assert_eq!(results[1].scene_id, "LC08_BAD");
    assert!(matches!(
        results[1].outcome,
        Err(CorrectionError::MissingInput(_))
    ));
}

#[test]
fn test_sentinel_series_reports_per_scene_failures() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dim = (4, 4);
    let clear = Array2::from_elem(dim, 5.0f32);
    let mut cloudy = clear.clone();
    cloudy[[0, 0]] = 90.0;

    let inputs = vec![
        SentinelSceneInput {
            image: sentinel_scene("S2_A", dim, 0),
            cloud_probability: Some(clear.clone()),
            edge_coverage: None,
        },
        // No joined probability raster: this scene must fail on its own
        SentinelSceneInput {
            image: sentinel_scene("S2_B", dim, 10),
            cloud_probability: None,
            edge_coverage: None,
        },
        SentinelSceneInput {
            image: sentinel_scene("S2_C", dim, 20),
            cloud_probability: Some(cloudy),
            edge_coverage: None,
        },
    ];

    let pipeline = Pipeline::new(PipelineConfig::default());
    let results = pipeline.process_sentinel_series(&inputs);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].scene_id, "S2_A");
    assert_eq!(results[1].scene_id, "S2_B");
    assert_eq!(results[2].scene_id, "S2_C");

    let a = results[0].outcome.as_ref().unwrap();
    assert_eq!(a.band_names().len(), 10);
    assert!(a.has_band("re4"));
    assert_eq!(a.valid_count(), 16);

    assert!(matches!(
        results[1].outcome,
        Err(CorrectionError::MissingInput(_))
    ));

    let c = results[2].outcome.as_ref().unwrap();
    assert!(!c.mask()[[0, 0]], "high-probability pixel must be masked");
    assert_eq!(c.valid_count(), 15);
}

#[test]
fn test_edge_coverage_narrows_sentinel_mask() {
    let dim = (3, 3);
    let mut coverage_20m = Array2::from_elem(dim, true);
    coverage_20m[[2, 2]] = false;
    let coverage_60m = Array2::from_elem(dim, true);

    let inputs = vec![SentinelSceneInput {
        image: sentinel_scene("S2_EDGE", dim, 0),
        cloud_probability: Some(Array2::from_elem(dim, 1.0f32)),
        edge_coverage: Some((coverage_20m, coverage_60m)),
    }];

    let pipeline = Pipeline::new(PipelineConfig::default());
    let results = pipeline.process_sentinel_series(&inputs);
    let out = results[0].outcome.as_ref().unwrap();
    assert!(!out.mask()[[2, 2]]);
    assert_eq!(out.valid_count(), 8);
}

#[test]
fn test_flat_terrain_topographic_correction_is_identity() {
    // Over perfectly flat terrain the SCS+C stage must leave the Landsat
    // chain output untouched.
    let scene = landsat_scene("LC08_FLAT", (6, 6), None);

    let plain = Pipeline::new(PipelineConfig::default())
        .process_landsat_scene(&scene)
        .unwrap();

    let dem = Array2::from_elem((50, 50), 420.0f32);
    let terrain = TerrainModel::new(
        dem,
        GeoTransform::north_up(-43.30, -22.70, 0.005),
        -32768.0,
    );
    let config = PipelineConfig {
        apply_topographic_correction: true,
        ..PipelineConfig::default()
    };
    let corrected = Pipeline::new(config)
        .with_terrain(terrain)
        .process_landsat_scene(&scene)
        .unwrap();

    for name in ["blue", "green", "red", "nir", "swir1", "swir2"] {
        let a = plain.band(name).unwrap();
        let b = corrected.band(name).unwrap();
        for (&x, &y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y, "band '{}' changed over flat terrain", name);
        }
    }
}

#[test]
fn test_topographic_correction_without_terrain_fails() {
    let scene = landsat_scene("LC08_NODEM", (4, 4), None);
    let config = PipelineConfig {
        apply_topographic_correction: true,
        ..PipelineConfig::default()
    };
    let result = Pipeline::new(config).process_landsat_scene(&scene);
    assert!(matches!(result, Err(CorrectionError::MissingInput(_))));
}

#[test]
fn test_sentinel_resampled_onto_landsat_grid() {
    let sentinel = sentinel_scene("S2_RS", (12, 12), 0);
    let landsat = landsat_scene("LC08_RS", (4, 4), None);

    let pipeline = Pipeline::new(PipelineConfig::default());
    let out = pipeline.resample_sentinel(&sentinel, &landsat).unwrap();

    assert_eq!(out.dim(), (4, 4));
    assert_eq!(out.metadata.pixel_size, landsat.metadata.pixel_size);
    // Output metadata keeps the Sentinel acquisition time
    assert_eq!(out.metadata.acquired, sentinel.metadata.acquired);
    assert_eq!(out.metadata.sensor, Sensor::Sentinel2);
}
