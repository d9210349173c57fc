use chrono::{DateTime, Duration, TimeZone, Utc};
use sarslide::config::PipelineConfig;
use sarslide::core::{Aoi, Raster, RasterGrid};
use sarslide::io::catalog::{CatalogEntry, SceneCatalog};
use sarslide::io::geotiff::{read_raster, write_bands};
use sarslide::types::{AcquisitionMode, BoundingBox, GeoTransform, OrbitPass, Polarization};
use sarslide::{SiError, SiPipeline};
use ndarray::Array2;
use std::path::{Path, PathBuf};

const EPSG: u32 = 32653;
const X0: f64 = 500_000.0;
const Y0: f64 = 3_800_000.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn aoi() -> Aoi {
    Aoi::rectangle(
        EPSG,
        &BoundingBox {
            min_x: X0,
            max_x: X0 + 1000.0,
            min_y: Y0,
            max_y: Y0 + 1000.0,
        },
    )
}

/// 30 m DEM, 300 m beyond the AOI on every side, rising towards the south
fn write_dem(dir: &Path) -> PathBuf {
    let grid = RasterGrid::new(GeoTransform::north_up(X0 - 300.0, Y0 + 1300.0, 30.0), EPSG, 54, 54);
    let mut elevation = Array2::<f32>::zeros((54, 54));
    for ((i, _), v) in elevation.indexed_iter_mut() {
        *v = 200.0 + i as f32 * 30.0 * 0.2;
    }
    let path = dir.join("dem.tif");
    write_bands(
        &[
            ("elevation", &Raster::new(grid, elevation).unwrap()),
            ("swb", &Raster::constant(grid, 0.0)),
        ],
        &path,
        "GTiff",
    )
    .unwrap();
    path
}

fn scene_grid() -> RasterGrid {
    RasterGrid::new(GeoTransform::north_up(X0 - 200.0, Y0 + 1200.0, 20.0), EPSG, 70, 70)
}

/// Backscatter with deterministic speckle-like texture, optionally with a dark patch
fn write_scene(dir: &Path, id: &str, seed: usize, drop_db: f32) -> PathBuf {
    let grid = scene_grid();
    let mut vh = Array2::<f32>::zeros((70, 70));
    let mut angle = Array2::<f32>::zeros((70, 70));
    for ((i, j), v) in vh.indexed_iter_mut() {
        let texture = (((i * 31 + j * 17 + seed * 13) % 23) as f32 / 23.0 - 0.5) * 0.8;
        *v = -13.0 + texture;
        // Patch covering the AOI centre (500400..500600 E, 3800400..3800600 N)
        if (30..40).contains(&i) && (30..40).contains(&j) {
            *v -= drop_db;
        }
    }
    for ((_, j), v) in angle.indexed_iter_mut() {
        *v = 33.0 + j as f32 * 0.1;
    }
    let path = dir.join(format!("{}.tif", id));
    write_bands(
        &[
            ("VH", &Raster::new(grid, vh).unwrap()),
            ("angle", &Raster::new(grid, angle).unwrap()),
        ],
        &path,
        "GTiff",
    )
    .unwrap();
    path
}

fn entry(id: &str, path: PathBuf, acquired: DateTime<Utc>, relative_orbit: u32) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        path,
        acquired,
        relative_orbit,
        polarizations: vec![Polarization::VV, Polarization::VH],
        instrument_mode: AcquisitionMode::IW,
        orbit_pass: Some(OrbitPass::Ascending),
        heading_deg: None,
    }
}

fn write_config(dir: &Path, catalog: &SceneCatalog, dem: PathBuf) -> PathBuf {
    let catalog_path = dir.join("scenes.json");
    catalog.save(&catalog_path).unwrap();

    let mut config = PipelineConfig::default();
    config.aoi = aoi();
    config.inputs.dem = dem;
    config.inputs.catalog = catalog_path;
    config.export.folder = dir.join("S1Export");

    let path = dir.join("run.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

/// 30 pre-event scenes over two paths, every 12 days before the event
fn pre_event_entries(dir: &Path, event: DateTime<Utc>) -> Vec<CatalogEntry> {
    (0..30)
        .map(|k| {
            let id = format!("pre_{:02}", k);
            let path = write_scene(dir, &id, k, 0.0);
            let acquired = event - Duration::days(12 * (k as i64 + 1)) + Duration::hours(k as i64 % 2 * 9);
            entry(&id, path, acquired, if k % 2 == 0 { 39 } else { 141 })
        })
        .collect()
}

#[test]
fn test_one_km_aoi_scenario() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let event = Utc.with_ymd_and_hms(2018, 6, 28, 0, 0, 0).unwrap();

    let mut entries = pre_event_entries(dir.path(), event);
    entries.push(entry(
        "post_39",
        write_scene(dir.path(), "post_39", 100, 6.0),
        Utc.with_ymd_and_hms(2018, 7, 9, 8, 40, 0).unwrap(),
        39,
    ));
    entries.push(entry(
        "post_141",
        write_scene(dir.path(), "post_141", 101, 0.0),
        Utc.with_ymd_and_hms(2018, 7, 10, 20, 50, 0).unwrap(),
        141,
    ));

    let config_path = write_config(dir.path(), &SceneCatalog::new(entries), write_dem(dir.path()));
    let config = PipelineConfig::from_file(&config_path).unwrap();
    let report = SiPipeline::new(config).run().unwrap();

    assert_eq!(report.scenes_selected, 32);
    assert_eq!(report.pre_scenes, 30);
    assert_eq!(report.post_scenes, 2);
    assert_eq!(report.contributing_post, 2);

    let output_path = report.output_path.unwrap();
    assert_eq!(output_path, dir.path().join("S1Export").join("SI.tif"));
    let si = read_raster(&output_path).unwrap();
    assert_eq!(si.grid().shape(), (100, 100));
    assert_eq!(si.grid().epsg, EPSG);
    // Gentle north-facing slope seen side-on: every AOI pixel keeps a value
    assert_eq!(si.valid_count(), 100 * 100);
    assert!(si
        .data()
        .iter()
        .filter(|v| !v.is_nan())
        .all(|&v| (0.0..=1.0).contains(&v)));

    // The darkened patch exceeds the threshold for every pre-event scene on path 39
    let mut patch = Vec::new();
    for i in 42..58 {
        for j in 42..58 {
            patch.push(si.get(i, j));
        }
    }
    assert!(patch.iter().all(|&v| v >= 0.5), "patch SI: {:?}", patch);
    let mean = report.si_mean.unwrap();
    assert!(mean < 0.5);
}

#[test]
fn test_empty_post_window_is_fatal() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let event = Utc.with_ymd_and_hms(2018, 6, 28, 0, 0, 0).unwrap();
    let entries: Vec<CatalogEntry> = pre_event_entries(dir.path(), event).into_iter().take(4).collect();

    let config_path = write_config(dir.path(), &SceneCatalog::new(entries), write_dem(dir.path()));
    let config = PipelineConfig::from_file(&config_path).unwrap();
    let result = SiPipeline::new(config).run();

    assert!(matches!(result, Err(SiError::MissingData(_))));
    assert!(!dir.path().join("S1Export").join("SI.tif").exists());
}
