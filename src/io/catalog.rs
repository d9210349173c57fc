//! Scene catalog: a JSON manifest of Sentinel-1 GRD scenes on local disk
//!
//! Each entry points at a GeoTIFF whose bands are described by name
//! (`VV`, `VH`, `angle`). Metadata filters run on the manifest alone; the
//! spatial filter reads the file headers.

use crate::core::collection::{CancellationToken, ImageCollection, Scene, SkipPolicy};
use crate::core::raster::RasterGrid;
use crate::io::geotiff::{read_bands, read_grid, BandSelector};
use crate::types::{
    AcquisitionMode, BoundingBox, OrbitPass, Polarization, SceneMetadata, SiError, SiResult,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One manifest entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub path: PathBuf,
    pub acquired: DateTime<Utc>,
    pub relative_orbit: u32,
    pub polarizations: Vec<Polarization>,
    #[serde(default)]
    pub instrument_mode: AcquisitionMode,
    #[serde(default)]
    pub orbit_pass: Option<OrbitPass>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
}

impl CatalogEntry {
    pub fn metadata(&self) -> SceneMetadata {
        SceneMetadata {
            scene_id: self.id.clone(),
            acquired: self.acquired,
            relative_orbit: self.relative_orbit,
            polarizations: self.polarizations.clone(),
            instrument_mode: self.instrument_mode,
            orbit_pass: self.orbit_pass,
            heading_deg: self.heading_deg,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    scenes: Vec<CatalogEntry>,
}

/// Manifest-level query; every field left `None` matches all scenes
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub polarization: Option<Polarization>,
    pub instrument_mode: Option<AcquisitionMode>,
    /// Acquisition window `[start, end)`
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Footprint must intersect these bounds, in the CRS `bounds_epsg`
    pub bounds: Option<(BoundingBox, u32)>,
}

/// Local scene catalog
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    entries: Vec<CatalogEntry>,
}

impl SceneCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load a manifest; scene paths resolve relative to the manifest directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> SiResult<Self> {
        let path = path.as_ref();
        log::info!("Loading scene catalog from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let entries: Vec<CatalogEntry> = manifest
            .scenes
            .into_iter()
            .map(|mut e| {
                if e.path.is_relative() {
                    e.path = base.join(&e.path);
                }
                e
            })
            .collect();
        log::debug!("Catalog lists {} scenes", entries.len());
        Ok(Self { entries })
    }

    /// Write the manifest as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SiResult<()> {
        let manifest = Manifest {
            scenes: self.entries.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches_metadata(entry: &CatalogEntry, query: &CatalogQuery) -> bool {
        if let Some(pol) = query.polarization {
            if !entry.polarizations.contains(&pol) {
                return false;
            }
        }
        if let Some(mode) = query.instrument_mode {
            if entry.instrument_mode != mode {
                return false;
            }
        }
        if let Some((start, end)) = query.date_range {
            if entry.acquired < start || entry.acquired >= end {
                return false;
            }
        }
        true
    }

    fn intersects(entry: &CatalogEntry, bbox: &BoundingBox, epsg: u32) -> SiResult<bool> {
        let grid = read_grid(&entry.path)?;
        if grid.epsg != epsg {
            return Err(SiError::Alignment(format!(
                "Scene {} is in EPSG:{} but the query is EPSG:{}",
                entry.id, grid.epsg, epsg
            )));
        }
        Ok(grid.bounds().intersects(bbox))
    }

    /// Entries matching the query, sorted by acquisition time
    ///
    /// Scenes in a different CRS than the query bounds are skipped with a warning.
    pub fn query(&self, query: &CatalogQuery) -> SiResult<Vec<CatalogEntry>> {
        let mut selected = Vec::new();
        for entry in self.entries.iter().filter(|e| Self::matches_metadata(e, query)) {
            if let Some((bbox, epsg)) = &query.bounds {
                match Self::intersects(entry, bbox, *epsg) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) if e.is_recoverable() => {
                        log::warn!("Skipping scene {}: {}", entry.id, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            selected.push(entry.clone());
        }
        selected.sort_by_key(|e| e.acquired);
        log::info!("{} of {} catalog scenes match the query", selected.len(), self.entries.len());
        Ok(selected)
    }

    /// Read the named bands of one scene onto `target` (bilinear)
    pub fn read_scene(entry: &CatalogEntry, bands: &[&str], target: &RasterGrid) -> SiResult<Scene> {
        let selectors: Vec<BandSelector> = bands
            .iter()
            .map(|b| BandSelector::Name(b.to_string()))
            .collect();
        let rasters = read_bands(&entry.path, &selectors)?;

        let mut named = Vec::with_capacity(bands.len());
        for (name, raster) in bands.iter().zip(rasters) {
            let raster = raster.ok_or_else(|| SiError::MissingBand {
                scene: entry.id.clone(),
                band: name.to_string(),
            })?;
            named.push((name.to_string(), raster.resample_bilinear(target)?));
        }
        Scene::new(entry.metadata(), named)
    }

    /// Read every entry in parallel; unreadable scenes follow `policy`
    pub fn load(
        entries: &[CatalogEntry],
        bands: &[&str],
        target: &RasterGrid,
        policy: SkipPolicy,
        cancel: &CancellationToken,
    ) -> SiResult<ImageCollection> {
        let results: Vec<SiResult<Option<Scene>>> = entries
            .par_iter()
            .map(|entry| {
                cancel.check()?;
                match Self::read_scene(entry, bands, target) {
                    Ok(scene) => Ok(Some(scene)),
                    Err(e) if policy == SkipPolicy::Warn && e.is_recoverable() => {
                        log::warn!("Skipping scene {}: {}", entry.id, e);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect();

        let mut scenes = Vec::with_capacity(results.len());
        for result in results {
            if let Some(scene) = result? {
                scenes.push(scene);
            }
        }
        Ok(ImageCollection::new(scenes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::raster::Raster;
    use crate::io::geotiff::write_bands;
    use crate::types::GeoTransform;
    use chrono::TimeZone;

    fn grid(x0: f64) -> RasterGrid {
        RasterGrid::new(GeoTransform::north_up(x0, 1000.0, 10.0), 32653, 10, 10)
    }

    fn entry(id: &str, path: &str, day: u32, pols: Vec<Polarization>) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            path: PathBuf::from(path),
            acquired: Utc.with_ymd_and_hms(2018, 6, day, 8, 0, 0).unwrap(),
            relative_orbit: 39,
            polarizations: pols,
            instrument_mode: AcquisitionMode::IW,
            orbit_pass: Some(OrbitPass::Descending),
            heading_deg: Some(190.0),
        }
    }

    fn write_scene(dir: &Path, name: &str, x0: f64) {
        let g = grid(x0);
        write_bands(
            &[("VH", &Raster::constant(g, -14.0)), ("angle", &Raster::constant(g, 38.0))],
            dir.join(name),
            "GTiff",
        )
        .unwrap();
    }

    #[test]
    fn test_manifest_paths_resolve_relative() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SceneCatalog::new(vec![entry("a", "a.tif", 1, vec![Polarization::VH])]);
        let manifest = dir.path().join("scenes.json");
        catalog.save(&manifest).unwrap();

        let loaded = SceneCatalog::from_file(&manifest).unwrap();
        assert_eq!(loaded.entries()[0].path, dir.path().join("a.tif"));
        assert_eq!(loaded.entries()[0].orbit_pass, Some(OrbitPass::Descending));
    }

    #[test]
    fn test_metadata_query_sorted() {
        let catalog = SceneCatalog::new(vec![
            entry("late", "x.tif", 20, vec![Polarization::VV, Polarization::VH]),
            entry("vv_only", "y.tif", 5, vec![Polarization::VV]),
            entry("early", "z.tif", 2, vec![Polarization::VH]),
        ]);
        let query = CatalogQuery {
            polarization: Some(Polarization::VH),
            instrument_mode: Some(AcquisitionMode::IW),
            ..CatalogQuery::default()
        };
        let ids: Vec<String> = catalog.query(&query).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["early".to_string(), "late".to_string()]);
    }

    #[test]
    fn test_bounds_query_reads_headers() {
        let dir = tempfile::tempdir().unwrap();
        write_scene(dir.path(), "near.tif", 0.0);
        write_scene(dir.path(), "far.tif", 50_000.0);
        let catalog = SceneCatalog::new(vec![
            entry("near", &dir.path().join("near.tif").to_string_lossy(), 1, vec![Polarization::VH]),
            entry("far", &dir.path().join("far.tif").to_string_lossy(), 2, vec![Polarization::VH]),
        ]);
        let query = CatalogQuery {
            bounds: Some((grid(0.0).bounds(), 32653)),
            ..CatalogQuery::default()
        };
        let selected = catalog.query(&query).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "near");
    }

    #[test]
    fn test_missing_band_skipped_under_warn() {
        let dir = tempfile::tempdir().unwrap();
        write_scene(dir.path(), "s.tif", 0.0);
        let entries = vec![entry("s", &dir.path().join("s.tif").to_string_lossy(), 1, vec![Polarization::VH])];

        let ok = SceneCatalog::load(&entries, &["VH", "angle"], &grid(0.0), SkipPolicy::Warn, &CancellationToken::new())
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok.scenes()[0].band("angle").unwrap().get(3, 3), 38.0);

        let skipped = SceneCatalog::load(&entries, &["VV"], &grid(0.0), SkipPolicy::Warn, &CancellationToken::new())
            .unwrap();
        assert!(skipped.is_empty());
    }
}
