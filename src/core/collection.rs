//! Ordered, immutable collections of multi-band scenes
//!
//! Replaces deferred server-side collections with explicit in-memory
//! sequences: every filter or map produces a new collection, per-scene work
//! runs on the rayon pool and the input order is preserved.

use crate::core::raster::{Raster, RasterGrid};
use crate::types::{AcquisitionMode, BoundingBox, Polarization, SceneMetadata, SiError, SiResult};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared across a batch run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(SiError::Cancelled)` once cancellation has been requested
    pub fn check(&self) -> SiResult<()> {
        if self.is_cancelled() {
            Err(SiError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What to do when a per-scene transform fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Any error aborts the whole map
    Strict,
    /// Recoverable errors drop the scene with a warning
    Warn,
}

/// Named, pixel-aligned bands plus scene attributes
#[derive(Debug, Clone)]
pub struct Scene {
    bands: BTreeMap<String, Raster>,
    grid: RasterGrid,
    metadata: SceneMetadata,
}

impl Scene {
    pub fn new(metadata: SceneMetadata, bands: Vec<(String, Raster)>) -> SiResult<Self> {
        let grid = match bands.first() {
            Some((_, raster)) => *raster.grid(),
            None => {
                return Err(SiError::MissingData(format!(
                    "Scene {} has no bands",
                    metadata.scene_id
                )))
            }
        };
        let mut map = BTreeMap::new();
        for (name, raster) in bands {
            grid.ensure_aligned(raster.grid(), &format!("band {} of {}", name, metadata.scene_id))?;
            map.insert(name, raster);
        }
        Ok(Self {
            bands: map,
            grid,
            metadata,
        })
    }

    pub fn metadata(&self) -> &SceneMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        &self.metadata.scene_id
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    pub fn band(&self, name: &str) -> SiResult<&Raster> {
        self.bands.get(name).ok_or_else(|| SiError::MissingBand {
            scene: self.metadata.scene_id.clone(),
            band: name.to_string(),
        })
    }

    /// New scene with extra (or replaced) bands; metadata copied unchanged
    pub fn add_bands(&self, bands: Vec<(String, Raster)>) -> SiResult<Scene> {
        let mut out = self.clone();
        for (name, raster) in bands {
            self.grid
                .ensure_aligned(raster.grid(), &format!("band {} of {}", name, self.id()))?;
            out.bands.insert(name, raster);
        }
        Ok(out)
    }

    /// New scene with a single band replaced
    pub fn with_band(&self, name: &str, raster: Raster) -> SiResult<Scene> {
        self.add_bands(vec![(name.to_string(), raster)])
    }

    /// New scene restricted to the named bands
    pub fn select(&self, names: &[&str]) -> SiResult<Scene> {
        let mut bands = Vec::with_capacity(names.len());
        for name in names {
            bands.push((name.to_string(), self.band(name)?.clone()));
        }
        Scene::new(self.metadata.clone(), bands)
    }
}

/// Ordered sequence of scenes sharing a spatial domain
#[derive(Debug, Clone, Default)]
pub struct ImageCollection {
    scenes: Vec<Scene>,
}

impl ImageCollection {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn filter<P>(&self, predicate: P) -> ImageCollection
    where
        P: Fn(&Scene) -> bool,
    {
        ImageCollection {
            scenes: self.scenes.iter().filter(|s| predicate(s)).cloned().collect(),
        }
    }

    /// Scenes acquired within `[start, end)`
    pub fn filter_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ImageCollection {
        self.filter(|s| s.metadata.acquired >= start && s.metadata.acquired < end)
    }

    pub fn filter_path(&self, relative_orbit: u32) -> ImageCollection {
        self.filter(|s| s.metadata.relative_orbit == relative_orbit)
    }

    pub fn filter_polarization(&self, polarization: Polarization) -> ImageCollection {
        self.filter(|s| s.metadata.polarizations.contains(&polarization))
    }

    pub fn filter_mode(&self, mode: AcquisitionMode) -> ImageCollection {
        self.filter(|s| s.metadata.instrument_mode == mode)
    }

    pub fn filter_bounds(&self, bbox: &BoundingBox) -> ImageCollection {
        self.filter(|s| s.grid.bounds().intersects(bbox))
    }

    pub fn sort_by_time(&self) -> ImageCollection {
        let mut scenes = self.scenes.clone();
        scenes.sort_by_key(|s| s.metadata.acquired);
        ImageCollection { scenes }
    }

    /// Distinct relative orbits, ascending
    pub fn paths(&self) -> Vec<u32> {
        self.scenes
            .iter()
            .map(|s| s.metadata.relative_orbit)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Infallible per-scene transform, run in parallel
    pub fn map<F>(&self, f: F) -> ImageCollection
    where
        F: Fn(&Scene) -> Scene + Sync + Send,
    {
        ImageCollection {
            scenes: self.scenes.par_iter().map(f).collect(),
        }
    }

    /// Fallible per-scene transform, run in parallel
    pub fn try_map<F>(
        &self,
        f: F,
        policy: SkipPolicy,
        cancel: &CancellationToken,
    ) -> SiResult<ImageCollection>
    where
        F: Fn(&Scene) -> SiResult<Scene> + Sync + Send,
    {
        let results: Vec<SiResult<Option<Scene>>> = self
            .scenes
            .par_iter()
            .map(|scene| {
                cancel.check()?;
                match f(scene) {
                    Ok(out) => Ok(Some(out)),
                    Err(e) if policy == SkipPolicy::Warn && e.is_recoverable() => {
                        log::warn!("Skipping scene {}: {}", scene.id(), e);
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
        Ok(ImageCollection { scenes })
    }
}

impl FromIterator<Scene> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = Scene>>(iter: I) -> Self {
        ImageCollection {
            scenes: iter.into_iter().collect(),
        }
    }
}
