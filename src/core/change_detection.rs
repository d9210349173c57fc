//! Post-event change statistic ("SI") from pre/post Sentinel-1 collections
//!
//! For every post-event image, each same-path pre-event image is differenced
//! against it, thresholded at an upper percentile of the difference over a
//! fixed reference region, and the resulting exceedance images are averaged.
//! SI is the mean of those per-image fractions.

use crate::core::collection::{CancellationToken, ImageCollection, Scene};
use crate::core::raster::{Mask, Raster};
use crate::core::statistics::{nan_mean, percentiles, PercentileStats};
use crate::types::{SiError, SiResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters for the change statistic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiParams {
    /// Exceedance threshold percentile of the pre - post difference
    pub upper_percentile: f64,
    /// Companion lower percentile, reported alongside the threshold
    pub lower_percentile: f64,
    /// Only strictly positive differences (backscatter decrease) can exceed
    pub require_positive_difference: bool,
}

impl Default for SiParams {
    fn default() -> Self {
        Self {
            upper_percentile: 90.0,
            lower_percentile: 10.0,
            require_positive_difference: true,
        }
    }
}

impl SiParams {
    pub fn validate(&self) -> SiResult<()> {
        let in_range = |p: f64| p > 0.0 && p < 100.0;
        if !in_range(self.upper_percentile) || !in_range(self.lower_percentile) {
            return Err(SiError::Config(format!(
                "Percentiles must lie in (0, 100), got upper={} lower={}",
                self.upper_percentile, self.lower_percentile
            )));
        }
        if self.lower_percentile >= self.upper_percentile {
            return Err(SiError::Config(format!(
                "Lower percentile {} must be below upper percentile {}",
                self.lower_percentile, self.upper_percentile
            )));
        }
        Ok(())
    }
}

/// Per post-event image summary
#[derive(Debug, Clone)]
pub struct PostImageReport {
    pub scene_id: String,
    pub relative_orbit: u32,
    /// Pre-event images on the same path
    pub matched_pre: usize,
    /// Pre-event images that contributed an exceedance image
    pub used_pre: usize,
    pub thresholds: Vec<PercentileStats>,
    /// Pixels with a defined per-image fraction
    pub valid_pixels: usize,
}

/// SI raster with per-image diagnostics
#[derive(Debug, Clone)]
pub struct SiOutput {
    pub si: Raster,
    pub reports: Vec<PostImageReport>,
}

impl SiOutput {
    /// Post-event images that contributed to SI
    pub fn contributing(&self) -> usize {
        self.reports.iter().filter(|r| r.used_pre > 0).count()
    }
}

/// Change statistic processor
pub struct SiComputer {
    params: SiParams,
    band: String,
}

impl SiComputer {
    pub fn new(params: SiParams, band: impl Into<String>) -> Self {
        Self {
            params,
            band: band.into(),
        }
    }

    pub fn params(&self) -> &SiParams {
        &self.params
    }

    /// Exceedance indicator of one pre/post difference
    fn exceedance(&self, difference: &Raster, stats: &PercentileStats) -> Raster {
        let threshold = stats.upper_value;
        let positive_only = self.params.require_positive_difference;
        difference.map(move |d| {
            if d.is_nan() {
                f32::NAN
            } else if d >= threshold && (!positive_only || d > 0.0) {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Mean exceedance of one post-event image against its same-path pre-event images
    ///
    /// Returns `None` when no pre-event image could be used.
    pub fn post_image_fraction(
        &self,
        pre: &ImageCollection,
        post: &Scene,
        region: &Mask,
    ) -> SiResult<(Option<Raster>, PostImageReport)> {
        let path = post.metadata().relative_orbit;
        let post_band = post.band(&self.band)?;
        let same_path = pre.filter_path(path);

        let mut report = PostImageReport {
            scene_id: post.id().to_string(),
            relative_orbit: path,
            matched_pre: same_path.len(),
            used_pre: 0,
            thresholds: Vec::new(),
            valid_pixels: 0,
        };

        if same_path.is_empty() {
            log::warn!(
                "Post-event scene {} (path {}) has no pre-event scene on the same path; excluded",
                post.id(),
                path
            );
            return Ok((None, report));
        }

        let mut exceedances = Vec::with_capacity(same_path.len());
        for q in same_path.iter() {
            let difference = q.band(&self.band)?.subtract(post_band)?;
            let stats = match percentiles(
                &difference,
                region,
                self.params.upper_percentile,
                self.params.lower_percentile,
            ) {
                Ok(s) => s,
                Err(e @ SiError::EmptyReduction(_)) => {
                    log::warn!("Skipping pre-event scene {} against {}: {}", q.id(), post.id(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            log::debug!(
                "{} - {}: p{}={:.4} p{}={:.4} over {} samples",
                q.id(),
                post.id(),
                stats.upper,
                stats.upper_value,
                stats.lower,
                stats.lower_value,
                stats.count
            );
            exceedances.push(self.exceedance(&difference, &stats));
            report.thresholds.push(stats);
        }

        report.used_pre = exceedances.len();
        if exceedances.is_empty() {
            log::warn!("Post-event scene {} has no usable pre-event pairs; excluded", post.id());
            return Ok((None, report));
        }

        let fraction = nan_mean(&exceedances)?;
        report.valid_pixels = fraction.valid_count();
        Ok((Some(fraction), report))
    }

    /// Compute SI for the whole pre/post pair of collections
    pub fn compute(
        &self,
        pre: &ImageCollection,
        post: &ImageCollection,
        region: &Mask,
        cancel: &CancellationToken,
    ) -> SiResult<SiOutput> {
        if pre.is_empty() {
            return Err(SiError::MissingData("Pre-event collection is empty".to_string()));
        }
        if post.is_empty() {
            return Err(SiError::MissingData("Post-event collection is empty".to_string()));
        }
        log::info!(
            "Computing SI from {} pre-event and {} post-event scenes",
            pre.len(),
            post.len()
        );

        let results: Vec<SiResult<(Option<Raster>, PostImageReport)>> = post
            .scenes()
            .par_iter()
            .map(|p| {
                cancel.check()?;
                self.post_image_fraction(pre, p, region)
            })
            .collect();

        let mut fractions = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for result in results {
            let (fraction, report) = result?;
            if let Some(f) = fraction {
                fractions.push(f);
            }
            reports.push(report);
        }

        if fractions.is_empty() {
            return Err(SiError::MissingData(
                "No post-event scene has a same-path pre-event counterpart".to_string(),
            ));
        }

        let si = nan_mean(&fractions)?;
        log::info!(
            "SI computed from {} of {} post-event scenes, {} valid pixels",
            fractions.len(),
            post.len(),
            si.valid_count()
        );
        Ok(SiOutput { si, reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collection::tests::{scene, test_grid};
    use ndarray::Array2;

    fn textured(id: &str, day: u32, path: u32, offset: f32) -> Scene {
        let mut data = Array2::<f32>::zeros((4, 4));
        for ((i, j), v) in data.indexed_iter_mut() {
            *v = -20.0 + (i * 4 + j) as f32 * 0.3 + offset;
        }
        let s = scene(id, day, path, 0.0);
        s.with_band("VH", Raster::new(test_grid(), data).unwrap()).unwrap()
    }

    fn computer() -> SiComputer {
        SiComputer::new(SiParams::default(), "VH")
    }

    #[test]
    fn test_identical_pre_and_post_gives_zero() {
        let post = textured("post", 20, 39, 0.0);
        let pre = ImageCollection::new(vec![textured("pre1", 1, 39, 0.0), textured("pre2", 2, 39, 0.0)]);
        let out = computer()
            .compute(&pre, &ImageCollection::new(vec![post]), &Mask::ones(test_grid()), &CancellationToken::new())
            .unwrap();
        assert!(out.si.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_si_bounded_and_detects_drop() {
        let mut post_data = Array2::<f32>::from_elem((4, 4), -12.0);
        post_data[[0, 0]] = -25.0; // strong backscatter drop
        let post = scene("post", 20, 39, 0.0)
            .with_band("VH", Raster::new(test_grid(), post_data).unwrap())
            .unwrap();
        let pre = ImageCollection::new(vec![
            textured("pre1", 1, 39, 8.0),
            textured("pre2", 2, 39, 8.5),
            textured("pre3", 3, 39, 7.5),
        ]);
        let out = computer()
            .compute(&pre, &ImageCollection::new(vec![post]), &Mask::ones(test_grid()), &CancellationToken::new())
            .unwrap();
        assert!(out.si.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(out.si.get(0, 0), 1.0);
        assert_eq!(out.reports[0].used_pre, 3);
    }

    #[test]
    fn test_unmatched_path_excluded() {
        let pre = ImageCollection::new(vec![textured("pre1", 1, 39, 1.0)]);
        let post = ImageCollection::new(vec![textured("post_a", 20, 39, 0.0), textured("post_b", 21, 112, 0.0)]);
        let out = computer()
            .compute(&pre, &post, &Mask::ones(test_grid()), &CancellationToken::new())
            .unwrap();
        assert_eq!(out.contributing(), 1);
        assert_eq!(out.reports[1].matched_pre, 0);
    }

    #[test]
    fn test_no_matching_paths_is_fatal() {
        let pre = ImageCollection::new(vec![textured("pre1", 1, 39, 1.0)]);
        let post = ImageCollection::new(vec![textured("post", 20, 112, 0.0)]);
        let result = computer().compute(&pre, &post, &Mask::ones(test_grid()), &CancellationToken::new());
        assert!(matches!(result, Err(SiError::MissingData(_))));
    }

    #[test]
    fn test_empty_collections_are_fatal() {
        let post = ImageCollection::new(vec![textured("post", 20, 39, 0.0)]);
        let result = computer().compute(&ImageCollection::default(), &post, &Mask::ones(test_grid()), &CancellationToken::new());
        assert!(matches!(result, Err(SiError::MissingData(_))));
    }

    #[test]
    fn test_masked_pixels_stay_nodata() {
        let post = textured("post", 20, 39, 0.0);
        let mut pre_data = Array2::<f32>::from_elem((4, 4), -10.0);
        pre_data[[2, 2]] = f32::NAN;
        let pre = scene("pre", 1, 39, 0.0)
            .with_band("VH", Raster::new(test_grid(), pre_data).unwrap())
            .unwrap();
        let out = computer()
            .compute(&ImageCollection::new(vec![pre]), &ImageCollection::new(vec![post]), &Mask::ones(test_grid()), &CancellationToken::new())
            .unwrap();
        assert!(out.si.get(2, 2).is_nan());
        assert_eq!(out.si.valid_count(), 15);
    }

    #[test]
    fn test_params_validation() {
        let bad = SiParams {
            lower_percentile: 95.0,
            ..SiParams::default()
        };
        assert!(bad.validate().is_err());
        assert!(SiParams::default().validate().is_ok());
    }
}
