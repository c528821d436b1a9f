//! Screenshot comparison against a stored baseline
//!
//! The evidence screenshot of a run should be equivalent to the previous one
//! given the same application state. Baselines are stored by file name.

use image::{GenericImageView, Pixel, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated before a pixel counts as changed
const CHANNEL_TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    /// Set when this run created the baseline
    pub baseline_created: bool,

    pub actual_hash: String,
    pub baseline_hash: String,
}

/// Configuration for visual testing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub diff_dir: PathBuf,
    /// Allowed differing pixels, in percent
    pub threshold: f64,
    /// Create the baseline from the actual screenshot when missing
    pub auto_update: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("verification/baselines"),
            diff_dir: PathBuf::from("verification/diffs"),
            threshold: 0.5,
            auto_update: false,
        }
    }
}

pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;
        Ok(Self { config })
    }

    fn baseline_path(&self, actual: &Path) -> E2eResult<PathBuf> {
        let file_name = actual.file_name().ok_or_else(|| {
            E2eError::VisualRegression(format!("not a file path: {}", actual.display()))
        })?;
        Ok(self.config.baseline_dir.join(file_name))
    }

    /// Compare a screenshot against its baseline
    pub fn compare(&self, actual: &Path, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let baseline_path = self.baseline_path(actual)?;

        if !actual.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Actual screenshot not found: {}",
                actual.display()
            )));
        }

        let actual_hash = hash_file(actual)?;

        if !baseline_path.exists() {
            if !self.config.auto_update {
                return Err(E2eError::BaselineNotFound(baseline_path.display().to_string()));
            }
            info!("Creating baseline {}", baseline_path.display());
            std::fs::copy(actual, &baseline_path)?;
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_image_path: None,
                baseline_created: true,
                actual_hash: actual_hash.clone(),
                baseline_hash: actual_hash,
            });
        }

        let baseline_hash = hash_file(&baseline_path)?;
        let actual_img = image::open(actual)?;

        if actual_hash == baseline_hash {
            debug!("Screenshots match exactly (same hash)");
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: u64::from(actual_img.width()) * u64::from(actual_img.height()),
                diff_image_path: None,
                baseline_created: false,
                actual_hash,
                baseline_hash,
            });
        }

        let baseline_img = image::open(&baseline_path)?;
        if actual_img.dimensions() != baseline_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: actual {:?} vs baseline {:?}",
                actual_img.dimensions(),
                baseline_img.dimensions()
            );
        }

        // Compare over the union of both canvases; area covered by only one
        // image counts as changed.
        let width = actual_img.width().max(baseline_img.width());
        let height = actual_img.height().max(baseline_img.height());
        let actual_rgba = actual_img.to_rgba8();
        let baseline_rgba = baseline_img.to_rgba8();

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let total_pixels = u64::from(width) * u64::from(height);

        for y in 0..height {
            for x in 0..width {
                let a = pixel_at(&actual_rgba, x, y);
                let b = pixel_at(&baseline_rgba, x, y);
                match (a, b) {
                    (Some(a), Some(b)) if !pixels_differ(a, b) => {
                        let c = a.channels();
                        diff_img.put_pixel(x, y, image::Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                    }
                    _ => {
                        diff_pixels += 1;
                        diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                    }
                }
            }
        }

        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            (diff_pixels as f64 / total_pixels as f64) * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff_pixels > 0 {
            let stem = actual.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let path = self.config.diff_dir.join(format!("{}-diff.png", stem));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual regression in {}: {:.2}% pixels differ (threshold: {:.2}%)",
                actual.display(),
                diff_percent,
                threshold
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            baseline_created: false,
            actual_hash,
            baseline_hash,
        })
    }

    /// Replace the baseline with the given screenshot
    pub fn update_baseline(&self, actual: &Path) -> E2eResult<PathBuf> {
        if !actual.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Cannot update baseline: screenshot not found: {}",
                actual.display()
            )));
        }
        let baseline_path = self.baseline_path(actual)?;
        std::fs::copy(actual, &baseline_path)?;
        info!("Updated baseline {}", baseline_path.display());
        Ok(baseline_path)
    }
}

fn pixel_at(img: &RgbaImage, x: u32, y: u32) -> Option<&image::Rgba<u8>> {
    (x < img.width() && y < img.height()).then(|| img.get_pixel(x, y))
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (i32::from(*x) - i32::from(*y)).abs() > CHANNEL_TOLERANCE)
}

fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([rgb[0], rgb[1], rgb[2], 255]));
        img.save(path).unwrap();
    }

    fn tester(dir: &Path, auto_update: bool) -> VisualTester {
        VisualTester::new(VisualConfig {
            baseline_dir: dir.join("baselines"),
            diff_dir: dir.join("diffs"),
            threshold: 0.5,
            auto_update,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_baseline_without_auto_update() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        solid(&shot, 4, 4, [255, 255, 255]);

        let err = tester(dir.path(), false).compare(&shot, None).unwrap_err();
        assert!(matches!(err, E2eError::BaselineNotFound(_)));
    }

    #[test]
    fn test_first_run_creates_baseline_then_matches() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        solid(&shot, 8, 8, [10, 20, 30]);
        let tester = tester(dir.path(), true);

        let first = tester.compare(&shot, None).unwrap();
        assert!(first.baseline_created);
        assert!(dir.path().join("baselines/verification.png").exists());

        let second = tester.compare(&shot, None).unwrap();
        assert!(second.matches);
        assert!(!second.baseline_created);
        assert_eq!(second.diff_pixels, 0);
    }

    #[test]
    fn test_small_color_noise_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        let tester = tester(dir.path(), true);

        solid(&shot, 8, 8, [100, 100, 100]);
        tester.compare(&shot, None).unwrap();

        solid(&shot, 8, 8, [103, 98, 100]);
        let diff = tester.compare(&shot, None).unwrap();
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
        assert!(diff.diff_image_path.is_none());
    }

    #[test]
    fn test_changed_screenshot_is_reported_with_diff_image() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        let tester = tester(dir.path(), true);

        solid(&shot, 10, 10, [255, 255, 255]);
        tester.compare(&shot, None).unwrap();

        solid(&shot, 10, 10, [0, 0, 0]);
        let diff = tester.compare(&shot, None).unwrap();
        assert!(!diff.matches);
        assert_eq!(diff.diff_pixels, 100);
        assert_eq!(diff.diff_percent, 100.0);
        assert!(diff.diff_image_path.unwrap().ends_with("verification-diff.png"));
    }

    #[test]
    fn test_taller_page_counts_extra_rows_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        let tester = tester(dir.path(), true);

        solid(&shot, 10, 10, [255, 255, 255]);
        tester.compare(&shot, None).unwrap();

        solid(&shot, 10, 20, [255, 255, 255]);
        let diff = tester.compare(&shot, Some(60.0)).unwrap();
        assert_eq!(diff.total_pixels, 200);
        assert_eq!(diff.diff_pixels, 100);
        assert!(diff.matches);
    }

    #[test]
    fn test_update_baseline_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        let tester = tester(dir.path(), false);

        solid(&shot, 4, 4, [1, 2, 3]);
        let baseline = tester.update_baseline(&shot).unwrap();
        assert_eq!(std::fs::read(&baseline).unwrap(), std::fs::read(&shot).unwrap());
        assert!(tester.compare(&shot, None).unwrap().matches);
    }
}
