//! Rendering validation with screenshot comparison

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{GenericImageView, Pixel, RgbaImage};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ComparatorKind, RenderingConfig};
use crate::error::HarnessResult;
use crate::result::{RenderingResult, Verdict};

/// Why a pixel comparison could not produce a count
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("comparison tool unavailable: {0}")]
    Unavailable(String),

    #[error("comparison failed: {0}")]
    Failed(String),
}

/// Counts differing pixels between two images
pub trait PixelComparator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of differing pixels. A diff image is written to `diff`.
    fn compare(&self, baseline: &Path, output: &Path, diff: &Path) -> Result<u64, CompareError>;
}

/// ImageMagick `compare -fuzz N% -metric AE`
#[derive(Debug, Clone)]
pub struct ImageMagickComparator {
    binary: PathBuf,
    fuzz_percent: f64,
}

impl ImageMagickComparator {
    pub fn new(binary: impl Into<PathBuf>, fuzz_percent: f64) -> Self {
        Self {
            binary: binary.into(),
            fuzz_percent,
        }
    }
}

impl PixelComparator for ImageMagickComparator {
    fn name(&self) -> &'static str {
        "imagemagick"
    }

    fn compare(&self, baseline: &Path, output: &Path, diff: &Path) -> Result<u64, CompareError> {
        let result = Command::new(&self.binary)
            .arg("-fuzz")
            .arg(format!("{}%", self.fuzz_percent))
            .args(["-metric", "AE"])
            .arg(baseline)
            .arg(output)
            .arg(diff)
            .output()
            .map_err(|e| {
                CompareError::Unavailable(format!("{}: {}", self.binary.display(), e))
            })?;

        // The metric is reported on stderr; exit status 2 means the tool failed
        let stderr = String::from_utf8_lossy(&result.stderr);
        if result.status.code() == Some(2) {
            return Err(CompareError::Failed(stderr.trim().to_string()));
        }
        stderr
            .split_whitespace()
            .next()
            .and_then(|metric| metric.parse::<f64>().ok())
            .filter(|count| count.is_finite() && *count >= 0.0)
            .map(|count| count.round() as u64)
            .ok_or_else(|| {
                CompareError::Failed(format!("unexpected metric output: {:?}", stderr.trim()))
            })
    }
}

/// In-process per-channel comparison
#[derive(Debug, Clone)]
pub struct BuiltinComparator {
    tolerance: i32,
}

impl BuiltinComparator {
    pub fn new(fuzz_percent: f64) -> Self {
        let tolerance = (fuzz_percent.clamp(0.0, 100.0) / 100.0 * 255.0).round() as i32;
        Self { tolerance }
    }

    fn pixels_differ(&self, a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| (*x as i32 - *y as i32).abs() > self.tolerance)
    }
}

impl PixelComparator for BuiltinComparator {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn compare(&self, baseline: &Path, output: &Path, diff: &Path) -> Result<u64, CompareError> {
        let open = |path: &Path| {
            image::open(path).map_err(|e| CompareError::Failed(format!("{}: {}", path.display(), e)))
        };
        let baseline_img = open(baseline)?;
        let output_img = open(output)?;

        if baseline_img.dimensions() != output_img.dimensions() {
            warn!(
                "Rendering dimensions differ: output {:?} vs baseline {:?}",
                output_img.dimensions(),
                baseline_img.dimensions()
            );
        }

        let (bw, bh) = baseline_img.dimensions();
        let (ow, oh) = output_img.dimensions();
        let (width, height) = (bw.max(ow), bh.max(oh));
        let baseline_rgba = baseline_img.to_rgba8();
        let output_rgba = output_img.to_rgba8();

        let mut diff_img = RgbaImage::new(width, height);
        let mut differing = 0u64;

        for y in 0..height {
            for x in 0..width {
                let in_both = x < bw.min(ow) && y < bh.min(oh);
                if in_both {
                    let out_px = output_rgba.get_pixel(x, y);
                    if self.pixels_differ(out_px, baseline_rgba.get_pixel(x, y)) {
                        differing += 1;
                        diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                    } else {
                        let c = out_px.channels();
                        diff_img.put_pixel(x, y, image::Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                    }
                } else {
                    differing += 1;
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                }
            }
        }

        diff_img
            .save(diff)
            .map_err(|e| CompareError::Failed(format!("writing {}: {}", diff.display(), e)))?;
        Ok(differing)
    }
}

/// Compares screenshots against the newest matching baseline
pub struct RenderingValidator {
    comparator: Box<dyn PixelComparator>,
    error_threshold: u64,
}

impl RenderingValidator {
    pub fn new(comparator: Box<dyn PixelComparator>, error_threshold: u64) -> Self {
        Self {
            comparator,
            error_threshold,
        }
    }

    pub fn from_config(config: &RenderingConfig) -> Self {
        let comparator: Box<dyn PixelComparator> = match config.comparator {
            ComparatorKind::Imagemagick => Box::new(ImageMagickComparator::new(
                &config.compare_binary,
                config.fuzz_percent,
            )),
            ComparatorKind::Builtin => Box::new(BuiltinComparator::new(config.fuzz_percent)),
        };
        Self::new(comparator, config.error_threshold)
    }

    pub fn comparator_name(&self) -> &'static str {
        self.comparator.name()
    }

    /// Validate `output` against the newest file matching `baseline_pattern`
    ///
    /// The diff image is removed when the rendering passes and kept when it
    /// fails.
    pub fn validate(&self, baseline_pattern: &str, output: &Path, diff: &Path) -> RenderingResult {
        let mut result = RenderingResult {
            verdict: Verdict::Failed,
            output: output.to_path_buf(),
            baseline: None,
            diff: None,
            differing_pixels: None,
            message: None,
        };
        remove_if_present(diff);

        let baseline = match newest_baseline(baseline_pattern) {
            Ok(Some(baseline)) => baseline,
            Ok(None) => {
                warn!("No baseline matches {}, skipping", baseline_pattern);
                result.verdict = Verdict::Skipped;
                result.message = Some("no baseline".to_string());
                return result;
            }
            Err(e) => {
                warn!("Baseline lookup failed for {}: {}", baseline_pattern, e);
                result.verdict = Verdict::Unvalidated;
                result.message = Some(e.to_string());
                return result;
            }
        };
        result.baseline = Some(baseline.clone());

        if !output.is_file() {
            result.message = Some(format!("rendering not found: {}", output.display()));
            return result;
        }

        if let (Ok(a), Ok(b)) = (hash_file(&baseline), hash_file(output)) {
            if a == b {
                debug!("{} matches its baseline exactly", output.display());
                result.verdict = Verdict::Passed;
                result.differing_pixels = Some(0);
                return result;
            }
        }

        match self.comparator.compare(&baseline, output, diff) {
            Ok(count) => {
                result.differing_pixels = Some(count);
                if count < self.error_threshold {
                    result.verdict = Verdict::Passed;
                    remove_if_present(diff);
                } else {
                    warn!(
                        "Rendering {} differs from {} in {} pixel(s) (threshold: {})",
                        output.display(),
                        baseline.display(),
                        count,
                        self.error_threshold
                    );
                    result.diff = diff.exists().then(|| diff.to_path_buf());
                    result.message = Some(format!("{count} differing pixel(s)"));
                }
            }
            Err(e) => {
                warn!("Rendering {} left unvalidated: {}", output.display(), e);
                result.verdict = Verdict::Unvalidated;
                result.message = Some(e.to_string());
                remove_if_present(diff);
            }
        }
        result
    }

    /// Record a rendering without comparing it
    pub fn unvalidated(&self, baseline_pattern: &str, output: &Path) -> RenderingResult {
        RenderingResult {
            verdict: Verdict::Unvalidated,
            output: output.to_path_buf(),
            baseline: newest_baseline(baseline_pattern).ok().flatten(),
            diff: None,
            differing_pixels: None,
            message: Some("comparison not requested".to_string()),
        }
    }
}

/// The most recently modified file matching `pattern`
pub fn newest_baseline(pattern: &str) -> HarnessResult<Option<PathBuf>> {
    let newest = glob::glob(pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path);
    Ok(newest)
}

fn hash_file(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed diff {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::{Duration, SystemTime};

    fn solid(path: &Path, w: u32, h: u32, color: [u8; 3]) {
        RgbImage::from_pixel(w, h, Rgb(color)).save(path).unwrap();
    }

    fn builtin() -> RenderingValidator {
        RenderingValidator::new(Box::new(BuiltinComparator::new(3.0)), 5)
    }

    fn missing_tool() -> RenderingValidator {
        RenderingValidator::new(
            Box::new(ImageMagickComparator::new("/no/such/compare", 3.0)),
            5,
        )
    }

    fn pattern(path: &Path) -> String {
        glob::Pattern::escape(&path.to_string_lossy())
    }

    #[test]
    fn test_identical_files_pass_without_diff() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        let output = dir.path().join("output.png");
        let diff = dir.path().join("diff_output.png");
        solid(&baseline, 8, 8, [10, 20, 30]);
        std::fs::copy(&baseline, &output).unwrap();

        // No comparator is needed for byte-identical files
        let result = missing_tool().validate(&pattern(&baseline), &output, &diff);
        assert_eq!(result.verdict, Verdict::Passed);
        assert_eq!(result.differing_pixels, Some(0));
        assert!(!diff.exists());
    }

    #[test]
    fn test_missing_baseline_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.png");
        solid(&output, 4, 4, [0, 0, 0]);

        let result = builtin().validate(
            &pattern(&dir.path().join("absent.png")),
            &output,
            &dir.path().join("diff.png"),
        );
        assert_eq!(result.verdict, Verdict::Skipped);
        assert_eq!(result.baseline, None);
    }

    #[test]
    fn test_few_differences_pass_and_remove_diff() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        let output = dir.path().join("output.png");
        let diff = dir.path().join("diff.png");
        solid(&baseline, 8, 8, [0, 0, 0]);
        let mut img = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        img.put_pixel(3, 3, Rgb([255, 255, 255]));
        // Within the 3% fuzz
        img.put_pixel(4, 4, Rgb([5, 5, 5]));
        img.save(&output).unwrap();

        let result = builtin().validate(&pattern(&baseline), &output, &diff);
        assert_eq!(result.verdict, Verdict::Passed);
        assert_eq!(result.differing_pixels, Some(1));
        assert!(!diff.exists());
    }

    #[test]
    fn test_many_differences_fail_and_keep_diff() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        let output = dir.path().join("output.png");
        let diff = dir.path().join("diff.png");
        solid(&baseline, 8, 8, [0, 0, 0]);
        solid(&output, 8, 8, [0, 0, 255]);

        let result = builtin().validate(&pattern(&baseline), &output, &diff);
        assert_eq!(result.verdict, Verdict::Failed);
        assert_eq!(result.differing_pixels, Some(64));
        assert_eq!(result.diff.as_deref(), Some(diff.as_path()));
        assert!(diff.exists());
    }

    #[test]
    fn test_size_mismatch_counts_missing_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        let output = dir.path().join("output.png");
        solid(&baseline, 4, 4, [9, 9, 9]);
        solid(&output, 4, 6, [9, 9, 9]);

        let count = BuiltinComparator::new(3.0)
            .compare(&baseline, &output, &dir.path().join("diff.png"))
            .unwrap();
        assert_eq!(count, 8);
    }

    #[test]
    fn test_unavailable_tool_leaves_rendering_unvalidated() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        let output = dir.path().join("output.png");
        solid(&baseline, 4, 4, [0, 0, 0]);
        solid(&output, 4, 4, [255, 0, 0]);

        let result = missing_tool().validate(&pattern(&baseline), &output, &dir.path().join("d.png"));
        assert_eq!(result.verdict, Verdict::Unvalidated);
        assert!(!result.verdict.is_failure());
    }

    #[test]
    fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.png");
        solid(&baseline, 4, 4, [0, 0, 0]);

        let result = builtin().validate(
            &pattern(&baseline),
            &dir.path().join("never_written.png"),
            &dir.path().join("d.png"),
        );
        assert_eq!(result.verdict, Verdict::Failed);
    }

    #[test]
    fn test_newest_baseline_wins() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("shot_v1.png");
        let new = dir.path().join("shot_v2.png");
        solid(&old, 2, 2, [0, 0, 0]);
        solid(&new, 2, 2, [0, 0, 0]);

        let now = SystemTime::now();
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(now - Duration::from_secs(60))
            .unwrap();
        std::fs::File::options()
            .write(true)
            .open(&new)
            .unwrap()
            .set_modified(now)
            .unwrap();

        let pattern = format!("{}/shot_*.png", glob::Pattern::escape(&dir.path().to_string_lossy()));
        assert_eq!(newest_baseline(&pattern).unwrap(), Some(new));
    }
}
