//! Test case definitions
//!
//! A definition file (`*.testdef`) is TOML with one table per case:
//!
//! ```toml
//! [sphere]
//! x3d = "scenes/sphere.x3d"
//! type = "rendering"
//! baseline = "baseline"
//! script = "scenes/sphere.yaml"
//! starttime = 1.0
//! timeout = 5.0
//!
//! [[sphere.variations]]
//! name = "Red"
//! options = [{ nodes = ["Background"], field = "skyColor", value = "1 0 0" }]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scenetest_common::sanitize_file_component;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::variation::{Variation, DEFAULT_VARIATION};

/// Label describing what a case exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Screenshot,
    Performance,
    Rendering,
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Screenshot => "screenshot",
            Self::Performance => "performance",
            Self::Rendering => "rendering",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Deserialize)]
struct RawCase {
    x3d: Option<PathBuf>,
    #[serde(rename = "type")]
    case_type: Option<CaseType>,
    #[serde(default = "default_baseline")]
    baseline: PathBuf,
    script: Option<PathBuf>,
    #[serde(default = "default_seconds")]
    starttime: f64,
    #[serde(default = "default_seconds", alias = "runtime")]
    timeout: f64,
    #[serde(default)]
    variations: Vec<Variation>,
}

fn default_baseline() -> PathBuf {
    PathBuf::from("baseline")
}

fn default_seconds() -> f64 {
    1.0
}

/// A runnable test case. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseDefinition {
    /// Definition file this case was read from
    pub source: PathBuf,
    pub name: String,
    pub scene: PathBuf,
    pub case_type: CaseType,
    pub baseline_dir: PathBuf,
    pub script: Option<PathBuf>,
    pub startup_delay: Duration,
    pub timeout: Duration,
    /// Never empty; a case without variations runs once as `Default`
    pub variations: Vec<Variation>,
}

/// One table of a definition file
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionEntry {
    Case(TestCaseDefinition),
    /// A table missing the scene or the type; reported as skipped
    Incomplete {
        source: PathBuf,
        name: String,
        reason: String,
    },
}

/// Parse a definition file
pub fn load_definition_file(path: &Path) -> HarnessResult<Vec<DefinitionEntry>> {
    let text = std::fs::read_to_string(path)?;
    parse_definitions(&text, path)
}

/// Parse definition text; `source` locates relative paths and error messages
pub fn parse_definitions(text: &str, source: &Path) -> HarnessResult<Vec<DefinitionEntry>> {
    let base = source.parent().unwrap_or_else(|| Path::new("."));
    let table: toml::Table = toml::from_str(text).map_err(|e| HarnessError::DefinitionParse {
        path: source.to_path_buf(),
        source: e,
    })?;

    let mut entries = Vec::with_capacity(table.len());
    for (name, value) in table {
        let raw: RawCase = value
            .try_into()
            .map_err(|e| HarnessError::DefinitionParse {
                path: source.to_path_buf(),
                source: e,
            })?;
        entries.push(build_entry(name, raw, base, source)?);
    }

    debug!("Loaded {} case(s) from {}", entries.len(), source.display());
    Ok(entries)
}

fn build_entry(
    name: String,
    raw: RawCase,
    base: &Path,
    source: &Path,
) -> HarnessResult<DefinitionEntry> {
    let invalid = |reason: String| HarnessError::InvalidDefinition {
        path: source.to_path_buf(),
        reason,
    };

    let (scene, case_type) = match (raw.x3d, raw.case_type) {
        (Some(scene), Some(case_type)) => (scene, case_type),
        (scene, _) => {
            let missing = if scene.is_none() { "x3d" } else { "type" };
            warn!("Case '{}' in {} has no '{}', skipping", name, source.display(), missing);
            return Ok(DefinitionEntry::Incomplete {
                source: source.to_path_buf(),
                name,
                reason: format!("missing '{missing}'"),
            });
        }
    };

    let startup_delay = seconds(raw.starttime)
        .ok_or_else(|| invalid(format!("case '{name}': starttime must be a non-negative number")))?;
    let timeout = seconds(raw.timeout)
        .ok_or_else(|| invalid(format!("case '{name}': timeout must be a non-negative number")))?;

    let mut variations = raw.variations;
    if variations.is_empty() {
        variations.push(Variation::default());
    }
    for (i, variation) in variations.iter().enumerate() {
        if variations[..i].iter().any(|v| v.name == variation.name) {
            return Err(invalid(format!(
                "case '{name}': variation '{}' is listed twice",
                variation.name
            )));
        }
    }

    Ok(DefinitionEntry::Case(TestCaseDefinition {
        source: source.to_path_buf(),
        name,
        scene: base.join(scene),
        case_type,
        baseline_dir: base.join(raw.baseline),
        script: raw.script.map(|s| base.join(s)),
        startup_delay,
        timeout,
        variations,
    }))
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}

/// Find definition files under `dir`, sorted by path
pub fn discover(dir: &Path, extensions: &[String]) -> HarnessResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(HarnessError::WorkingDir(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| extensions.iter().any(|x| ext == x.as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Where a case run reads and writes its files
#[derive(Debug, Clone, PartialEq)]
pub struct CaseLayout {
    pub output_dir: PathBuf,
    pub text_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub baseline_dir: PathBuf,
    /// `<output>/<case>[_<variation>]_`
    pub prefix: PathBuf,
    pub validation_log: PathBuf,
    pub sentinel: PathBuf,
    stem: String,
}

impl CaseLayout {
    pub fn new(definition: &TestCaseDefinition, variation: &Variation) -> Self {
        let base = definition
            .source
            .parent()
            .unwrap_or_else(|| Path::new("."));
        let output_dir = base.join("output");

        let mut stem = sanitize_file_component(&definition.name);
        if variation.name != DEFAULT_VARIATION {
            stem.push('_');
            stem.push_str(&sanitize_file_component(&variation.name));
        }

        let prefix = output_dir.join(format!("{stem}_"));
        Self {
            text_dir: output_dir.join("text"),
            diff_dir: output_dir.join("diffs"),
            baseline_dir: definition.baseline_dir.clone(),
            validation_log: with_suffix(&prefix, "validation.txt"),
            sentinel: with_suffix(&prefix, "test_complete"),
            prefix,
            output_dir,
            stem,
        }
    }

    /// Create the output directories
    pub fn prepare(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.text_dir)?;
        std::fs::create_dir_all(&self.diff_dir)?;
        Ok(())
    }

    /// Remove the validation log and sentinel an earlier run left behind,
    /// so a run that never gets going cannot report them as its own
    pub fn clear_previous_run(&self) -> HarnessResult<()> {
        for path in [&self.validation_log, &self.sentinel] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed stale {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Glob pattern for the baseline of a screenshot
    pub fn rendering_baseline_pattern(&self, screenshot: &Path) -> String {
        let file_name = screenshot.file_name().map(PathBuf::from).unwrap_or_default();
        glob::Pattern::escape(&self.baseline_dir.join(file_name).to_string_lossy())
    }

    pub fn diff_path(&self, screenshot: &Path) -> PathBuf {
        let mut name = OsString::from("diff_");
        if let Some(file_name) = screenshot.file_name() {
            name.push(file_name);
        }
        self.diff_dir.join(name)
    }

    /// `<baseline>/<step>_<kind>.txt`
    pub fn text_baseline(&self, step: &str, kind: &str) -> PathBuf {
        self.baseline_dir
            .join(format!("{}_{kind}.txt", sanitize_file_component(step)))
    }

    /// `<output>/text/<case>[_<variation>]_<step>_<kind>.txt`
    pub fn text_artifact(&self, step: &str, kind: &str) -> PathBuf {
        self.text_dir.join(format!(
            "{}_{}_{kind}.txt",
            self.stem,
            sanitize_file_component(step)
        ))
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}
