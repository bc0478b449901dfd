//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::process::TargetCommand;

/// Harness configuration, loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Target application
    pub target: TargetConfig,

    /// Probe, wait and shutdown timing
    pub timing: TimingConfig,

    /// Rendering comparison
    pub rendering: RenderingConfig,

    /// Step-script hook inserted into scenes
    pub hook: HookConfig,

    /// Test definition discovery
    pub discovery: DiscoveryConfig,
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| HarnessError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration that must exist
    pub fn load_required(path: &Path) -> HarnessResult<Self> {
        if !path.is_file() {
            return Err(HarnessError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::load(path)
    }
}

/// Target application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Binary to launch
    pub binary: PathBuf,

    /// Arguments placed before the scene path
    pub load_flags: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("scenetest-viewer"),
            load_flags: vec!["--no-fullscreen".to_string(), "--screen=800x600".to_string()],
        }
    }
}

impl TargetConfig {
    pub fn command_for(&self, scene: &Path) -> TargetCommand {
        TargetCommand::new(&self.binary)
            .args(self.load_flags.iter().cloned())
            .arg(scene.to_string_lossy())
    }
}

/// Timing configuration. All values are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Probe ticks before giving up on a target that never signals
    pub startup_multiplier: u32,

    /// Bounded wait after a stop request, and after killing a probe
    pub shutdown_wait: f64,

    /// Poll interval while waiting for exit
    pub exit_poll: f64,

    /// Poll interval while waiting for the step script to finish
    pub wait_tick: f64,

    /// How long to wait for output pipes to close after exit
    pub output_grace: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_multiplier: 10,
            shutdown_wait: 5.0,
            exit_poll: 0.5,
            wait_tick: 0.5,
            output_grace: 2.0,
        }
    }
}

impl TimingConfig {
    pub fn shutdown_wait(&self) -> Duration {
        secs(self.shutdown_wait)
    }

    pub fn exit_poll(&self) -> Duration {
        secs(self.exit_poll)
    }

    pub fn wait_tick(&self) -> Duration {
        secs(self.wait_tick)
    }

    pub fn output_grace(&self) -> Duration {
        secs(self.output_grace)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Pixel comparison backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorKind {
    /// External ImageMagick `compare`
    #[default]
    Imagemagick,
    /// In-process comparison
    Builtin,
}

/// Rendering comparison configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    pub comparator: ComparatorKind,

    /// Path to ImageMagick `compare`
    pub compare_binary: PathBuf,

    /// Per-channel colour tolerance, in percent
    pub fuzz_percent: f64,

    /// A rendering passes when fewer pixels than this differ
    pub error_threshold: u64,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            comparator: ComparatorKind::default(),
            compare_binary: PathBuf::from("compare"),
            fuzz_percent: 3.0,
            error_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Template file; the built-in template is used when unset
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Definition file extensions, without the dot
    pub extensions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["testdef".to_string()],
        }
    }
}
