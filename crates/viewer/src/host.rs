//! Headless script host
//!
//! Holds the scene's field values and renders each frame as a solid fill of
//! the first `Background` node's `skyColor`.

use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use image::{Rgb, RgbImage};
use scenetest_common::{Error, Result, ScriptHost};
use tracing::debug;

use crate::error::ViewerError;
use crate::scene::{SceneDocument, SceneNode};

/// Window size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl FromStr for Screen {
    type Err = ViewerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ViewerError::Screen(s.to_string());
        let (width, height) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

pub struct HeadlessHost {
    screen: Screen,
    nominal_rate: f64,
    measured_rate: Option<f64>,
    last_frame: Option<Instant>,
    nodes: Vec<SceneNode>,
}

impl HeadlessHost {
    pub fn new(screen: Screen, frame_rate: f64, scene: &SceneDocument) -> Self {
        Self {
            screen,
            nominal_rate: frame_rate,
            measured_rate: None,
            last_frame: None,
            nodes: scene.nodes.clone(),
        }
    }

    /// Note that a frame was presented; the frame rate follows real timing
    pub fn present(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame {
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                self.measured_rate = Some(1.0 / elapsed);
            }
        }
        self.last_frame = Some(now);
    }

    pub fn field(&self, node: &str, field: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.answers_to(node))
            .and_then(|n| n.field(field))
    }

    /// Colour of the current frame
    pub fn background(&self) -> Rgb<u8> {
        let color = self
            .field("Background", "skyColor")
            .and_then(parse_color)
            .unwrap_or([0.0, 0.0, 0.0]);
        Rgb(color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
    }

    pub fn render(&self) -> RgbImage {
        RgbImage::from_pixel(self.screen.width, self.screen.height, self.background())
    }
}

impl ScriptHost for HeadlessHost {
    fn set_value(&mut self, node: &str, field: &str, value: &str) -> Result<()> {
        let target = self
            .nodes
            .iter_mut()
            .find(|n| n.answers_to(node))
            .ok_or_else(|| Error::Host(format!("no node named '{node}'")))?;
        target.set_field(field, value);
        debug!("{}.{} = {}", node, field, value);
        Ok(())
    }

    fn take_screenshot(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.render()
            .save(path)
            .map_err(|e| Error::Host(format!("cannot write {}: {}", path.display(), e)))?;
        debug!("Screenshot written to {}", path.display());
        Ok(())
    }

    fn frame_rate(&self) -> f64 {
        self.measured_rate.unwrap_or(self.nominal_rate)
    }
}

/// First RGB triple of an SFColor / MFColor value
fn parse_color(value: &str) -> Option<[f32; 3]> {
    let mut parts = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
        .map(str::parse::<f32>);
    let mut color = [0.0; 3];
    for channel in &mut color {
        *channel = parts.next()?.ok()?;
    }
    Some(color)
}
