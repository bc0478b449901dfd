//! Step-script hook inserted into every generated scene
//!
//! The template may use `{script}`, `{validation_log}`, `{sentinel}` and
//! `{output_prefix}`. Substituted values are escaped for attribute use.

use std::path::Path;

use crate::config::HookConfig;
use crate::definition::CaseLayout;
use crate::error::{HarnessError, HarnessResult};
use crate::variation::xml_escape;

/// Hook understood by `scenetest-viewer`
pub const DEFAULT_HOOK_TEMPLATE: &str = r#"<StepScript url="{script}" log="{validation_log}" sentinel="{sentinel}" output="{output_prefix}"/>"#;

#[derive(Debug, Clone, PartialEq)]
pub struct HookTemplate {
    text: String,
}

impl HookTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Resolve the configured template. An unreadable file is fatal.
    pub fn load(config: &HookConfig) -> HarnessResult<Self> {
        match &config.template {
            None => Ok(Self::default()),
            Some(path) => std::fs::read_to_string(path)
                .map(Self::new)
                .map_err(|source| HarnessError::HookTemplate {
                    path: path.clone(),
                    source,
                }),
        }
    }

    pub fn render(&self, layout: &CaseLayout, script: Option<&Path>) -> String {
        let script = script
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.text
            .replace("{script}", &xml_escape(&script))
            .replace(
                "{validation_log}",
                &xml_escape(&layout.validation_log.to_string_lossy()),
            )
            .replace("{sentinel}", &xml_escape(&layout.sentinel.to_string_lossy()))
            .replace(
                "{output_prefix}",
                &xml_escape(&layout.prefix.to_string_lossy()),
            )
    }
}

impl Default for HookTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_HOOK_TEMPLATE)
    }
}
