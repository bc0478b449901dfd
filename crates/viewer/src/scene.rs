//! Scene reading
//!
//! Only what the headless host needs: every element's attributes, and the
//! `<StepScript>` hook the harness injects.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{ViewerError, ViewerResult};

const HOOK_ELEMENT: &str = "StepScript";

const ELEMENT: &str = r#"<([A-Za-z_][\w:.-]*)((?:\s(?:[^>"']|"[^"]*"|'[^']*')*)?)/?>"#;
const ATTRIBUTE: &str = r#"([A-Za-z_:][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#;

/// Where the step script and its outputs live
#[derive(Debug, Clone, PartialEq)]
pub struct StepHook {
    pub script: Option<PathBuf>,
    pub log: PathBuf,
    pub sentinel: PathBuf,
    pub output_prefix: PathBuf,
}

/// One element of the scene with its attributes in document order
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub type_name: String,
    pub def: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl SceneNode {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_field(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, current)) => *current = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    /// A node answers to its DEF name or its type
    pub fn answers_to(&self, name: &str) -> bool {
        self.def.as_deref() == Some(name) || self.type_name == name
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneDocument {
    pub hook: Option<StepHook>,
    pub nodes: Vec<SceneNode>,
}

impl SceneDocument {
    pub fn load(path: &Path) -> ViewerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ViewerError::Scene {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
    }

    /// Relative script paths resolve against `base`
    pub fn parse(text: &str, base: &Path) -> ViewerResult<Self> {
        let element = Regex::new(ELEMENT)?;
        let attribute = Regex::new(ATTRIBUTE)?;

        let mut document = Self::default();
        for caps in element.captures_iter(text) {
            let type_name = &caps[1];
            let fields: Vec<(String, String)> = caps
                .get(2)
                .map(|attrs| {
                    attribute
                        .captures_iter(attrs.as_str())
                        .map(|a| {
                            let value = a.get(2).or_else(|| a.get(3)).map_or("", |m| m.as_str());
                            (a[1].to_string(), unescape(value))
                        })
                        .collect()
                })
                .unwrap_or_default();

            if type_name == HOOK_ELEMENT {
                if document.hook.is_none() {
                    document.hook = Some(hook_from(&fields, base));
                }
                continue;
            }

            let def = fields
                .iter()
                .find(|(name, _)| name == "DEF")
                .map(|(_, value)| value.clone());
            document.nodes.push(SceneNode {
                type_name: type_name.to_string(),
                def,
                fields,
            });
        }

        debug!(
            "Scene has {} node(s), hook: {}",
            document.nodes.len(),
            document.hook.is_some()
        );
        Ok(document)
    }
}

fn hook_from(fields: &[(String, String)], base: &Path) -> StepHook {
    let get = |name: &str| {
        fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    };
    let script = Some(get("url"))
        .filter(|url| !url.is_empty())
        .map(|url| base.join(url));
    StepHook {
        script,
        log: PathBuf::from(get("log")),
        sentinel: PathBuf::from(get("sentinel")),
        output_prefix: PathBuf::from(get("output")),
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
