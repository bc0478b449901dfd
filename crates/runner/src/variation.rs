//! Scene variations
//!
//! A variation rewrites the scene text before launch: a raw insertion string
//! (the step-script hook) goes right after the root `<Scene>` tag, then every
//! option sets one field on every element of its node types. Aliased
//! elements (`USE=`) are left alone since they share the referenced node.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HarnessResult;

/// Name given to the variation used when a case lists none
pub const DEFAULT_VARIATION: &str = "Default";

/// Attribute list up to (not including) the tag end. Quoted values are
/// consumed whole so `/` or `>` inside them do not end the tag.
const ATTRS: &str = r#"(\s(?:[^>"']|"[^"]*"|'[^']*')*?)?(\s*/?>)"#;

const ROOT_MARKER: &str = r#"<Scene(?:\s(?:[^>"']|"[^"]*"|'[^']*')*?)?\s*>"#;

/// One field mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOption {
    /// Element names the option applies to
    #[serde(rename = "nodes")]
    pub node_types: Vec<String>,

    /// Attribute to set. Empty means no attribute is touched.
    #[serde(rename = "field", default)]
    pub field_name: String,

    #[serde(rename = "value", default)]
    pub field_value: String,

    /// Element that receives a synthesized node
    #[serde(default = "default_container")]
    pub container: String,

    /// Synthesize the node when the scene has none of that type
    #[serde(default)]
    pub add_if_missing: bool,
}

fn default_container() -> String {
    "Scene".to_string()
}

impl SceneOption {
    pub fn new(
        node_types: impl IntoIterator<Item = impl Into<String>>,
        field_name: impl Into<String>,
        field_value: impl Into<String>,
    ) -> Self {
        Self {
            node_types: node_types.into_iter().map(Into::into).collect(),
            field_name: field_name.into(),
            field_value: field_value.into(),
            container: default_container(),
            add_if_missing: false,
        }
    }

    pub fn add_if_missing(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self.add_if_missing = true;
        self
    }

    fn apply(&self, document: String) -> HarnessResult<String> {
        let mut document = document;
        for node_type in &self.node_types {
            document = self.apply_to_type(node_type, document)?;
        }
        Ok(document)
    }

    fn apply_to_type(&self, node_type: &str, document: String) -> HarnessResult<String> {
        let element = Regex::new(&format!("<{}{}", regex::escape(node_type), ATTRS))?;

        if !element.is_match(&document) {
            if self.add_if_missing {
                return self.insert_node(node_type, document);
            }
            return Ok(document);
        }
        if self.field_name.is_empty() {
            return Ok(document);
        }

        let alias = Regex::new(r"(^|\s)USE\s*=")?;
        let field = Regex::new(&format!(
            r#"(^|\s){}\s*=\s*(?:"[^"]*"|'[^']*')"#,
            regex::escape(&self.field_name)
        ))?;
        let assignment = format!("{}=\"{}\"", self.field_name, xml_escape(&self.field_value));

        let rewritten = element.replace_all(&document, |caps: &Captures| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let tail = &caps[2];
            if alias.is_match(attrs) {
                return caps[0].to_string();
            }
            let attrs = if field.is_match(attrs) {
                field
                    .replace(attrs, |f: &Captures| format!("{}{}", &f[1], assignment))
                    .into_owned()
            } else {
                format!("{} {}", attrs, assignment)
            };
            format!("<{}{}{}", node_type, attrs, tail)
        });
        Ok(rewritten.into_owned())
    }

    fn insert_node(&self, node_type: &str, document: String) -> HarnessResult<String> {
        let container = Regex::new(&format!("<{}{}", regex::escape(&self.container), ATTRS))?;
        let open_tag = container
            .captures_iter(&document)
            .find(|caps| !caps[2].contains('/'))
            .and_then(|caps| caps.get(0));

        let Some(open_tag) = open_tag else {
            warn!(
                "No <{}> element to hold a new <{}>, leaving scene unchanged",
                self.container, node_type
            );
            return Ok(document);
        };

        let node = if self.field_name.is_empty() {
            format!("<{node_type}>\n</{node_type}>\n")
        } else {
            format!(
                "<{node_type} {}=\"{}\">\n</{node_type}>\n",
                self.field_name,
                xml_escape(&self.field_value)
            )
        };
        debug!("Adding <{}> to <{}>", node_type, self.container);

        let mut out = String::with_capacity(document.len() + node.len());
        out.push_str(&document[..open_tag.end()]);
        out.push_str(&node);
        out.push_str(&document[open_tag.end()..]);
        Ok(out)
    }
}

/// A named set of scene mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(default = "default_variation_name")]
    pub name: String,

    #[serde(default)]
    pub options: Vec<SceneOption>,

    /// Raw text placed right after the root `<Scene>` tag
    #[serde(default)]
    pub insertion: Option<String>,
}

fn default_variation_name() -> String {
    DEFAULT_VARIATION.to_string()
}

impl Default for Variation {
    fn default() -> Self {
        Self {
            name: default_variation_name(),
            options: Vec::new(),
            insertion: None,
        }
    }
}

/// Outcome of applying a variation
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub document: String,
    /// Whether the document differs from the input
    pub changed: bool,
    /// An insertion was requested but the root marker was missing
    pub insertion_failed: bool,
}

impl Variation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_option(mut self, option: SceneOption) -> Self {
        self.options.push(option);
        self
    }

    /// Put `hook` in front of any insertion the variation already carries
    pub fn with_hook(&self, hook: &str) -> Self {
        let mut variation = self.clone();
        variation.insertion = Some(match &self.insertion {
            Some(existing) => format!("{hook}{existing}"),
            None => hook.to_string(),
        });
        variation
    }

    pub fn apply(&self, document: &str) -> HarnessResult<Injection> {
        let mut text = document.to_string();
        let mut insertion_failed = false;

        if let Some(insertion) = self.insertion.as_deref().filter(|s| !s.is_empty()) {
            let root = Regex::new(ROOT_MARKER)?;
            match root.find(&text).map(|m| m.end()) {
                Some(end) => text.insert_str(end, insertion),
                None => {
                    warn!("Variation '{}': no <Scene> element to insert into", self.name);
                    insertion_failed = true;
                }
            }
        }

        for option in &self.options {
            text = option.apply(text)?;
        }

        let changed = text != document;
        Ok(Injection {
            document: text,
            changed,
            insertion_failed,
        })
    }
}

/// Escape a value for use inside a double-quoted attribute
pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SCENE: &str = r#"<X3D>
<Scene>
  <Shape>
    <Appearance><Material DEF="m" diffuseColor="1 0 0"/></Appearance>
    <Box size="1 1 1"/>
  </Shape>
  <Shape>
    <Appearance><Material USE="m"/></Appearance>
    <Box/>
  </Shape>
</Scene>
</X3D>
"#;

    #[test]
    fn test_empty_variation_leaves_scene_unchanged() {
        let injection = Variation::default().apply(SCENE).unwrap();
        assert!(!injection.changed);
        assert!(!injection.insertion_failed);
        assert_eq!(injection.document, SCENE);

        let empty_hook = Variation::default().with_hook("");
        assert!(!empty_hook.apply(SCENE).unwrap().changed);
    }

    #[test_case("<Scene>" ; "bare")]
    #[test_case("<Scene DEF='root'>" ; "with attributes")]
    fn test_insertion_follows_root_marker(root: &str) {
        let doc = format!("<X3D>{root}<Shape/></Scene></X3D>");
        let injection = Variation::default()
            .with_hook("<StepScript/>")
            .apply(&doc)
            .unwrap();
        assert!(injection.changed);
        assert_eq!(
            injection.document,
            format!("<X3D>{root}<StepScript/><Shape/></Scene></X3D>")
        );
    }

    #[test]
    fn test_missing_root_marker_sets_failure_flag() {
        let injection = Variation::default()
            .with_hook("<StepScript/>")
            .apply("<X3D><Group/></X3D>")
            .unwrap();
        assert!(injection.insertion_failed);
        assert!(!injection.changed);
    }

    #[test]
    fn test_existing_field_is_replaced() {
        let variation = Variation::named("Blue")
            .with_option(SceneOption::new(["Material"], "diffuseColor", "0 0 1"));
        let doc = variation.apply(SCENE).unwrap().document;
        assert!(doc.contains(r#"<Material DEF="m" diffuseColor="0 0 1"/>"#));
    }

    #[test]
    fn test_alias_is_never_mutated() {
        let variation = Variation::named("Blue")
            .with_option(SceneOption::new(["Material"], "diffuseColor", "0 0 1"));
        let doc = variation.apply(SCENE).unwrap().document;
        assert!(doc.contains(r#"<Material USE="m"/>"#));
    }

    #[test]
    fn test_missing_field_is_appended() {
        let variation =
            Variation::named("Solid").with_option(SceneOption::new(["Box"], "solid", "false"));
        let doc = variation.apply(SCENE).unwrap().document;
        assert!(doc.contains(r#"<Box size="1 1 1" solid="false"/>"#));
        assert!(doc.contains(r#"<Box solid="false"/>"#));
    }

    #[test]
    fn test_replacement_is_idempotent() {
        let variation = Variation::named("Blue")
            .with_option(SceneOption::new(["Material", "Box"], "diffuseColor", "0 0 1"));
        let once = variation.apply(SCENE).unwrap().document;
        let twice = variation.apply(&once).unwrap();
        assert_eq!(twice.document, once);
        assert!(!twice.changed);
    }

    #[test]
    fn test_type_name_must_match_whole_element() {
        let variation =
            Variation::named("v").with_option(SceneOption::new(["Box"], "solid", "false"));
        let injection = variation.apply("<Scene><BoxSet size='2'/></Scene>").unwrap();
        assert!(!injection.changed);
    }

    #[test]
    fn test_quoted_values_do_not_end_the_tag() {
        let doc = r#"<Scene><ImageTexture url="a/b>c.png" repeatS='true'/></Scene>"#;
        let variation = Variation::named("v")
            .with_option(SceneOption::new(["ImageTexture"], "repeatS", "false"));
        assert_eq!(
            variation.apply(doc).unwrap().document,
            r#"<Scene><ImageTexture url="a/b>c.png" repeatS="false"/></Scene>"#
        );
    }

    #[test]
    fn test_missing_node_is_added_to_container() {
        let variation = Variation::named("Physics").with_option(
            SceneOption::new(["GlobalSettings"], "", "").add_if_missing("Scene"),
        );
        let doc = variation.apply("<X3D><Scene>\n<Shape/></Scene></X3D>").unwrap();
        assert!(doc.changed);
        assert_eq!(
            doc.document,
            "<X3D><Scene><GlobalSettings>\n</GlobalSettings>\n\n<Shape/></Scene></X3D>"
        );
    }

    #[test]
    fn test_added_node_carries_field() {
        let variation = Variation::named("v").with_option(
            SceneOption::new(["GraphicsOptions"], "useCaching", "false")
                .add_if_missing("GlobalSettings"),
        );
        let doc = variation
            .apply("<Scene><GlobalSettings/><GlobalSettings>\n</GlobalSettings></Scene>")
            .unwrap()
            .document;
        assert_eq!(
            doc,
            "<Scene><GlobalSettings/><GlobalSettings><GraphicsOptions useCaching=\"false\">\n</GraphicsOptions>\n\n</GlobalSettings></Scene>"
        );
    }

    #[test]
    fn test_existing_alias_prevents_insertion() {
        let variation = Variation::named("v")
            .with_option(SceneOption::new(["Material"], "", "").add_if_missing("Scene"));
        let injection = variation
            .apply(r#"<Scene><Material USE="m"/></Scene>"#)
            .unwrap();
        assert!(!injection.changed);
    }

    #[test]
    fn test_empty_field_name_touches_no_attributes() {
        let variation =
            Variation::named("v").with_option(SceneOption::new(["Material"], "", "1 1 1"));
        assert!(!variation.apply(SCENE).unwrap().changed);
    }

    #[test]
    fn test_values_are_escaped() {
        let variation = Variation::named("v")
            .with_option(SceneOption::new(["Box"], "label", r#"a"b&<c"#));
        let doc = variation.apply("<Scene><Box/></Scene>").unwrap().document;
        assert_eq!(doc, r#"<Scene><Box label="a&quot;b&amp;&lt;c"/></Scene>"#);
    }

    #[test]
    fn test_dollar_in_value_is_literal() {
        let variation =
            Variation::named("v").with_option(SceneOption::new(["Box"], "label", "$1"));
        let doc = variation.apply("<Scene><Box label='x'/></Scene>").unwrap().document;
        assert_eq!(doc, r#"<Scene><Box label="$1"/></Scene>"#);
    }
}
