//! YAML step scripts
//!
//! ```yaml
//! steps:
//!   - name: turn_red
//!     validate:
//!       - kind: rendering
//!         run_time: 0.5
//!       - kind: console
//!     actions:
//!       - action: set
//!         node: Background
//!         field: skyColor
//!         value: "1 0 0"
//!       - action: print
//!         message: sky is red
//! ```

use std::path::Path;

use scenetest_common::{Error, StepContext, StepDescriptor, StepRegistry, ValidatorKind};
use serde::Deserialize;

use crate::error::{ViewerError, ViewerResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepScript {
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptStep {
    pub name: String,

    #[serde(default)]
    pub validate: Vec<ValidateSpec>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidateSpec {
    pub kind: ValidatorKind,

    #[serde(default)]
    pub start_time: f64,

    #[serde(default)]
    pub run_time: f64,
}

impl ValidateSpec {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(self.kind)
            .with_start_time(self.start_time)
            .with_run_time(self.run_time)
    }
}

/// Something a step does when it runs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Write a field on a scene node
    Set {
        node: String,
        field: String,
        value: String,
    },
    /// Print to the console
    Print { message: String },
    /// Emit output for the custom validator
    Custom { message: String },
    /// Make the step fail
    Fail { message: String },
}

impl Action {
    fn run(&self, cx: &mut StepContext<'_>) -> scenetest_common::Result<()> {
        match self {
            Self::Set { node, field, value } => cx.set_value(node, field, value),
            Self::Print { message } => {
                cx.print(message.as_str());
                Ok(())
            }
            Self::Custom { message } => {
                cx.print_custom(message.as_str());
                Ok(())
            }
            Self::Fail { message } => Err(Error::Step(message.clone())),
        }
    }
}

impl StepScript {
    pub fn load(path: &Path) -> ViewerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ViewerError::ScriptIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ViewerError::Script {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Register every step in script order
    pub fn into_registry(self) -> ViewerResult<StepRegistry> {
        let mut registry = StepRegistry::new();
        for step in self.steps {
            let descriptors: Vec<StepDescriptor> =
                step.validate.iter().map(ValidateSpec::descriptor).collect();
            let actions = step.actions;
            registry.register(step.name, descriptors, move |cx: &mut StepContext<'_>| {
                actions.iter().try_for_each(|action| action.run(cx))
            })?;
        }
        Ok(registry)
    }
}
