//! Step registration
//!
//! Steps are registered explicitly, in execution order. Each registration
//! carries one or more [`StepDescriptor`]s naming the validators that observe
//! the step and the timing offsets they need.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{parse_samples, RESERVED_TOKENS};
use crate::scheduler::StepContext;

/// Kind of validator attached to a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Screenshot compared against a baseline image
    #[serde(alias = "screenshot")]
    Rendering,
    /// Console output compared against baseline text
    Console,
    /// Explicit custom output compared against baseline text
    Custom,
    /// Frame-rate samples, reported but never judged
    Performance,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rendering => "rendering",
            Self::Console => "console",
            Self::Custom => "custom",
            Self::Performance => "performance",
        };
        f.write_str(name)
    }
}

/// Validator attachment with timing offsets, in seconds
///
/// `start_time` delays the step after the previous one finished;
/// `run_time` holds the step before its artifacts are collected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDescriptor {
    kind: ValidatorKind,
    start_time: f64,
    run_time: f64,
}

impl StepDescriptor {
    pub const fn new(kind: ValidatorKind) -> Self {
        Self {
            kind,
            start_time: 0.0,
            run_time: 0.0,
        }
    }

    pub const fn rendering() -> Self {
        Self::new(ValidatorKind::Rendering)
    }

    pub const fn console() -> Self {
        Self::new(ValidatorKind::Console)
    }

    pub const fn custom() -> Self {
        Self::new(ValidatorKind::Custom)
    }

    pub const fn performance() -> Self {
        Self::new(ValidatorKind::Performance)
    }

    pub const fn with_start_time(self, seconds: f64) -> Self {
        Self {
            start_time: seconds,
            ..self
        }
    }

    pub const fn with_run_time(self, seconds: f64) -> Self {
        Self {
            run_time: seconds,
            ..self
        }
    }

    pub fn kind(&self) -> ValidatorKind {
        self.kind
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn run_time(&self) -> f64 {
        self.run_time
    }
}

/// Body of a step
pub type StepFn = Box<dyn FnMut(&mut StepContext<'_>) -> Result<()> + Send>;

/// A step ready for scheduling
pub struct RegisteredStep {
    pub(crate) name: String,
    pub(crate) validators: Vec<ValidatorKind>,
    pub(crate) start_time: f64,
    pub(crate) run_time: f64,
    pub(crate) func: StepFn,
}

impl RegisteredStep {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validators(&self) -> &[ValidatorKind] {
        &self.validators
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn run_time(&self) -> f64 {
        self.run_time
    }
}

impl fmt::Debug for RegisteredStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStep")
            .field("name", &self.name)
            .field("validators", &self.validators)
            .field("start_time", &self.start_time)
            .field("run_time", &self.run_time)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of steps
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<RegisteredStep>,
    names: HashSet<String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Registration order is execution order.
    ///
    /// When several descriptors are given, the step waits for the largest
    /// start time and holds for the largest run time among them.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        descriptors: impl IntoIterator<Item = StepDescriptor>,
        func: F,
    ) -> Result<&mut Self>
    where
        F: FnMut(&mut StepContext<'_>) -> Result<()> + Send + 'static,
    {
        let name = name.into();
        validate_step_name(&name)?;
        if self.names.contains(&name) {
            return Err(Error::DuplicateStep(name));
        }

        let mut validators = Vec::new();
        let mut start_time = 0.0_f64;
        let mut run_time = 0.0_f64;
        for descriptor in descriptors {
            for (label, value) in [
                ("start_time", descriptor.start_time),
                ("run_time", descriptor.run_time),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::InvalidTiming {
                        step: name,
                        reason: format!("{label} must be a finite, non-negative number of seconds"),
                    });
                }
            }
            if !validators.contains(&descriptor.kind) {
                validators.push(descriptor.kind);
            }
            start_time = start_time.max(descriptor.start_time);
            run_time = run_time.max(descriptor.run_time);
        }

        self.names.insert(name.clone());
        self.steps.push(RegisteredStep {
            name,
            validators,
            start_time,
            run_time,
            func: Box::new(func),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &RegisteredStep> {
        self.steps.iter()
    }

    pub(crate) fn into_steps(self) -> Vec<RegisteredStep> {
        self.steps
    }
}

/// A step name must fit on one log line and must not read as a token
pub fn validate_step_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.contains('\n') || name.contains('\r') {
        Some("name spans several lines")
    } else if name.trim() != name {
        Some("name has surrounding whitespace")
    } else if RESERVED_TOKENS.contains(&name) {
        Some("name is a reserved log token")
    } else if parse_samples(name).is_some() {
        Some("name reads as a performance sample line")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidStepName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn noop(_: &mut StepContext<'_>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_descriptor_maxima_win() {
        let mut registry = StepRegistry::new();
        registry
            .register(
                "spin",
                [
                    StepDescriptor::rendering().with_start_time(0.5),
                    StepDescriptor::performance().with_run_time(2.0),
                    StepDescriptor::rendering().with_start_time(1.5).with_run_time(0.25),
                ],
                noop,
            )
            .unwrap();

        let step = registry.steps().next().unwrap();
        assert_eq!(step.start_time(), 1.5);
        assert_eq!(step.run_time(), 2.0);
        assert_eq!(
            step.validators(),
            &[ValidatorKind::Rendering, ValidatorKind::Performance]
        );
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = StepRegistry::new();
        registry
            .register("b", [StepDescriptor::console()], noop)
            .unwrap()
            .register("a", [StepDescriptor::custom()], noop)
            .unwrap();

        let names: Vec<_> = registry.steps().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut registry = StepRegistry::new();
        registry.register("a", [], noop).unwrap();
        assert!(matches!(
            registry.register("a", [], noop),
            Err(Error::DuplicateStep(_))
        ));
    }

    #[test]
    fn test_negative_timing_rejected() {
        let mut registry = StepRegistry::new();
        let result = registry.register(
            "a",
            [StepDescriptor::rendering().with_start_time(-1.0)],
            noop,
        );
        assert!(matches!(result, Err(Error::InvalidTiming { .. })));
    }

    #[test_case("" ; "empty")]
    #[test_case("two\nlines" ; "multi line")]
    #[test_case(" padded" ; "padded")]
    #[test_case("screenshot" ; "screenshot token")]
    #[test_case("console_end" ; "console end token")]
    #[test_case("2024" ; "numeric")]
    #[test_case("1.5 2" ; "sample line")]
    fn test_invalid_step_names(name: &str) {
        assert!(validate_step_name(name).is_err());
    }

    #[test]
    fn test_valid_step_name() {
        assert!(validate_step_name("rotate box 90").is_ok());
    }
}
