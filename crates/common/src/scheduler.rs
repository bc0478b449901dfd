//! Tick-driven step scheduler
//!
//! Runs inside the target process. The host calls [`StepScheduler::tick`] once
//! per rendered frame; the scheduler walks each registered step through
//!
//! ```text
//! IDLE -> DELAYED(start_time) -> init validators -> execute
//!      -> HELD(run_time, at least one tick) -> post validators -> IDLE
//! ```
//!
//! and signals the sentinel once the queue is exhausted.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::{sanitize_file_component, ValidationLogEntry, ValidationLogWriter};
use crate::sentinel::SentinelChannel;
use crate::steps::{RegisteredStep, StepRegistry, ValidatorKind};

/// What the scheduler needs from the application it runs in
pub trait ScriptHost {
    /// Write a field on a named scene node
    fn set_value(&mut self, node: &str, field: &str, value: &str) -> Result<()>;

    /// Render the current frame to `path`
    fn take_screenshot(&mut self, path: &Path) -> Result<()>;

    /// Current frames per second
    fn frame_rate(&self) -> f64;
}

/// Per-process state threaded through every step
///
/// Owns the validation log writer, the completion sentinel and the prefix that
/// artifact paths are built from. Creating a context truncates the log.
pub struct Context {
    output_prefix: PathBuf,
    log: ValidationLogWriter,
    sentinel: SentinelChannel,
}

impl Context {
    pub fn new(
        output_prefix: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        sentinel: SentinelChannel,
    ) -> Result<Self> {
        Ok(Self {
            output_prefix: output_prefix.into(),
            log: ValidationLogWriter::create(log_path)?,
            sentinel,
        })
    }

    pub fn output_prefix(&self) -> &Path {
        &self.output_prefix
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn sentinel(&self) -> &SentinelChannel {
        &self.sentinel
    }

    /// `<prefix><step>.png`
    pub fn screenshot_path(&self, step: &str) -> PathBuf {
        let mut path = OsString::from(self.output_prefix.as_os_str());
        path.push(sanitize_file_component(step));
        path.push(".png");
        PathBuf::from(path)
    }
}

#[derive(Debug, Default)]
struct Capture {
    console: Option<Vec<String>>,
    custom: Option<Vec<String>>,
    samples: Option<Vec<f64>>,
}

impl Capture {
    fn arm(&mut self, validators: &[ValidatorKind]) {
        *self = Self::default();
        for kind in validators {
            match kind {
                ValidatorKind::Console => self.console = Some(Vec::new()),
                ValidatorKind::Custom => self.custom = Some(Vec::new()),
                ValidatorKind::Performance => self.samples = Some(Vec::new()),
                ValidatorKind::Rendering => {}
            }
        }
    }
}

/// Handle given to a step body while it executes
pub struct StepContext<'a> {
    step: &'a str,
    host: &'a mut dyn ScriptHost,
    capture: &'a mut Capture,
}

impl StepContext<'_> {
    pub fn step_name(&self) -> &str {
        self.step
    }

    pub fn host(&mut self) -> &mut dyn ScriptHost {
        &mut *self.host
    }

    pub fn set_value(&mut self, node: &str, field: &str, value: &str) -> Result<()> {
        self.host.set_value(node, field, value)
    }

    /// Print to the console; captured when a console validator is attached
    pub fn print(&mut self, line: impl Into<String>) {
        let line = line.into();
        println!("{line}");
        if let Some(console) = self.capture.console.as_mut() {
            console.push(line);
        }
    }

    /// Record output for the custom validator
    pub fn print_custom(&mut self, line: impl Into<String>) {
        match self.capture.custom.as_mut() {
            Some(custom) => custom.push(line.into()),
            None => warn!(
                "Step '{}' printed custom output without a custom validator; discarded",
                self.step
            ),
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerState {
    Idle,
    Delayed { until: f64 },
    Held { until: f64 },
    Finished,
}

/// Drives registered steps one frame at a time
pub struct StepScheduler {
    queue: VecDeque<RegisteredStep>,
    current: Option<RegisteredStep>,
    state: SchedulerState,
    capture: Capture,
    context: Context,
}

impl StepScheduler {
    pub fn new(registry: StepRegistry, context: Context) -> Self {
        let queue: VecDeque<_> = registry.into_steps().into();
        info!("Scheduling {} step(s)", queue.len());
        Self {
            queue,
            current: None,
            state: SchedulerState::Idle,
            capture: Capture::default(),
            context,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SchedulerState::Finished
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Advance by one frame. `now` is seconds since the scheduler started.
    ///
    /// Only log and sentinel I/O failures are returned; step failures and
    /// screenshot failures are logged and scheduling continues.
    pub fn tick(&mut self, now: f64, host: &mut dyn ScriptHost) -> Result<SchedulerState> {
        match self.state {
            SchedulerState::Finished => {}
            SchedulerState::Idle => match self.queue.pop_front() {
                None => {
                    self.context.sentinel.signal()?;
                    info!("All steps finished");
                    self.state = SchedulerState::Finished;
                }
                Some(step) => {
                    debug!("Dequeued step '{}'", step.name);
                    let start_time = step.start_time;
                    self.current = Some(step);
                    if start_time > 0.0 {
                        self.state = SchedulerState::Delayed {
                            until: now + start_time,
                        };
                    } else {
                        self.begin(now, host);
                    }
                }
            },
            SchedulerState::Delayed { until } => {
                if now >= until {
                    self.begin(now, host);
                }
            }
            SchedulerState::Held { until } => {
                if let Some(samples) = self.capture.samples.as_mut() {
                    samples.push(host.frame_rate());
                }
                if now >= until {
                    self.post(host)?;
                    self.state = SchedulerState::Idle;
                }
            }
        }
        Ok(self.state)
    }

    fn begin(&mut self, now: f64, host: &mut dyn ScriptHost) {
        let Some(step) = self.current.as_mut() else {
            self.state = SchedulerState::Idle;
            return;
        };
        let RegisteredStep {
            name,
            validators,
            run_time,
            func,
            ..
        } = step;

        self.capture.arm(validators);
        info!("Running step '{}'", name);

        let mut cx = StepContext {
            step: name.as_str(),
            host,
            capture: &mut self.capture,
        };
        if let Err(e) = func(&mut cx) {
            error!("Step '{}' failed: {}", name, e);
        }

        self.state = SchedulerState::Held {
            until: now + *run_time,
        };
    }

    fn post(&mut self, host: &mut dyn ScriptHost) -> Result<()> {
        let Some(step) = self.current.take() else {
            return Ok(());
        };

        self.context
            .log
            .append(&ValidationLogEntry::StepName(step.name.clone()))?;

        for kind in &step.validators {
            match kind {
                ValidatorKind::Rendering => {
                    let path = self.context.screenshot_path(&step.name);
                    match host.take_screenshot(&path) {
                        Ok(()) => self
                            .context
                            .log
                            .append(&ValidationLogEntry::Screenshot(path))?,
                        Err(e) => error!("Screenshot for step '{}' failed: {}", step.name, e),
                    }
                }
                ValidatorKind::Performance => {
                    let samples = self.capture.samples.take().unwrap_or_default();
                    if samples.is_empty() {
                        warn!("Step '{}' collected no frame samples", step.name);
                    } else {
                        self.context
                            .log
                            .append(&ValidationLogEntry::Performance(samples))?;
                    }
                }
                ValidatorKind::Console => {
                    let lines = self.capture.console.take().unwrap_or_default();
                    self.context.log.append(&ValidationLogEntry::Console(lines))?;
                }
                ValidatorKind::Custom => {
                    let lines = self.capture.custom.take().unwrap_or_default();
                    self.context.log.append(&ValidationLogEntry::Custom(lines))?;
                }
            }
        }

        self.capture = Capture::default();
        debug!("Step '{}' posted", step.name);
        Ok(())
    }
}
