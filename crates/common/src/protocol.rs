//! Validation log protocol
//!
//! The validation log is the only channel through which a target process
//! reports step outcomes to the harness. It is line oriented:
//!
//! ```text
//! <step name>
//! screenshot
//! <path>
//! performance
//! <f64> <f64> ...
//! console_start
//! <captured lines, blanks preserved>
//! console_end
//! custom_start
//! <captured lines>
//! custom_end
//! <next step name>
//! ...
//! ```
//!
//! Blank lines are ignored outside of capture blocks. Any line that is not a
//! token closes the current step and names the next one.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

pub const SCREENSHOT: &str = "screenshot";
pub const PERFORMANCE: &str = "performance";
pub const CONSOLE_START: &str = "console_start";
pub const CONSOLE_END: &str = "console_end";
pub const CUSTOM_START: &str = "custom_start";
pub const CUSTOM_END: &str = "custom_end";

/// Every token with protocol meaning. Step names may not collide with these.
pub const RESERVED_TOKENS: [&str; 6] = [
    SCREENSHOT,
    PERFORMANCE,
    CONSOLE_START,
    CONSOLE_END,
    CUSTOM_START,
    CUSTOM_END,
];

/// One record in the validation log
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLogEntry {
    StepName(String),
    Screenshot(PathBuf),
    Performance(Vec<f64>),
    Console(Vec<String>),
    Custom(Vec<String>),
}

impl ValidationLogEntry {
    /// Lines this entry occupies in the log
    pub fn to_lines(&self) -> Vec<String> {
        match self {
            Self::StepName(name) => vec![name.clone()],
            Self::Screenshot(path) => {
                vec![SCREENSHOT.to_string(), path.to_string_lossy().into_owned()]
            }
            Self::Performance(samples) => {
                let line = samples
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![PERFORMANCE.to_string(), line]
            }
            Self::Console(lines) => block(CONSOLE_START, CONSOLE_END, lines),
            Self::Custom(lines) => block(CUSTOM_START, CUSTOM_END, lines),
        }
    }
}

fn block(start: &str, end: &str, lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(start.to_string());
    out.extend(lines.iter().cloned());
    out.push(end.to_string());
    out
}

/// A step name together with the artifacts logged for it
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedStep {
    pub name: String,
    pub entries: Vec<ValidationLogEntry>,
}

/// Append-only writer for the validation log
///
/// The file is truncated on creation and flushed after every record so a
/// killed target leaves a readable prefix behind.
pub struct ValidationLogWriter {
    path: PathBuf,
    file: File,
}

impl ValidationLogWriter {
    /// Create (or truncate) the log at `path`
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        File::create(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        debug!("Validation log opened at {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn append(&mut self, entry: &ValidationLogEntry) -> Result<()> {
        if let ValidationLogEntry::Console(lines) | ValidationLogEntry::Custom(lines) = entry {
            if lines.iter().any(|l| l.trim() == CONSOLE_END || l.trim() == CUSTOM_END) {
                warn!("Captured output contains a block terminator; the block will be cut short when parsed");
            }
        }
        let mut buf = String::new();
        for line in entry.to_lines() {
            buf.push_str(&line);
            buf.push('\n');
        }
        self.file.write_all(buf.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Make a name usable as part of a file name
///
/// Letters, digits and `-_.() ` are kept; everything else becomes `_`.
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "-_.() ".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read and parse the validation log at `path`
pub fn read_validation_log(path: &Path) -> Result<Vec<LoggedStep>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_validation_log(&text))
}

/// Parse validation log text into steps
///
/// Malformed trailing records (a screenshot token with no path, an
/// unterminated capture block, a step with no artifacts) are dropped with a
/// warning instead of failing the parse.
pub fn parse_validation_log(text: &str) -> Vec<LoggedStep> {
    let mut cursor = LineCursor::new(text);
    let mut steps = Vec::new();

    let mut current = match cursor.next_token() {
        Some(name) => name.to_string(),
        None => return steps,
    };
    let mut entries = Vec::new();

    loop {
        let token = match cursor.next_token() {
            Some(token) => token,
            None => break,
        };

        match token {
            SCREENSHOT => match cursor.next_token() {
                Some(path) => entries.push(ValidationLogEntry::Screenshot(PathBuf::from(path))),
                None => warn!("Step '{}': screenshot token without a path at end of log", current),
            },
            // The sample line always follows the token, even when empty
            PERFORMANCE => match cursor.peek_line().and_then(parse_samples) {
                Some(samples) => {
                    cursor.skip_line();
                    entries.push(ValidationLogEntry::Performance(samples));
                }
                None => warn!("Step '{}': performance token without a sample line", current),
            },
            CONSOLE_START => match cursor.block(CONSOLE_END) {
                Some(lines) => entries.push(ValidationLogEntry::Console(lines)),
                None => warn!("Step '{}': unterminated console block dropped", current),
            },
            CUSTOM_START => match cursor.block(CUSTOM_END) {
                Some(lines) => entries.push(ValidationLogEntry::Custom(lines)),
                None => warn!("Step '{}': unterminated custom block dropped", current),
            },
            CONSOLE_END | CUSTOM_END => {
                warn!("Step '{}': stray '{}' ignored", current, token);
            }
            name => {
                close_step(&mut steps, std::mem::replace(&mut current, name.to_string()), entries);
                entries = Vec::new();
            }
        }
    }

    close_step(&mut steps, current, entries);
    steps
}

fn close_step(steps: &mut Vec<LoggedStep>, name: String, entries: Vec<ValidationLogEntry>) {
    if entries.is_empty() {
        warn!("Step '{}' logged no artifacts, dropping it", name);
    } else {
        steps.push(LoggedStep { name, entries });
    }
}

/// A whitespace separated list of numbers; an empty line is no samples
pub(crate) fn parse_samples(line: &str) -> Option<Vec<f64>> {
    line.split_whitespace()
        .map(|s| s.parse::<f64>().ok())
        .collect()
}

struct LineCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    fn skip_blank(&mut self) {
        while self.pos < self.lines.len() && self.lines[self.pos].trim().is_empty() {
            self.pos += 1;
        }
    }

    fn peek_token(&mut self) -> Option<&'a str> {
        self.skip_blank();
        self.lines.get(self.pos).map(|l| l.trim())
    }

    fn peek_line(&self) -> Option<&'a str> {
        self.lines.get(self.pos).map(|l| l.trim())
    }

    fn skip_line(&mut self) {
        self.pos += 1;
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let token = self.peek_token()?;
        self.pos += 1;
        Some(token)
    }

    /// Raw lines up to the terminator. `None` if the terminator never shows up.
    fn block(&mut self, end: &str) -> Option<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            self.pos += 1;
            if line.trim() == end {
                return Some(lines);
            }
            lines.push(line.trim_end_matches('\r').to_string());
        }
        None
    }
}
