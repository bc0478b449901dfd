//! Console and custom output validation

use std::path::Path;

use similar::{ChangeTag, TextDiff};
use tracing::warn;

use crate::result::{TextResult, Verdict};

/// Line diff in `"  "` / `"- "` / `"+ "` form. True when no line changed.
pub fn line_diff(baseline: &[String], output: &[String]) -> (bool, Vec<String>) {
    let old: Vec<&str> = baseline.iter().map(String::as_str).collect();
    let new: Vec<&str> = output.iter().map(String::as_str).collect();
    let diff = TextDiff::from_slices(&old, &new);

    let mut identical = true;
    let mut lines = Vec::with_capacity(old.len().max(new.len()));
    for change in diff.iter_all_changes() {
        let marker = match change.tag() {
            ChangeTag::Equal => "  ",
            ChangeTag::Delete => {
                identical = false;
                "- "
            }
            ChangeTag::Insert => {
                identical = false;
                "+ "
            }
        };
        lines.push(format!("{marker}{}", change.value()));
    }
    (identical, lines)
}

/// Compare captured lines with the baseline file. The diff is kept either way.
pub fn validate_text(baseline: &Path, output: &[String]) -> TextResult {
    let mut result = TextResult {
        verdict: Verdict::Skipped,
        baseline: baseline.to_path_buf(),
        artifact: None,
        output: output.to_vec(),
        diff: Vec::new(),
        message: None,
    };

    let expected = match std::fs::read_to_string(baseline) {
        Ok(text) => text.lines().map(str::to_string).collect::<Vec<_>>(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No text baseline at {}, skipping", baseline.display());
            result.message = Some("no baseline".to_string());
            return result;
        }
        Err(e) => {
            warn!("Could not read {}: {}", baseline.display(), e);
            result.verdict = Verdict::Unvalidated;
            result.message = Some(e.to_string());
            return result;
        }
    };

    let (identical, diff) = line_diff(&expected, output);
    result.verdict = if identical {
        Verdict::Passed
    } else {
        warn!("Output differs from {}", baseline.display());
        Verdict::Failed
    };
    result.diff = diff;
    result
}

/// Record captured lines without comparing them
pub fn unvalidated_text(baseline: &Path, output: &[String]) -> TextResult {
    TextResult {
        verdict: Verdict::Unvalidated,
        baseline: baseline.to_path_buf(),
        artifact: None,
        output: output.to_vec(),
        diff: Vec::new(),
        message: Some("comparison not requested".to_string()),
    }
}
