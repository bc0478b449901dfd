//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use scenetest_runner::{StepResult, SuiteSummary, TestResult};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// One line of the results table
#[derive(Debug, Serialize)]
pub struct CaseRow {
    pub case: String,
    pub variation: String,
    pub file: String,
    pub started: String,
    pub terminated: String,
    pub steps: String,
    pub diagnostics: String,
    pub status: String,
}

impl CaseRow {
    pub fn from_result(result: &TestResult) -> Self {
        let flag = |ok: bool| {
            if !result.mode.executes() || result.skipped {
                "-".to_string()
            } else if ok {
                "yes".to_string()
            } else {
                "no".to_string()
            }
        };
        let failed_steps = result.steps.iter().filter(|s| !s.success).count();
        let status = if result.skipped {
            "skipped"
        } else if result.is_failure() {
            "failed"
        } else {
            "passed"
        };

        Self {
            case: result.case_name.clone(),
            variation: result.variation.clone(),
            file: result.filename.display().to_string(),
            started: flag(result.started_ok),
            terminated: flag(result.terminated_ok),
            steps: format!(
                "{}/{}",
                result.steps.len() - failed_steps,
                result.steps.len()
            ),
            diagnostics: format!("{}w {}e", result.warnings, result.errors),
            status: status.to_string(),
        }
    }
}

impl TableDisplay for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec![
            "Case",
            "Variation",
            "File",
            "Started",
            "Terminated",
            "Steps OK",
            "Output",
            "Status",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.case.clone(),
            self.variation.clone(),
            self.file.clone(),
            self.started.clone(),
            self.terminated.clone(),
            self.steps.clone(),
            self.diagnostics.clone(),
            self.status.clone(),
        ]
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No test cases found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                let row = item.row();
                let color = match row.last().map(String::as_str) {
                    Some("passed") => Color::Green,
                    Some("failed") => Color::Red,
                    _ => Color::Yellow,
                };
                let last = row.len().saturating_sub(1);
                let cells: Vec<Cell> = row
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        if i == last {
                            Cell::new(value).fg(color)
                        } else {
                            Cell::new(value)
                        }
                    })
                    .collect();
                table.add_row(cells);
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print the outcome of a run
pub fn print_summary(summary: &SuiteSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(summary).unwrap_or_default()
            );
            return;
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(summary).unwrap_or_default());
            return;
        }
        OutputFormat::Table | OutputFormat::Plain => {}
    }

    let rows: Vec<CaseRow> = summary.results.iter().map(CaseRow::from_result).collect();
    print_list(&rows, format);

    for result in summary.results.iter().filter(|r| r.is_failure()) {
        print_failure_detail(result);
    }

    println!();
    let totals = format!(
        "{} passed, {} failed, {} skipped ({} ms)",
        summary.passed, summary.failed, summary.skipped, summary.duration_ms
    );
    if summary.failed == 0 {
        print_success(&totals);
    } else {
        print_error(&totals);
    }
}

fn print_failure_detail(result: &TestResult) {
    println!(
        "\n{} {} [{}]",
        "Failed:".red().bold(),
        result.case_name,
        result.variation
    );
    if result.mode.executes() && !result.started_ok {
        println!("   target did not start");
    }
    if result.mode.executes() && !result.terminated_ok {
        println!("   target did not exit cleanly");
    }
    for step in result.steps.iter().filter(|s| !s.success) {
        println!("   step '{}'", step.step_name.bold());
        for validator in step.results.iter().filter(|r| r.is_failure()) {
            match validator {
                StepResult::Rendering(r) => {
                    let pixels = r
                        .differing_pixels
                        .map(|n| format!("{n} differing pixel(s)"))
                        .unwrap_or_else(|| r.message.clone().unwrap_or_default());
                    println!("     rendering: {}", pixels);
                    if let Some(diff) = &r.diff {
                        println!("     diff: {}", diff.display());
                    }
                }
                StepResult::Console(t) | StepResult::Custom(t) => {
                    println!("     {}:", validator.kind());
                    for line in t.diff.iter().filter(|l| !l.starts_with("  ")) {
                        let line = if line.starts_with('-') {
                            line.red()
                        } else {
                            line.green()
                        };
                        println!("       {}", line);
                    }
                }
                StepResult::Error { message } => println!("     {}", message.yellow()),
                StepResult::Performance(_) => {}
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
