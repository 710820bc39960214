//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, StackConfig, ValidationResult};
use crate::planner::{Batch, DiffResult, DiffType, ResourceDiff};
use crate::runner::{ApplyReport, ExportFailure, Preview};
use crate::state::StackState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Planned resource row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Batch")]
    batch: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Change")]
    change: String,
}

/// Run outcome row for table display.
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Export row for table display.
#[derive(Tabled)]
struct ExportRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats validation findings and a stack summary.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        config: &StackConfig,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                project: &config.project.name,
                environment: &config.project.environment,
                resources: config.resources.len(),
                exports: config.outputs.len(),
                errors: result
                    .errors
                    .iter()
                    .map(|e| FieldMessage {
                        field: &e.field,
                        message: &e.message,
                    })
                    .collect(),
                warnings: &result.warnings,
            }),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Stack is valid", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Stack is invalid", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output.push_str("\nStack summary:\n");
                let _ = writeln!(output, "   Project: {}", config.project.name);
                let _ = writeln!(output, "   Environment: {}", config.project.environment);
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                let _ = writeln!(output, "   Exports: {}", config.outputs.len());
                output
            }
        }
    }

    /// Formats a plan preview.
    #[must_use]
    pub fn format_preview(&self, preview: &Preview, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PreviewJson {
                resources: preview.plan.resource_count(),
                batches: preview.plan.batches(),
                diff: &preview.diff,
            }),
            OutputFormat::Text => Self::format_preview_text(preview, detailed),
        }
    }

    /// Formats a preview as text.
    fn format_preview_text(preview: &Preview, detailed: bool) -> String {
        let plan = &preview.plan;
        let diff = &preview.diff;

        if plan.is_empty() && diff.orphaned == 0 {
            return format!("{} Stack declares no resources.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\nExecution plan: {} resources in {} batches\n\n",
            plan.resource_count(),
            plan.batches().len()
        );

        let rows: Vec<PlanRow> = plan
            .batches()
            .iter()
            .flat_map(|batch| {
                batch.resources.iter().map(move |name| (batch.index, name))
            })
            .filter_map(|(index, name)| {
                diff.get(name).map(|d| PlanRow {
                    batch: index + 1,
                    resource: name.clone(),
                    resource_type: Self::truncate(&d.resource_type, 48),
                    change: Self::format_diff_type(d.diff_type),
                })
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let orphans: Vec<&ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Orphaned)
            .collect();
        if !orphans.is_empty() {
            let _ = write!(output, "\n{} Recorded but no longer declared:\n", "⚠".yellow());
            for orphan in orphans {
                let _ = writeln!(output, "   - {} ({})", orphan.name, orphan.resource_type);
            }
        }

        if detailed {
            output.push_str("\nDetails:\n");
            for d in &diff.diffs {
                let new_hash = d.new_hash.as_deref().map_or("-", ConfigHasher::short_hash);
                let old_hash = d.old_hash.as_deref().map_or("-", ConfigHasher::short_hash);
                let _ = writeln!(output, "   {} [{old_hash} -> {new_hash}]", d.name.bold());
                for detail in &d.details {
                    let _ = writeln!(output, "     {detail}");
                }
                if !d.deferred_inputs.is_empty() {
                    let _ = writeln!(
                        output,
                        "     known after apply: {}",
                        d.deferred_inputs.join(", ")
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nChanges since last run: {} new, {} changed, {} unchanged, {} orphaned\n",
            diff.creates.to_string().green(),
            diff.updates.to_string().yellow(),
            diff.unchanged,
            diff.orphaned.to_string().red()
        );
        output.push_str("Apply provisions every declared resource.\n");

        output
    }

    /// Formats the outcome of an apply.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ApplyJson::from(report)),
            OutputFormat::Text => {
                let run = &report.run;
                let status = if report.is_success() {
                    format!("{} Apply successful", "✓".green())
                } else {
                    format!("{} Apply failed", "✗".red())
                };
                let mut output = format!("{status}\n\n");

                let mut rows: Vec<RunRow> = run
                    .outputs
                    .keys()
                    .map(|name| RunRow {
                        resource: name.clone(),
                        status: "provisioned".green().to_string(),
                        detail: String::new(),
                    })
                    .collect();
                rows.extend(run.errors.iter().map(|f| RunRow {
                    resource: f.resource.clone(),
                    status: "failed".red().to_string(),
                    detail: Self::truncate(&f.error.to_string(), 60),
                }));
                rows.extend(run.skipped.iter().map(|s| RunRow {
                    resource: s.resource.clone(),
                    status: "skipped".yellow().to_string(),
                    detail: format!("upstream {} failed", s.upstream),
                }));
                rows.extend(run.not_started.iter().map(|name| RunRow {
                    resource: name.clone(),
                    status: "not started".dimmed().to_string(),
                    detail: String::from("run aborted"),
                }));

                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !report.exports.is_empty() {
                    output.push_str("\nOutputs:\n");
                    for (name, value) in &report.exports {
                        let _ = writeln!(output, "   {name} = {}", display_value(value));
                    }
                }

                if !report.export_errors.is_empty() {
                    let _ = write!(output, "\n{} Unresolved outputs:\n", "⚠".yellow());
                    for failure in &report.export_errors {
                        let _ = writeln!(output, "   - {}: {}", failure.name, failure.reason);
                    }
                }

                output
            }
        }
    }

    /// Formats recorded stack exports.
    #[must_use]
    pub fn format_exports(&self, exports: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => to_json(exports),
            OutputFormat::Text => {
                if exports.is_empty() {
                    return String::from("No outputs recorded.\n");
                }
                let rows: Vec<ExportRow> = exports
                    .iter()
                    .map(|(name, value)| ExportRow {
                        name: name.clone(),
                        value: display_value(value),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a single export value.
    #[must_use]
    pub fn format_export(&self, value: &Value) -> String {
        match self.format {
            OutputFormat::Json => to_json(value),
            OutputFormat::Text => display_value(value),
        }
    }

    /// Formats the run record.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Stack hash: {}", ConfigHasher::short_hash(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());
                let _ = writeln!(output, "   Outputs: {}", state.exports.len());

                if !state.resources.is_empty() {
                    let rows: Vec<RunRow> = state
                        .resources
                        .values()
                        .map(|r| RunRow {
                            resource: r.name.clone(),
                            status: if r.is_provisioned() {
                                r.status.to_string().green().to_string()
                            } else {
                                r.status.to_string().red().to_string()
                            },
                            detail: r.error.as_deref().map_or_else(
                                || r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                                |e| Self::truncate(e, 60),
                            ),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} provisioned)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.len()
                        );
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "       {error}");
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats a diff type with color.
    fn format_diff_type(diff_type: DiffType) -> String {
        match diff_type {
            DiffType::Create => "+new".green().to_string(),
            DiffType::Update => "~changed".yellow().to_string(),
            DiffType::NoChange => "unchanged".dimmed().to_string(),
            DiffType::Orphaned => "-orphaned".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }
}

/// Renders a value for text output; strings lose their quotes.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct FieldMessage<'a> {
    field: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    project: &'a str,
    environment: &'a str,
    resources: usize,
    exports: usize,
    errors: Vec<FieldMessage<'a>>,
    warnings: &'a [String],
}

#[derive(Serialize)]
struct PreviewJson<'a> {
    resources: usize,
    batches: &'a [Batch],
    diff: &'a DiffResult,
}

#[derive(Serialize)]
struct ApplyJson<'a> {
    success: bool,
    provisioned: Vec<&'a str>,
    failed: Vec<FailedJson<'a>>,
    skipped: Vec<SkippedJson<'a>>,
    not_started: &'a [String],
    outputs: &'a BTreeMap<String, Value>,
    output_errors: &'a [ExportFailure],
}

#[derive(Serialize)]
struct FailedJson<'a> {
    resource: &'a str,
    error: String,
}

#[derive(Serialize)]
struct SkippedJson<'a> {
    resource: &'a str,
    upstream: &'a str,
}

impl<'a> From<&'a ApplyReport> for ApplyJson<'a> {
    fn from(report: &'a ApplyReport) -> Self {
        Self {
            success: report.is_success(),
            provisioned: report.run.succeeded(),
            failed: report
                .run
                .errors
                .iter()
                .map(|f| FailedJson {
                    resource: &f.resource,
                    error: f.error.to_string(),
                })
                .collect(),
            skipped: report
                .run
                .skipped
                .iter()
                .map(|s| SkippedJson {
                    resource: &s.resource,
                    upstream: &s.upstream,
                })
                .collect(),
            not_started: &report.run.not_started,
            outputs: &report.exports,
            output_errors: &report.export_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValidator;
    use crate::planner::{DiffEngine, plan};
    use crate::resource::{InputValue, ResourceDescriptor};
    use serde_json::json;

    fn preview() -> Preview {
        let plan = plan(vec![
            ResourceDescriptor::new("azure-native:resources:ResourceGroup", "rg"),
            ResourceDescriptor::new("azure-native:storage:StorageAccount", "storage")
                .with_input("resourceGroupName", InputValue::output("rg", "name")),
        ])
        .unwrap();
        let diff = DiffEngine::new().compute(&plan, None);
        Preview {
            validation: ValidationResult::default(),
            plan,
            diff,
        }
    }

    #[test]
    fn test_preview_json_lists_batches() {
        let text = OutputFormatter::new(OutputFormat::Json).format_preview(&preview(), false);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["resources"], json!(2));
        assert_eq!(parsed["batches"][1]["resources"], json!(["storage"]));
        assert_eq!(parsed["diff"]["creates"], json!(2));
    }

    #[test]
    fn test_preview_text_mentions_deferred_inputs() {
        let text = OutputFormatter::new(OutputFormat::Text).format_preview(&preview(), true);
        assert!(text.contains("storage"));
        assert!(text.contains("known after apply: resourceGroupName"));
    }

    #[test]
    fn test_exports_text_and_single_value() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let mut exports = BTreeMap::new();
        exports.insert(String::from("url"), json!("https://app.example.com"));

        assert!(formatter.format_exports(&exports).contains("https://app.example.com"));
        assert_eq!(formatter.format_export(&exports["url"]), "https://app.example.com");
        assert_eq!(formatter.format_exports(&BTreeMap::new()), "No outputs recorded.\n");
    }

    #[test]
    fn test_validation_json() {
        let config: StackConfig = serde_yaml::from_str("project:\n  name: ''\n").unwrap();
        let result = ConfigValidator::new().check(&config);
        let text = OutputFormatter::new(OutputFormat::Json).format_validation(&result, &config, true);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["valid"], json!(false));
        assert_eq!(parsed["errors"][0]["field"], json!("project.name"));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
