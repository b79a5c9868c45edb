//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; the binary decides where it goes.

use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ProgramConfig, ValidationResult};
use crate::engine::{DeploymentResult, DeploymentStatus};
use crate::planner::{DeploymentPlan, PlanSummary, StepOp, StepStatus};
use crate::state::{Checkpoint, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Step result row for table display.
#[derive(Tabled)]
struct StepResultRow {
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// Resource row for state display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the configured output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &DeploymentPlan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - stack is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nDeployment Plan\n\n");

        // Same steps are noise in a listing
        let rows: Vec<PlanStepRow> = plan
            .steps
            .iter()
            .filter(|s| s.op.is_change())
            .map(|s| PlanStepRow {
                index: s.index + 1,
                op: Self::format_op(s.op),
                type_token: s.type_token.clone(),
                name: s.urn.name().to_string(),
                reason: truncate(&s.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output.push_str(&Self::format_summary(&plan.summary()));
        output
    }

    fn format_summary(summary: &PlanSummary) -> String {
        format!(
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged\n",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.replaces.to_string().magenta(),
            summary.deletes.to_string().red(),
            summary.sames
        )
    }

    /// Formats the result of `up` or `destroy`.
    #[must_use]
    pub fn format_result(&self, result: &DeploymentResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => Self::format_result_text(result),
        }
    }

    fn format_result_text(result: &DeploymentResult) -> String {
        let mut output = String::new();

        let rows: Vec<StepResultRow> = result
            .steps
            .iter()
            .filter(|s| s.op.is_change())
            .map(|s| StepResultRow {
                op: Self::format_op(s.op),
                resource: s.urn.name().to_string(),
                status: Self::format_step_status(s.status),
                duration: s
                    .duration
                    .map_or_else(String::new, |d| format!("{:.1}s", d.as_secs_f64())),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = match result.status {
            DeploymentStatus::Succeeded => format!("{} Deployment succeeded", "✓".green()),
            DeploymentStatus::Failed => format!("{} Deployment failed", "✗".red()),
            DeploymentStatus::Canceled => format!("{} Deployment canceled", "⚠".yellow()),
        };
        let _ = writeln!(output, "\n{status} ({})", result.deployment_id);
        let _ = writeln!(
            output,
            "   {} done, {} failed, {} skipped",
            result.count(StepStatus::Done),
            result.count(StepStatus::Failed),
            result.count(StepStatus::Skipped)
        );

        if !result.errors.is_empty() {
            let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        output
    }

    /// Formats a validation outcome.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &ProgramConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&json!({
                "valid": result.is_valid(),
                "project": config.project.name,
                "stack": config.project.stack,
                "resources": config.resources.len(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Program is valid\n", "✓".green())
                } else {
                    let mut text = format!(
                        "{} Program has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {error}");
                    }
                    text
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = write!(
                    output,
                    "\n   Project: {}\n   Stack: {}\n   Resources: {}\n",
                    config.project.name,
                    config.project.stack,
                    config.resources.len()
                );
                output
            }
        }
    }

    /// Formats a checkpoint.
    #[must_use]
    pub fn format_checkpoint(&self, checkpoint: &Checkpoint) -> String {
        match self.format {
            OutputFormat::Json => to_json(checkpoint),
            OutputFormat::Text => Self::format_checkpoint_text(checkpoint),
        }
    }

    fn format_checkpoint_text(checkpoint: &Checkpoint) -> String {
        let mut output = String::new();
        let manifest = &checkpoint.manifest;

        let _ = write!(
            output,
            "\nState: {}/{}\n\n",
            checkpoint.project, checkpoint.stack
        );
        let _ = writeln!(output, "   Version: {}", checkpoint.version);
        let _ = writeln!(output, "   Program hash: {}", truncate(&manifest.program_hash, 8));
        let _ = writeln!(output, "   Last updated: {}", manifest.time);
        let _ = writeln!(output, "   Resources: {}", checkpoint.len());

        if !checkpoint.is_empty() {
            let rows: Vec<ResourceRow> = checkpoint
                .resources
                .iter()
                .map(|r| ResourceRow {
                    type_token: r.type_token.clone(),
                    name: if r.pending_replacement {
                        format!("{} (replaced)", r.urn.name())
                    } else {
                        r.urn.name().to_string()
                    },
                    id: r.id.as_deref().map_or_else(String::new, |id| truncate(id, 24)),
                    updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !checkpoint.pending_operations.is_empty() {
            let _ = write!(
                output,
                "\n{} Operations interrupted by a previous run:\n",
                "⚠".yellow()
            );
            for op in &checkpoint.pending_operations {
                let _ = writeln!(output, "   - {} {} (since {})", op.operation, op.urn, op.started_at);
            }
        }

        if !checkpoint.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", checkpoint.history.len());
            for entry in checkpoint.history.iter().rev().take(5) {
                let status = if entry.success { "✓" } else { "✗" };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} ({} resources)",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.resources.len()
                );
            }
        }

        output
    }

    /// Formats lock information, or its absence.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, lock) => to_json(&json!({ "locked": lock.is_some(), "lock": lock })),
            (OutputFormat::Text, None) => "State is not locked.\n".to_string(),
            (OutputFormat::Text, Some(lock)) => format!(
                "State locked: {}\n   Holder: {}\n   Expires in: {}s\n",
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, symbol: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }

    /// Formats a step operation with color.
    fn format_op(op: StepOp) -> String {
        let label = format!("{}{op}", op.symbol());
        match op {
            StepOp::Create | StepOp::Read => label.green().to_string(),
            StepOp::Update => label.yellow().to_string(),
            StepOp::Replace => label.magenta().to_string(),
            StepOp::Delete | StepOp::DeleteReplaced => label.red().to_string(),
            StepOp::Same => label.dimmed().to_string(),
        }
    }

    /// Formats a step status with color.
    fn format_step_status(status: StepStatus) -> String {
        match status {
            StepStatus::Done => "done".green().to_string(),
            StepStatus::Failed => "failed".red().to_string(),
            StepStatus::Skipped => "skipped".yellow().to_string(),
            other => other.to_string().dimmed().to_string(),
        }
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

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    has_changes: bool,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    unchanged: usize,
    steps: Vec<StepJson>,
}

#[derive(Serialize)]
struct StepJson {
    index: usize,
    op: StepOp,
    urn: String,
    #[serde(rename = "type")]
    type_token: String,
    reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changed_keys: Vec<String>,
    dependencies: Vec<usize>,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        let summary = plan.summary();
        Self {
            has_changes: plan.has_changes(),
            creates: summary.creates,
            updates: summary.updates,
            replaces: summary.replaces,
            deletes: summary.deletes,
            unchanged: summary.sames,
            steps: plan
                .steps
                .iter()
                .map(|s| StepJson {
                    index: s.index,
                    op: s.op,
                    urn: s.urn.to_string(),
                    type_token: s.type_token.clone(),
                    reason: s.reason.clone(),
                    changed_keys: s.changed_keys.clone(),
                    dependencies: s.dependencies.clone(),
                })
                .collect(),
        }
    }
}
