//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Plan
//!
//! ```text
//! Render plan (3 entries)
//! 000 #1 about.md
//! 001 #2 posts/hello.md
//! 002 #3 posts/second.md
//!     Duplicate: declared #2, reassigned
//! ```
//!
//! ## Build
//!
//! ```text
//! Rendered 3 entries, parallel (2 workers)
//!     Entry time: max 12ms, avg 7ms
//! Warnings
//!     posts/hello.md: no syntax for `klingon` code, rendered as plain text
//! Pages
//!     about.html
//!     posts/hello.html
//! Copied 4 assets
//! Published dist in 0.41s
//! ```
//!
//! Each view has a `format_*` function returning `Vec<String>` and a
//! `print_*` wrapper that writes to stdout. Format functions do no I/O.

use crate::pipeline::BuildSummary;
use crate::plan::{PlanEntry, RenderPlan};

// ============================================================================
// Helpers
// ============================================================================

/// Zero-padded plan position.
fn format_index(index: usize) -> String {
    format!("{:03}", index)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{count} {}", if count == 1 { one } else { many })
}

fn entry_line(entry: &PlanEntry) -> String {
    format!(
        "{} #{} {}",
        format_index(entry.index),
        entry.assigned_id,
        entry.relative_path
    )
}

// ============================================================================
// Plan
// ============================================================================

pub fn format_plan(plan: &RenderPlan) -> Vec<String> {
    let mut lines = vec![format!("Render plan ({})", plural(plan.len(), "entry", "entries"))];
    for entry in &plan.entries {
        lines.push(entry_line(entry));
        if entry.is_duplicate
            && let Some(original) = entry.original_id
        {
            lines.push(format!("{}Duplicate: declared #{original}, reassigned", indent(1)));
        }
    }
    lines
}

pub fn print_plan(plan: &RenderPlan) {
    for line in format_plan(plan) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_summary(summary: &BuildSummary) -> Vec<String> {
    let timings = &summary.dispatch.timings;
    let mut lines = vec![
        format!(
            "Rendered {}, {}",
            plural(timings.count, "entry", "entries"),
            summary.dispatch.mode
        ),
        format!(
            "{}Entry time: max {}ms, avg {}ms",
            indent(1),
            timings.max.as_millis(),
            timings.avg.as_millis()
        ),
    ];
    if !summary.dispatch.warnings.is_empty() {
        lines.push("Warnings".to_string());
        for warning in &summary.dispatch.warnings {
            lines.push(format!("{}{}", indent(1), warning));
        }
    }
    if !summary.pages.is_empty() {
        lines.push("Pages".to_string());
        for page in &summary.pages {
            lines.push(format!("{}{}", indent(1), page));
        }
    }
    lines.push(format!("Copied {}", plural(summary.assets, "asset", "assets")));
    lines.push(format!(
        "Published {} in {:.2}s",
        summary.output_dir.display(),
        summary.elapsed.as_secs_f64()
    ));
    lines
}

pub fn print_build_summary(summary: &BuildSummary) {
    for line in format_build_summary(summary) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
