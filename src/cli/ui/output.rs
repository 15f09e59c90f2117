use console::style;
use serde::Serialize;

use crate::types::{AnalysisResult, QualityVerdict, Result};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<14} {}", style(format!("{}:", label)).dim(), value);
    }

    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Summary printed after `analyze` and `show`.
    pub fn analysis(&self, result: &AnalysisResult) {
        let meta = &result.metadata;
        self.section("Analysis");
        self.field("Segment", result.segment().unwrap_or("-"));
        self.field(
            "Session",
            result.session_id().map_or("-", |id| id.as_str()),
        );
        self.field("Engine", format!("{} {}", meta.engine, meta.version));
        self.field("Time", &meta.processing_time_formatted);
        self.field("Sections", meta.components_generated.join(", "));

        if let Some(report) = &result.completeness {
            self.field(
                "Completeness",
                format!(
                    "{:.0}% ({}/{})",
                    report.completeness_rate, report.present_count, report.required_count
                ),
            );
        }
        if let Some(verdict) = &meta.quality {
            self.verdict(verdict);
        }
        if let Some(storage) = &meta.storage {
            if let Some(id) = &storage.database_id {
                self.field("Stored as", id);
            }
            if let Some(path) = &storage.local_files {
                self.field("Local files", path);
            }
            if let Some(warning) = &storage.database_warning {
                self.warning(&format!("Database tier: {}", warning));
            }
        }

        if result.is_emergency() {
            self.warning(&format!(
                "Guaranteed-minimum result: {}",
                meta.failure.as_deref().unwrap_or("pipeline failure")
            ));
        }
        for (stage, reason) in &meta.degraded_stages {
            self.warning(&format!("{} uses fallback content ({})", stage, reason));
        }
    }

    pub fn verdict(&self, verdict: &QualityVerdict) {
        let score = format!("{:.1}", verdict.quality_score);
        let score = if verdict.rejects() {
            style(score).red()
        } else if verdict.valid {
            style(score).green()
        } else {
            style(score).yellow()
        };
        self.field("Quality", score);
        for error in &verdict.errors {
            self.error(error);
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
