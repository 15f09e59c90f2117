//! Analyze Command
//!
//! Runs one analysis in-process, printing progress as stages finish.

use std::path::PathBuf;

use tracing::warn;

use crate::cli::progress::ConsoleProgress;
use crate::cli::ui::Output;
use crate::config::Config;
use crate::pipeline::{AnalysisOutcome, CancellationFlag};
use crate::report::write_report;
use crate::server::AppState;
use crate::types::{AnalysisRequest, ForgeError, RequestDraft, Result};

pub struct AnalyzeOptions {
    pub draft: RequestDraft,
    /// Write the full result JSON here
    pub output: Option<PathBuf>,
    /// Write the markdown report here
    pub report: Option<PathBuf>,
    /// Print the result JSON to stdout instead of the summary
    pub json: bool,
    pub quiet: bool,
}

pub async fn run(config: &Config, options: AnalyzeOptions) -> Result<()> {
    let request = AnalysisRequest::from_draft(options.draft)?;
    let state = AppState::from_config(config)?;
    let output = Output::new();

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; stopping at the next stage boundary");
            on_signal.cancel();
        }
    });

    if !options.quiet && !options.json {
        output.info(&format!(
            "Analyzing '{}' (session {})",
            request.product_or_segment(),
            request.session_id
        ));
    }

    let sink = ConsoleProgress::new(options.quiet || options.json);
    let outcome = state.orchestrator.run(&request, &sink, &cancel).await;

    match outcome {
        AnalysisOutcome::Accepted(result) => {
            if let Some(path) = &options.output {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, serde_json::to_string_pretty(&result)?).await?;
            }
            if let Some(path) = &options.report {
                write_report(&result, path)?;
            }

            if options.json {
                return output.json(&result);
            }
            output.analysis(&result);
            if let Some(path) = &options.output {
                output.success(&format!("Result written to {}", path.display()));
            }
            if let Some(path) = &options.report {
                output.success(&format!("Report written to {}", path.display()));
            }
            Ok(())
        }
        AnalysisOutcome::Rejected(low) => {
            output.error("Analysis rejected: quality below the acceptance floor");
            output.verdict(&low.verdict);
            if let Some(path) = &options.output {
                tokio::fs::write(path, serde_json::to_string_pretty(&low.partial)?).await?;
                output.info(&format!("Recorded steps written to {}", path.display()));
            }
            Err(ForgeError::Pipeline(format!(
                "analysis {} rejected with score {:.1}",
                request.session_id, low.verdict.quality_score
            )))
        }
    }
}
