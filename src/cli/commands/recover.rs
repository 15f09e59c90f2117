//! Recover Command
//!
//! Consolidates the steps recorded for a session into one bundle, for runs
//! that crashed or were rejected.

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::{ForgeError, Result};

pub fn run(
    ctx: &CommandContext,
    session_id: &str,
    output_path: Option<&Path>,
    format: &str,
) -> Result<()> {
    let bundle = ctx.recorder.consolidate(session_id)?;
    if bundle.is_empty() {
        return Err(ForgeError::NotFound(format!(
            "no recorded steps for session '{}'",
            session_id
        )));
    }

    if let Some(path) = output_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&bundle)?)?;
    }

    let output = Output::new();
    if format == "json" {
        return output.json(&bundle);
    }

    output.section(&format!("Session {}", session_id));
    output.field("Backend", ctx.recorder.backend());
    output.field("Steps", bundle.total_steps);
    for (category, count) in &bundle.categories {
        output.field(category, count);
    }
    output.field("Stages", bundle.latest.keys().cloned().collect::<Vec<_>>().join(", "));
    for error in &bundle.errors {
        output.warning(&format!("{}: {}", error.stage, error.payload["error"]));
    }
    if let Some(path) = output_path {
        output.success(&format!("Bundle written to {}", path.display()));
    }
    Ok(())
}

/// List sessions with recorded steps.
pub fn sessions(ctx: &CommandContext) -> Result<()> {
    let sessions = ctx.recorder.sessions()?;
    let output = Output::new();
    if sessions.is_empty() {
        output.info("No recorded sessions");
    }
    for session in sessions {
        println!("  {}", session);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseBackend};
    use crate::recorder::StepCategory;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_recover_writes_bundle() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config.storage.database = DatabaseBackend::None;
        let ctx = CommandContext::new(config).unwrap();

        let err = run(&ctx, "session_1_00000000", None, "text").unwrap_err();
        assert!(matches!(err, ForgeError::NotFound(_)));

        ctx.recorder
            .record("session_1_00000000", "avatar", &json!({"nome": "Ana"}), StepCategory::Avatar)
            .unwrap();
        ctx.recorder
            .record_error("session_1_00000000", "insights", "timeout", &json!({}))
            .unwrap();

        let out = dir.path().join("out/bundle.json");
        run(&ctx, "session_1_00000000", Some(&out), "text").unwrap();

        let bundle: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(bundle["total_steps"], 2);
        assert_eq!(bundle["latest"]["avatar"]["nome"], "Ana");
        assert_eq!(bundle["errors"][0]["stage"], "insights");
    }
}
