//! Stored Analysis Commands
//!
//! Usage:
//!   copyforge list [--limit N] [--offset N] [-f json]
//!   copyforge show <id> [-f text|json|markdown]
//!   copyforge delete <id>
//!   copyforge stats [-f json]

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::constants::server::MAX_LIST_LIMIT;
use crate::report::render_markdown;
use crate::types::{AnalysisResult, ForgeError, Result};

pub async fn list(ctx: &CommandContext, limit: usize, offset: usize, format: &str) -> Result<()> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let analyses = ctx.store.list(limit, offset).await?;
    let output = Output::new();

    if format == "json" {
        return output.json(&analyses);
    }

    if analyses.is_empty() {
        output.info("No analyses stored yet");
        return Ok(());
    }

    output.header(&format!("Analyses ({})", analyses.len()));
    for summary in &analyses {
        println!(
            "  {:<34} {:<20} {:<10} {}",
            summary.id,
            summary.created_at,
            summary.status,
            summary.product.as_deref().unwrap_or(&summary.segment)
        );
    }
    Ok(())
}

pub async fn show(ctx: &CommandContext, id: &str, format: &str) -> Result<()> {
    let record = ctx
        .store
        .get(id)
        .await?
        .ok_or_else(|| ForgeError::NotFound(format!("analysis '{}'", id)))?;
    let output = Output::new();

    match format {
        "json" => output.json(&record),
        "markdown" | "md" => {
            let result: AnalysisResult =
                serde_json::from_value(record.comprehensive_analysis.clone())?;
            println!("{}", render_markdown(&result));
            Ok(())
        }
        _ => {
            match serde_json::from_value::<AnalysisResult>(record.comprehensive_analysis.clone()) {
                Ok(result) => output.analysis(&result),
                Err(e) => output.warning(&format!("Stored body is unreadable: {}", e)),
            }
            output.field("Id", &record.id);
            output.field("Status", &record.status);
            output.field("Created", &record.created_at);
            Ok(())
        }
    }
}

pub async fn delete(ctx: &CommandContext, id: &str) -> Result<()> {
    if !ctx.store.delete(id).await? {
        return Err(ForgeError::NotFound(format!("analysis '{}'", id)));
    }
    Output::new().success(&format!("Deleted {}", id));
    Ok(())
}

pub async fn stats(ctx: &CommandContext, format: &str) -> Result<()> {
    let stats = ctx.store.stats().await?;
    let output = Output::new();

    if format == "json" {
        return output.json(&stats);
    }

    output.section("Stored analyses");
    output.field("Backend", &stats.backend);
    output.field("Total", stats.total_analyses);
    output.field("Recent (7d)", stats.recent_analyses);
    for (status, count) in &stats.status_counts {
        output.field(status, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseBackend};
    use crate::storage::tests::sample_result;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> CommandContext {
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config.storage.database = DatabaseBackend::None;
        CommandContext::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_show_and_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let saved = ctx.store.save(&sample_result("yoga")).await.unwrap();

        show(&ctx, &saved.stored_id, "json").await.unwrap();
        show(&ctx, &saved.stored_id, "markdown").await.unwrap();
        delete(&ctx, &saved.stored_id).await.unwrap();

        let err = delete(&ctx, &saved.stored_id).await.unwrap_err();
        assert!(matches!(err, ForgeError::NotFound(_)));
        let err = show(&ctx, &saved.stored_id, "text").await.unwrap_err();
        assert!(matches!(err, ForgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_and_stats_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        list(&ctx, 0, 0, "text").await.unwrap();
        stats(&ctx, "json").await.unwrap();
    }
}
