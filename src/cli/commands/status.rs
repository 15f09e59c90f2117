//! Status Command
//!
//! Health of the configured providers, search backends, store and recorder.

use serde_json::Value;

use crate::cli::ui::Output;
use crate::config::Config;
use crate::server::{AppState, status_snapshot};
use crate::types::Result;

pub async fn run(config: &Config, format: &str, check: bool) -> Result<()> {
    let state = AppState::from_config(config)?;
    let output = Output::new();

    if check {
        for provider in state.providers.providers() {
            let name = provider.name().to_string();
            match provider.health_check().await {
                Ok(true) => output.success(&format!("{} reachable", name)),
                Ok(false) => output.warning(&format!("{} not ready", name)),
                Err(e) => output.error(&format!("{}: {}", name, e)),
            }
        }
    }

    let snapshot = status_snapshot(&state).await;
    if format == "json" {
        return output.json(&snapshot);
    }

    output.header(&format!("copyforge {}", env!("CARGO_PKG_VERSION")));
    output.field("Overall", snapshot["status"].as_str().unwrap_or("unknown"));
    output.field("Recorder", snapshot["recorder"].as_str().unwrap_or("-"));
    output.field("Data dir", config.data_dir().display());

    print_pool(&output, "Generation providers", &snapshot["ai_providers"]);
    print_pool(&output, "Search providers", &snapshot["search_providers"]);

    output.section("Storage");
    for tier in ["local", "database"] {
        let health = &snapshot["storage"][tier];
        if health.is_null() {
            continue;
        }
        let name = health["name"].as_str().unwrap_or(tier);
        if health["available"].as_bool().unwrap_or(false) {
            output.success(name);
        } else {
            output.error(&format!(
                "{}: {}",
                name,
                health["error"].as_str().unwrap_or("unavailable")
            ));
        }
    }
    Ok(())
}

fn print_pool(output: &Output, title: &str, pool: &Value) {
    output.section(title);
    let Some(providers) = pool["providers"].as_object() else {
        return;
    };
    if providers.is_empty() {
        output.warning("none configured");
    }
    for (name, status) in providers {
        if status["available"].as_bool().unwrap_or(false) {
            output.success(name);
        } else {
            output.error(&format!("{} (circuit open)", name));
        }
    }
}
