//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/copyforge/config.toml)
//! 3. Project config (.copyforge/config.toml)
//! 4. Environment variables (COPYFORGE_* prefix, `__` separates nested keys)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::constants::storage::APP_DIR;
use crate::types::{ForgeError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // COPYFORGE_SERVER__PORT -> server.port
        figment = figment.merge(Env::prefixed("COPYFORGE_").split("__").lowercase(true));

        Self::extract(figment)
    }

    /// Load configuration from a specific file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (~/.config/copyforge/)
    pub fn global_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "copyforge")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(APP_DIR)
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());

        if let Ok(config) = Self::load() {
            let data = config.data_dir();
            let exists = if data.exists() { "✓" } else { "✗" };
            println!("  Data:    {} {}", exists, data.display());
        }
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| ForgeError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the global config template
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            ForgeError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        Self::write_template(&config_path, Self::default_global_config(), force)?;
        Ok(config_path)
    }

    /// Write the project config template under `.copyforge/`
    pub fn init_project(force: bool) -> Result<PathBuf> {
        Self::init_project_in(Path::new("."), force)
    }

    pub fn init_project_in(root: &Path, force: bool) -> Result<PathBuf> {
        let project_dir = root.join(APP_DIR);
        fs::create_dir_all(&project_dir)?;

        let config_path = project_dir.join("config.toml");
        Self::write_template(&config_path, Self::default_project_config(), force)?;
        Ok(config_path)
    }

    fn write_template(path: &Path, content: &str, force: bool) -> Result<()> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(());
        }
        fs::write(path, content)?;
        info!("Created config: {}", path.display());
        Ok(())
    }

    // =========================================================================
    // Templates
    // =========================================================================

    fn default_global_config() -> &'static str {
        r#"# copyforge global configuration
# Project settings in .copyforge/config.toml override these.

version = "1.0"

[[providers]]
name = "openai"
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 300
temperature = 0.7

[[providers]]
name = "ollama"
provider = "ollama"
model = "llama3.1"
timeout_secs = 300
temperature = 0.7

[chain]
max_retries = 1
failure_threshold = 5
recovery_timeout_secs = 60
"#
    }

    fn default_project_config() -> &'static str {
        r#"# copyforge project configuration

version = "1.0"

[pipeline]
analysis_timeout_secs = 1800
stage_timeout_secs = 300
parallel_branches = false

[recorder]
backend = "file"

[storage]
database = "sqlite"

[server]
host = "0.0.0.0"
port = 5000
"#
    }
}
