//! CLI Common Utilities
//!
//! Shared setup for commands that read the analysis store or the step recorder.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ConfigLoader};
use crate::recorder::{SharedRecorder, create_recorder};
use crate::storage::{SharedStore, create_store, open_shared_database};
use crate::types::Result;

/// Command execution context
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub store: SharedStore,
    pub recorder: SharedRecorder,
}

impl CommandContext {
    pub fn new(config: Config) -> Result<Self> {
        let db = open_shared_database(&config);
        let recorder = create_recorder(&config, db.clone())?;
        let store: SharedStore = Arc::new(create_store(&config, db));
        Ok(Self {
            config,
            store,
            recorder,
        })
    }
}

/// Load configuration from an explicit file or the usual resolution chain.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Trimmed value, or `None` when blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
