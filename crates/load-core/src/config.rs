//! The run context a replay is configured with, persisted next to the
//! results so an experiment stays reproducible.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub results_path: PathBuf,
    pub exp_id: String,
    pub mon_host: Option<String>,
    pub timeout_ms: u64,
    pub collect_interval_ms: u64,
    pub num_clients: usize,
    pub debug: bool,
    pub start_time: DateTime<Utc>,
}

impl RunConfig {
    /// Writes `config_<exp_id>.json` into the results directory.
    pub fn write(&self) -> Result<()> {
        let path = self
            .results_path
            .join(format!("config_{}.json", self.exp_id));
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
