// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::info_span;

use crate::supervisor::{SpawnOptions, WorkerConfig};
use crate::types::RestartPolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [log]
/// name = "aspawn"
///
/// [worker]
/// restart = "always"
/// max_restarts = 10
///
/// [[command]]
/// argv = ["echo", "hello world"]
/// env = { USER = "someone_else" }
/// ```
///
/// `[log]` is required; everything else is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    pub log: Option<LogSection>,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub command: Vec<CommandConfig>,
}

/// `[log]` section. `name` becomes the name recorded on the supervisor's
/// log span.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_log_name")]
    pub name: String,
}

fn default_log_name() -> String {
    "aspawn".to_string()
}

/// `[worker]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    /// Worker program; the `aspawn-worker` next to the current executable
    /// when omitted.
    pub program: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    pub max_restarts: Option<u64>,
}

/// One `[[command]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub argv: Vec<String>,

    /// Replaces the inherited environment when present.
    pub env: Option<BTreeMap<String, String>>,
}

impl CommandConfig {
    pub fn options(&self) -> SpawnOptions {
        SpawnOptions {
            env: self.env.clone(),
        }
    }
}

/// Validated configuration. Only constructible through
/// `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub log: LogSection,
    pub worker: WorkerSection,
    pub command: Vec<CommandConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        log: LogSection,
        worker: WorkerSection,
        command: Vec<CommandConfig>,
    ) -> Self {
        Self {
            log,
            worker,
            command,
        }
    }

    /// Build the `WorkerConfig` described by this file.
    pub fn worker_config(&self) -> WorkerConfig {
        let span = info_span!("aspawn", name = %self.log.name);
        let mut config = WorkerConfig::new(span)
            .with_args(self.worker.args.clone())
            .with_restart(self.worker.restart);
        if let Some(program) = &self.worker.program {
            config = config.with_program(program.clone());
        }
        if let Some(max) = self.worker.max_restarts {
            config = config.with_max_restarts(max);
        }
        config
    }
}
