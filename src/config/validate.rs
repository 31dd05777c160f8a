// src/config/validate.rs

use crate::config::model::{ConfigFile, LogSection, RawConfigFile};
use crate::errors::{AspawnError, Result};
use crate::supervisor::options::{validate_argv, validate_env};
use crate::types::RestartPolicy;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AspawnError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let log = validate_log(&raw)?;
        validate_worker(&raw)?;
        validate_commands(&raw)?;
        Ok(ConfigFile::new_unchecked(log, raw.worker, raw.command))
    }
}

fn validate_log(cfg: &RawConfigFile) -> Result<LogSection> {
    let Some(log) = &cfg.log else {
        return Err(AspawnError::ConfigError(
            "\"log\" argument is required: add a [log] section".to_string(),
        ));
    };
    if log.name.trim().is_empty() {
        return Err(AspawnError::ConfigError(
            "[log].name must not be empty".to_string(),
        ));
    }
    Ok(log.clone())
}

fn validate_worker(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.max_restarts.is_some() && cfg.worker.restart == RestartPolicy::Never {
        return Err(AspawnError::ConfigError(
            "[worker].max_restarts requires restart = \"always\"".to_string(),
        ));
    }
    if let Some(program) = &cfg.worker.program {
        if program.as_os_str().is_empty() {
            return Err(AspawnError::ConfigError(
                "[worker].program must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for (i, command) in cfg.command.iter().enumerate() {
        validate_argv(&command.argv)
            .map_err(|e| AspawnError::ConfigError(format!("command #{}: {e}", i + 1)))?;
        if let Some(env) = &command.env {
            validate_env(env)
                .map_err(|e| AspawnError::ConfigError(format!("command #{}: {e}", i + 1)))?;
        }
    }
    Ok(())
}
