// src/supervisor/options.rs

//! Per-submission options and argument validation.

use std::collections::BTreeMap;
use std::ffi::OsStr;

use crate::errors::{AspawnError, Result};

/// Options accepted by [`WorkerHandle::submit`](super::WorkerHandle::submit).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Complete environment for the command. When `None` the command
    /// inherits the host's environment as of submission time.
    pub env: Option<BTreeMap<String, String>>,
}

impl SpawnOptions {
    pub fn with_env<I, K, V>(env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: Some(env.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

/// Copy `argv` into owned strings, rejecting an empty vector and any
/// element that is not valid UTF-8.
pub fn validate_argv<I, S>(argv: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut copied = Vec::new();
    for (i, arg) in argv.into_iter().enumerate() {
        let arg = arg.as_ref();
        match arg.to_str() {
            Some(s) => copied.push(s.to_string()),
            None => {
                return Err(AspawnError::InvalidArgument(format!(
                    "\"argv[{i}]\" ({}) is not a string",
                    arg.to_string_lossy()
                )));
            }
        }
    }

    if copied.is_empty() {
        return Err(AspawnError::InvalidArgument(
            "\"argv\" must be non-empty array of strings".to_string(),
        ));
    }
    Ok(copied)
}

/// Check that every entry could be placed in a process environment.
pub fn validate_env(env: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in env {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(AspawnError::InvalidArgument(format!(
                "\"options.env\" key {key:?} is not a valid variable name"
            )));
        }
        if value.contains('\0') {
            return Err(AspawnError::InvalidArgument(format!(
                "\"options.env.{key}\" contains a NUL byte"
            )));
        }
    }
    Ok(())
}

/// Resolve the environment a command will run with.
pub fn resolve_env(options: &SpawnOptions) -> Result<BTreeMap<String, String>> {
    match &options.env {
        Some(env) => {
            validate_env(env)?;
            Ok(env.clone())
        }
        None => Ok(std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()),
    }
}
