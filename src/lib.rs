// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod protocol;
pub mod supervisor;
pub mod types;
pub mod worker;

pub use errors::{AspawnError, CommandError, Output};
pub use supervisor::{
    PendingCommand, SpawnOptions, WorkerConfig, WorkerExit, WorkerHandle, WorkerStatus,
    create_worker, create_worker_with_backend,
};
pub use types::{RequestId, RestartPolicy, WorkerState};

use anyhow::{Result, bail};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::{CommandConfig, ConfigFile};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (optional when a command is given on the command line)
/// - one supervised worker
/// - concurrent submission of every command
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(&args)?;
    let commands = collect_commands(&args, cfg.as_ref());

    if args.dry_run {
        print_dry_run(cfg.as_ref(), &commands);
        return Ok(());
    }

    if commands.is_empty() {
        info!("no commands to run");
        return Ok(());
    }

    let mut worker_config = match &cfg {
        Some(cfg) => cfg.worker_config(),
        None => WorkerConfig::new(info_span!("aspawn", name = "aspawn")),
    };
    if let Some(program) = &args.worker {
        worker_config = worker_config.with_program(program.clone());
    }
    if let Some(level) = args.log_level {
        worker_config
            .args
            .extend(["--log-level".to_string(), level.as_str().to_string()]);
    }

    let worker = create_worker(worker_config)?;
    worker.on_exit(|exit| {
        if !exit.is_clean() {
            warn!(%exit, "worker restarted");
        }
    });

    // Ctrl-C → destroy, which aborts every outstanding command.
    {
        let worker = worker.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            worker.destroy();
        });
    }

    let mut pending = JoinSet::new();
    for command in &commands {
        let waiting = worker.exec(&command.argv, &command.options())?;
        let argv = command.argv.clone();
        debug!(id = waiting.id(), ?argv, "submitted");
        pending.spawn(async move { (argv, waiting.wait().await) });
    }

    let mut failures = 0usize;
    while let Some(joined) = pending.join_next().await {
        let (argv, outcome) = joined?;
        match outcome {
            Ok(output) => {
                print!("{}", output.stdout);
                eprint!("{}", output.stderr);
            }
            Err(err) => {
                failures += 1;
                if let Some(output) = err.output() {
                    print!("{}", output.stdout);
                    eprint!("{}", output.stderr);
                }
                if err.is_abort() {
                    warn!(?argv, error = %err, "command aborted before completing");
                } else {
                    error!(?argv, error = %err, "command failed");
                }
            }
        }
    }

    worker.destroy();
    let status = worker.wait_destroyed().await;
    info!(restarts = status.restarts, state = %status.state, "worker finished");

    if failures > 0 {
        bail!("{failures} of {} command(s) failed", commands.len());
    }
    Ok(())
}

/// `--config` wins; otherwise `Aspawn.toml` is read if it exists. A config
/// file is only mandatory when no command follows `--`.
fn load_config(args: &CliArgs) -> Result<Option<ConfigFile>> {
    if let Some(path) = &args.config {
        return Ok(Some(load_and_validate(path)?));
    }

    let default = default_config_path();
    if default.is_file() {
        return Ok(Some(load_and_validate(&default)?));
    }

    if args.argv.is_empty() {
        bail!(
            "nothing to run: pass --config, create {}, or give a command after `--`",
            default.display()
        );
    }
    Ok(None)
}

fn collect_commands(args: &CliArgs, cfg: Option<&ConfigFile>) -> Vec<CommandConfig> {
    let mut commands: Vec<CommandConfig> = cfg.map(|c| c.command.clone()).unwrap_or_default();

    if !args.argv.is_empty() {
        let env = (!args.env.is_empty()).then(|| args.env.iter().cloned().collect());
        commands.push(CommandConfig {
            argv: args.argv.clone(),
            env,
        });
    }

    commands
}

/// Simple dry-run output: print worker settings and commands.
fn print_dry_run(cfg: Option<&ConfigFile>, commands: &[CommandConfig]) {
    println!("aspawn dry-run");
    if let Some(cfg) = cfg {
        println!("  log.name = {}", cfg.log.name);
        if let Some(program) = &cfg.worker.program {
            println!("  worker.program = {}", program.display());
        }
        println!("  worker.restart = {:?}", cfg.worker.restart);
        if let Some(max) = cfg.worker.max_restarts {
            println!("  worker.max_restarts = {max}");
        }
    }
    println!();

    println!("commands ({}):", commands.len());
    for command in commands {
        println!("  - {:?}", command.argv);
        if let Some(env) = &command.env {
            println!("      env: {env:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}
