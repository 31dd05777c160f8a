// src/worker/mod.rs

//! Worker runtime: the process on the other end of the supervisor's pipes.
//!
//! Reads `exec` requests line by line, runs each command concurrently in
//! its own task, and writes exactly one `result` per request id. Exits when
//! its input reaches EOF.

pub mod runner;

use std::collections::HashMap;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{AspawnError, Result};
use crate::protocol::{Request, Response, WorkerMessage};
use crate::types::RequestId;

pub use runner::run_command;

/// Run the worker loop over `input` (requests) and `output` (messages).
///
/// Still-running commands are dropped, and therefore killed, on return.
pub async fn run_worker<R, W>(input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_message(
        &mut output,
        &WorkerMessage::Ready {
            pid: std::process::id(),
        },
    )
    .await?;

    let mut lines = BufReader::new(input).lines();
    let mut running: JoinSet<Response> = JoinSet::new();
    let mut in_flight: HashMap<RequestId, Instant> = HashMap::new();

    info!(pid = std::process::id(), "worker ready");

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Request::from_line(&line) {
                        Ok(Request::Exec(command)) => {
                            if in_flight.contains_key(&command.id) {
                                warn!(id = command.id, "duplicate command id; ignoring");
                                continue;
                            }
                            in_flight.insert(command.id, Instant::now());
                            running.spawn(run_command(command));
                        }
                        Err(e) => warn!(line = %line, error = %e, "invalid request"),
                    }
                }
                None => {
                    info!(in_flight = in_flight.len(), "supervisor disconnected; exiting");
                    break;
                }
            },
            Some(joined) = running.join_next() => {
                let response = joined.map_err(|e| {
                    AspawnError::Protocol(format!("command task failed: {e}"))
                })?;
                if let Some(started) = in_flight.remove(&response.id) {
                    debug!(
                        id = response.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "command finished"
                    );
                }
                write_message(&mut output, &WorkerMessage::Completed(response)).await?;
            }
        }
    }

    Ok(())
}

async fn write_message<W: AsyncWrite + Unpin>(output: &mut W, message: &WorkerMessage) -> Result<()> {
    let line = message
        .to_line()
        .map_err(|e| AspawnError::Protocol(format!("failed to encode message: {e}")))?;
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
