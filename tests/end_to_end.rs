// tests/end_to_end.rs

#![cfg(unix)]

mod common;
use crate::common::real_worker;

use std::sync::mpsc as std_mpsc;

use aspawn::{AspawnError, CommandError, Output, SpawnOptions};
use aspawn_test_utils::with_timeout;

#[tokio::test]
async fn test_echo_hello_world() {
    let worker = real_worker();

    let outcome = with_timeout(
        worker
            .exec(["echo", "hello world"], &SpawnOptions::default())
            .unwrap()
            .wait(),
    )
    .await;

    assert_eq!(outcome, Ok(Output::new("hello world\n", "")));
    worker.destroy();
}

#[tokio::test]
async fn test_env_replaces_inherited_environment() {
    let worker = real_worker();
    let options = SpawnOptions::with_env([("USER", "someone_else")]);

    let output = with_timeout(worker.exec(["/usr/bin/env"], &options).unwrap().wait())
        .await
        .unwrap();

    assert_eq!(output.stdout, "USER=someone_else\n");
    worker.destroy();
}

#[tokio::test]
async fn test_default_options_inherit_host_environment() {
    let worker = real_worker();
    let expected = std::env::var("PATH").unwrap();

    let output = with_timeout(
        worker
            .exec(["/bin/sh", "-c", "echo \"$PATH\""], &SpawnOptions::default())
            .unwrap()
            .wait(),
    )
    .await
    .unwrap();

    assert_eq!(output.stdout, format!("{expected}\n"));
    worker.destroy();
}

#[tokio::test]
async fn test_nonzero_exit_carries_code_and_output() {
    let worker = real_worker();

    let err = with_timeout(
        worker
            .exec(["sh", "-c", "echo usage >&2; exit 2"], &SpawnOptions::default())
            .unwrap()
            .wait(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), Some(2));
    assert_eq!(err.to_string(), "child exited with status 2");
    let output = err.output().unwrap();
    assert_eq!(output.stdout, "");
    assert!(!output.stderr.is_empty());
    worker.destroy();
}

#[tokio::test]
async fn test_signal_keeps_output_produced_before_death() {
    let worker = real_worker();

    let err = with_timeout(
        worker
            .exec(
                ["sh", "-c", "echo out; echo err >&2; kill -USR2 $$"],
                &SpawnOptions::default(),
            )
            .unwrap()
            .wait(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.signal(), Some("SIGUSR2"));
    assert_eq!(err.to_string(), "child killed by signal SIGUSR2");
    assert_eq!(err.output(), Some(&Output::new("out\n", "err\n")));
    worker.destroy();
}

#[tokio::test]
async fn test_missing_program_is_launch_error() {
    let worker = real_worker();

    let err = with_timeout(
        worker
            .exec(["/nonexistent/aspawn-missing"], &SpawnOptions::default())
            .unwrap()
            .wait(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CommandError::Launch { .. }), "{err:?}");
    worker.destroy();
}

#[tokio::test]
async fn test_argument_errors_are_synchronous() {
    let worker = real_worker();
    let (tx, rx) = std_mpsc::channel();

    let err = worker
        .submit(Vec::<String>::new(), &SpawnOptions::default(), move |outcome| {
            let _ = tx.send(outcome);
        })
        .unwrap_err();

    assert!(matches!(err, AspawnError::InvalidArgument(_)));
    assert_eq!(err.to_string(), "\"argv\" must be non-empty array of strings");
    // The continuation was dropped without being called.
    assert!(rx.recv().is_err());
    worker.destroy();
}

#[tokio::test]
async fn test_commands_complete_out_of_order() {
    let worker = real_worker();
    let options = SpawnOptions::default();

    let slow = worker.exec(["sh", "-c", "sleep 1; echo slow"], &options).unwrap();
    let fast = worker.exec(["echo", "fast"], &options).unwrap();
    assert!(fast.id() > slow.id());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for (name, pending) in [("slow", slow), ("fast", fast)] {
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send((name, pending.wait().await));
        });
    }

    let (first, outcome) = with_timeout(rx.recv()).await.unwrap();
    assert_eq!(first, "fast");
    assert_eq!(outcome.unwrap().stdout, "fast\n");

    let (second, outcome) = with_timeout(rx.recv()).await.unwrap();
    assert_eq!(second, "slow");
    assert_eq!(outcome.unwrap().stdout, "slow\n");
    worker.destroy();
}
