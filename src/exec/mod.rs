// src/exec/mod.rs

//! Worker process plumbing.
//!
//! - [`backend`] provides the `WorkerBackend` trait the supervisor uses to
//!   launch worker processes, and the `ProcessHandle` it keeps for the live
//!   one. Tests can replace the backend with an in-process fake.
//! - [`process`] is the production backend: it runs the `aspawn-worker`
//!   program and bridges its stdin/stdout to the supervisor with one
//!   writer, one reader and one exit-waiter Tokio task per process.

pub mod backend;
pub mod process;

pub use backend::{ProcessHandle, WorkerBackend};
pub use process::ProcessBackend;
