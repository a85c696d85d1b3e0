// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Bootstrap Module
//!
//! The bootstrap module sits **outside** the enterprise application layers
//! (domain, application, infrastructure) and provides:
//!
//! - **Argument parsing** - CLI parsing and validation for the pipeline
//!   command surface (`run <1|2|3|all>`, checkpoint management)
//! - **Signal handling** - Graceful shutdown on SIGTERM/SIGINT/SIGHUP
//! - **Shutdown coordination** - Cancellation token propagation with a
//!   bounded grace period for in-flight HTTP requests
//! - **Exit codes** - BSD `sysexits.h` mapping; the most severe error class
//!   encountered by a run decides the process exit code
//! - **Bootstrap logging** - a minimal trait-based logger usable before the
//!   tracing subscriber is installed
//!
//! Bootstrap can see every layer; no enterprise layer may depend on
//! bootstrap. The `crawl_pipeline` binary wires the two together.

pub mod cli;
pub mod exit_code;
pub mod logger;
pub mod shutdown;
pub mod signals;

// Re-export commonly used types
pub use cli::{parse_and_validate, CheckpointAction, ParseError, RunTarget, ValidatedCli, ValidatedCommand};
pub use exit_code::ExitCode;
pub use logger::{BootstrapLogger, ConsoleLogger, NoOpLogger};
pub use shutdown::{CancellationToken, ShutdownCoordinator};

/// Bootstrap and parse CLI arguments.
///
/// Clap handles `--help` and `--version` itself; validation failures come
/// back as [`cli::ParseError`] and should map to [`ExitCode::UsageError`].
pub fn bootstrap_cli() -> Result<ValidatedCli, cli::ParseError> {
    cli::parse_and_validate()
}
