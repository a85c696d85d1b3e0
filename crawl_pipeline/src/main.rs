// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Binary entry point: bootstrap CLI parsing, configuration loading,
//! tracing setup, signal wiring, and command dispatch. Exit codes follow
//! the bootstrap `sysexits.h` mapping; the most severe error category a
//! run encounters decides the code.

use std::sync::Arc;

use chrono::Utc;

use crawl_pipeline::application::orchestrator::PipelineOrchestrator;
use crawl_pipeline::infrastructure::config::settings::{AppConfig, LogFormat};
use crawl_pipeline_bootstrap::cli::{CheckpointAction, RunTarget, ValidatedCli, ValidatedCommand};
use crawl_pipeline_bootstrap::shutdown::ShutdownCoordinator;
use crawl_pipeline_bootstrap::signals::install_signal_handlers;
use crawl_pipeline_bootstrap::{bootstrap_cli, ExitCode};
use crawl_pipeline_domain::{PipelineError, StageId};

fn main() -> std::process::ExitCode {
    let cli = match bootstrap_cli() {
        Ok(cli) => cli,
        Err(error) => {
            eprintln!("error: {}", error);
            return ExitCode::UsageError.into();
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start runtime: {}", error);
            return ExitCode::Software.into();
        }
    };

    let exit = runtime.block_on(run(cli));
    exit.into()
}

async fn run(cli: ValidatedCli) -> ExitCode {
    // Configuration is validated before any side effect; failure exits
    // here with a config error.
    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {}", error);
            return ExitCode::from_category(error.category());
        }
    };
    // Precedence: YAML < env (applied in load) < CLI.
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    if let Err(error) = init_tracing(&config) {
        eprintln!("error: {}", error);
        return ExitCode::from_category(error.category());
    }

    match cli.command {
        ValidatedCommand::Run {
            target,
            config_only,
            validate_only,
        } => run_pipeline(config, target, config_only, validate_only).await,
        ValidatedCommand::Checkpoint(action) => run_checkpoint_command(config, action).await,
    }
}

fn load_config(cli: &ValidatedCli) -> Result<AppConfig, PipelineError> {
    match &cli.config {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_profile(&cli.env),
    }
}

fn init_tracing(config: &AppConfig) -> Result<(), PipelineError> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.logging.level)
        .map_err(|e| PipelineError::invalid_config(format!("logging.level: {}", e)))?;

    let writer = match &config.logging.path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::io_error(format!("mkdir {}: {}", parent.display(), e)))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| PipelineError::io_error(format!("open log {}: {}", path.display(), e)))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);
    let result = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Plain => builder.try_init(),
    };
    result.map_err(|e| PipelineError::internal_error(format!("tracing init: {}", e)))
}

async fn run_pipeline(config: AppConfig, target: RunTarget, config_only: bool, validate_only: bool) -> ExitCode {
    if config_only {
        println!("configuration valid");
        return ExitCode::Success;
    }

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = match PipelineOrchestrator::new(config, coordinator.token()) {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            tracing::error!("failed to build pipeline: {}", error);
            return ExitCode::from_category(error.category());
        }
    };

    if validate_only {
        return match orchestrator.validate_integrity().await {
            Ok(reports) => {
                for report in reports {
                    println!(
                        "{} -> {}: coverage {:.1}%, orphans {}",
                        report.upstream_stage,
                        report.downstream_stage,
                        report.coverage * 100.0,
                        report.orphaned_hashes
                    );
                }
                println!("cross-stage integrity valid");
                ExitCode::Success
            }
            Err(error) => {
                tracing::error!("integrity validation failed: {}", error);
                ExitCode::from_category(error.category())
            }
        };
    }

    install_signal_handlers(coordinator.clone());

    match orchestrator.run(target).await {
        Ok(outcome) => {
            if outcome.was_cancelled {
                tracing::warn!("pipeline interrupted; checkpoints left resumable");
                coordinator.complete_shutdown();
                return ExitCode::TempFail;
            }
            tracing::info!(
                ran = ?outcome.stages_run.iter().map(StageId::as_str).collect::<Vec<_>>(),
                skipped = ?outcome.stages_skipped.iter().map(StageId::as_str).collect::<Vec<_>>(),
                "pipeline complete"
            );
            ExitCode::Success
        }
        Err(error) => {
            tracing::error!("pipeline failed: {}", error);
            ExitCode::from_category(error.category())
        }
    }
}

async fn run_checkpoint_command(config: AppConfig, action: CheckpointAction) -> ExitCode {
    let coordinator = ShutdownCoordinator::default();
    let orchestrator = match PipelineOrchestrator::new(config, coordinator.token()) {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            tracing::error!("failed to open checkpoints: {}", error);
            return ExitCode::from_category(error.category());
        }
    };
    let manager = orchestrator.checkpoints();

    let result: Result<(), PipelineError> = match action {
        CheckpointAction::List => {
            match manager.list() {
                Ok(states) if states.is_empty() => {
                    println!("no checkpoints");
                    Ok(())
                }
                Ok(_) => match orchestrator.progress_report() {
                    Ok(report) => {
                        print!("{}", report);
                        Ok(())
                    }
                    Err(error) => Err(error),
                },
                Err(error) => Err(error),
            }
        }
        CheckpointAction::Reset(target) => match target {
            RunTarget::All => manager.reset_all(),
            RunTarget::Stage(number) => number
                .to_string()
                .parse::<StageId>()
                .and_then(|stage| manager.reset(stage)),
        },
        CheckpointAction::Cleanup { older_than_hours } => manager
            .cleanup(older_than_hours, Utc::now())
            .map(|cleaned| println!("removed {} checkpoint(s)", cleaned)),
    };

    match result {
        Ok(()) => ExitCode::Success,
        Err(error) => {
            tracing::error!("checkpoint command failed: {}", error);
            ExitCode::from_category(error.category())
        }
    }
}
