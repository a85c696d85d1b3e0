// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CLI Parsing and Validation
//!
//! Clap-based parser for the pipeline command surface, followed by a
//! validation pass that range-checks numeric arguments and normalizes the
//! stage selector. Only validated values leave this module.
//!
//! Command surface:
//!
//! ```text
//! crawl_pipeline run <1|2|3|all> [--env NAME] [--log-level LEVEL]
//!                                [--config PATH] [--config-only] [--validate-only]
//! crawl_pipeline checkpoint list
//! crawl_pipeline checkpoint reset <1|2|3|all>
//! crawl_pipeline checkpoint cleanup --older-than-hours N
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Errors produced by CLI validation.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for {arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("clap error: {0}")]
    Clap(#[from] clap::Error),
}

/// Raw CLI structure as parsed by clap.
#[derive(Debug, Parser)]
#[command(
    name = "crawl_pipeline",
    about = "Three-stage crawl pipeline: discovery, validation, enrichment",
    version
)]
pub struct Cli {
    /// Environment profile (selects config/<env>.yaml)
    #[arg(long, global = true, default_value = "development")]
    pub env: String,

    /// Log level override (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Explicit configuration file path (overrides --env lookup)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one stage or the whole pipeline
    Run {
        /// Stage selector: 1|2|3|all (names also accepted)
        stage: String,

        /// Validate configuration and exit without side effects
        #[arg(long)]
        config_only: bool,

        /// Validate configuration and cross-stage log integrity, then exit
        #[arg(long)]
        validate_only: bool,
    },

    /// Inspect and manage stage checkpoints
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CheckpointCommands {
    /// List all stage checkpoints with progress
    List,
    /// Reset a stage checkpoint (or all of them)
    Reset {
        /// Stage selector: 1|2|3|all
        stage: String,
    },
    /// Remove completed checkpoints older than the given age
    Cleanup {
        #[arg(long)]
        older_than_hours: u64,
    },
}

/// Which stages a `run` invocation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    Stage(u8),
    All,
}

impl RunTarget {
    /// Stage numbers covered, in pipeline order.
    pub fn stage_numbers(&self) -> Vec<u8> {
        match self {
            RunTarget::Stage(n) => vec![*n],
            RunTarget::All => vec![1, 2, 3],
        }
    }
}

impl FromStr for RunTarget {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(RunTarget::All),
            "1" | "discovery" => Ok(RunTarget::Stage(1)),
            "2" | "validation" => Ok(RunTarget::Stage(2)),
            "3" | "enrichment" => Ok(RunTarget::Stage(3)),
            other => Err(ParseError::InvalidValue {
                arg: "stage".to_string(),
                reason: format!("'{}' is not 1|2|3|all or a stage name", other),
            }),
        }
    }
}

/// Validated checkpoint management action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointAction {
    List,
    Reset(RunTarget),
    Cleanup { older_than_hours: u64 },
}

/// Validated command variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedCommand {
    Run {
        target: RunTarget,
        config_only: bool,
        validate_only: bool,
    },
    Checkpoint(CheckpointAction),
}

/// Validated CLI configuration handed to the application.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
    pub env: String,
    pub log_level: Option<String>,
    pub config: Option<PathBuf>,
}

/// Parse and validate CLI arguments from the process environment.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    validate_cli(Cli::parse())
}

/// Validation pass over a parsed CLI.
pub fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    if let Some(level) = &cli.log_level {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ParseError::InvalidValue {
                arg: "log-level".to_string(),
                reason: format!("'{}' is not one of {:?}", level, LEVELS),
            });
        }
    }

    if cli.env.is_empty() || !cli.env.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ParseError::InvalidValue {
            arg: "env".to_string(),
            reason: "must be a non-empty alphanumeric profile name".to_string(),
        });
    }

    let command = match cli.command {
        Commands::Run {
            stage,
            config_only,
            validate_only,
        } => ValidatedCommand::Run {
            target: stage.parse()?,
            config_only,
            validate_only,
        },
        Commands::Checkpoint { action } => ValidatedCommand::Checkpoint(match action {
            CheckpointCommands::List => CheckpointAction::List,
            CheckpointCommands::Reset { stage } => CheckpointAction::Reset(stage.parse()?),
            CheckpointCommands::Cleanup { older_than_hours } => {
                if older_than_hours == 0 {
                    return Err(ParseError::InvalidValue {
                        arg: "older-than-hours".to_string(),
                        reason: "must be greater than 0".to_string(),
                    });
                }
                CheckpointAction::Cleanup { older_than_hours }
            }
        }),
    };

    Ok(ValidatedCli {
        command,
        env: cli.env,
        log_level: cli.log_level.map(|l| l.to_ascii_lowercase()),
        config: cli.config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ValidatedCli, ParseError> {
        let cli = Cli::try_parse_from(args)?;
        validate_cli(cli)
    }

    #[test]
    fn test_run_all() {
        let cli = parse(&["crawl_pipeline", "run", "all"]).unwrap();
        assert_eq!(
            cli.command,
            ValidatedCommand::Run {
                target: RunTarget::All,
                config_only: false,
                validate_only: false
            }
        );
        assert_eq!(cli.env, "development");
    }

    #[test]
    fn test_run_stage_by_name_and_number() {
        for selector in ["2", "validation"] {
            let cli = parse(&["crawl_pipeline", "run", selector]).unwrap();
            match cli.command {
                ValidatedCommand::Run { target, .. } => assert_eq!(target, RunTarget::Stage(2)),
                other => panic!("unexpected command {:?}", other),
            }
        }
    }

    #[test]
    fn test_invalid_stage_rejected() {
        assert!(parse(&["crawl_pipeline", "run", "7"]).is_err());
        assert!(parse(&["crawl_pipeline", "run", "warehouse"]).is_err());
    }

    #[test]
    fn test_validate_only_flag() {
        let cli = parse(&["crawl_pipeline", "run", "all", "--validate-only"]).unwrap();
        match cli.command {
            ValidatedCommand::Run { validate_only, .. } => assert!(validate_only),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_level_validation() {
        assert!(parse(&["crawl_pipeline", "--log-level", "debug", "run", "1"]).is_ok());
        assert!(parse(&["crawl_pipeline", "--log-level", "loud", "run", "1"]).is_err());
    }

    #[test]
    fn test_env_name_validation() {
        assert!(parse(&["crawl_pipeline", "--env", "staging-2", "run", "1"]).is_ok());
        assert!(parse(&["crawl_pipeline", "--env", "../etc", "run", "1"]).is_err());
    }

    #[test]
    fn test_checkpoint_commands() {
        let cli = parse(&["crawl_pipeline", "checkpoint", "list"]).unwrap();
        assert_eq!(cli.command, ValidatedCommand::Checkpoint(CheckpointAction::List));

        let cli = parse(&["crawl_pipeline", "checkpoint", "reset", "all"]).unwrap();
        assert_eq!(
            cli.command,
            ValidatedCommand::Checkpoint(CheckpointAction::Reset(RunTarget::All))
        );

        assert!(parse(&["crawl_pipeline", "checkpoint", "cleanup", "--older-than-hours", "0"]).is_err());
        let cli = parse(&["crawl_pipeline", "checkpoint", "cleanup", "--older-than-hours", "48"]).unwrap();
        assert_eq!(
            cli.command,
            ValidatedCommand::Checkpoint(CheckpointAction::Cleanup { older_than_hours: 48 })
        );
    }

    #[test]
    fn test_run_target_stage_numbers() {
        assert_eq!(RunTarget::All.stage_numbers(), vec![1, 2, 3]);
        assert_eq!(RunTarget::Stage(3).stage_numbers(), vec![3]);
    }
}
