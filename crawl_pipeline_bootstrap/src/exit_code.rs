// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Code Management
//!
//! Standardized Unix exit codes following BSD `sysexits.h` conventions.
//! The orchestrator reports the most severe error category a run
//! encountered; [`ExitCode::from_category`] maps it here so scripts can
//! distinguish configuration mistakes from transient transport failures.
//!
//! - **0**: success
//! - **1**: general error
//! - **64-78**: specific conditions (sysexits.h)

use std::fmt;

/// Exit codes following Unix conventions (BSD sysexits.h).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful termination (0)
    #[default]
    Success = 0,

    /// General error (1)
    Error = 1,

    /// Command line usage error (64)
    UsageError = 64,

    /// Data format error (65): malformed records, schema violations
    DataError = 65,

    /// Cannot open input (66): unreadable seed or stage log
    NoInput = 66,

    /// Service unavailable (69): upstream host unreachable
    Unavailable = 69,

    /// Internal software error (70)
    Software = 70,

    /// I/O error (74): record log or store write failure
    IoError = 74,

    /// Temporary failure (75): retry-exhausted transient errors
    TempFail = 75,

    /// Remote protocol error (76)
    Protocol = 76,

    /// Configuration error (78)
    ConfigError = 78,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Maps a pipeline error category (see the domain `PipelineError`)
    /// to an exit code. Unknown categories map to the general error.
    pub fn from_category(category: &str) -> Self {
        match category {
            "configuration" => ExitCode::ConfigError,
            "input" | "schema" | "serialization" => ExitCode::DataError,
            "io" | "persistence" | "checkpoint" | "database" => ExitCode::IoError,
            "transport" | "timeout" => ExitCode::Unavailable,
            "protocol" => ExitCode::Protocol,
            "integrity" => ExitCode::DataError,
            "resource" => ExitCode::TempFail,
            "internal" | "metrics" | "stage" => ExitCode::Software,
            "cancellation" => ExitCode::TempFail,
            _ => ExitCode::Error,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "success",
            ExitCode::Error => "general error",
            ExitCode::UsageError => "usage error",
            ExitCode::DataError => "data error",
            ExitCode::NoInput => "no input",
            ExitCode::Unavailable => "service unavailable",
            ExitCode::Software => "internal software error",
            ExitCode::IoError => "I/O error",
            ExitCode::TempFail => "temporary failure",
            ExitCode::Protocol => "protocol error",
            ExitCode::ConfigError => "configuration error",
        };
        write!(f, "{} ({})", name, self.as_i32())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
