// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage identifier value object.
//!
//! Names the three pipeline stages. The string form is used in checkpoint
//! file names (`<stage_id>.checkpoint.json`), log fields, and metric labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Discovery,
    Validation,
    Enrichment,
}

impl StageId {
    /// All stages in pipeline order.
    pub const ALL: [StageId; 3] = [StageId::Discovery, StageId::Validation, StageId::Enrichment];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Discovery => "discovery",
            StageId::Validation => "validation",
            StageId::Enrichment => "enrichment",
        }
    }

    /// 1-based stage number as used on the command line.
    pub fn number(&self) -> u8 {
        match self {
            StageId::Discovery => 1,
            StageId::Validation => 2,
            StageId::Enrichment => 3,
        }
    }

    /// The stage whose record log this stage consumes, if any.
    pub fn upstream(&self) -> Option<StageId> {
        match self {
            StageId::Discovery => None,
            StageId::Validation => Some(StageId::Discovery),
            StageId::Enrichment => Some(StageId::Validation),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "discovery" => Ok(StageId::Discovery),
            "2" | "validation" => Ok(StageId::Validation),
            "3" | "enrichment" => Ok(StageId::Enrichment),
            other => Err(PipelineError::StageNotFound(format!(
                "unknown stage '{}' (expected 1|2|3 or discovery|validation|enrichment)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_number_and_name() {
        assert_eq!("1".parse::<StageId>().unwrap(), StageId::Discovery);
        assert_eq!("validation".parse::<StageId>().unwrap(), StageId::Validation);
        assert_eq!("Enrichment".parse::<StageId>().unwrap(), StageId::Enrichment);
        assert!("4".parse::<StageId>().is_err());
    }

    #[test]
    fn test_upstream_chain() {
        assert_eq!(StageId::Discovery.upstream(), None);
        assert_eq!(StageId::Validation.upstream(), Some(StageId::Discovery));
        assert_eq!(StageId::Enrichment.upstream(), Some(StageId::Validation));
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(serde_json::to_string(&StageId::Discovery).unwrap(), "\"discovery\"");
    }
}
