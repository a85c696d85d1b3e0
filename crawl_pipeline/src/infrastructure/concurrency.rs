// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Admission control for the I/O-bound stages.

pub mod adaptive;

pub use adaptive::{AdaptiveConcurrencyController, ControllerConfig};
