// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure layer: adapters binding the domain to the outside world.

pub mod analysis;
pub mod checkpoint;
pub mod concurrency;
pub mod config;
pub mod html;
pub mod http;
pub mod logs;
pub mod metrics;
pub mod repositories;
pub mod sinks;
pub mod stages;
