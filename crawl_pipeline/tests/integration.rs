// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Integration test root. Each module exercises one pipeline concern
//! against real files and a local HTTP test server.

mod integration {
    mod common;
    mod integrity_test;
    mod pipeline_flow_test;
    mod resume_test;
    mod retry_test;
}
