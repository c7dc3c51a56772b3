// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Lifecycle control for interactive-session servers run as HPC batch jobs
//! behind an OAuth2-protected REST gateway.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
