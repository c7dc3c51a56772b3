// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod host_command;
pub mod http;
pub mod telemetry;
pub mod time;
