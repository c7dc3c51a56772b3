// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod classifier;
pub mod hostlist;
pub mod subvars;
pub mod templates;
