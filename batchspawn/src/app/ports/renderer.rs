// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::AppResult;
use crate::app::services::subvars::SubstitutionVariables;

/// Batch script templating boundary.
pub trait ScriptRendererPort: Send + Sync {
    fn render(&self, template: &str, vars: &SubstitutionVariables) -> AppResult<String>;
}
