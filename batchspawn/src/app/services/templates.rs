// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use tera::{Context, Tera};

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::ScriptRendererPort;
use crate::app::services::subvars::SubstitutionVariables;

/// Slurm job script used when no template is configured.
pub const SLURM_BATCH_SCRIPT: &str = r#"#!/bin/bash
#SBATCH --job-name=spawner-jupyterhub
#SBATCH --chdir={{homedir}}
#SBATCH --get-user-env=L
{% if partition %}#SBATCH --partition={{partition}}
{% endif %}{% if account %}#SBATCH --account={{account}}
{% endif %}{% if runtime %}#SBATCH --time={{runtime}}
{% endif %}{% if memory %}#SBATCH --mem={{memory}}
{% endif %}{% if gres %}#SBATCH --gres={{gres}}
{% endif %}{% if nprocs %}#SBATCH --cpus-per-task={{nprocs}}
{% endif %}{% if nnodes %}#SBATCH --nodes={{nnodes}}
{% endif %}{% if reservation %}#SBATCH --reservation={{reservation}}
{% endif %}{% if constraint %}#SBATCH --constraint={{constraint}}
{% endif %}{% if options %}#SBATCH {{options}}
{% endif %}
set -euo pipefail
trap 'echo SIGTERM received' TERM
{{prologue}}
{% if srun %}{{srun}} {% endif %}{{cmd}}
echo "single-user server ended gracefully"
{{epilogue}}
"#;

/// Renders batch scripts with tera when the template uses `{{ }}` or `{% %}`
/// syntax, and with plain `{name}` substitution otherwise. The two styles
/// cannot be mixed in one template.
#[derive(Clone, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptRendererPort for TemplateRenderer {
    fn render(&self, template: &str, vars: &SubstitutionVariables) -> AppResult<String> {
        if is_tera_template(template) {
            render_tera(template, vars)
        } else {
            render_braces(template, vars)
        }
    }
}

fn is_tera_template(template: &str) -> bool {
    template.contains("{{") || template.contains("{%")
}

fn render_tera(template: &str, vars: &SubstitutionVariables) -> AppResult<String> {
    let context = Context::from_serialize(vars).map_err(|err| template_error(&err))?;
    Tera::one_off(template, &context, false).map_err(|err| template_error(&err))
}

fn render_braces(template: &str, vars: &SubstitutionVariables) -> AppResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| AppError::Template("unclosed '{' in batch script".to_string()))?;
        let key = after[..close].trim();
        let value = vars.get(key).ok_or_else(|| {
            AppError::Template(format!("batch script references unknown variable '{key}'"))
        })?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn template_error(err: &tera::Error) -> AppError {
    // tera keeps the useful part of the message in the source chain.
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    AppError::Template(message)
}
