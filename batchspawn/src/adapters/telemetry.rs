// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            system,
            job_id,
            state,
            exec_host,
            detail,
        } = fields;

        tracing::info!(
            target: "batchspawn::telemetry",
            event = name,
            system = system.as_deref(),
            job_id = job_id.as_deref(),
            state = state,
            exec_host = exec_host.as_deref(),
            detail = detail.as_deref(),
        );
    }
}
