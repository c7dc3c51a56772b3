// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Resource request handed to the scheduler through the batch script.
/// Every field becomes a substitution variable of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    /// Target system on the gateway. Required.
    pub host: String,
    pub queue: String,
    pub memory: String,
    pub nprocs: String,
    pub nnodes: String,
    pub ngpus: String,
    pub runtime: String,
    pub partition: String,
    pub account: String,
    pub options: String,
    pub prologue: String,
    pub epilogue: String,
    pub username: String,
    pub homedir: String,
    pub cluster: String,
    pub qos: String,
    pub srun: String,
    pub reservation: String,
    pub gres: String,
    pub submitenv: String,
    pub constraint: String,
}

/// Template variables for one submission. Keys are unique; the last insert wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SubstitutionVariables(BTreeMap<String, String>);

impl SubstitutionVariables {
    pub fn from_request(request: &JobRequest) -> Self {
        let JobRequest {
            host,
            queue,
            memory,
            nprocs,
            nnodes,
            ngpus,
            runtime,
            partition,
            account,
            options,
            prologue,
            epilogue,
            username,
            homedir,
            cluster,
            qos,
            srun,
            reservation,
            gres,
            submitenv,
            constraint,
        } = request;

        let mut vars = Self::default();
        for (key, value) in [
            ("host", host),
            ("queue", queue),
            ("memory", memory),
            ("nprocs", nprocs),
            ("nnodes", nnodes),
            ("ngpus", ngpus),
            ("runtime", runtime),
            ("partition", partition),
            ("account", account),
            ("options", options),
            ("prologue", prologue),
            ("epilogue", epilogue),
            ("username", username),
            ("homedir", homedir),
            ("cluster", cluster),
            ("qos", qos),
            ("srun", srun),
            ("reservation", reservation),
            ("gres", gres),
            ("submitenv", submitenv),
            ("constraint", constraint),
        ] {
            vars.insert(key, value.clone());
        }
        vars
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn extend<I, K, V>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in overrides {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// Environment actually sent with the job: `PATH` dropped, selected values
/// base64-encoded because the gateway rejects quotes in them. The batch
/// script is expected to decode those keys.
pub fn prepare_job_env(
    env: &BTreeMap<String, String>,
    base64_keys: &[String],
) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(key, _)| key.as_str() != "PATH")
        .map(|(key, value)| {
            let value = if base64_keys.iter().any(|k| k == key) {
                STANDARD.encode(value.as_bytes())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}
