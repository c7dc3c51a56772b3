// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;

use tokio::sync::watch;

use crate::app::errors::{AppError, AppResult};

/// Cancellation signal raced against every suspension point.
/// A dropped sender never cancels.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Runs `fut` unless cancellation fires first.
    pub async fn race<F: Future>(&mut self, fut: F) -> AppResult<F::Output> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(AppError::Cancelled),
        }
    }

    pub async fn sleep(&mut self, duration: std::time::Duration) -> AppResult<()> {
        self.race(tokio::time::sleep(duration)).await
    }
}
