// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::watch;

use crate::app::types::{Job, JobState, ProgressMessage};

pub const PENDING_MESSAGE: &str = "Pending in queue...";
pub const RUNNING_MESSAGE: &str = "Cluster job running... waiting to connect";
pub const WAITING_MESSAGE: &str = "Waiting for job status...";

struct Cursor {
    rx: watch::Receiver<Job>,
    interval: Duration,
    inspected: bool,
    finished: bool,
}

/// One message per inspection of the published job, first one immediately.
/// The stream closes right after reporting a running job.
pub(super) fn progress_stream(
    rx: watch::Receiver<Job>,
    interval: Duration,
) -> BoxStream<'static, ProgressMessage> {
    let cursor = Cursor {
        rx,
        interval,
        inspected: false,
        finished: false,
    };
    stream::unfold(cursor, |mut cursor| async move {
        if cursor.finished {
            return None;
        }
        if cursor.inspected {
            tokio::time::sleep(cursor.interval).await;
        }
        cursor.inspected = true;
        let state = cursor.rx.borrow().state;
        cursor.finished = state == JobState::Running;
        Some((
            ProgressMessage {
                state,
                message: message_for(state),
            },
            cursor,
        ))
    })
    .boxed()
}

fn message_for(state: JobState) -> &'static str {
    match state {
        JobState::Pending => PENDING_MESSAGE,
        JobState::Running => RUNNING_MESSAGE,
        _ => WAITING_MESSAGE,
    }
}
