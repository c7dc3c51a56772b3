// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// Time source boundary for UTC timestamps.
/// Keeps token expiry bookkeeping deterministic under test.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}
