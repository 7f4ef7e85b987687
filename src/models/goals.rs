// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily activity goals.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-user daily goals. Unset goals read back as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Goals {
    #[validate(range(min = 0, max = 200_000))]
    pub daily_steps_goal: i64,
    #[validate(range(min = 0, max = 1_440))]
    pub sleep_goal_minutes: i64,
    #[validate(range(min = 0, max = 1_440))]
    pub active_minutes_goal: i64,
}
