/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ops::Add;
use std::time::Duration;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// A point on the runtime's monotonic clock, in nanoseconds.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct Time(i64);

impl Time {
    pub const fn from_nanos(nanos: i64) -> Time {
        Time(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(rhs.as_nanos() as i64))
    }
}

/// The timing information the runtime hands back from a frame wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct FrameTiming {
    pub predicted_display_time: Time,
    pub predicted_display_period: Duration,
    /// A hint that the compositor will not show the frame, so rendering
    /// can be skipped (the frame must still be begun and ended).
    pub should_render: bool,
}
