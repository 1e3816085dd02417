/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::Error;
use crate::Fov;
use crate::LocationFlags;
use crate::Pose;
use crate::ReferenceSpaceType;
use crate::SessionState;
use crate::Time;

use std::time::Duration;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// A view of a simulated device, posed relative to the viewer.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct MockViewInit {
    pub transform: Pose,
    pub fov: Fov,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct MockRuntimeInit {
    /// The viewer in the runtime's unrecentred local space.
    pub viewer_origin: Pose,
    pub views: Vec<MockViewInit>,
    pub tracking: LocationFlags,
    pub start_time: Time,
    pub frame_period: Duration,
    /// Real time to spend inside each frame wait, if any.
    pub pacing: Option<Duration>,
    /// How long a frame wait holds out for the previous frame to be begun
    /// before failing instead of blocking forever.
    pub wait_timeout: Duration,
}

impl Default for MockRuntimeInit {
    fn default() -> Self {
        MockRuntimeInit {
            viewer_origin: Pose::identity(),
            views: vec![],
            tracking: LocationFlags::ALL,
            start_time: Time::from_nanos(1_000_000_000),
            frame_period: Duration::from_nanos(11_111_111),
            pacing: None,
            wait_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum MockRuntimeMsg {
    SetViewerOrigin(Pose),
    SetViews(Vec<MockViewInit>),
    SetTracking(LocationFlags),
    SetSessionState(SessionState),
    /// Redefine a reference space `delay` after the current time, as a user
    /// recentering from the system menu would.
    Recenter {
        space_type: ReferenceSpaceType,
        pose_in_previous_space: Pose,
        delay: Duration,
    },
    ChangeVisibilityMask(u32),
    ChangeInteractionProfile,
    LoseInstance,
    /// Overflow the event queue, discarding events that were not yet polled.
    LoseEvents,
    /// Make the next call of the given kind fail with `error`.
    FailNext(MockCall, Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum MockCall {
    WaitFrame,
    BeginFrame,
    EndFrame,
    LocateViews,
    LocateSpace,
    CreateSpace,
}
