/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! One application-facing reference space, carried across recentering.
//!
//! Runtime spaces can't be moved once created, so a recenter swaps in a new
//! space from a given time onwards. Frames already in flight keep resolving
//! to the space that was active at their own display time.

use crate::space::Space;

use log::{debug, warn};

use std::collections::VecDeque;
use std::sync::Arc;

use xrbridge_api::util;
use xrbridge_api::Error;
use xrbridge_api::Pose;
use xrbridge_api::ReferenceSpaceChange;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::RuntimeSession;
use xrbridge_api::Time;

struct SpaceState {
    activation: Time,
    space: Arc<Space>,
    /// The space's origin in the runtime's reference space.
    pose: Pose,
}

pub struct ManagedSpace {
    session: Arc<dyn RuntimeSession>,
    space_type: ReferenceSpaceType,
    /// Ordered by activation time, never empty.
    states: VecDeque<SpaceState>,
}

impl ManagedSpace {
    pub fn new(
        session: &Arc<dyn RuntimeSession>,
        space_type: ReferenceSpaceType,
    ) -> Result<ManagedSpace, Error> {
        let space = Space::reference(session, space_type, None)?;
        let mut states = VecDeque::with_capacity(2);
        states.push_back(SpaceState {
            activation: Time::default(),
            space: Arc::new(space),
            pose: Pose::identity(),
        });
        Ok(ManagedSpace {
            session: session.clone(),
            space_type,
            states,
        })
    }

    pub fn space_type(&self) -> ReferenceSpaceType {
        self.space_type
    }

    /// The space in effect at `time`: the latest one activated at or before it.
    /// Times before the first activation resolve to the first space.
    pub fn space(&self, time: Time) -> &Arc<Space> {
        let index = self
            .states
            .iter()
            .rposition(|state| state.activation <= time)
            .unwrap_or(0);
        &self.states[index].space
    }

    /// The origin of the most recently queued space in the runtime's reference space.
    pub fn latest_pose(&self) -> Pose {
        self.last().pose
    }

    pub fn latest_activation(&self) -> Time {
        self.last().activation
    }

    /// How many spaces are queued, including the active one.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Move the origin to `pose_in_previous_space` (expressed in the most
    /// recently queued space) from `change_time` on. Refused if an already
    /// queued change happens later than `change_time`.
    pub fn recenter(&mut self, change_time: Time, pose_in_previous_space: &Pose) -> bool {
        let last = self.last();
        if change_time < last.activation {
            warn!(
                "Refusing to recenter at {:?}, before the change queued for {:?}",
                change_time, last.activation
            );
            return false;
        }
        let pose = util::compose(pose_in_previous_space, &last.pose);
        let space = match Space::reference(&self.session, self.space_type, Some(pose)) {
            Ok(space) => space,
            Err(_) => return false,
        };
        debug!("Recentering {:?} at {:?}", self.space_type, change_time);
        self.states.push_back(SpaceState {
            activation: change_time,
            space: Arc::new(space),
            pose,
        });
        true
    }

    /// The runtime is about to redefine the reference space under us. Its
    /// own recentering replaces any offset we baked in, so from the change
    /// time on the bare reference space is used.
    pub fn on_change_pending(&mut self, change: &ReferenceSpaceChange) -> bool {
        if change.space_type != self.space_type {
            return false;
        }
        let last = self.last();
        // A change can't take effect before one that is already queued.
        let activation = if change.change_time < last.activation {
            debug!(
                "Runtime change at {:?} precedes queued change at {:?}",
                change.change_time, last.activation
            );
            last.activation
        } else {
            change.change_time
        };
        let space = if last.space.is_identity() {
            last.space.clone()
        } else {
            match Space::reference(&self.session, self.space_type, None) {
                Ok(space) => Arc::new(space),
                Err(_) => return false,
            }
        };
        debug!(
            "Runtime redefining {:?} at {:?}",
            self.space_type, activation
        );
        self.states.push_back(SpaceState {
            activation,
            space,
            pose: Pose::identity(),
        });
        true
    }

    /// Called once a frame displaying at `time` has been submitted. Drops
    /// spaces that a later space has definitely superseded.
    pub fn end_frame(&mut self, time: Time) {
        while self.states.len() > 1 && self.states[1].activation <= time {
            if let Some(retired) = self.states.pop_front() {
                debug!(
                    "Retiring {:?} space activated at {:?}",
                    self.space_type, retired.activation
                );
            }
        }
    }

    fn last(&self) -> &SpaceState {
        &self.states[self.states.len() - 1]
    }
}
