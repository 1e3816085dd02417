/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use log::warn;

use std::sync::Arc;
use std::sync::Weak;

use xrbridge_api::Error;
use xrbridge_api::Location;
use xrbridge_api::Pose;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::RuntimeSession;
use xrbridge_api::SpaceHandle;
use xrbridge_api::Time;

/// A runtime-tracked coordinate frame.
///
/// Spaces are immutable: moving one means creating another. The runtime
/// session is only weakly referenced, so a space outliving its session
/// just stops locating.
pub struct Space {
    session: Weak<dyn RuntimeSession>,
    handle: SpaceHandle,
    space_type: ReferenceSpaceType,
    pose_in_reference: Option<Pose>,
}

impl Space {
    /// Create a space on one of the runtime's reference spaces, optionally
    /// offset by a pose baked in at creation.
    pub fn reference(
        session: &Arc<dyn RuntimeSession>,
        space_type: ReferenceSpaceType,
        pose_in_reference: Option<Pose>,
    ) -> Result<Space, Error> {
        let handle = session
            .create_reference_space(space_type, pose_in_reference.unwrap_or_else(Pose::identity))
            .map_err(|err| {
                warn!("create_reference_space({:?}) failed: {}", space_type, err);
                err
            })?;
        Ok(Space {
            session: Arc::downgrade(session),
            handle,
            space_type,
            pose_in_reference,
        })
    }

    pub fn handle(&self) -> SpaceHandle {
        self.handle
    }

    pub fn space_type(&self) -> ReferenceSpaceType {
        self.space_type
    }

    /// The pose baked into this space, if it isn't the bare reference space.
    pub fn pose_in_reference(&self) -> Option<Pose> {
        self.pose_in_reference
    }

    pub fn is_identity(&self) -> bool {
        self.pose_in_reference.is_none()
    }

    pub fn is_alive(&self) -> bool {
        self.session.strong_count() > 0
    }

    /// Locate this space relative to `base` at `time`. Runtime failures are
    /// logged and reported as a location with nothing valid.
    pub fn locate(&self, base: &Space, time: Time) -> Location {
        let session = match self.session.upgrade() {
            Some(session) => session,
            None => return Location::invalid(),
        };
        match session.locate_space(self.handle, base.handle, time) {
            Ok(location) => location,
            Err(err) => {
                warn!("locate_space({:?}) failed: {}", self.handle, err);
                Location::invalid()
            }
        }
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.destroy_space(self.handle);
        }
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("handle", &self.handle)
            .field("space_type", &self.space_type)
            .field("baked", &self.pose_in_reference.is_some())
            .finish()
    }
}
