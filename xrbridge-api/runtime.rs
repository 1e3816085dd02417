/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/// Traits to be implemented by backends
use crate::CompositionLayer;
use crate::EnvironmentBlendMode;
use crate::Error;
use crate::FrameTiming;
use crate::Location;
use crate::Pose;
use crate::RuntimeEvent;
use crate::Time;
use crate::ViewConfiguration;
use crate::ViewLocations;

use std::sync::Arc;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// An opaque runtime handle to a tracked coordinate frame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct SpaceHandle(pub u64);

/// An opaque runtime handle for an interned path string.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct PathHandle(pub u64);

/// The well-known reference spaces a runtime defines.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum ReferenceSpaceType {
    /// Tracks the viewer's head.
    View,
    /// A seated origin, recentred by the user from time to time.
    Local,
    /// A standing origin at floor level.
    Stage,
}

/// A trait for driving a session on an XR runtime.
///
/// Every method may be called from either the render thread or the
/// update thread. Only `wait_frame` is expected to block.
pub trait RuntimeSession: 'static + Send + Sync {
    /// Begin the session once the runtime reports it is ready.
    fn begin_session(&self, view_configuration: ViewConfiguration) -> Result<(), Error>;

    /// End the session once the runtime reports it is stopping.
    fn end_session(&self) -> Result<(), Error>;

    /// Ask the runtime to wind the session down.
    fn request_exit(&self) -> Result<(), Error>;

    /// This method should block waiting for the compositor's pacing signal,
    /// and return the timing for the next frame.
    fn wait_frame(&self) -> Result<FrameTiming, Error>;

    fn begin_frame(&self) -> Result<(), Error>;

    /// Submit the layers of a frame to the compositor.
    fn end_frame(
        &self,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        layers: &[Arc<dyn CompositionLayer>],
    ) -> Result<(), Error>;

    /// Locate every view of the primary view configuration in one batch.
    fn locate_views(&self, time: Time, base: SpaceHandle) -> Result<ViewLocations, Error>;

    fn locate_space(&self, space: SpaceHandle, base: SpaceHandle, time: Time)
        -> Result<Location, Error>;

    fn create_reference_space(
        &self,
        space_type: ReferenceSpaceType,
        pose_in_reference: Pose,
    ) -> Result<SpaceHandle, Error>;

    fn destroy_space(&self, space: SpaceHandle);

    /// Returns the oldest undelivered event, if any.
    fn poll_event(&self) -> Result<Option<RuntimeEvent>, Error>;

    fn string_to_path(&self, path: &str) -> Result<PathHandle, Error>;
}
