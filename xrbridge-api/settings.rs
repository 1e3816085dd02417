/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::util::ClipPlanes;
use crate::EnvironmentBlendMode;
use crate::Error;
use crate::FormFactor;
use crate::ReferenceSpaceType;
use crate::ViewConfiguration;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// How many frames may be in flight between the update and render stages.
pub const DEFAULT_FRAME_CAPACITY: usize = 2;

/// Configuration for one integration instance.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct Settings {
    pub app_name: String,
    pub app_version: u32,
    pub form_factor: FormFactor,
    pub view_configuration: ViewConfiguration,
    /// The reference space the application-facing local space is built on.
    pub reference_space: ReferenceSpaceType,
    pub blend_mode: EnvironmentBlendMode,
    /// Frames the pipeline may hold at once. Raising this past 2 delays
    /// when superseded local spaces get retired.
    pub frame_capacity: usize,
    pub clip_planes: ClipPlanes,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: "xrbridge".into(),
            app_version: 1,
            form_factor: FormFactor::HeadMountedDisplay,
            view_configuration: ViewConfiguration::Stereo,
            reference_space: ReferenceSpaceType::Local,
            blend_mode: EnvironmentBlendMode::Opaque,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            clip_planes: ClipPlanes::default(),
        }
    }
}

impl Settings {
    pub fn with_app(mut self, name: &str, version: u32) -> Self {
        self.app_name = name.into();
        self.app_version = version;
        self
    }

    pub fn with_view_configuration(mut self, view_configuration: ViewConfiguration) -> Self {
        self.view_configuration = view_configuration;
        self
    }

    pub fn with_reference_space(mut self, reference_space: ReferenceSpaceType) -> Self {
        self.reference_space = reference_space;
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: EnvironmentBlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_frame_capacity(mut self, frame_capacity: usize) -> Self {
        self.frame_capacity = frame_capacity;
        self
    }

    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        self.clip_planes = ClipPlanes::new(near, far);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.reference_space == ReferenceSpaceType::View {
            return Err(Error::Unsupported(
                "the local space cannot be built on the view space".into(),
            ));
        }
        if self.frame_capacity < 2 {
            return Err(Error::Unsupported(format!(
                "frame capacity {} cannot overlap update and render",
                self.frame_capacity
            )));
        }
        let ClipPlanes { near, far, .. } = self.clip_planes;
        if !(near > 0. && far > near) {
            return Err(Error::Unsupported(format!(
                "clip planes {}..{} are not a valid depth range",
                near, far
            )));
        }
        Ok(())
    }
}
