/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Poses of runtime-tracked coordinate frames, and the per-view frustums
//! the runtime reports for each frame.

use euclid::RigidTransform3D;
use euclid::Rotation3D;
use euclid::Vector3D;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// The runtime's tracking coordinates, in metres, Y up and looking down -Z.
/// Every reference space shares these units; which space a pose is relative
/// to is carried alongside it.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum Native {}

/// An orientation (unit quaternion) followed by a translation, mapping
/// coordinates of the located frame into its base frame.
pub type Pose = RigidTransform3D<f32, Native, Native>;

/// What the runtime could actually track at the instant something was located.
/// "Tracked" is expected to imply "valid" but runtimes are not forced to honour that,
/// so consumers check the valid bit before using a component.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct LocationFlags {
    pub orientation_valid: bool,
    pub orientation_tracked: bool,
    pub position_valid: bool,
    pub position_tracked: bool,
}

impl LocationFlags {
    pub const NONE: LocationFlags = LocationFlags {
        orientation_valid: false,
        orientation_tracked: false,
        position_valid: false,
        position_tracked: false,
    };

    pub const ALL: LocationFlags = LocationFlags {
        orientation_valid: true,
        orientation_tracked: true,
        position_valid: true,
        position_tracked: true,
    };

    /// Both components may be used.
    pub fn is_valid(self) -> bool {
        self.orientation_valid && self.position_valid
    }

    pub fn is_tracked(self) -> bool {
        self.orientation_tracked && self.position_tracked
    }
}

/// A located pose, with the validity of each of its components.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct Location {
    pub flags: LocationFlags,
    pub pose: Pose,
}

impl Location {
    pub fn new(flags: LocationFlags, pose: Pose) -> Location {
        Location { flags, pose }
    }

    /// The location reported when the runtime could not be asked.
    pub fn invalid() -> Location {
        Location {
            flags: LocationFlags::NONE,
            pose: Pose::identity(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.is_valid()
    }

    pub fn orientation(&self) -> Option<Rotation3D<f32, Native, Native>> {
        if self.flags.orientation_valid {
            Some(self.pose.rotation)
        } else {
            None
        }
    }

    pub fn position(&self) -> Option<Vector3D<f32, Native>> {
        if self.flags.position_valid {
            Some(self.pose.translation)
        } else {
            None
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::invalid()
    }
}

/// The four half-angles, in radians, of an infinite perspective frustum.
/// Left and down are normally negative. The view looks down -Z with +Y up.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn new(angle_left: f32, angle_right: f32, angle_up: f32, angle_down: f32) -> Fov {
        Fov {
            angle_left,
            angle_right,
            angle_up,
            angle_down,
        }
    }

    pub fn symmetric(horizontal: f32, vertical: f32) -> Fov {
        Fov::new(-horizontal, horizontal, vertical, -vertical)
    }

    pub fn horizontal_span(&self) -> f32 {
        self.angle_right - self.angle_left
    }

    pub fn vertical_span(&self) -> f32 {
        self.angle_up - self.angle_down
    }
}

/// One view of a frame, as located by the runtime relative to some base space.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ViewLocation {
    pub pose: Pose,
    pub fov: Fov,
}

/// The result of one batched view query. The flags apply to every view.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ViewLocations {
    pub flags: LocationFlags,
    pub views: Vec<ViewLocation>,
}

impl ViewLocations {
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_location_hides_components() {
        let location = Location::invalid();
        assert!(!location.is_valid());
        assert!(location.orientation().is_none());
        assert!(location.position().is_none());
    }

    #[test]
    fn partially_valid_location() {
        let flags = LocationFlags {
            orientation_valid: true,
            ..LocationFlags::NONE
        };
        let location = Location::new(flags, Pose::identity());
        assert!(!location.is_valid());
        assert!(location.orientation().is_some());
        assert!(location.position().is_none());
    }

    #[test]
    fn fov_spans() {
        let fov = Fov::new(-0.6, 0.5, 0.4, -0.7);
        assert!((fov.horizontal_span() - 1.1).abs() < 1e-6);
        assert!((fov.vertical_span() - 1.1).abs() < 1e-6);
        assert_eq!(Fov::symmetric(0.6, 0.5), Fov::new(-0.6, 0.6, 0.5, -0.5));
    }

    #[cfg(feature = "ipc")]
    #[test]
    fn typed_poses_cross_process_boundaries() {
        fn serializable<T: Serialize + for<'de> Deserialize<'de>>() {}
        serializable::<Pose>();
        serializable::<Location>();
        serializable::<ViewLocations>();
        serializable::<crate::Event>();
        serializable::<crate::NativeLayer>();
        serializable::<crate::MockRuntimeMsg>();
    }
}
