/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::Fov;
use crate::Pose;

use euclid::Transform3D;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ClipPlanes {
    pub near: f32,
    pub far: f32,
    /// Was there an update that needs propagation to the client?
    update: bool,
}

impl Default for ClipPlanes {
    fn default() -> Self {
        ClipPlanes {
            near: 0.1,
            far: 1000.,
            update: false,
        }
    }
}

impl ClipPlanes {
    pub fn new(near: f32, far: f32) -> Self {
        ClipPlanes {
            near,
            far,
            update: false,
        }
    }

    pub fn update(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
        self.update = true;
    }

    /// Checks for and clears the pending update flag
    pub fn recently_updated(&mut self) -> bool {
        if self.update {
            self.update = false;
            true
        } else {
            false
        }
    }

    /// The planes pushed back by `offset`, for a projection whose eye sits
    /// `offset` behind the views it stands in for.
    pub fn offset(&self, offset: f32) -> ClipPlanes {
        ClipPlanes {
            near: self.near + offset,
            far: self.far + offset,
            update: self.update,
        }
    }
}

/// The pose of A in C, given the pose of A in B (`first`) and of B in C (`second`).
/// The translation of `first` is carried into C by the orientation of `second`
/// before the two positions add.
pub fn compose(first: &Pose, second: &Pose) -> Pose {
    let rotation = first.rotation.then(&second.rotation);
    let translation = second.rotation.transform_vector3d(first.translation) + second.translation;
    Pose::new(rotation, translation)
}

pub fn fov_to_projection_matrix<T, U>(fov: &Fov, clip_planes: ClipPlanes) -> Transform3D<f32, T, U> {
    let near = clip_planes.near;
    // Finite far planes only.
    let left = fov.angle_left.tan() * near;
    let right = fov.angle_right.tan() * near;
    let top = fov.angle_up.tan() * near;
    let bottom = fov.angle_down.tan() * near;

    frustum_to_projection_matrix(left, right, top, bottom, clip_planes)
}

pub fn frustum_to_projection_matrix<T, U>(
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    clip_planes: ClipPlanes,
) -> Transform3D<f32, T, U> {
    let near = clip_planes.near;
    let far = clip_planes.far;

    let w = right - left;
    let h = top - bottom;
    let d = far - near;

    // Column-major order
    Transform3D::new(
        2. * near / w,
        0.,
        0.,
        0.,
        0.,
        2. * near / h,
        0.,
        0.,
        (right + left) / w,
        (top + bottom) / h,
        -(far + near) / d,
        -1.,
        0.,
        0.,
        -2. * far * near / d,
        0.,
    )
}
