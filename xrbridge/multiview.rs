/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Merging the frustums of several views into one shared frustum that
//! bounds them all, so a frame can be culled and rendered once for every
//! view with a per-view correction applied afterwards.
//!
//! Coordinates are Y up with views looking down -Z. Only views arranged in
//! a horizontal row or arc are supported: any relative pitch or roll
//! between views, or a combined span of half a turn or more, is refused.

use crate::frame::Frame;
use crate::frame::FrameStamp;

use euclid::default::Transform3D;
use euclid::Angle;
use euclid::Rotation3D;
use euclid::Vector3D;

use log::{debug, warn};

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

use std::f32::consts::PI;
use std::fmt;

use xrbridge_api::util::{self, ClipPlanes};
use xrbridge_api::Fov;
use xrbridge_api::Native;
use xrbridge_api::Pose;
use xrbridge_api::ViewLocation;

/// Relative rotations smaller than this, per axis, are float noise.
const ANGLE_EPSILON: f32 = 0.001;

/// Determinants this close to zero have no usable intersection.
const DETERMINANT_EPSILON: f32 = 1e-6;

/// A single frustum standing in for several views.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct SharedView {
    pub pose: Pose,
    pub fov: Fov,
    /// How far the shared eye sits behind the rearmost view.
    pub z_offset: f32,
}

impl SharedView {
    /// The projection for the shared view, with the clip planes pushed back
    /// by the z offset so they still start at the views themselves.
    pub fn projection(&self, clip_planes: ClipPlanes) -> Transform3D<f32> {
        util::fov_to_projection_matrix(&self.fov, clip_planes.offset(self.z_offset))
    }
}

/// How a set of views is oriented relative to the first of them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct Arrangement {
    /// Rotated about the local X axis.
    pub pitched: bool,
    /// Rotated about the local Y axis.
    pub canted: bool,
    /// Rotated about the local Z axis.
    pub rotated: bool,
    pub horizontal_180: bool,
    pub vertical_180: bool,
}

impl Arrangement {
    pub fn is_supported(&self) -> bool {
        !(self.pitched || self.rotated || self.horizontal_180 || self.vertical_180)
    }
}

impl fmt::Display for Arrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions = [
            (self.pitched, "pitched"),
            (self.canted, "canted"),
            (self.rotated, "rotated"),
            (self.horizontal_180, "horizontal span >= 180 degrees"),
            (self.vertical_180, "vertical span >= 180 degrees"),
        ];
        let names: Vec<&str> = conditions
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "aligned")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum MultiViewError {
    NoViews,
    Unsupported(Arrangement),
    /// The bounding frustum has no width or height to intersect.
    Degenerate,
}

impl fmt::Display for MultiViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MultiViewError::NoViews => write!(f, "no views loaded"),
            MultiViewError::Unsupported(arrangement) => {
                write!(f, "unsupported view arrangement: {}", arrangement)
            }
            MultiViewError::Degenerate => write!(f, "degenerate bounding frustum"),
        }
    }
}

impl std::error::Error for MultiViewError {}

/// The views of one frame, and the shared view merged from them.
#[derive(Default)]
pub struct MultiView {
    views: Vec<ViewLocation>,
    stamp: Option<FrameStamp>,
    shared: Option<Result<SharedView, MultiViewError>>,
    #[cfg(test)]
    computations: usize,
}

impl MultiView {
    pub fn new() -> MultiView {
        MultiView::default()
    }

    pub fn load_views(&mut self, views: &[ViewLocation]) {
        self.views.clear();
        self.views.extend_from_slice(views);
        self.stamp = None;
        self.shared = None;
    }

    /// Load the views of `frame`. Views the runtime could not place are
    /// not loaded, and false is returned.
    pub fn load_frame(&mut self, frame: &Frame) -> bool {
        let located = frame.views().filter(|views| views.flags.is_valid());
        match located {
            Some(views) => self.load_views(&views.views),
            None => self.load_views(&[]),
        }
        self.stamp = Some(frame.stamp());
        located.is_some()
    }

    /// The stamp of the frame whose views are loaded.
    pub fn loaded_stamp(&self) -> Option<FrameStamp> {
        self.stamp
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, index: usize) -> Option<&ViewLocation> {
        self.views.get(index)
    }

    /// The shared view of the loaded views, computed once per load.
    pub fn shared_view(&mut self) -> Result<SharedView, MultiViewError> {
        if let Some(ref shared) = self.shared {
            return *shared;
        }
        #[cfg(test)]
        {
            self.computations += 1;
        }
        let shared = merge(&self.views);
        if let Err(ref err) = shared {
            warn!("Cannot merge {} views: {}", self.views.len(), err);
        }
        self.shared = Some(shared);
        shared
    }

    /// The pose of a loaded view relative to the shared view.
    pub fn view_offset(&mut self, index: usize) -> Option<Pose> {
        let shared = self.shared_view().ok()?;
        let view = self.views.get(index)?;
        Some(util::compose(&view.pose, &shared.pose.inverse()))
    }
}

/// The rotation as an axis scaled by its angle.
fn scaled_axis(rotation: &Rotation3D<f32, Native, Native>) -> Vector3D<f32, Native> {
    // q and -q are the same rotation; take the one turning less than half way.
    let (i, j, k, r) = if rotation.r < 0. {
        (-rotation.i, -rotation.j, -rotation.k, -rotation.r)
    } else {
        (rotation.i, rotation.j, rotation.k, rotation.r)
    };
    let sin_half = (i * i + j * j + k * k).sqrt();
    if sin_half <= f32::EPSILON {
        return Vector3D::zero();
    }
    let angle = 2. * sin_half.atan2(r);
    Vector3D::new(i, j, k) * (angle / sin_half)
}

/// Where the lines `a.x * x + a.y * z + c_a = 0` and `b.x * x + b.y * z + c_b = 0` cross.
fn intersect(a: (f32, f32), c_a: f32, b: (f32, f32), c_b: f32) -> Option<(f32, f32)> {
    let det = a.0 * b.1 - b.0 * a.1;
    if det.abs() < DETERMINANT_EPSILON {
        return None;
    }
    Some(((a.1 * c_b - c_a * b.1) / det, (b.0 * c_a - a.0 * c_b) / det))
}

/// The plane constant that puts every point on the inner side of a plane
/// with `normal`, touching the outermost one.
fn plane_constant(normal: (f32, f32), points: &[(f32, f32)]) -> f32 {
    -points
        .iter()
        .map(|p| normal.0 * p.0 + normal.1 * p.1)
        .fold(f32::INFINITY, f32::min)
}

fn merge(views: &[ViewLocation]) -> Result<SharedView, MultiViewError> {
    let first = views.first().ok_or(MultiViewError::NoViews)?;
    if views.len() == 1 {
        return Ok(SharedView {
            pose: first.pose,
            fov: first.fov,
            z_offset: 0.,
        });
    }

    let reference = first.pose.rotation;
    let to_reference = reference.inverse();
    let mut arrangement = Arrangement::default();
    let mut yaws = Vec::with_capacity(views.len());
    for view in views {
        let relative = scaled_axis(&view.pose.rotation.then(&to_reference));
        arrangement.pitched |= relative.x.abs() > ANGLE_EPSILON;
        arrangement.canted |= relative.y.abs() > ANGLE_EPSILON;
        arrangement.rotated |= relative.z.abs() > ANGLE_EPSILON;
        yaws.push(relative.y);
    }

    // Point the shared view at the middle of a canted arc.
    let (min_yaw, max_yaw) = yaws
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &yaw| {
            (lo.min(yaw), hi.max(yaw))
        });
    let mid_yaw = if arrangement.canted {
        (min_yaw + max_yaw) / 2.
    } else {
        0.
    };
    let orientation = Rotation3D::around_y(Angle::radians(mid_yaw))
        .then(&reference)
        .normalize();

    let mut bound = Fov::new(f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY, f32::INFINITY);
    for (view, yaw) in views.iter().zip(&yaws) {
        let cant = if arrangement.canted { yaw - mid_yaw } else { 0. };
        bound.angle_left = bound.angle_left.min(view.fov.angle_left - cant);
        bound.angle_right = bound.angle_right.max(view.fov.angle_right - cant);
        bound.angle_up = bound.angle_up.max(view.fov.angle_up);
        bound.angle_down = bound.angle_down.min(view.fov.angle_down);
    }
    arrangement.horizontal_180 = bound.horizontal_span() >= PI;
    arrangement.vertical_180 = bound.vertical_span() >= PI;
    if !arrangement.is_supported() {
        return Err(MultiViewError::Unsupported(arrangement));
    }

    let to_shared = orientation.inverse();
    let positions: Vec<Vector3D<f32, Native>> = views
        .iter()
        .map(|view| to_shared.transform_vector3d(view.pose.translation))
        .collect();
    let horizontal: Vec<(f32, f32)> = positions.iter().map(|p| (p.x, p.z)).collect();
    let vertical: Vec<(f32, f32)> = positions.iter().map(|p| (p.y, p.z)).collect();

    // Inward facing normals of the bounding frustum's sides, in (x, z) and (y, z).
    let left = (bound.angle_left.cos(), bound.angle_left.sin());
    let right = (-bound.angle_right.cos(), -bound.angle_right.sin());
    let up = (-bound.angle_up.cos(), -bound.angle_up.sin());
    let down = (bound.angle_down.cos(), bound.angle_down.sin());

    let (x, z_horizontal) = intersect(
        left,
        plane_constant(left, &horizontal),
        right,
        plane_constant(right, &horizontal),
    )
    .ok_or(MultiViewError::Degenerate)?;
    let (y, z_vertical) = intersect(
        up,
        plane_constant(up, &vertical),
        down,
        plane_constant(down, &vertical),
    )
    .ok_or(MultiViewError::Degenerate)?;

    let eye = Vector3D::new(x, y, z_horizontal.max(z_vertical));
    let rearmost = positions
        .iter()
        .map(|p| p.z)
        .fold(f32::NEG_INFINITY, f32::max);
    debug!(
        "Merged {} views ({}) into {:?} at {:?}",
        views.len(),
        arrangement,
        bound,
        eye
    );
    Ok(SharedView {
        pose: Pose::new(orientation, orientation.transform_vector3d(eye)),
        fov: bound,
        z_offset: eye.z - rearmost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(rotation: Rotation3D<f32, Native, Native>, x: f32, fov: Fov) -> ViewLocation {
        ViewLocation {
            pose: Pose::new(rotation, Vector3D::new(x, 0., 0.)),
            fov,
        }
    }

    fn stereo() -> Vec<ViewLocation> {
        let fov = Fov::new(-0.6, 0.6, 0.5, -0.5);
        vec![
            view(Rotation3D::identity(), -0.032, fov),
            view(Rotation3D::identity(), 0.032, fov),
        ]
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn single_view_is_its_own_shared_view() {
        let single = view(
            Rotation3D::around_y(Angle::radians(0.4)),
            0.5,
            Fov::new(-0.7, 0.5, 0.6, -0.4),
        );
        let mut multiview = MultiView::new();
        multiview.load_views(&[single]);
        let shared = multiview.shared_view().unwrap();
        assert_eq!(shared.pose, single.pose);
        assert_eq!(shared.fov, single.fov);
        assert_eq!(shared.z_offset, 0.);
    }

    #[test]
    fn symmetric_stereo_merges_to_the_midline() {
        let mut multiview = MultiView::new();
        multiview.load_views(&stereo());
        let shared = multiview.shared_view().unwrap();

        assert!(close(shared.pose.translation.x, 0.));
        assert!(close(shared.pose.translation.y, 0.));
        assert_eq!(shared.fov, Fov::new(-0.6, 0.6, 0.5, -0.5));
        // The plane solve puts the merged eye behind both views (+Z), just far
        // enough back for both frustums to fit.
        let depth = 0.032 / 0.6f32.tan();
        assert!(close(shared.pose.translation.z, depth), "{:?}", shared);
        assert!(close(shared.z_offset, depth));
    }

    #[test]
    fn outlying_view_stays_inside_the_shared_frustum() {
        let fov = Fov::new(-0.5, 0.5, 0.4, -0.4);
        let mut multiview = MultiView::new();
        multiview.load_views(&[
            view(Rotation3D::identity(), -0.03, fov),
            view(Rotation3D::identity(), 0.03, fov),
            view(Rotation3D::identity(), 1.5, fov),
        ]);
        let shared = multiview.shared_view().unwrap();
        for index in 0..3 {
            let offset = multiview.view_offset(index).unwrap().translation;
            assert!(offset.z < 0., "view {} is behind the eye", index);
            let slope = offset.x / -offset.z;
            assert!(slope >= shared.fov.angle_left.tan() - 1e-4);
            assert!(slope <= shared.fov.angle_right.tan() + 1e-4);
        }
    }

    #[test]
    fn canted_views_are_centred_between_their_directions() {
        let fov = Fov::symmetric(0.6, 0.5);
        let mut multiview = MultiView::new();
        multiview.load_views(&[
            view(Rotation3D::around_y(Angle::radians(0.3)), -0.032, fov),
            view(Rotation3D::around_y(Angle::radians(-0.3)), 0.032, fov),
        ]);
        let shared = multiview.shared_view().unwrap();
        let rotation = shared.pose.rotation;
        assert!(rotation.j.abs() < 1e-4, "{:?}", rotation);
        assert!(close(rotation.r.abs(), 1.));
        assert!(close(shared.fov.angle_left, -0.9));
        assert!(close(shared.fov.angle_right, 0.9));
        assert!(close(shared.fov.angle_up, 0.5));
    }

    #[test]
    fn pitched_views_are_refused() {
        let fov = Fov::symmetric(0.6, 0.5);
        let mut multiview = MultiView::new();
        multiview.load_views(&[
            view(Rotation3D::identity(), -0.032, fov),
            view(Rotation3D::around_x(Angle::radians(0.2)), 0.032, fov),
        ]);
        match multiview.shared_view() {
            Err(MultiViewError::Unsupported(arrangement)) => {
                assert!(arrangement.pitched);
                assert!(!arrangement.rotated);
            }
            other => panic!("expected an unsupported arrangement, got {:?}", other),
        }
        assert!(multiview.view_offset(0).is_none());
    }

    #[test]
    fn half_turn_spans_are_refused() {
        let fov = Fov::symmetric(0.6, 0.5);
        let mut multiview = MultiView::new();
        multiview.load_views(&[
            view(Rotation3D::around_y(Angle::radians(1.2)), 0., fov),
            view(Rotation3D::around_y(Angle::radians(-1.2)), 0., fov),
        ]);
        let err = multiview.shared_view().unwrap_err();
        assert!(matches!(
            err,
            MultiViewError::Unsupported(Arrangement {
                horizontal_180: true,
                ..
            })
        ));
        assert!(err.to_string().contains("horizontal span"));
    }

    #[test]
    fn no_views_and_zero_width_fail() {
        let mut multiview = MultiView::new();
        assert_eq!(multiview.shared_view(), Err(MultiViewError::NoViews));

        let flat = Fov::new(0.2, 0.2, 0.5, -0.5);
        multiview.load_views(&[
            view(Rotation3D::identity(), -0.032, flat),
            view(Rotation3D::identity(), 0.032, flat),
        ]);
        assert_eq!(multiview.shared_view(), Err(MultiViewError::Degenerate));
    }

    #[test]
    fn shared_view_is_computed_once_per_load() {
        let mut multiview = MultiView::new();
        multiview.load_views(&stereo());
        let first = multiview.shared_view().unwrap();
        let second = multiview.shared_view().unwrap();
        assert_eq!(first, second);
        assert_eq!(multiview.computations, 1);

        multiview.load_views(&stereo());
        multiview.shared_view().unwrap();
        assert_eq!(multiview.computations, 2);
    }

    #[test]
    fn view_offsets_undo_the_shared_pose() {
        let mut multiview = MultiView::new();
        let views = stereo();
        multiview.load_views(&views);
        let shared = multiview.shared_view().unwrap();
        for (index, view) in views.iter().enumerate() {
            let offset = multiview.view_offset(index).unwrap();
            let back = util::compose(&offset, &shared.pose);
            assert!(close(back.translation.x, view.pose.translation.x));
            assert!(close(back.translation.z, view.pose.translation.z));
        }
    }

    #[test]
    fn shared_projection_moves_the_clip_planes_back() {
        let mut multiview = MultiView::new();
        multiview.load_views(&stereo());
        let shared = multiview.shared_view().unwrap();
        let clip = ClipPlanes::new(0.1, 100.);
        let projection = shared.projection(clip);
        let near = 0.1 + shared.z_offset;
        let far = 100. + shared.z_offset;
        assert!(close(projection.m43, -2. * far * near / (far - near)));
    }
}
