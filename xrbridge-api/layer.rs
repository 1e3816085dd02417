/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Composition layers, as submitted at the end of a frame.

use crate::Fov;
use crate::Native;
use crate::Pose;
use crate::SpaceHandle;

use euclid::Rect;
use euclid::Size2D;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// Pixels of a swapchain image, from (0, 0) to (w, h).
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum Viewport {}

/// Identifies a runtime swapchain owned by the graphics integration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct SwapchainId(pub u64);

#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainId,
    pub image_rect: Rect<i32, Viewport>,
    pub image_array_index: u32,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
    pub blend_texture_source_alpha: bool,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct QuadLayer {
    pub space: SpaceHandle,
    pub pose: Pose,
    pub size: Size2D<f32, Native>,
    pub swapchain: SwapchainId,
    pub image_rect: Rect<i32, Viewport>,
}

/// The runtime-facing form of a layer.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum NativeLayer {
    Projection(ProjectionLayer),
    Quad(QuadLayer),
}

/// Anything that can be submitted to the compositor. Frames hold these
/// in submission order and hand them to the runtime untouched.
pub trait CompositionLayer: 'static + Send + Sync {
    fn to_native(&self) -> NativeLayer;
}

impl CompositionLayer for NativeLayer {
    fn to_native(&self) -> NativeLayer {
        self.clone()
    }
}
