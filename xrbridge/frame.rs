/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::space::Space;

use log::{debug, warn};

use once_cell::sync::OnceCell;

use parking_lot::Mutex;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use std::time::Duration;

use xrbridge_api::CompositionLayer;
use xrbridge_api::EnvironmentBlendMode;
use xrbridge_api::Error;
use xrbridge_api::Fov;
use xrbridge_api::FrameTiming;
use xrbridge_api::LocationFlags;
use xrbridge_api::Pose;
use xrbridge_api::RuntimeSession;
use xrbridge_api::Time;
use xrbridge_api::ViewLocations;

/// The renderer's per-frame stamp, which keys frames between pipeline stages.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct FrameStamp(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum FrameState {
    Created,
    Begun,
    Ended,
    /// Discarded without ever being begun.
    Killed,
}

struct FrameInner {
    state: FrameState,
    layers: Vec<Arc<dyn CompositionLayer>>,
}

/// One compositor frame, from its wait through to its submission.
pub struct Frame {
    runtime: Arc<dyn RuntimeSession>,
    stamp: FrameStamp,
    timing: FrameTiming,
    blend_mode: EnvironmentBlendMode,
    /// The local space in effect at this frame's display time.
    base: Arc<Space>,
    inner: Mutex<FrameInner>,
    views: OnceCell<Option<ViewLocations>>,
}

impl Frame {
    pub fn new(
        runtime: Arc<dyn RuntimeSession>,
        stamp: FrameStamp,
        timing: FrameTiming,
        blend_mode: EnvironmentBlendMode,
        base: Arc<Space>,
    ) -> Frame {
        Frame {
            runtime,
            stamp,
            timing,
            blend_mode,
            base,
            inner: Mutex::new(FrameInner {
                state: FrameState::Created,
                layers: vec![],
            }),
            views: OnceCell::new(),
        }
    }

    pub fn stamp(&self) -> FrameStamp {
        self.stamp
    }

    /// The predicted display time.
    pub fn time(&self) -> Time {
        self.timing.predicted_display_time
    }

    pub fn period(&self) -> Duration {
        self.timing.predicted_display_period
    }

    pub fn should_render(&self) -> bool {
        self.timing.should_render
    }

    pub fn base_space(&self) -> &Arc<Space> {
        &self.base
    }

    pub fn state(&self) -> FrameState {
        self.inner.lock().state
    }

    pub fn begin(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.state {
            FrameState::Created => {}
            FrameState::Begun => return Ok(()),
            FrameState::Ended | FrameState::Killed => return Err(Error::FrameNotBegun),
        }
        self.runtime.begin_frame().map_err(|err| {
            warn!("begin_frame failed: {}", err);
            err
        })?;
        inner.state = FrameState::Begun;
        Ok(())
    }

    /// Queue a layer for submission. Layers are submitted in the order added.
    pub fn add_layer(&self, layer: Arc<dyn CompositionLayer>) {
        self.inner.lock().layers.push(layer);
    }

    pub fn layer_count(&self) -> usize {
        self.inner.lock().layers.len()
    }

    /// Submit the frame. A frame that was never begun is begun first, since
    /// the runtime expects every waited frame to be begun.
    pub fn end(&self) -> Result<(), Error> {
        if self.state() == FrameState::Created {
            debug!("Ending {:?} without an explicit begin", self.stamp);
            self.begin()?;
        }
        let mut inner = self.inner.lock();
        if inner.state != FrameState::Begun {
            return Err(Error::FrameNotBegun);
        }
        // The frame is over whether or not the runtime accepts it.
        inner.state = FrameState::Ended;
        let layers = std::mem::take(&mut inner.layers);
        self.runtime
            .end_frame(self.time(), self.blend_mode, &layers)
            .map_err(|err| {
                warn!("end_frame failed: {}", err);
                err
            })
    }

    /// Discard the frame without submitting it. Only unbegun frames can be killed.
    ///
    /// The runtime holds the next frame wait until this frame is begun, so it
    /// is begun and never ended; the runtime drops it at the next begin.
    pub fn kill(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != FrameState::Created {
                return false;
            }
            inner.state = FrameState::Killed;
            inner.layers.clear();
        }
        if let Err(err) = self.runtime.begin_frame() {
            debug!("Could not release killed {:?}: {}", self.stamp, err);
        }
        true
    }

    /// Every view of the frame, located in the frame's base space. The runtime
    /// is asked once per frame, on first use.
    pub fn views(&self) -> Option<&ViewLocations> {
        self.views
            .get_or_init(|| {
                match self
                    .runtime
                    .locate_views(self.time(), self.base.handle())
                {
                    Ok(views) => Some(views),
                    Err(err) => {
                        warn!("locate_views failed: {}", err);
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn view_count(&self) -> usize {
        self.views().map_or(0, ViewLocations::len)
    }

    pub fn view_flags(&self) -> LocationFlags {
        self.views().map_or(LocationFlags::NONE, |views| views.flags)
    }

    pub fn is_orientation_valid(&self) -> bool {
        self.view_flags().orientation_valid
    }

    pub fn is_position_valid(&self) -> bool {
        self.view_flags().position_valid
    }

    pub fn is_orientation_tracked(&self) -> bool {
        self.view_flags().orientation_tracked
    }

    pub fn is_position_tracked(&self) -> bool {
        self.view_flags().position_tracked
    }

    /// The pose of a view, if the runtime could place it this frame.
    pub fn view_pose(&self, index: usize) -> Option<Pose> {
        let views = self.views()?;
        if !views.flags.is_valid() {
            return None;
        }
        views.views.get(index).map(|view| view.pose)
    }

    pub fn view_fov(&self, index: usize) -> Option<Fov> {
        self.views()?.views.get(index).map(|view| view.fov)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("stamp", &self.stamp)
            .field("timing", &self.timing)
            .field("state", &self.state())
            .finish()
    }
}
