/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::frame::Frame;
use crate::multiview::MultiView;
use crate::multiview::MultiViewError;
use crate::multiview::SharedView;
use crate::paths::PathCache;
use crate::session::XrSession;

use euclid::default::Transform3D;

use log::{debug, error, warn};

use std::sync::Arc;

use xrbridge_api::util::{self, ClipPlanes};
use xrbridge_api::Error;
use xrbridge_api::Event;
use xrbridge_api::EventBuffer;
use xrbridge_api::EventCallback;
use xrbridge_api::PathHandle;
use xrbridge_api::Pose;
use xrbridge_api::RuntimeEvent;
use xrbridge_api::RuntimeSession;
use xrbridge_api::SessionState;
use xrbridge_api::Settings;
use xrbridge_api::Time;

/// The update thread's handle on an integration instance. It polls the
/// runtime, keeps the session in step with it, and merges each frame's
/// views. The render thread works through `session()`.
pub struct XrState {
    session: Arc<XrSession>,
    events: EventBuffer,
    multiview: MultiView,
    paths: PathCache,
    clip_planes: ClipPlanes,
    lost: Option<Error>,
}

impl XrState {
    pub fn new(runtime: Arc<dyn RuntimeSession>, settings: Settings) -> Result<XrState, Error> {
        let clip_planes = settings.clip_planes;
        let session = XrSession::new(runtime, settings)?;
        Ok(XrState {
            session: Arc::new(session),
            events: EventBuffer::default(),
            multiview: MultiView::new(),
            paths: PathCache::new(),
            clip_planes,
            lost: None,
        })
    }

    pub fn session(&self) -> &Arc<XrSession> {
        &self.session
    }

    /// Deliver application events to `dest`, starting with any buffered so far.
    pub fn set_event_dest<C: EventCallback>(&mut self, dest: C) {
        self.events.upgrade(Box::new(dest))
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    /// Drain the runtime's events, in the order it produced them, and route
    /// each one. Called once per application tick.
    pub fn update(&mut self) -> Result<(), Error> {
        if let Some(ref err) = self.lost {
            return Err(err.clone());
        }
        // Frame calls on either thread may have found the session gone.
        if let Some(err) = self.session.loss() {
            return self.lose(err);
        }
        loop {
            let event = match self.session.runtime().poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    warn!("poll_event failed: {}", err);
                    if err.is_terminal() {
                        return self.lose(err);
                    }
                    break;
                }
            };
            self.handle_event(event)?;
        }
        self.session.retire_frames();
        Ok(())
    }

    fn handle_event(&mut self, event: RuntimeEvent) -> Result<(), Error> {
        debug!("Runtime event {:?}", event);
        match event {
            RuntimeEvent::SessionStateChanged { state, .. } => {
                self.events.callback(Event::SessionStateChanged(state));
                match self.session.handle_state_change(state) {
                    Ok(()) => {}
                    Err(err) if err.is_terminal() => return self.lose(err),
                    Err(err) => warn!("Could not follow the session to {:?}: {}", state, err),
                }
                if state == SessionState::Exiting {
                    self.events.callback(Event::SessionEnd);
                }
            }
            RuntimeEvent::ReferenceSpaceChangePending(change) => {
                if self.session.on_change_pending(&change) {
                    self.events.callback(Event::Recentered {
                        change_time: change.change_time,
                        runtime_initiated: true,
                    });
                }
            }
            RuntimeEvent::VisibilityMaskChanged { view_index } => {
                self.events.callback(Event::VisibilityMaskChanged(view_index))
            }
            RuntimeEvent::InteractionProfileChanged => {
                self.events.callback(Event::InteractionProfileChanged)
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                warn!("Runtime instance will be lost at {:?}", loss_time);
                return self.lose(Error::InstanceLost);
            }
            RuntimeEvent::EventsLost { count } => warn!("{} runtime events were lost", count),
        }
        Ok(())
    }

    fn lose(&mut self, err: Error) -> Result<(), Error> {
        error!("Tearing down the session: {}", err);
        self.session.tear_down(err.clone());
        self.events.callback(match err {
            Error::InstanceLost => Event::InstanceLost,
            _ => Event::SessionLost,
        });
        self.lost = Some(err.clone());
        Err(err)
    }

    /// Move the local space so that `pose_in_previous_space` becomes its
    /// origin from `change_time` on.
    pub fn recenter(&mut self, change_time: Time, pose_in_previous_space: &Pose) -> bool {
        if !self.session.recenter(change_time, pose_in_previous_space) {
            return false;
        }
        self.events.callback(Event::Recentered {
            change_time,
            runtime_initiated: false,
        });
        true
    }

    pub fn request_exit(&self) -> Result<(), Error> {
        self.session.request_exit()
    }

    fn load_frame(&mut self, frame: &Frame) {
        if self.multiview.loaded_stamp() != Some(frame.stamp()) {
            self.multiview.load_frame(frame);
        }
    }

    /// The view bounding every view of `frame`.
    pub fn shared_view(&mut self, frame: &Frame) -> Result<SharedView, MultiViewError> {
        self.load_frame(frame);
        self.multiview.shared_view()
    }

    /// A view of `frame` relative to its shared view.
    pub fn view_offset(&mut self, frame: &Frame, index: usize) -> Option<Pose> {
        self.load_frame(frame);
        self.multiview.view_offset(index)
    }

    pub fn view_projection(&self, frame: &Frame, index: usize) -> Option<Transform3D<f32>> {
        let fov = frame.view_fov(index)?;
        Some(util::fov_to_projection_matrix(&fov, self.clip_planes))
    }

    pub fn shared_projection(&mut self, frame: &Frame) -> Option<Transform3D<f32>> {
        let clip_planes = self.clip_planes;
        self.shared_view(frame)
            .ok()
            .map(|shared| shared.projection(clip_planes))
    }

    pub fn update_clip_planes(&mut self, near: f32, far: f32) {
        self.clip_planes.update(near, far);
    }

    /// Whether the clip planes changed since this was last asked.
    pub fn clip_planes_changed(&mut self) -> bool {
        self.clip_planes.recently_updated()
    }

    pub fn path(&mut self, path: &str) -> Result<PathHandle, Error> {
        self.paths.get(&**self.session.runtime(), path)
    }

    pub fn path_string(&self, handle: PathHandle) -> Option<&str> {
        self.paths.path(handle)
    }
}
