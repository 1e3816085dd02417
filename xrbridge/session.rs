/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::frame::Frame;
use crate::frame::FrameStamp;
use crate::frame_store::FrameSource;
use crate::frame_store::FrameStore;
use crate::managed_space::ManagedSpace;
use crate::space::Space;

use log::{debug, error, info, warn};

use parking_lot::Mutex;

use std::sync::Arc;

use xrbridge_api::Error;
use xrbridge_api::Location;
use xrbridge_api::Pose;
use xrbridge_api::ReferenceSpaceChange;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::RuntimeSession;
use xrbridge_api::SessionState;
use xrbridge_api::Settings;
use xrbridge_api::Time;

#[derive(Default)]
struct Status {
    state: SessionState,
    running: bool,
    exit_requested: bool,
    /// Why the session or its instance was lost, once it has been.
    lost: Option<Error>,
}

/// The part of the integration shared between the update and render threads.
///
/// Lock order: the frame store's lock may be held while taking the status
/// or local space locks, never the other way round.
pub struct XrSession {
    runtime: Arc<dyn RuntimeSession>,
    settings: Settings,
    status: Mutex<Status>,
    frames: FrameStore,
    local_space: Mutex<ManagedSpace>,
    view_space: Space,
    /// Display times of frames ended since the last update.
    retired: Mutex<Vec<Time>>,
}

impl XrSession {
    pub fn new(runtime: Arc<dyn RuntimeSession>, settings: Settings) -> Result<XrSession, Error> {
        settings.validate()?;
        let local_space = ManagedSpace::new(&runtime, settings.reference_space)?;
        let view_space = Space::reference(&runtime, ReferenceSpaceType::View, None)?;
        Ok(XrSession {
            frames: FrameStore::new(settings.frame_capacity),
            local_space: Mutex::new(local_space),
            view_space,
            status: Mutex::new(Status::default()),
            retired: Mutex::new(vec![]),
            runtime,
            settings,
        })
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeSession> {
        &self.runtime
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.status.lock().running
    }

    pub fn is_visible(&self) -> bool {
        self.state().is_visible()
    }

    pub fn is_focused(&self) -> bool {
        self.state() == SessionState::Focused
    }

    /// Whether frames are worth rendering at all.
    pub fn should_render(&self) -> bool {
        let status = self.status.lock();
        status.running && status.state.is_visible()
    }

    pub fn is_lost(&self) -> bool {
        self.status.lock().lost.is_some()
    }

    /// The error the session was lost to, if it was.
    pub fn loss(&self) -> Option<Error> {
        self.status.lock().lost.clone()
    }

    pub fn exit_requested(&self) -> bool {
        self.status.lock().exit_requested
    }

    /// Follow the runtime to `state`, beginning or ending the runtime
    /// session as it asks.
    pub fn handle_state_change(&self, state: SessionState) -> Result<(), Error> {
        let previous = {
            let mut status = self.status.lock();
            std::mem::replace(&mut status.state, state)
        };
        info!("Session state {:?} -> {:?}", previous, state);
        match state {
            SessionState::Ready => {
                self.runtime
                    .begin_session(self.settings.view_configuration)
                    .map_err(|err| {
                        warn!("begin_session failed: {}", err);
                        err
                    })?;
                self.status.lock().running = true;
            }
            SessionState::Stopping => {
                self.status.lock().running = false;
                self.frames.kill_all();
                self.runtime.end_session().map_err(|err| {
                    warn!("end_session failed: {}", err);
                    err
                })?;
            }
            SessionState::LossPending => {
                self.tear_down(Error::SessionLost);
                return Err(Error::SessionLost);
            }
            state if state.is_terminal() => {
                self.status.lock().running = false;
                self.frames.kill_all();
            }
            _ => {}
        }
        Ok(())
    }

    /// Stop everything after the session or its instance was lost. The
    /// first loss reported is the one kept.
    pub fn tear_down(&self, err: Error) {
        {
            let mut status = self.status.lock();
            status.running = false;
            if status.lost.is_none() {
                status.lost = Some(err);
            }
        }
        self.frames.kill_all();
    }

    /// Tear down if a runtime call failed because the session is gone.
    fn check_loss(&self, op: &str, err: Error) {
        if err.is_terminal() {
            error!("{} lost the session: {}", op, err);
            self.tear_down(err);
        }
    }

    pub fn request_exit(&self) -> Result<(), Error> {
        self.status.lock().exit_requested = true;
        self.runtime.request_exit().map_err(|err| {
            warn!("request_exit failed: {}", err);
            err
        })
    }

    pub fn get_frame(&self, stamp: FrameStamp) -> Option<Arc<Frame>> {
        self.frames.get_frame(stamp)
    }

    /// The frame for `stamp`, waiting on the runtime for it if it is new.
    pub fn get_or_wait_frame(&self, stamp: FrameStamp) -> Option<Arc<Frame>> {
        self.frames.get_frame_or_wait(stamp, self)
    }

    pub fn begin_frame(&self, stamp: FrameStamp) -> bool {
        match self.frames.get_frame(stamp) {
            Some(frame) => match frame.begin() {
                Ok(()) => true,
                Err(err) => {
                    self.check_loss("begin_frame", err);
                    false
                }
            },
            None => {
                warn!("Beginning {:?}, which is not in flight", stamp);
                false
            }
        }
    }

    /// Submit the frame for `stamp`. Its display time is kept so the update
    /// thread can retire the local spaces it has superseded.
    pub fn end_frame(&self, stamp: FrameStamp) -> bool {
        let time = self.frames.get_frame(stamp).map(|frame| frame.time());
        let ended = self.frames.end_frame(stamp).unwrap_or_else(|err| {
            self.check_loss("end_frame", err);
            false
        });
        if let Some(time) = time {
            self.retired.lock().push(time);
        }
        ended
    }

    pub fn kill_frame(&self, stamp: FrameStamp) -> bool {
        self.frames.kill_frame(stamp)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Feed the display times of ended frames to the local space.
    pub fn retire_frames(&self) {
        let latest = self.retired.lock().drain(..).max();
        if let Some(time) = latest {
            self.local_space.lock().end_frame(time);
        }
    }

    pub fn recenter(&self, change_time: Time, pose_in_previous_space: &Pose) -> bool {
        self.local_space
            .lock()
            .recenter(change_time, pose_in_previous_space)
    }

    pub fn on_change_pending(&self, change: &ReferenceSpaceChange) -> bool {
        self.local_space.lock().on_change_pending(change)
    }

    /// The local space in effect at `time`.
    pub fn local_space(&self, time: Time) -> Arc<Space> {
        self.local_space.lock().space(time).clone()
    }

    /// How many local spaces are queued.
    pub fn local_spaces(&self) -> usize {
        self.local_space.lock().len()
    }

    /// The viewer, relative to the local space of `frame`.
    pub fn locate_viewer(&self, frame: &Frame) -> Location {
        self.view_space.locate(frame.base_space(), frame.time())
    }

    /// Any space, relative to the local space of `frame`.
    pub fn locate(&self, space: &Space, frame: &Frame) -> Location {
        space.locate(frame.base_space(), frame.time())
    }
}

impl FrameSource for XrSession {
    fn wait_frame(&self, stamp: FrameStamp) -> Option<Frame> {
        if !self.is_running() {
            debug!("Not waiting for {:?}, session is not running", stamp);
            return None;
        }
        let timing = match self.runtime.wait_frame() {
            Ok(timing) => timing,
            Err(err) => {
                warn!("wait_frame failed: {}", err);
                self.check_loss("wait_frame", err);
                return None;
            }
        };
        let base = self.local_space(timing.predicted_display_time);
        Some(Frame::new(
            self.runtime.clone(),
            stamp,
            timing,
            self.settings.blend_mode,
            base,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessRuntime;
    use euclid::Vector3D;
    use xrbridge_api::MockCall;
    use xrbridge_api::MockRuntimeInit;
    use xrbridge_api::MockRuntimeMsg;
    use xrbridge_api::MockViewInit;
    use xrbridge_api::Fov;
    use xrbridge_api::Sender;

    fn session() -> (Arc<HeadlessRuntime>, XrSession, Sender<MockRuntimeMsg>) {
        let (sender, receiver) = xrbridge_api::channel();
        let init = MockRuntimeInit {
            viewer_origin: Pose::from_translation(Vector3D::new(0., 1.6, 0.)),
            views: vec![MockViewInit {
                transform: Pose::identity(),
                fov: Fov::symmetric(0.7, 0.6),
            }],
            ..MockRuntimeInit::default()
        };
        let headless = Arc::new(HeadlessRuntime::new(init, receiver));
        let settings = Settings::default()
            .with_view_configuration(xrbridge_api::ViewConfiguration::Mono);
        let session = XrSession::new(headless.clone(), settings).unwrap();
        (headless, session, sender)
    }

    #[test]
    fn frames_wait_only_while_running() {
        let (headless, session, _sender) = session();
        assert!(session.get_or_wait_frame(FrameStamp(1)).is_none());
        assert_eq!(headless.stats().waits, 0);

        session.handle_state_change(SessionState::Ready).unwrap();
        assert!(session.is_running());
        assert!(!session.should_render());
        session.handle_state_change(SessionState::Focused).unwrap();
        assert!(session.should_render());
        assert!(session.is_focused());

        let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();
        assert!(session.begin_frame(FrameStamp(1)));
        assert!(session.end_frame(FrameStamp(1)));
        assert_eq!(headless.stats().submitted[0].display_time, frame.time());
        assert_eq!(session.frames_in_flight(), 0);
    }

    #[test]
    fn stopping_kills_frames_and_ends_the_session() {
        let (headless, session, _sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();

        session.request_exit().unwrap();
        assert!(session.exit_requested());
        session.handle_state_change(SessionState::Stopping).unwrap();
        assert!(!session.is_running());
        assert_eq!(session.frames_in_flight(), 0);
        assert_eq!(frame.state(), crate::frame::FrameState::Killed);
        assert!(session.get_or_wait_frame(FrameStamp(2)).is_none());
        assert!(headless.stats().submitted.is_empty());
    }

    #[test]
    fn exiting_drops_frames_without_a_loss() {
        let (_headless, session, _sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();

        session.handle_state_change(SessionState::Exiting).unwrap();
        assert!(!session.is_running());
        assert!(!session.is_lost());
        assert_eq!(frame.state(), crate::frame::FrameState::Killed);
        assert_eq!(session.frames_in_flight(), 0);
    }

    #[test]
    fn loss_pending_tears_down() {
        let (_headless, session, _sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        session.get_or_wait_frame(FrameStamp(1)).unwrap();
        assert_eq!(
            session.handle_state_change(SessionState::LossPending),
            Err(Error::SessionLost)
        );
        assert!(session.is_lost());
        assert!(!session.is_running());
        assert_eq!(session.frames_in_flight(), 0);
    }

    #[test]
    fn losing_the_session_at_submission_tears_down() {
        let (_headless, session, sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        session.get_or_wait_frame(FrameStamp(1)).unwrap();
        let _ = sender.send(MockRuntimeMsg::FailNext(MockCall::EndFrame, Error::SessionLost));

        assert!(!session.end_frame(FrameStamp(1)));
        assert!(session.is_lost());
        assert_eq!(session.loss(), Some(Error::SessionLost));
        assert!(!session.is_running());
        assert!(session.get_or_wait_frame(FrameStamp(2)).is_none());
    }

    #[test]
    fn losing_the_instance_in_a_wait_tears_down() {
        let (_headless, session, sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        let _ = sender.send(MockRuntimeMsg::FailNext(MockCall::WaitFrame, Error::InstanceLost));

        assert!(session.get_or_wait_frame(FrameStamp(1)).is_none());
        assert_eq!(session.loss(), Some(Error::InstanceLost));
        assert_eq!(session.frames_in_flight(), 0);
    }

    #[test]
    fn recoverable_frame_errors_keep_the_session() {
        let (_headless, session, sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        session.get_or_wait_frame(FrameStamp(1)).unwrap();
        let _ = sender.send(MockRuntimeMsg::FailNext(
            MockCall::EndFrame,
            Error::BackendSpecific("compositor hiccup".into()),
        ));

        assert!(!session.end_frame(FrameStamp(1)));
        assert!(!session.is_lost());
        assert!(session.get_or_wait_frame(FrameStamp(2)).is_some());
    }

    #[test]
    fn viewer_is_located_in_the_frame_local_space() {
        let (_headless, session, _sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();
        let viewer = session.locate_viewer(&frame);
        assert!(viewer.is_valid());
        assert!((viewer.pose.translation.y - 1.6).abs() < 1e-6);

        // A recenter one meter up applies from its change time on.
        let later = frame.time() + frame.period();
        assert!(session.recenter(later, &Pose::from_translation(Vector3D::new(0., 1., 0.))));
        let viewer = session.locate_viewer(&frame);
        assert!((viewer.pose.translation.y - 1.6).abs() < 1e-6);
        session.end_frame(FrameStamp(1));

        let next = session.get_or_wait_frame(FrameStamp(2)).unwrap();
        assert_eq!(next.time(), later);
        let viewer = session.locate_viewer(&next);
        assert!((viewer.pose.translation.y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn retiring_frames_drops_superseded_spaces() {
        let (_headless, session, _sender) = session();
        session.handle_state_change(SessionState::Ready).unwrap();
        let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();
        assert!(session.recenter(frame.time(), &Pose::identity()));
        assert_eq!(session.local_spaces(), 2);

        session.retire_frames();
        assert_eq!(session.local_spaces(), 2);
        session.end_frame(FrameStamp(1));
        session.retire_frames();
        assert_eq!(session.local_spaces(), 1);
    }
}
