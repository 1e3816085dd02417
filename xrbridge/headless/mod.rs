/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A simulated runtime, driven by `MockRuntimeMsg`s, for running the
//! integration core without a headset.

use log::{debug, warn};

use parking_lot::{Condvar, Mutex};

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use xrbridge_api::util;
use xrbridge_api::CompositionLayer;
use xrbridge_api::EnvironmentBlendMode;
use xrbridge_api::Error;
use xrbridge_api::FrameTiming;
use xrbridge_api::Location;
use xrbridge_api::LocationFlags;
use xrbridge_api::MockCall;
use xrbridge_api::MockRuntimeInit;
use xrbridge_api::MockRuntimeMsg;
use xrbridge_api::MockViewInit;
use xrbridge_api::NativeLayer;
use xrbridge_api::PathHandle;
use xrbridge_api::Pose;
use xrbridge_api::Receiver;
use xrbridge_api::ReferenceSpaceChange;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::RuntimeEvent;
use xrbridge_api::RuntimeSession;
use xrbridge_api::SessionState;
use xrbridge_api::SpaceHandle;
use xrbridge_api::Time;
use xrbridge_api::ViewConfiguration;
use xrbridge_api::ViewLocation;
use xrbridge_api::ViewLocations;

/// A frame the headless compositor was handed.
#[derive(Clone, Debug)]
pub struct SubmittedFrame {
    pub display_time: Time,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<NativeLayer>,
}

/// Counts of the calls made into the headless runtime.
#[derive(Clone, Debug, Default)]
pub struct HeadlessStats {
    pub waits: usize,
    pub begins: usize,
    pub ends: usize,
    pub locate_views: usize,
    pub locate_space: usize,
    pub path_lookups: usize,
    pub submitted: Vec<SubmittedFrame>,
}

struct HeadlessSpace {
    space_type: ReferenceSpaceType,
    pose_in_reference: Pose,
}

struct HeadlessData {
    time: Time,
    init: MockRuntimeInit,
    state: SessionState,
    running: bool,
    exit_requested: bool,
    /// Definitions of each reference space's origin in the tracking frame,
    /// with the time each takes effect.
    origins: HashMap<ReferenceSpaceType, Vec<(Time, Pose)>>,
    spaces: HashMap<SpaceHandle, HeadlessSpace>,
    next_space: u64,
    events: VecDeque<RuntimeEvent>,
    /// Frames handed out by `wait_frame`, and how many of them were begun.
    frames_waited: u64,
    frames_begun: u64,
    failures: Vec<(MockCall, Error)>,
    paths: HashMap<String, PathHandle>,
    stats: HeadlessStats,
}

/// Like a real compositor, a frame wait is held until the previously
/// waited frame has been begun.
pub struct HeadlessRuntime {
    data: Mutex<HeadlessData>,
    begun: Condvar,
    receiver: Receiver<MockRuntimeMsg>,
}

impl HeadlessRuntime {
    pub fn new(init: MockRuntimeInit, receiver: Receiver<MockRuntimeMsg>) -> HeadlessRuntime {
        let mut origins = HashMap::new();
        origins.insert(ReferenceSpaceType::Local, vec![(Time::default(), Pose::identity())]);
        origins.insert(ReferenceSpaceType::Stage, vec![(Time::default(), Pose::identity())]);
        let mut data = HeadlessData {
            time: init.start_time,
            init,
            state: SessionState::Unknown,
            running: false,
            exit_requested: false,
            origins,
            spaces: HashMap::new(),
            next_space: 1,
            events: VecDeque::new(),
            frames_waited: 0,
            frames_begun: 0,
            failures: vec![],
            paths: HashMap::new(),
            stats: HeadlessStats::default(),
        };
        data.push_state(SessionState::Idle);
        data.push_state(SessionState::Ready);
        HeadlessRuntime {
            data: Mutex::new(data),
            begun: Condvar::new(),
            receiver,
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        self.data.lock().stats.clone()
    }

    pub fn live_spaces(&self) -> usize {
        self.data.lock().spaces.len()
    }

    /// The display time of the most recently waited frame.
    pub fn time(&self) -> Time {
        self.data.lock().time
    }

    fn lock(&self) -> parking_lot::MutexGuard<'_, HeadlessData> {
        let mut data = self.data.lock();
        while let Ok(msg) = self.receiver.try_recv() {
            data.handle_msg(msg);
        }
        data
    }
}

impl HeadlessData {
    fn handle_msg(&mut self, msg: MockRuntimeMsg) {
        debug!("Headless runtime handling {:?}", msg);
        match msg {
            MockRuntimeMsg::SetViewerOrigin(origin) => self.init.viewer_origin = origin,
            MockRuntimeMsg::SetViews(views) => self.init.views = views,
            MockRuntimeMsg::SetTracking(flags) => self.init.tracking = flags,
            MockRuntimeMsg::SetSessionState(state) => self.push_state(state),
            MockRuntimeMsg::Recenter {
                space_type,
                pose_in_previous_space,
                delay,
            } => {
                let change_time = self.time + delay;
                let origins = self.origins.entry(space_type).or_default();
                let previous = origins.last().map_or_else(Pose::identity, |(_, pose)| *pose);
                origins.push((change_time, util::compose(&pose_in_previous_space, &previous)));
                self.events
                    .push_back(RuntimeEvent::ReferenceSpaceChangePending(ReferenceSpaceChange {
                        space_type,
                        change_time,
                        pose_valid: true,
                        pose_in_previous_space,
                    }));
            }
            MockRuntimeMsg::ChangeVisibilityMask(view_index) => self
                .events
                .push_back(RuntimeEvent::VisibilityMaskChanged { view_index }),
            MockRuntimeMsg::ChangeInteractionProfile => self
                .events
                .push_back(RuntimeEvent::InteractionProfileChanged),
            MockRuntimeMsg::LoseInstance => self.events.push_back(RuntimeEvent::InstanceLossPending {
                loss_time: self.time,
            }),
            MockRuntimeMsg::LoseEvents => {
                let count = self.events.len() as u32;
                self.events.clear();
                self.events.push_back(RuntimeEvent::EventsLost { count });
            }
            MockRuntimeMsg::FailNext(call, error) => self.failures.push((call, error)),
        }
    }

    fn push_state(&mut self, state: SessionState) {
        self.state = state;
        self.events.push_back(RuntimeEvent::SessionStateChanged {
            state,
            time: self.time,
        });
    }

    fn take_failure(&mut self, call: MockCall) -> Result<(), Error> {
        match self.failures.iter().position(|(failing, _)| *failing == call) {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.running {
            Ok(())
        } else {
            Err(Error::SessionNotRunning)
        }
    }

    fn origin(&self, space_type: ReferenceSpaceType, time: Time) -> Pose {
        if space_type == ReferenceSpaceType::View {
            return self.init.viewer_origin;
        }
        self.origins
            .get(&space_type)
            .and_then(|origins| origins.iter().rev().find(|(from, _)| *from <= time))
            .map_or_else(Pose::identity, |(_, pose)| *pose)
    }

    /// The pose of a space in the tracking frame.
    fn pose(&self, handle: SpaceHandle, time: Time) -> Result<(ReferenceSpaceType, Pose), Error> {
        let space = self.spaces.get(&handle).ok_or(Error::InvalidHandle)?;
        let origin = self.origin(space.space_type, time);
        Ok((space.space_type, util::compose(&space.pose_in_reference, &origin)))
    }

    /// Anything involving the viewer is only as good as the tracking.
    fn flags(&self, types: &[ReferenceSpaceType]) -> LocationFlags {
        if types.contains(&ReferenceSpaceType::View) {
            self.init.tracking
        } else {
            LocationFlags::ALL
        }
    }
}

fn view_location(view: &MockViewInit, viewer: &Pose, base: &Pose) -> ViewLocation {
    let in_tracking = util::compose(&view.transform, viewer);
    ViewLocation {
        pose: util::compose(&in_tracking, &base.inverse()),
        fov: view.fov,
    }
}

impl RuntimeSession for HeadlessRuntime {
    fn begin_session(&self, view_configuration: ViewConfiguration) -> Result<(), Error> {
        let mut data = self.lock();
        if data.state != SessionState::Ready {
            return Err(Error::BackendSpecific(format!(
                "cannot begin a session in {:?}",
                data.state
            )));
        }
        if data.init.views.len() != view_configuration.view_count() {
            warn!(
                "Headless runtime has {} views for {:?}",
                data.init.views.len(),
                view_configuration
            );
        }
        data.running = true;
        data.frames_begun = data.frames_waited;
        data.push_state(SessionState::Synchronized);
        data.push_state(SessionState::Visible);
        data.push_state(SessionState::Focused);
        Ok(())
    }

    fn end_session(&self) -> Result<(), Error> {
        let mut data = self.lock();
        if data.state != SessionState::Stopping {
            return Err(Error::BackendSpecific(format!(
                "cannot end a session in {:?}",
                data.state
            )));
        }
        data.running = false;
        self.begun.notify_all();
        data.push_state(SessionState::Idle);
        if data.exit_requested {
            data.push_state(SessionState::Exiting);
        }
        Ok(())
    }

    fn request_exit(&self) -> Result<(), Error> {
        let mut data = self.lock();
        data.check_running()?;
        data.exit_requested = true;
        data.push_state(SessionState::Stopping);
        Ok(())
    }

    fn wait_frame(&self) -> Result<FrameTiming, Error> {
        let (timing, pacing) = {
            let mut data = self.lock();
            data.stats.waits += 1;
            data.take_failure(MockCall::WaitFrame)?;
            let deadline = Instant::now() + data.init.wait_timeout;
            while data.running && data.frames_begun < data.frames_waited {
                if self.begun.wait_until(&mut data, deadline).timed_out() {
                    warn!("Frame {} was never begun", data.frames_waited);
                    return Err(Error::BackendSpecific(
                        "timed out waiting for the previous frame to begin".into(),
                    ));
                }
            }
            data.check_running()?;
            data.frames_waited += 1;
            data.time = data.time + data.init.frame_period;
            let timing = FrameTiming {
                predicted_display_time: data.time,
                predicted_display_period: data.init.frame_period,
                should_render: data.state.is_visible(),
            };
            (timing, data.init.pacing)
        };
        if let Some(pacing) = pacing {
            thread::sleep(pacing);
        }
        Ok(timing)
    }

    fn begin_frame(&self) -> Result<(), Error> {
        let mut data = self.lock();
        data.stats.begins += 1;
        data.take_failure(MockCall::BeginFrame)?;
        data.check_running()?;
        data.frames_begun = data.frames_waited;
        self.begun.notify_all();
        Ok(())
    }

    fn end_frame(
        &self,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        layers: &[Arc<dyn CompositionLayer>],
    ) -> Result<(), Error> {
        let mut data = self.lock();
        data.stats.ends += 1;
        data.take_failure(MockCall::EndFrame)?;
        data.check_running()?;
        data.stats.submitted.push(SubmittedFrame {
            display_time,
            blend_mode,
            layers: layers.iter().map(|layer| layer.to_native()).collect(),
        });
        Ok(())
    }

    fn locate_views(&self, time: Time, base: SpaceHandle) -> Result<ViewLocations, Error> {
        let mut data = self.lock();
        data.stats.locate_views += 1;
        data.take_failure(MockCall::LocateViews)?;
        let (base_type, base_pose) = data.pose(base, time)?;
        let viewer = data.init.viewer_origin;
        Ok(ViewLocations {
            flags: data.flags(&[ReferenceSpaceType::View, base_type]),
            views: data
                .init
                .views
                .iter()
                .map(|view| view_location(view, &viewer, &base_pose))
                .collect(),
        })
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: Time,
    ) -> Result<Location, Error> {
        let mut data = self.lock();
        data.stats.locate_space += 1;
        data.take_failure(MockCall::LocateSpace)?;
        let (space_type, space_pose) = data.pose(space, time)?;
        let (base_type, base_pose) = data.pose(base, time)?;
        Ok(Location::new(
            data.flags(&[space_type, base_type]),
            util::compose(&space_pose, &base_pose.inverse()),
        ))
    }

    fn create_reference_space(
        &self,
        space_type: ReferenceSpaceType,
        pose_in_reference: Pose,
    ) -> Result<SpaceHandle, Error> {
        let mut data = self.lock();
        data.take_failure(MockCall::CreateSpace)?;
        let handle = SpaceHandle(data.next_space);
        data.next_space += 1;
        data.spaces.insert(
            handle,
            HeadlessSpace {
                space_type,
                pose_in_reference,
            },
        );
        Ok(handle)
    }

    fn destroy_space(&self, space: SpaceHandle) {
        if self.lock().spaces.remove(&space).is_none() {
            warn!("Destroying unknown space {:?}", space);
        }
    }

    fn poll_event(&self) -> Result<Option<RuntimeEvent>, Error> {
        Ok(self.lock().events.pop_front())
    }

    fn string_to_path(&self, path: &str) -> Result<PathHandle, Error> {
        let mut data = self.lock();
        data.stats.path_lookups += 1;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(Error::BackendSpecific(format!("invalid path {:?}", path)));
        }
        let next = PathHandle(data.paths.len() as u64 + 1);
        Ok(*data.paths.entry(path.to_owned()).or_insert(next))
    }
}
