/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A runtime session over OpenXR, using the `XR_MND_headless` binding so
//! no graphics API is needed. Images are not submitted: frames carry no
//! layers to the compositor.

use euclid::Rotation3D;
use euclid::Vector3D;

use log::{info, warn};

use openxr as xr;

use parking_lot::Mutex;

use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use xrbridge_api::CompositionLayer;
use xrbridge_api::EnvironmentBlendMode;
use xrbridge_api::Error;
use xrbridge_api::FormFactor;
use xrbridge_api::Fov;
use xrbridge_api::FrameTiming;
use xrbridge_api::Location;
use xrbridge_api::LocationFlags;
use xrbridge_api::PathHandle;
use xrbridge_api::Pose;
use xrbridge_api::ReferenceSpaceChange;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::RuntimeEvent;
use xrbridge_api::RuntimeSession;
use xrbridge_api::SessionState;
use xrbridge_api::Settings;
use xrbridge_api::SpaceHandle;
use xrbridge_api::Time;
use xrbridge_api::ViewConfiguration;
use xrbridge_api::ViewLocation;
use xrbridge_api::ViewLocations;

/// The `XR_MND_headless` binding: a session with no graphics API behind it,
/// so it can neither create swapchains nor submit images.
pub enum Headless {}

impl xr::Graphics for Headless {
    type Requirements = ();
    type SessionCreateInfo = ();
    type Format = i64;
    type SwapchainImage = ();

    fn raise_format(format: i64) -> i64 {
        format
    }

    fn lower_format(format: i64) -> i64 {
        format
    }

    fn requirements(_: &xr::Instance, _: xr::SystemId) -> xr::Result<()> {
        Ok(())
    }

    unsafe fn create_session(
        instance: &xr::Instance,
        system: xr::SystemId,
        _: &(),
    ) -> xr::Result<xr::sys::Session> {
        let info = xr::sys::SessionCreateInfo {
            ty: xr::sys::SessionCreateInfo::TYPE,
            next: ptr::null(),
            create_flags: Default::default(),
            system_id: system,
        };
        let mut session = xr::sys::Session::NULL;
        let result = (instance.fp().create_session)(instance.as_raw(), &info, &mut session);
        if result.into_raw() < 0 {
            return Err(result);
        }
        Ok(session)
    }

    fn enumerate_swapchain_images(_: &xr::Swapchain<Self>) -> xr::Result<Vec<()>> {
        Err(xr::sys::Result::ERROR_FUNCTION_UNSUPPORTED)
    }
}

struct Spaces {
    next: u64,
    live: HashMap<SpaceHandle, xr::Space>,
}

pub struct OpenXrRuntime {
    instance: xr::Instance,
    session: xr::Session<Headless>,
    frame_waiter: Mutex<xr::FrameWaiter>,
    frame_stream: Mutex<xr::FrameStream<Headless>>,
    view_configuration: Mutex<xr::ViewConfigurationType>,
    spaces: Mutex<Spaces>,
}

fn create_instance(settings: &Settings) -> Result<xr::Instance, Error> {
    let entry = unsafe { xr::Entry::load() }
        .map_err(|err| Error::BackendSpecific(format!("failed to load OpenXR loader: {}", err)))?;
    let available = entry.enumerate_extensions().map_err(error)?;
    if !available.mnd_headless {
        return Err(Error::Unsupported("XR_MND_headless".into()));
    }
    let app_info = xr::ApplicationInfo {
        application_name: &settings.app_name,
        application_version: settings.app_version,
        engine_name: "xrbridge",
        engine_version: 1,
    };
    let mut extensions = xr::ExtensionSet::default();
    extensions.mnd_headless = true;
    extensions.khr_visibility_mask = available.khr_visibility_mask;
    entry
        .create_instance(&app_info, &extensions, &[])
        .map_err(error)
}

impl OpenXrRuntime {
    pub fn new(settings: &Settings) -> Result<OpenXrRuntime, Error> {
        settings.validate()?;
        let instance = create_instance(settings)?;
        let form_factor = match settings.form_factor {
            FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
            FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
        };
        let system = instance.system(form_factor).map_err(|err| match err {
            xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE => Error::NoMatchingDevice,
            err => error(err),
        })?;
        let properties = instance.properties().map_err(error)?;
        info!(
            "OpenXR runtime {} {}",
            properties.runtime_name, properties.runtime_version
        );
        let (session, frame_waiter, frame_stream) = unsafe {
            instance
                .create_session::<Headless>(system, &())
                .map_err(error)?
        };
        Ok(OpenXrRuntime {
            instance,
            session,
            frame_waiter: Mutex::new(frame_waiter),
            frame_stream: Mutex::new(frame_stream),
            view_configuration: Mutex::new(xr::ViewConfigurationType::PRIMARY_STEREO),
            spaces: Mutex::new(Spaces {
                next: 1,
                live: HashMap::new(),
            }),
        })
    }
}

fn error(err: xr::sys::Result) -> Error {
    match err {
        xr::sys::Result::ERROR_SESSION_LOST => Error::SessionLost,
        xr::sys::Result::ERROR_INSTANCE_LOST => Error::InstanceLost,
        xr::sys::Result::ERROR_HANDLE_INVALID => Error::InvalidHandle,
        xr::sys::Result::ERROR_SESSION_NOT_RUNNING => Error::SessionNotRunning,
        xr::sys::Result::ERROR_CALL_ORDER_INVALID => Error::FrameNotBegun,
        xr::sys::Result::ERROR_FUNCTION_UNSUPPORTED
        | xr::sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED
        | xr::sys::Result::ERROR_REFERENCE_SPACE_UNSUPPORTED
        | xr::sys::Result::ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED => {
            Error::Unsupported(format!("{:?}", err))
        }
        err => Error::BackendSpecific(format!("{:?}", err)),
    }
}

fn pose(pose: &xr::Posef) -> Pose {
    let rotation = Rotation3D::quaternion(
        pose.orientation.x,
        pose.orientation.y,
        pose.orientation.z,
        pose.orientation.w,
    );
    let translation = Vector3D::new(pose.position.x, pose.position.y, pose.position.z);
    Pose::new(rotation, translation)
}

fn posef(pose: &Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.rotation.i,
            y: pose.rotation.j,
            z: pose.rotation.k,
            w: pose.rotation.r,
        },
        position: xr::Vector3f {
            x: pose.translation.x,
            y: pose.translation.y,
            z: pose.translation.z,
        },
    }
}

fn fov(fov: &xr::Fovf) -> Fov {
    Fov::new(fov.angle_left, fov.angle_right, fov.angle_up, fov.angle_down)
}

fn xr_time(time: Time) -> xr::Time {
    xr::Time::from_nanos(time.as_nanos())
}

fn time(time: xr::Time) -> Time {
    Time::from_nanos(time.as_nanos())
}

fn space_flags(flags: xr::SpaceLocationFlags) -> LocationFlags {
    LocationFlags {
        orientation_valid: flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
        orientation_tracked: flags.contains(xr::SpaceLocationFlags::ORIENTATION_TRACKED),
        position_valid: flags.contains(xr::SpaceLocationFlags::POSITION_VALID),
        position_tracked: flags.contains(xr::SpaceLocationFlags::POSITION_TRACKED),
    }
}

fn view_flags(flags: xr::ViewStateFlags) -> LocationFlags {
    LocationFlags {
        orientation_valid: flags.contains(xr::ViewStateFlags::ORIENTATION_VALID),
        orientation_tracked: flags.contains(xr::ViewStateFlags::ORIENTATION_TRACKED),
        position_valid: flags.contains(xr::ViewStateFlags::POSITION_VALID),
        position_tracked: flags.contains(xr::ViewStateFlags::POSITION_TRACKED),
    }
}

fn space_type(space_type: ReferenceSpaceType) -> xr::ReferenceSpaceType {
    match space_type {
        ReferenceSpaceType::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceType::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceType::Stage => xr::ReferenceSpaceType::STAGE,
    }
}

fn from_space_type(space_type: xr::ReferenceSpaceType) -> Option<ReferenceSpaceType> {
    match space_type {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceType::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceType::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceType::Stage),
        _ => None,
    }
}

fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn blend_mode(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
    }
}

impl RuntimeSession for OpenXrRuntime {
    fn begin_session(&self, view_configuration: ViewConfiguration) -> Result<(), Error> {
        let view_configuration = match view_configuration {
            ViewConfiguration::Mono => xr::ViewConfigurationType::PRIMARY_MONO,
            ViewConfiguration::Stereo => xr::ViewConfigurationType::PRIMARY_STEREO,
            ViewConfiguration::Quad => {
                return Err(Error::Unsupported("quad views need XR_VARJO_quad_views".into()))
            }
        };
        self.session.begin(view_configuration).map_err(error)?;
        *self.view_configuration.lock() = view_configuration;
        Ok(())
    }

    fn end_session(&self) -> Result<(), Error> {
        self.session.end().map(|_| ()).map_err(error)
    }

    fn request_exit(&self) -> Result<(), Error> {
        self.session.request_exit().map_err(error)
    }

    fn wait_frame(&self) -> Result<FrameTiming, Error> {
        let state = self.frame_waiter.lock().wait().map_err(error)?;
        Ok(FrameTiming {
            predicted_display_time: time(state.predicted_display_time),
            predicted_display_period: Duration::from_nanos(
                state.predicted_display_period.as_nanos().max(0) as u64,
            ),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&self) -> Result<(), Error> {
        self.frame_stream.lock().begin().map_err(error)
    }

    fn end_frame(
        &self,
        display_time: Time,
        mode: EnvironmentBlendMode,
        layers: &[Arc<dyn CompositionLayer>],
    ) -> Result<(), Error> {
        if !layers.is_empty() {
            warn!("Dropping {} layers, the headless binding has no swapchains", layers.len());
        }
        self.frame_stream
            .lock()
            .end(xr_time(display_time), blend_mode(mode), &[])
            .map_err(error)
    }

    fn locate_views(&self, at: Time, base: SpaceHandle) -> Result<ViewLocations, Error> {
        let spaces = self.spaces.lock();
        let base = spaces.live.get(&base).ok_or(Error::InvalidHandle)?;
        let view_configuration = *self.view_configuration.lock();
        let (flags, views) = self
            .session
            .locate_views(view_configuration, xr_time(at), base)
            .map_err(error)?;
        Ok(ViewLocations {
            flags: view_flags(flags),
            views: views
                .iter()
                .map(|view| ViewLocation {
                    pose: pose(&view.pose),
                    fov: fov(&view.fov),
                })
                .collect(),
        })
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        at: Time,
    ) -> Result<Location, Error> {
        let spaces = self.spaces.lock();
        let space = spaces.live.get(&space).ok_or(Error::InvalidHandle)?;
        let base = spaces.live.get(&base).ok_or(Error::InvalidHandle)?;
        let location = space.locate(base, xr_time(at)).map_err(error)?;
        Ok(Location::new(
            space_flags(location.location_flags),
            pose(&location.pose),
        ))
    }

    fn create_reference_space(
        &self,
        reference: ReferenceSpaceType,
        pose_in_reference: Pose,
    ) -> Result<SpaceHandle, Error> {
        let space = self
            .session
            .create_reference_space(space_type(reference), posef(&pose_in_reference))
            .map_err(error)?;
        let mut spaces = self.spaces.lock();
        let handle = SpaceHandle(spaces.next);
        spaces.next += 1;
        spaces.live.insert(handle, space);
        Ok(handle)
    }

    fn destroy_space(&self, space: SpaceHandle) {
        if self.spaces.lock().live.remove(&space).is_none() {
            warn!("Destroying unknown space {:?}", space);
        }
    }

    fn poll_event(&self) -> Result<Option<RuntimeEvent>, Error> {
        let mut buffer = xr::EventDataBuffer::new();
        loop {
            let event = match self.instance.poll_event(&mut buffer).map_err(error)? {
                Some(event) => event,
                None => return Ok(None),
            };
            let event = match event {
                xr::Event::SessionStateChanged(event) => RuntimeEvent::SessionStateChanged {
                    state: session_state(event.state()),
                    time: time(event.time()),
                },
                xr::Event::ReferenceSpaceChangePending(event) => {
                    let space_type = match from_space_type(event.reference_space_type()) {
                        Some(space_type) => space_type,
                        None => continue,
                    };
                    RuntimeEvent::ReferenceSpaceChangePending(ReferenceSpaceChange {
                        space_type,
                        change_time: time(event.change_time()),
                        pose_valid: event.pose_valid(),
                        pose_in_previous_space: pose(&event.pose_in_previous_space()),
                    })
                }
                xr::Event::VisibilityMaskChangedKHR(event) => RuntimeEvent::VisibilityMaskChanged {
                    view_index: event.view_index(),
                },
                xr::Event::InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
                xr::Event::InstanceLossPending(event) => RuntimeEvent::InstanceLossPending {
                    loss_time: time(event.loss_time()),
                },
                xr::Event::EventsLost(event) => RuntimeEvent::EventsLost {
                    count: event.lost_event_count(),
                },
                // Events from extensions this backend never enables.
                _ => continue,
            };
            return Ok(Some(event));
        }
    }

    fn string_to_path(&self, path: &str) -> Result<PathHandle, Error> {
        let path = self.instance.string_to_path(path).map_err(error)?;
        Ok(PathHandle(path.into_raw()))
    }
}
