/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This crate defines the interface between the xrbridge integration core
//! and an XR runtime. It is implemented by the backends in the `xrbridge` crate.

mod error;
mod events;
mod frame;
mod layer;
mod location;
mod mock;
mod runtime;
mod session;
mod settings;
pub mod util;

pub use error::Error;

pub use events::Event;
pub use events::EventBuffer;
pub use events::EventCallback;
pub use events::ReferenceSpaceChange;
pub use events::RuntimeEvent;

pub use frame::FrameTiming;
pub use frame::Time;

pub use layer::CompositionLayer;
pub use layer::NativeLayer;
pub use layer::ProjectionLayer;
pub use layer::ProjectionView;
pub use layer::QuadLayer;
pub use layer::SwapchainId;
pub use layer::Viewport;

pub use location::Fov;
pub use location::Location;
pub use location::LocationFlags;
pub use location::Native;
pub use location::Pose;
pub use location::ViewLocation;
pub use location::ViewLocations;

pub use mock::MockCall;
pub use mock::MockRuntimeInit;
pub use mock::MockRuntimeMsg;
pub use mock::MockViewInit;

pub use runtime::PathHandle;
pub use runtime::ReferenceSpaceType;
pub use runtime::RuntimeSession;
pub use runtime::SpaceHandle;

pub use session::EnvironmentBlendMode;
pub use session::FormFactor;
pub use session::SessionState;
pub use session::ViewConfiguration;

pub use settings::Settings;
pub use settings::DEFAULT_FRAME_CAPACITY;

pub use crossbeam_channel::{unbounded as channel, Receiver, Sender};
