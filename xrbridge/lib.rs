/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This crate drives an XR runtime from a two-stage render pipeline: session
//! lifecycle, in-flight frames, recenterable reference spaces and merged
//! multi-view frustums, over the runtimes in its backend modules.

mod frame;
mod frame_store;
mod managed_space;
mod multiview;
mod paths;
mod session;
mod space;
mod state;

#[cfg(any(test, feature = "headless"))]
pub mod headless;

#[cfg(feature = "openxr-api")]
pub mod openxr;

pub use frame::Frame;
pub use frame::FrameStamp;
pub use frame::FrameState;

pub use frame_store::FrameSource;
pub use frame_store::FrameStore;

pub use managed_space::ManagedSpace;

pub use multiview::Arrangement;
pub use multiview::MultiView;
pub use multiview::MultiViewError;
pub use multiview::SharedView;

pub use paths::PathCache;

pub use session::XrSession;

pub use space::Space;

pub use state::XrState;
