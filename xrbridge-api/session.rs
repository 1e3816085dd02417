/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// The lifecycle states a runtime drives a session through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum SessionState {
    Unknown,
    Idle,
    /// The runtime wants the session begun.
    Ready,
    /// Frames are being waited on but nothing is displayed yet.
    Synchronized,
    Visible,
    Focused,
    /// The runtime wants the session ended.
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    /// Whether submitted frames can reach the display.
    pub fn is_visible(self) -> bool {
        matches!(self, SessionState::Visible | SessionState::Focused)
    }

    /// Once in one of these states the session never comes back.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::LossPending | SessionState::Exiting)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Unknown
    }
}

/// How the compositor blends submitted imagery with the real world.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum EnvironmentBlendMode {
    Opaque,
    AlphaBlend,
    Additive,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

/// The arrangement of views a session renders.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum ViewConfiguration {
    Mono,
    Stereo,
    /// Stereo plus a higher resolution inset per eye.
    Quad,
}

impl ViewConfiguration {
    pub fn view_count(self) -> usize {
        match self {
            ViewConfiguration::Mono => 1,
            ViewConfiguration::Stereo => 2,
            ViewConfiguration::Quad => 4,
        }
    }
}
