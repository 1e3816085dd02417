/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// Errors that can be produced by XR runtimes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum Error {
    NoMatchingDevice,
    CommunicationError,
    /// The runtime session was lost and must be recreated.
    SessionLost,
    /// The runtime instance is going away; everything built on it must be torn down.
    InstanceLost,
    InvalidHandle,
    SessionNotRunning,
    FrameNotBegun,
    Unsupported(String),
    BackendSpecific(String),
}

impl Error {
    /// Whether this error ends the session it was raised on.
    pub fn is_terminal(&self) -> bool {
        matches!(*self, Error::SessionLost | Error::InstanceLost)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::NoMatchingDevice => write!(f, "no matching XR device"),
            Error::CommunicationError => write!(f, "communication with the runtime failed"),
            Error::SessionLost => write!(f, "session lost"),
            Error::InstanceLost => write!(f, "instance lost"),
            Error::InvalidHandle => write!(f, "invalid handle"),
            Error::SessionNotRunning => write!(f, "session not running"),
            Error::FrameNotBegun => write!(f, "frame was not begun"),
            Error::Unsupported(ref what) => write!(f, "unsupported: {}", what),
            Error::BackendSpecific(ref msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}
