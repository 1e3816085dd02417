/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::Pose;
use crate::ReferenceSpaceType;
use crate::Sender;
use crate::SessionState;
use crate::Time;

use log::debug;

#[cfg(feature = "ipc")]
use serde::{Deserialize, Serialize};

/// The runtime is about to redefine one of its reference spaces.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub struct ReferenceSpaceChange {
    pub space_type: ReferenceSpaceType,
    /// When the new definition takes effect.
    pub change_time: Time,
    pub pose_valid: bool,
    /// The new origin expressed in the old one, when `pose_valid`.
    pub pose_in_previous_space: Pose,
}

/// Events polled from the runtime, in the order it produced them.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum RuntimeEvent {
    SessionStateChanged { state: SessionState, time: Time },
    ReferenceSpaceChangePending(ReferenceSpaceChange),
    VisibilityMaskChanged { view_index: u32 },
    InteractionProfileChanged,
    InstanceLossPending { loss_time: Time },
    EventsLost { count: u32 },
}

/// Events surfaced to the application.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "ipc", derive(Serialize, Deserialize))]
pub enum Event {
    SessionStateChanged(SessionState),
    /// The local space moves at `change_time`.
    Recentered {
        change_time: Time,
        runtime_initiated: bool,
    },
    /// The hidden-area mesh for a view must be fetched again.
    VisibilityMaskChanged(u32),
    InteractionProfileChanged,
    /// Session ended by the runtime
    SessionEnd,
    SessionLost,
    InstanceLost,
}

pub trait EventCallback: 'static + Send {
    fn callback(&mut self, event: Event);
}

impl EventCallback for Sender<Event> {
    fn callback(&mut self, event: Event) {
        let _ = self.send(event);
    }
}

/// Convenience structure for buffering up events
/// when no event callback has been set
pub enum EventBuffer {
    Buffered(Vec<Event>),
    Sink(Box<dyn EventCallback>),
}

impl Default for EventBuffer {
    fn default() -> Self {
        EventBuffer::Buffered(vec![])
    }
}

impl EventBuffer {
    pub fn callback(&mut self, event: Event) {
        match *self {
            EventBuffer::Buffered(ref mut events) => events.push(event),
            EventBuffer::Sink(ref mut sink) => sink.callback(event),
        }
    }

    pub fn upgrade(&mut self, mut sink: Box<dyn EventCallback>) {
        if let EventBuffer::Buffered(ref mut events) = *self {
            debug!("Flushing {} buffered events", events.len());
            for event in events.drain(..) {
                sink.callback(event)
            }
        }
        *self = EventBuffer::Sink(sink)
    }
}
