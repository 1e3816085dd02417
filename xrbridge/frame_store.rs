/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::frame::Frame;
use crate::frame::FrameStamp;

use log::{debug, error, warn};

use parking_lot::{Condvar, Mutex, MutexGuard};

use std::sync::Arc;

use xrbridge_api::Error;

/// Something that can block until the runtime hands out the next frame.
pub trait FrameSource {
    fn wait_frame(&self, stamp: FrameStamp) -> Option<Frame>;
}

enum Slot {
    /// Reserved by a caller that is waiting on the runtime for this stamp.
    Waiting(FrameStamp),
    Ready(Arc<Frame>),
}

impl Slot {
    fn stamp(&self) -> FrameStamp {
        match *self {
            Slot::Waiting(stamp) => stamp,
            Slot::Ready(ref frame) => frame.stamp(),
        }
    }
}

/// The frames currently in flight, keyed by the stamp of the application
/// frame that asked for them.
///
/// The render pipeline is double buffered, so one frame may be prepared
/// while the previous one is still being submitted. Running out of slots
/// means a stage is holding on to a frame it should have ended or killed.
///
/// Runtimes hold a frame wait until the previous frame is begun, so the
/// lock is never held across a wait: the waiting caller reserves its slot,
/// and others asking for the same stamp sleep on `waited` until it is filled.
pub struct FrameStore {
    slots: Mutex<Vec<Option<Slot>>>,
    waited: Condvar,
}

impl FrameStore {
    pub fn new(capacity: usize) -> FrameStore {
        FrameStore {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            waited: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// The number of frames in flight, including those still being waited for.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_frame(&self, stamp: FrameStamp) -> Option<Arc<Frame>> {
        match find(&self.slots.lock(), stamp) {
            Some(Slot::Ready(frame)) => Some(frame.clone()),
            _ => None,
        }
    }

    /// Look up the frame for `stamp`, waiting on `source` for a new one if
    /// there is none yet. A caller asking for a stamp that is already being
    /// waited for sleeps until that wait is over and shares its frame.
    pub fn get_frame_or_wait(
        &self,
        stamp: FrameStamp,
        source: &dyn FrameSource,
    ) -> Option<Arc<Frame>> {
        let mut slots = self.slots.lock();
        loop {
            match find(&slots, stamp) {
                Some(Slot::Ready(frame)) => return Some(frame.clone()),
                Some(Slot::Waiting(_)) => self.waited.wait(&mut slots),
                None => break,
            }
        }
        let free = match slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                error!(
                    "No free slot for {:?}, frames in flight: {:?}",
                    stamp,
                    slots.iter().flatten().map(Slot::stamp).collect::<Vec<_>>()
                );
                debug_assert!(false, "too many frames in flight");
                return None;
            }
        };
        slots[free] = Some(Slot::Waiting(stamp));
        let waited = MutexGuard::unlocked(&mut slots, || source.wait_frame(stamp).map(Arc::new));

        // The reservation is gone if the frames were killed during the wait.
        let slot = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(Slot::Waiting(waiting)) if *waiting == stamp));
        let result = match (slot, waited) {
            (Some(slot), Some(frame)) => {
                debug!("Frame {:?} in slot {} for {:?}", frame.time(), free, stamp);
                *slot = Some(Slot::Ready(frame.clone()));
                Some(frame)
            }
            (Some(slot), None) => {
                *slot = None;
                None
            }
            (None, Some(frame)) => {
                debug!("Killing {:?}, its slot was cleared during the wait", stamp);
                frame.kill();
                None
            }
            (None, None) => None,
        };
        self.waited.notify_all();
        result
    }

    /// Submit the frame for `stamp` and free its slot. Returns `Ok(false)`
    /// if there was no such frame, and the runtime's error if it refused it.
    pub fn end_frame(&self, stamp: FrameStamp) -> Result<bool, Error> {
        // The runtime call happens outside the lock.
        let frame = match self.take(stamp) {
            Some(frame) => frame,
            None => {
                warn!("Ending {:?}, which is not in flight", stamp);
                return Ok(false);
            }
        };
        frame.end().map(|()| true)
    }

    /// Free the slot for `stamp` without submitting its frame.
    pub fn kill_frame(&self, stamp: FrameStamp) -> bool {
        match self.take(stamp) {
            Some(frame) => {
                if !frame.kill() {
                    warn!("Dropping {:?} after it was begun", stamp);
                }
                true
            }
            None => false,
        }
    }

    /// Free every slot, killing the frames that were never begun. Frames
    /// still being waited for are killed once their wait returns.
    pub fn kill_all(&self) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        self.waited.notify_all();
        for slot in slots {
            if let Slot::Ready(frame) = slot {
                debug!("Killing {:?}", frame.stamp());
                frame.kill();
            }
        }
    }

    fn take(&self, stamp: FrameStamp) -> Option<Arc<Frame>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(Slot::Ready(frame)) if frame.stamp() == stamp))?;
        match slot.take() {
            Some(Slot::Ready(frame)) => Some(frame),
            _ => None,
        }
    }
}

fn find(slots: &[Option<Slot>], stamp: FrameStamp) -> Option<&Slot> {
    slots.iter().flatten().find(|slot| slot.stamp() == stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameState;
    use crate::headless::HeadlessRuntime;
    use crate::space::Space;
    use std::thread;
    use std::time::Duration;
    use xrbridge_api::EnvironmentBlendMode;
    use xrbridge_api::MockRuntimeInit;
    use xrbridge_api::ReferenceSpaceType;
    use xrbridge_api::RuntimeSession;
    use xrbridge_api::ViewConfiguration;

    struct Source {
        headless: Arc<HeadlessRuntime>,
        runtime: Arc<dyn RuntimeSession>,
        base: Arc<Space>,
    }

    impl FrameSource for Source {
        fn wait_frame(&self, stamp: FrameStamp) -> Option<Frame> {
            let timing = self.runtime.wait_frame().ok()?;
            Some(Frame::new(
                self.runtime.clone(),
                stamp,
                timing,
                EnvironmentBlendMode::Opaque,
                self.base.clone(),
            ))
        }
    }

    fn source(pacing: Option<Duration>) -> Source {
        let (_sender, receiver) = xrbridge_api::channel();
        let init = MockRuntimeInit {
            pacing,
            ..MockRuntimeInit::default()
        };
        let headless = Arc::new(HeadlessRuntime::new(init, receiver));
        headless.begin_session(ViewConfiguration::Mono).unwrap();
        let runtime: Arc<dyn RuntimeSession> = headless.clone();
        let base =
            Arc::new(Space::reference(&runtime, ReferenceSpaceType::Local, None).unwrap());
        Source {
            headless,
            runtime,
            base,
        }
    }

    #[test]
    fn lookup_returns_the_waited_frame() {
        let source = source(None);
        let store = FrameStore::new(2);
        assert!(store.get_frame(FrameStamp(1)).is_none());

        let waited = store.get_frame_or_wait(FrameStamp(1), &source).unwrap();
        let found = store.get_frame(FrameStamp(1)).unwrap();
        assert!(Arc::ptr_eq(&waited, &found));
        let again = store.get_frame_or_wait(FrameStamp(1), &source).unwrap();
        assert!(Arc::ptr_eq(&waited, &again));
        assert_eq!(source.headless.stats().waits, 1);

        assert_eq!(store.end_frame(FrameStamp(1)), Ok(true));
        assert!(store.get_frame(FrameStamp(1)).is_none());
        assert_eq!(waited.state(), FrameState::Ended);
        assert!(store.is_empty());
    }

    #[test]
    fn ending_an_unknown_stamp_fails() {
        let store = FrameStore::new(2);
        assert_eq!(store.end_frame(FrameStamp(9)), Ok(false));
        assert!(!store.kill_frame(FrameStamp(9)));
    }

    #[test]
    fn two_frames_may_be_in_flight() {
        let source = source(None);
        let store = FrameStore::new(2);
        let first = store.get_frame_or_wait(FrameStamp(1), &source).unwrap();
        first.begin().unwrap();
        let second = store.get_frame_or_wait(FrameStamp(2), &source).unwrap();
        assert!(second.time() > first.time());
        assert_eq!(store.len(), 2);

        assert_eq!(store.end_frame(FrameStamp(1)), Ok(true));
        second.begin().unwrap();
        assert!(store.get_frame_or_wait(FrameStamp(3), &source).is_some());
        assert_eq!(source.headless.stats().submitted.len(), 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "too many frames in flight"))]
    fn third_frame_in_flight_is_refused() {
        let source = source(None);
        let store = FrameStore::new(2);
        store
            .get_frame_or_wait(FrameStamp(1), &source)
            .unwrap()
            .begin()
            .unwrap();
        assert!(store.get_frame_or_wait(FrameStamp(2), &source).is_some());
        assert!(store.get_frame_or_wait(FrameStamp(3), &source).is_none());
        assert_eq!(source.headless.stats().waits, 2);
    }

    #[test]
    fn killed_frames_are_not_submitted() {
        let source = source(None);
        let store = FrameStore::new(2);
        let frame = store.get_frame_or_wait(FrameStamp(1), &source).unwrap();
        assert!(store.kill_frame(FrameStamp(1)));
        assert_eq!(frame.state(), FrameState::Killed);
        assert!(store.is_empty());

        // Killing frame 1 released the runtime for the next wait.
        let second = store.get_frame_or_wait(FrameStamp(2), &source).unwrap();
        second.begin().unwrap();
        let third = store.get_frame_or_wait(FrameStamp(3), &source).unwrap();
        store.kill_all();
        assert!(store.is_empty());
        assert_eq!(third.state(), FrameState::Killed);
        assert!(source.headless.stats().submitted.is_empty());
        assert!(store.get_frame_or_wait(FrameStamp(4), &source).is_some());
    }

    #[test]
    fn next_wait_does_not_block_beginning_the_previous_frame() {
        let source = Arc::new(source(None));
        let store = Arc::new(FrameStore::new(2));
        store.get_frame_or_wait(FrameStamp(1), &*source).unwrap();

        let next = {
            let source = source.clone();
            let store = store.clone();
            thread::spawn(move || store.get_frame_or_wait(FrameStamp(2), &*source).is_some())
        };
        while store.len() < 2 {
            thread::yield_now();
        }
        // The slot table stays usable while frame 2 is being waited for.
        assert_eq!(store.len(), 2);
        assert!(store.get_frame(FrameStamp(2)).is_none());
        let first = store.get_frame(FrameStamp(1)).unwrap();
        first.begin().unwrap();
        assert_eq!(store.end_frame(FrameStamp(1)), Ok(true));

        assert!(next.join().unwrap());
        assert!(store.get_frame(FrameStamp(2)).is_some());
        assert_eq!(source.headless.stats().submitted.len(), 1);
    }

    #[test]
    fn frames_killed_during_a_wait_are_released() {
        let source = Arc::new(source(None));
        let store = Arc::new(FrameStore::new(2));
        store.get_frame_or_wait(FrameStamp(1), &*source).unwrap();

        let next = {
            let source = source.clone();
            let store = store.clone();
            thread::spawn(move || store.get_frame_or_wait(FrameStamp(2), &*source))
        };
        while store.len() < 2 {
            thread::yield_now();
        }
        store.kill_all();

        assert!(next.join().unwrap().is_none());
        assert!(store.is_empty());
        assert!(store.get_frame_or_wait(FrameStamp(3), &*source).is_some());
        assert!(source.headless.stats().submitted.is_empty());
    }

    #[test]
    fn concurrent_waits_for_one_stamp_wait_once() {
        let source = Arc::new(source(Some(Duration::from_millis(20))));
        let store = Arc::new(FrameStore::new(2));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let source = source.clone();
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .get_frame_or_wait(FrameStamp(1), &*source)
                        .map(|frame| frame.time())
                })
            })
            .collect();
        let times: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(times[0].is_some());
        assert_eq!(times[0], times[1]);
        assert_eq!(source.headless.stats().waits, 1);
        assert_eq!(store.len(), 1);
    }
}
