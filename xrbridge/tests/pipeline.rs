/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An update thread and a render thread sharing frames through a session,
//! as a double-buffered renderer drives it.

use euclid::Vector3D;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use xrbridge::headless::HeadlessRuntime;
use xrbridge::FrameStamp;
use xrbridge::XrSession;
use xrbridge::XrState;
use xrbridge_api::Event;
use xrbridge_api::Fov;
use xrbridge_api::MockRuntimeInit;
use xrbridge_api::MockRuntimeMsg;
use xrbridge_api::MockViewInit;
use xrbridge_api::Pose;
use xrbridge_api::ReferenceSpaceType;
use xrbridge_api::Sender;
use xrbridge_api::Settings;

fn start() -> (Arc<HeadlessRuntime>, XrState, Sender<MockRuntimeMsg>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (sender, receiver) = xrbridge_api::channel();
    let eye = |x: f32| MockViewInit {
        transform: Pose::from_translation(Vector3D::new(x, 0., 0.)),
        fov: Fov::symmetric(0.8, 0.7),
    };
    let init = MockRuntimeInit {
        viewer_origin: Pose::from_translation(Vector3D::new(0., 1.6, 0.)),
        views: vec![eye(-0.032), eye(0.032)],
        pacing: Some(Duration::from_millis(1)),
        ..MockRuntimeInit::default()
    };
    let headless = Arc::new(HeadlessRuntime::new(init, receiver));
    let mut state = XrState::new(headless.clone(), Settings::default()).unwrap();
    state.update().unwrap();
    assert!(state.session().should_render());
    (headless, state, sender)
}

/// Ends every frame it is handed, one at a time.
fn render_thread(
    session: Arc<XrSession>,
    frames: crossbeam_channel::Receiver<FrameStamp>,
) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut ended = 0;
        for stamp in frames {
            if session.begin_frame(stamp) && session.end_frame(stamp) {
                ended += 1;
            }
        }
        ended
    })
}

#[test]
fn frames_flow_from_update_to_render() {
    let (headless, mut state, _runtime) = start();
    let session = state.session().clone();
    // A rendezvous channel keeps at most one frame on each side.
    let (to_render, frames) = crossbeam_channel::bounded(0);
    let render = render_thread(session.clone(), frames);

    for i in 1..=20 {
        let stamp = FrameStamp(i);
        let frame = session.get_or_wait_frame(stamp).unwrap();
        assert!(session.frames_in_flight() <= 2);
        let shared = state.shared_view(&frame).unwrap();
        assert!(shared.pose.translation.x.abs() < 1e-5);
        assert!((shared.pose.translation.y - 1.6).abs() < 1e-5);
        state.update().unwrap();
        to_render.send(stamp).unwrap();
    }
    drop(to_render);
    assert_eq!(render.join().unwrap(), 20);

    let submitted = headless.stats().submitted;
    assert_eq!(submitted.len(), 20);
    assert!(submitted
        .windows(2)
        .all(|pair| pair[0].display_time < pair[1].display_time));
    assert_eq!(session.frames_in_flight(), 0);
    assert_eq!(headless.stats().locate_views, 20);
}

#[test]
fn runtime_recenter_lands_on_its_change_time() {
    let (_headless, mut state, runtime) = start();
    let (sender, events) = xrbridge_api::channel();
    state.set_event_dest(sender);
    let session = state.session().clone();
    let (to_render, frames) = crossbeam_channel::bounded(0);
    let render = render_thread(session.clone(), frames);

    let _ = runtime.send(MockRuntimeMsg::Recenter {
        space_type: ReferenceSpaceType::Local,
        pose_in_previous_space: Pose::from_translation(Vector3D::new(0., 1., 0.)),
        delay: Duration::from_millis(40),
    });
    state.update().unwrap();
    let change_time = events
        .try_iter()
        .find_map(|event| match event {
            Event::Recentered {
                change_time,
                runtime_initiated: true,
            } => Some(change_time),
            _ => None,
        })
        .unwrap();

    let mut before = 0;
    let mut after = 0;
    for i in 1..=12 {
        let stamp = FrameStamp(i);
        let frame = session.get_or_wait_frame(stamp).unwrap();
        let viewer = session.locate_viewer(&frame);
        assert!(viewer.is_valid());
        if frame.time() < change_time {
            assert!((viewer.pose.translation.y - 1.6).abs() < 1e-5);
            before += 1;
        } else {
            assert!((viewer.pose.translation.y - 0.6).abs() < 1e-5);
            after += 1;
        }
        state.update().unwrap();
        assert!(session.local_spaces() <= 2);
        to_render.send(stamp).unwrap();
    }
    drop(to_render);
    render.join().unwrap();
    state.update().unwrap();

    assert!(before > 0 && after > 0);
    assert_eq!(session.local_spaces(), 1);
}

#[test]
fn exiting_stops_the_pipeline() {
    let (headless, mut state, _runtime) = start();
    let (sender, events) = xrbridge_api::channel();
    state.set_event_dest(sender);
    let session = state.session().clone();

    let frame = session.get_or_wait_frame(FrameStamp(1)).unwrap();
    assert!(session.end_frame(frame.stamp()));
    session.get_or_wait_frame(FrameStamp(2)).unwrap();

    state.request_exit().unwrap();
    state.update().unwrap();
    assert!(!session.is_running());
    assert!(events.try_iter().any(|event| event == Event::SessionEnd));

    // The frame the render thread never got to is gone.
    assert!(!session.end_frame(FrameStamp(2)));
    assert!(session.get_or_wait_frame(FrameStamp(3)).is_none());
    assert_eq!(headless.stats().submitted.len(), 1);
}

#[test]
fn next_wait_is_released_by_the_render_thread_beginning() {
    let (headless, state, _runtime) = start();
    let session = state.session().clone();
    let first = session.get_or_wait_frame(FrameStamp(1)).unwrap();

    let render = {
        let session = session.clone();
        thread::spawn(move || {
            // Let the update thread block on the next frame first.
            thread::sleep(Duration::from_millis(30));
            session.begin_frame(FrameStamp(1)) && session.end_frame(FrameStamp(1))
        })
    };
    let second = session.get_or_wait_frame(FrameStamp(2)).unwrap();
    assert!(second.time() > first.time());
    assert!(headless.stats().begins >= 1);

    assert!(render.join().unwrap());
    assert_eq!(session.frames_in_flight(), 1);
    assert_eq!(headless.stats().submitted.len(), 1);
}
