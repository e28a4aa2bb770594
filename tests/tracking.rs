mod common;

use common::*;
use cv_core::nalgebra::IsometryMatrix3;
use cv_tracking::{
    PointMap, Tracker, TrackingError, TrackingEvent, TrackingReport, TrackingSettings,
    TrackingState, TransformResolver, TransformTree,
};
use std::cell::{Cell, RefCell};
use std::time::Duration;

const EPSILON: f64 = 1e-6;

type TestTracker<T> = Tracker<PassThrough, T, PointMap, Vec<TrackingReport>>;

fn tracker<T: TransformResolver>(resolver: T) -> TestTracker<T> {
    let _ = pretty_env_logger::try_init();
    Tracker::new(
        TrackingSettings::default(),
        PassThrough::default(),
        resolver,
        PointMap::new(),
        vec![],
    )
}

fn tracked(event: TrackingEvent) -> TrackingReport {
    match event {
        TrackingEvent::Tracked(report) => report,
        TrackingEvent::Initialized => panic!("expected a tracked cycle"),
    }
}

/// Fails a fixed number of lookups before answering from the tree.
struct Unreliable {
    failures: Cell<usize>,
    tree: TransformTree,
}

impl TransformResolver for Unreliable {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<IsometryMatrix3<f64>, TrackingError> {
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return TransformTree::new().lookup(target, source, timeout);
        }
        self.tree.lookup(target, source, timeout)
    }
}

/// Remembers the timeout of every lookup it answers.
struct Recording {
    timeouts: RefCell<Vec<Duration>>,
    tree: TransformTree,
}

impl TransformResolver for Recording {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<IsometryMatrix3<f64>, TrackingError> {
        self.timeouts.borrow_mut().push(timeout);
        self.tree.lookup(target, source, timeout)
    }
}

#[test]
fn bootstrap_track_and_replace() {
    let scene = Scene::new(120, 7);
    let mut tracker = tracker(transform_tree());

    // The first input only seeds the fixed frame.
    let p0 = pose(0.0, 0.0, 0.0, 0.0);
    let event = tracker.process(&scene.input(p0, 0..60)).unwrap();
    assert_eq!(event, TrackingEvent::Initialized);
    assert_eq!(tracker.state(), TrackingState::Initializing);
    assert!(tracker.publisher().is_empty());
    assert!(tracker.map().is_empty());
    let fixed = tracker.fixed_frame().unwrap();
    assert_eq!(fixed.len(), 60);
    assert_pose_eq(&fixed.odometry_pose(), &p0, EPSILON);

    // The map learns the camera mount and calibration during initialization.
    assert_pose_eq(
        tracker.map().camera_to_odom.as_ref().unwrap(),
        &mount().inverse(),
        EPSILON,
    );
    assert_eq!(
        tracker.map().camera_matrix,
        Some(scene.camera.camera_matrix())
    );

    // 40 shared landmarks are enough to finish bootstrapping. The map grows from the
    // original fixed frame, which stays in place.
    let p1 = pose(0.3, -0.1, 0.5, 0.05);
    let report = tracked(tracker.process(&scene.input(p1, (20..60).chain(60..80))).unwrap());
    assert_eq!(report.cycle, 1);
    assert_eq!(report.state, TrackingState::Working);
    assert_eq!(tracker.state(), TrackingState::Working);
    assert!(report.correspondences >= 40);
    assert_eq!(report.inliers, 40);
    assert!(!report.used_warm_start);
    assert!(!report.fixed_frame_replaced);
    assert!(report.map_grown);
    assert_pose_eq(&report.motion.unwrap().0, &p1, EPSILON);
    assert_pose_eq(&report.pose.unwrap(), &p1, EPSILON);
    assert_pose_eq(&report.odometry_pose, &p1, EPSILON);
    assert_eq!(tracker.map().len(), 60);
    assert_eq!(tracker.map().insertions, 1);
    assert_eq!(tracker.fixed_frame().unwrap().len(), 60);
    assert!(!tracker.reset_fixed_frame());

    // Only 5 landmarks survive, so the current frame replaces the fixed frame.
    let p2 = pose(0.6, -0.2, 1.0, 0.1);
    let input2 = scene.input(p2, (55..60).chain(80..120));
    let report = tracked(tracker.process(&input2).unwrap());
    assert_eq!(report.cycle, 2);
    assert_eq!(report.state, TrackingState::Working);
    assert!(report.correspondences < 30);
    assert_eq!(report.inliers, 0);
    assert_eq!(report.motion, None);
    assert_eq!(report.pose, None);
    assert!(report.fixed_frame_replaced);
    assert!(report.map_grown);
    assert!(tracker.reset_fixed_frame());
    assert_eq!(tracker.map().len(), 60 + 45);
    assert_eq!(tracker.map().insertions, 2);

    let fixed = tracker.fixed_frame().unwrap();
    assert_eq!(fixed.len(), 45);
    assert_eq!(fixed.descriptors(), input2.images.descriptors());
    assert_eq!(fixed.inliers(), 0);
    assert_eq!(fixed.world_points().len(), 45);
    assert_pose_eq(&fixed.odometry_pose(), &p2, EPSILON);

    // Right after a replacement the solve starts cold.
    let p3 = pose(0.8, -0.2, 1.3, 0.12);
    let report = tracked(tracker.process(&scene.input(p3, 80..120)).unwrap());
    assert_eq!(report.inliers, 40);
    assert!(!report.used_warm_start);
    assert!(!report.fixed_frame_replaced);
    assert!(!report.map_grown);
    assert_pose_eq(&report.motion.unwrap().0, &(p2.inverse() * p3), EPSILON);
    assert_pose_eq(&report.pose.unwrap(), &p3, EPSILON);
    assert!(!tracker.reset_fixed_frame());

    // Afterwards the previous estimate seeds the solve again.
    let p4 = pose(0.9, -0.2, 1.5, 0.13);
    let report = tracked(tracker.process(&scene.input(p4, 85..120)).unwrap());
    assert_eq!(report.inliers, 35);
    assert!(report.used_warm_start);
    assert_pose_eq(&report.pose.unwrap(), &p4, EPSILON);

    assert_eq!(tracker.publisher().len(), 4);
    assert_eq!(tracker.latest_report(), tracker.publisher().last());
    assert_eq!(
        tracker
            .publisher()
            .iter()
            .map(|report| report.cycle)
            .collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
}

#[test]
fn poor_bootstrap_restarts_from_current_frame() {
    let scene = Scene::new(100, 3);
    let mut tracker = tracker(transform_tree());
    tracker
        .process(&scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..50))
        .unwrap();

    // Nothing in common with the fixed frame.
    let p1 = pose(0.1, 0.0, 0.2, 0.0);
    let input = scene.input(p1, 50..100);
    let report = tracked(tracker.process(&input).unwrap());
    assert_eq!(report.state, TrackingState::Initializing);
    assert_eq!(tracker.state(), TrackingState::Initializing);
    assert_eq!(report.inliers, 0);
    assert!(report.fixed_frame_replaced);
    assert!(!report.map_grown);
    assert!(tracker.map().is_empty());
    assert!(tracker.reset_fixed_frame());

    // The new fixed frame is the current frame, tagged with its pose and inlier count.
    let mut expected = input.images.clone();
    expected.set_odometry_pose(tracker.fixed_frame().unwrap().odometry_pose());
    assert_eq!(tracker.fixed_frame(), Some(&expected));
    assert_pose_eq(&expected.odometry_pose(), &p1, EPSILON);

    // Bootstrapping resumes against the new fixed frame, without a warm start.
    let p2 = pose(0.2, 0.0, 0.4, 0.02);
    let report = tracked(tracker.process(&scene.input(p2, 55..100)).unwrap());
    assert_eq!(report.state, TrackingState::Working);
    assert_eq!(report.inliers, 45);
    assert!(!report.used_warm_start);
    assert_pose_eq(&report.pose.unwrap(), &p2, EPSILON);
    assert_eq!(tracker.map().len(), 50);
}

#[test]
fn map_grows_once_when_bootstrap_finishes() {
    let scene = Scene::new(60, 11);
    let mut tracker = tracker(transform_tree());
    tracker
        .process(&scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..60))
        .unwrap();
    for step in 1..=4 {
        let s = step as f64;
        let report = tracked(
            tracker
                .process(&scene.input(pose(0.05 * s, 0.0, 0.1 * s, 0.01 * s), 0..60))
                .unwrap(),
        );
        assert_eq!(report.inliers, 60);
        assert_eq!(report.map_grown, step == 1);
        assert_eq!(report.used_warm_start, step > 1);
    }
    assert_eq!(tracker.map().insertions, 1);
    assert_eq!(tracker.map().len(), 60);
}

#[test]
fn transform_failure_keeps_tracker_uninitialized() {
    let scene = Scene::new(40, 5);
    let mut tracker = tracker(Unreliable {
        failures: Cell::new(2),
        tree: transform_tree(),
    });
    let input = scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..40);

    for _ in 0..2 {
        let error = tracker.process(&input).unwrap_err();
        assert!(matches!(error, TrackingError::TransformUnavailable { .. }));
        assert_eq!(tracker.state(), TrackingState::NotInitialized);
        assert!(tracker.fixed_frame().is_none());
        assert!(tracker.camera().is_none());
        assert!(tracker.map().camera_matrix.is_none());
    }

    assert_eq!(tracker.process(&input).unwrap(), TrackingEvent::Initialized);
    assert_eq!(tracker.state(), TrackingState::Initializing);
    assert_eq!(tracker.camera(), Some(&camera()));
    assert!(tracker.publisher().is_empty());
}

#[test]
fn invalid_calibration_is_rejected() {
    let scene = Scene::new(40, 5);
    let mut tracker = tracker(transform_tree());
    let mut input = scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..40);
    input.right_info.p[3] = 0.0;

    let error = tracker.process(&input).unwrap_err();
    assert!(matches!(error, TrackingError::InvalidCalibration(_)));
    assert_eq!(tracker.state(), TrackingState::NotInitialized);
    assert!(tracker.fixed_frame().is_none());
}

#[test]
fn unknown_camera_frame_is_unavailable() {
    let scene = Scene::new(40, 5);
    let mut tracker = tracker(transform_tree());
    let mut input = scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..40);
    input.left_info.frame_id = "camera_optical".to_owned();

    match tracker.process(&input) {
        Err(TrackingError::TransformUnavailable {
            target,
            source_frame,
            ..
        }) => {
            assert_eq!(target, ROBOT_FRAME);
            assert_eq!(source_frame, "camera_optical");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(tracker.state(), TrackingState::NotInitialized);
}

#[test]
fn lookup_uses_the_configured_timeout() {
    let _ = pretty_env_logger::try_init();
    let scene = Scene::new(40, 9);
    let recording = Recording {
        timeouts: RefCell::new(vec![]),
        tree: transform_tree(),
    };
    let mut tracker = Tracker::new(
        TrackingSettings::default().transform_timeout_ms(250),
        PassThrough::default(),
        &recording,
        PointMap::new(),
        vec![],
    );

    let input = scene.input(pose(0.0, 0.0, 0.0, 0.0), 0..40);
    assert_eq!(tracker.process(&input).unwrap(), TrackingEvent::Initialized);
    tracker.process(&input).unwrap();

    // The transform is looked up once per session, with the timeout from the settings.
    assert_eq!(*recording.timeouts.borrow(), vec![Duration::from_millis(250)]);
}
