use crate::{
    BoundedRansac, CameraInfo, CoordinateFrameResolver, CorrespondenceMatcher,
    FixedFrameDecision, FixedFrameManager, Frame, FrameExtractor, FramePublisher, MapSink,
    MotionEstimator, StereoCamera, TrackingError, TrackingReport, TrackingSettings,
    TransformResolver,
};
use cv_core::nalgebra::IsometryMatrix3;
use cv_core::CameraToCamera;
use log::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The phase of the tracking session.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    /// Waiting for the first input that resolves the camera transform and calibration.
    NotInitialized,
    /// A fixed frame exists, but no estimate against it has reached the inlier threshold yet.
    Initializing,
    /// Steady-state tracking.
    Working,
}

/// An odometry sample.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Odometry {
    /// The frame the pose is expressed in.
    pub frame_id: String,
    /// The moving frame, usually the robot body.
    pub child_frame_id: String,
    /// Pose of `child_frame_id` in `frame_id`.
    pub pose: IsometryMatrix3<f64>,
}

/// One synchronized set of inputs.
#[derive(Debug, Clone)]
pub struct TrackingInput<I> {
    pub odometry: Odometry,
    pub images: I,
    /// Calibration of the left camera. Its `frame_id` names the camera frame.
    pub left_info: CameraInfo,
    pub right_info: CameraInfo,
}

/// The result of processing one input.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// The input seeded the first fixed frame.
    Initialized,
    /// The input was tracked against the fixed frame.
    Tracked(TrackingReport),
}

/// Session data that exists once the tracker is initialized.
#[derive(Debug, Clone)]
struct Session {
    camera: StereoCamera,
    /// Maps camera points into the odometry child frame.
    odom_to_camera: IsometryMatrix3<f64>,
    fixed: Frame,
    /// Set when the fixed frame was replaced on the previous cycle.
    reset_fixed_frame: bool,
    warm_start: Option<CameraToCamera>,
}

#[derive(Debug, Clone)]
enum Stage {
    NotInitialized,
    Initializing(Session),
    Working(Session),
}

impl Stage {
    fn state(&self) -> TrackingState {
        match self {
            Stage::NotInitialized => TrackingState::NotInitialized,
            Stage::Initializing(_) => TrackingState::Initializing,
            Stage::Working(_) => TrackingState::Working,
        }
    }

    fn session(&self) -> Option<&Session> {
        match self {
            Stage::NotInitialized => None,
            Stage::Initializing(session) | Stage::Working(session) => Some(session),
        }
    }
}

/// The tracking state machine.
///
/// Inputs must be fed one at a time and in order; [`Tracker::process`] takes `&mut self`, so
/// sharing a tracker between threads requires wrapping the whole tracker in a lock.
pub struct Tracker<X, T, M, P> {
    settings: TrackingSettings,
    extractor: X,
    resolver: CoordinateFrameResolver<T>,
    map: M,
    publisher: P,
    matcher: CorrespondenceMatcher,
    estimator: MotionEstimator<Xoshiro256PlusPlus>,
    fixed_frame_manager: FixedFrameManager,
    stage: Stage,
    cycle: u64,
    latest: Option<TrackingReport>,
}

impl<X, T, M, P> Tracker<X, T, M, P>
where
    T: TransformResolver,
    M: MapSink,
    P: FramePublisher,
{
    pub fn new(settings: TrackingSettings, extractor: X, resolver: T, map: M, publisher: P) -> Self {
        let consensus = BoundedRansac::new(
            settings.consensus_iterations,
            settings.reprojection_threshold,
            settings.max_inliers,
            Xoshiro256PlusPlus::seed_from_u64(settings.consensus_seed),
        );
        Self {
            settings,
            extractor,
            resolver: CoordinateFrameResolver::new(resolver, settings.transform_timeout()),
            map,
            publisher,
            matcher: CorrespondenceMatcher::new(settings.match_ratio),
            estimator: MotionEstimator::new(
                settings.min_inliers,
                settings.refinement_iterations,
                consensus,
            ),
            fixed_frame_manager: FixedFrameManager::new(
                settings.min_inliers,
                settings.cluster_radius,
            ),
            stage: Stage::NotInitialized,
            cycle: 0,
            latest: None,
        }
    }

    /// Processes one synchronized input from start to finish.
    ///
    /// Fails only while not initialized, in which case the input is dropped and the tracker
    /// waits for the next one.
    pub fn process<I>(&mut self, input: &TrackingInput<I>) -> Result<TrackingEvent, TrackingError>
    where
        X: FrameExtractor<I>,
    {
        let stage = std::mem::replace(&mut self.stage, Stage::NotInitialized);
        let report = match stage {
            Stage::NotInitialized => {
                let session = self.initialize(input)?;
                self.stage = Stage::Initializing(session);
                return Ok(TrackingEvent::Initialized);
            }
            Stage::Initializing(session) => self.bootstrap(session, input),
            Stage::Working(session) => self.track(session, input),
        };
        self.publisher.update(&report);
        self.latest = Some(report.clone());
        Ok(TrackingEvent::Tracked(report))
    }

    fn initialize<I>(&mut self, input: &TrackingInput<I>) -> Result<Session, TrackingError>
    where
        X: FrameExtractor<I>,
    {
        let odom_to_camera = self
            .resolver
            .resolve(&input.odometry.child_frame_id, &input.left_info.frame_id)?;
        let camera = StereoCamera::from_camera_infos(&input.left_info, &input.right_info)?;

        self.map.set_camera_to_odom(odom_to_camera.inverse());
        self.map.set_camera_matrix(camera.camera_matrix());

        let mut fixed = self.extractor.extract(&input.images, &camera);
        fixed.set_odometry_pose(input.odometry.pose * odom_to_camera);
        info!("initialized with a fixed frame of {} features", fixed.len());

        Ok(Session {
            camera,
            odom_to_camera,
            fixed,
            reset_fixed_frame: false,
            warm_start: None,
        })
    }

    fn bootstrap<I>(&mut self, mut session: Session, input: &TrackingInput<I>) -> TrackingReport
    where
        X: FrameExtractor<I>,
    {
        let (decision, report) = self.run_cycle(&mut session, input, true);
        self.stage = match decision {
            FixedFrameDecision::Promote => Stage::Working(session),
            _ => Stage::Initializing(session),
        };
        report
    }

    fn track<I>(&mut self, mut session: Session, input: &TrackingInput<I>) -> TrackingReport
    where
        X: FrameExtractor<I>,
    {
        let (_, report) = self.run_cycle(&mut session, input, false);
        self.stage = Stage::Working(session);
        report
    }

    /// Matches, estimates and applies the fixed-frame policy for one input.
    fn run_cycle<I>(
        &mut self,
        session: &mut Session,
        input: &TrackingInput<I>,
        bootstrapping: bool,
    ) -> (FixedFrameDecision, TrackingReport)
    where
        X: FrameExtractor<I>,
    {
        self.cycle += 1;
        let mut current = self.extractor.extract(&input.images, &session.camera);
        let odometry_pose = input.odometry.pose * session.odom_to_camera;
        current.set_odometry_pose(odometry_pose);

        let correspondences = self
            .matcher
            .match_descriptors(current.descriptors(), session.fixed.descriptors());
        let warm_start = if session.reset_fixed_frame {
            None
        } else {
            session.warm_start
        };
        let estimate = self.estimator.estimate(
            &correspondences,
            &session.fixed,
            &current,
            &session.camera.left,
            warm_start,
        );
        current.set_inliers(estimate.inliers.len());
        if estimate.pose.is_some() {
            session.warm_start = estimate.pose;
        }
        let pose = estimate
            .pose
            .map(|motion| session.fixed.odometry_pose() * motion.0);

        let inliers = current.inliers();
        let decision = self.fixed_frame_manager.decide(bootstrapping, inliers);
        let map_grown =
            self.fixed_frame_manager
                .apply(decision, &mut session.fixed, current, &mut self.map);
        session.reset_fixed_frame = decision.resets_fixed_frame();

        let state = match decision {
            FixedFrameDecision::Restart => TrackingState::Initializing,
            FixedFrameDecision::Promote | FixedFrameDecision::Keep | FixedFrameDecision::Replace => {
                TrackingState::Working
            }
        };
        let report = TrackingReport {
            cycle: self.cycle,
            state,
            correspondences: correspondences.len(),
            inliers,
            used_warm_start: estimate.used_warm_start,
            fixed_frame_replaced: matches!(
                decision,
                FixedFrameDecision::Restart | FixedFrameDecision::Replace
            ),
            map_grown,
            motion: estimate.pose,
            pose,
            odometry_pose,
        };
        (decision, report)
    }

    pub fn state(&self) -> TrackingState {
        self.stage.state()
    }

    /// The report of the most recent tracked input.
    pub fn latest_report(&self) -> Option<&TrackingReport> {
        self.latest.as_ref()
    }

    pub fn fixed_frame(&self) -> Option<&Frame> {
        self.stage.session().map(|session| &session.fixed)
    }

    pub fn camera(&self) -> Option<&StereoCamera> {
        self.stage.session().map(|session| &session.camera)
    }

    /// Whether the next cycle will solve without a warm start because the fixed frame was just
    /// replaced.
    pub fn reset_fixed_frame(&self) -> bool {
        self.stage
            .session()
            .map(|session| session.reset_fixed_frame)
            .unwrap_or(false)
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }
}
