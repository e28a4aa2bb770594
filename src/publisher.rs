use crate::TrackingState;
use cv_core::nalgebra::IsometryMatrix3;
use cv_core::CameraToCamera;
use log::*;

/// What happened during one tracking cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingReport {
    /// Number of the cycle, starting at 1 for the first input after initialization.
    pub cycle: u64,
    /// The state after the cycle.
    pub state: TrackingState,
    pub correspondences: usize,
    pub inliers: usize,
    pub used_warm_start: bool,
    pub fixed_frame_replaced: bool,
    pub map_grown: bool,
    /// Maps current camera points into the fixed camera.
    pub motion: Option<CameraToCamera>,
    /// The estimated pose of the current camera in the odometry frame.
    pub pose: Option<IsometryMatrix3<f64>>,
    /// The odometry-derived pose of the current camera.
    pub odometry_pose: IsometryMatrix3<f64>,
}

/// Receives the results of every tracking cycle.
pub trait FramePublisher {
    fn update(&mut self, report: &TrackingReport);
}

impl FramePublisher for Vec<TrackingReport> {
    fn update(&mut self, report: &TrackingReport) {
        self.push(report.clone());
    }
}

/// Publishes reports to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl FramePublisher for LogPublisher {
    fn update(&mut self, report: &TrackingReport) {
        let translation = report
            .pose
            .unwrap_or(report.odometry_pose)
            .translation
            .vector;
        info!(
            "cycle {} ({:?}): {} correspondences, {} inliers, position [{:.3}, {:.3}, {:.3}]{}{}",
            report.cycle,
            report.state,
            report.correspondences,
            report.inliers,
            translation.x,
            translation.y,
            translation.z,
            if report.fixed_frame_replaced {
                ", fixed frame replaced"
            } else {
                ""
            },
            if report.map_grown { ", map grown" } else { "" },
        );
    }
}
