use thiserror::Error;

/// Errors that can interrupt a tracking cycle.
///
/// Sparse correspondences and failed pose solves are not represented here. Those show up as
/// an empty inlier set and are handled by the fixed-frame policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// The static transform between the odometry child frame and the camera frame could not be
    /// resolved. The input that triggered the lookup is discarded.
    #[error("unable to resolve transform from `{source_frame}` to `{target}`: {reason}")]
    TransformUnavailable {
        target: String,
        source_frame: String,
        reason: String,
    },
    /// The calibration records do not describe a usable rectified stereo pair.
    #[error("invalid stereo calibration: {0}")]
    InvalidCalibration(String),
}

impl TrackingError {
    pub(crate) fn transform_unavailable(
        target: &str,
        source_frame: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransformUnavailable {
            target: target.to_owned(),
            source_frame: source_frame.to_owned(),
            reason: reason.into(),
        }
    }
}
