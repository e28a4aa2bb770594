use crate::TrackingError;
use cv_core::nalgebra::{Matrix3, Point2, Point3, Unit, UnitVector3, Vector2};
use cv_core::{CameraModel, KeyPoint};
pub use cv_pinhole::CameraIntrinsics;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A calibration record for one camera of a rectified stereo pair.
///
/// The layout follows the usual camera info message: `k` is the row-major 3x3 intrinsic
/// matrix of the raw image, `d` the distortion coefficients, `r` the row-major 3x3
/// rectification rotation and `p` the row-major 3x4 projection matrix of the rectified image.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub k: [f64; 9],
    pub d: Vec<f64>,
    pub r: [f64; 9],
    pub p: [f64; 12],
}

/// The unit bearing out of the optical center through a pixel of the rectified image.
pub fn pixel_bearing(intrinsics: &CameraIntrinsics, pixel: Point2<f64>) -> UnitVector3<f64> {
    intrinsics.calibrate(KeyPoint(pixel))
}

/// Projects a camera-local point onto the rectified image.
///
/// Points on or behind the optical center have no projection.
pub fn project_point(intrinsics: &CameraIntrinsics, point: &Point3<f64>) -> Option<Point2<f64>> {
    if point.z <= f64::EPSILON {
        return None;
    }
    intrinsics
        .uncalibrate(Unit::new_normalize(point.coords))
        .map(|keypoint| keypoint.0)
}

/// The camera model of a rectified stereo pair, expressed in the left camera.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoCamera {
    /// Intrinsics of the rectified left image.
    pub left: CameraIntrinsics,
    /// The distance between the two optical centers, in the unit of the calibration.
    pub baseline: f64,
}

impl StereoCamera {
    pub fn new(left: CameraIntrinsics, baseline: f64) -> Self {
        Self { left, baseline }
    }

    /// Builds the stereo model from the rectified projection matrices of both cameras.
    pub fn from_camera_infos(left: &CameraInfo, right: &CameraInfo) -> Result<Self, TrackingError> {
        let p = &left.p;
        let intrinsics = CameraIntrinsics::identity()
            .focals(Vector2::new(p[0], p[5]))
            .principal_point(Point2::new(p[2], p[6]))
            .skew(p[1]);
        if intrinsics.focals.iter().any(|&f| !(f > 0.0)) {
            return Err(TrackingError::InvalidCalibration(format!(
                "left focal lengths must be positive, got {:?}",
                intrinsics.focals.as_slice()
            )));
        }
        let right_fx = right.p[0];
        if !(right_fx > 0.0) {
            return Err(TrackingError::InvalidCalibration(format!(
                "right focal length must be positive, got {}",
                right_fx
            )));
        }
        // The right projection carries `-fx * baseline` in its translation column.
        let baseline = -right.p[3] / right_fx;
        if !(baseline > 0.0) {
            return Err(TrackingError::InvalidCalibration(format!(
                "stereo baseline must be positive, got {}",
                baseline
            )));
        }
        Ok(Self::new(intrinsics, baseline))
    }

    /// The intrinsic matrix shared with the map.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.left.matrix()
    }

    /// The bearing through a pixel of the left image.
    pub fn bearing(&self, pixel: Point2<f64>) -> UnitVector3<f64> {
        pixel_bearing(&self.left, pixel)
    }

    /// Projects a point of the left camera onto the left image.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        project_point(&self.left, point)
    }

    /// Triangulates a left image pixel with its horizontal disparity into the left camera.
    pub fn triangulate(&self, left_pixel: Point2<f64>, disparity: f64) -> Option<Point3<f64>> {
        if !(disparity > 0.0) {
            return None;
        }
        let depth = self.left.focals.x * self.baseline / disparity;
        let bearing = self.bearing(left_pixel);
        Some(Point3::from(bearing.into_inner() * (depth / bearing.z)))
    }
}
