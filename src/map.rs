use crate::Frame;
use cv_core::nalgebra::{IsometryMatrix3, Matrix3, Point3};
use log::*;

/// The back-end that accumulates triangulated landmarks.
pub trait MapSink {
    /// Receives the transform that maps odometry child frame points into the camera frame.
    fn set_camera_to_odom(&mut self, camera_to_odom: IsometryMatrix3<f64>);

    /// Receives the intrinsic matrix of the rectified left camera.
    fn set_camera_matrix(&mut self, camera_matrix: Matrix3<f64>);

    /// Stores the world points of `frame`.
    fn add_points(&mut self, frame: &Frame);
}

impl<M> MapSink for &mut M
where
    M: MapSink + ?Sized,
{
    fn set_camera_to_odom(&mut self, camera_to_odom: IsometryMatrix3<f64>) {
        (**self).set_camera_to_odom(camera_to_odom)
    }

    fn set_camera_matrix(&mut self, camera_matrix: Matrix3<f64>) {
        (**self).set_camera_matrix(camera_matrix)
    }

    fn add_points(&mut self, frame: &Frame) {
        (**self).add_points(frame)
    }
}

/// An in-memory map of world points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointMap {
    pub camera_to_odom: Option<IsometryMatrix3<f64>>,
    pub camera_matrix: Option<Matrix3<f64>>,
    pub points: Vec<Point3<f64>>,
    /// How many frames contributed points.
    pub insertions: usize,
}

impl PointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl MapSink for PointMap {
    fn set_camera_to_odom(&mut self, camera_to_odom: IsometryMatrix3<f64>) {
        self.camera_to_odom = Some(camera_to_odom);
    }

    fn set_camera_matrix(&mut self, camera_matrix: Matrix3<f64>) {
        self.camera_matrix = Some(camera_matrix);
    }

    fn add_points(&mut self, frame: &Frame) {
        self.points.extend_from_slice(frame.world_points());
        self.insertions += 1;
        info!(
            "map received {} points, now holding {} points from {} frames",
            frame.world_points().len(),
            self.points.len(),
            self.insertions
        );
    }
}
