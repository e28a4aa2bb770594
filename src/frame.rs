use crate::StereoCamera;
use bitarray::BitArray;
use cv_core::nalgebra::{IsometryMatrix3, Point2, Point3, Vector3};
use derive_more::Constructor;
use std::collections::HashMap;

/// A 512-bit binary feature descriptor.
pub type Descriptor = BitArray<64>;

/// A left image feature that could be triangulated with the right image.
#[derive(Debug, Clone, Copy, PartialEq, Constructor)]
pub struct StereoFeature {
    /// Position in the rectified left image, in pixels.
    pub keypoint: Point2<f64>,
    pub descriptor: Descriptor,
    /// Triangulated position relative to the left camera.
    pub point: Point3<f64>,
}

/// Builds a [`Frame`] out of the images of one synchronized input.
pub trait FrameExtractor<I> {
    fn extract(&mut self, images: &I, camera: &StereoCamera) -> Frame;
}

/// A snapshot of one stereo pair.
///
/// Keypoints, descriptors and camera points are index-aligned. Only the odometry pose, the
/// inlier count and the world points change after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    keypoints: Vec<Point2<f64>>,
    descriptors: Vec<Descriptor>,
    camera_points: Vec<Point3<f64>>,
    /// Pose of the left camera in the odometry frame.
    odometry_pose: IsometryMatrix3<f64>,
    inliers: usize,
    world_points: Vec<Point3<f64>>,
}

impl Frame {
    pub fn new(features: impl IntoIterator<Item = StereoFeature>) -> Self {
        let mut frame = Self {
            keypoints: vec![],
            descriptors: vec![],
            camera_points: vec![],
            odometry_pose: IsometryMatrix3::identity(),
            inliers: 0,
            world_points: vec![],
        };
        for StereoFeature {
            keypoint,
            descriptor,
            point,
        } in features
        {
            frame.keypoints.push(keypoint);
            frame.descriptors.push(descriptor);
            frame.camera_points.push(point);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[Point2<f64>] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn camera_points(&self) -> &[Point3<f64>] {
        &self.camera_points
    }

    pub fn keypoint(&self, ix: usize) -> Point2<f64> {
        self.keypoints[ix]
    }

    pub fn camera_point(&self, ix: usize) -> Point3<f64> {
        self.camera_points[ix]
    }

    pub fn odometry_pose(&self) -> IsometryMatrix3<f64> {
        self.odometry_pose
    }

    pub fn set_odometry_pose(&mut self, odometry_pose: IsometryMatrix3<f64>) {
        self.odometry_pose = odometry_pose;
    }

    pub fn inliers(&self) -> usize {
        self.inliers
    }

    pub fn set_inliers(&mut self, inliers: usize) {
        self.inliers = inliers;
    }

    /// The world points of the last [`Frame::compute_world_points`] call, possibly merged by
    /// [`Frame::cluster_world_points`].
    pub fn world_points(&self) -> &[Point3<f64>] {
        &self.world_points
    }

    /// Moves every camera point into the odometry frame using the odometry pose.
    pub fn compute_world_points(&mut self) {
        let pose = self.odometry_pose;
        self.world_points = self.camera_points.iter().map(|p| pose * p).collect();
    }

    /// Merges world points that share a voxel of side `radius` into their centroid.
    ///
    /// The output keeps the order in which voxels were first hit. A non-positive radius
    /// leaves the points untouched.
    pub fn cluster_world_points(&mut self, radius: f64) {
        if !(radius > 0.0) {
            return;
        }
        let mut voxels: HashMap<[i64; 3], usize> = HashMap::new();
        let mut clusters: Vec<(Vector3<f64>, usize)> = vec![];
        for point in &self.world_points {
            let cell = point.coords.map(|n| (n / radius).floor() as i64);
            let key = [cell.x, cell.y, cell.z];
            let ix = *voxels.entry(key).or_insert_with(|| {
                clusters.push((Vector3::zeros(), 0));
                clusters.len() - 1
            });
            clusters[ix].0 += point.coords;
            clusters[ix].1 += 1;
        }
        self.world_points = clusters
            .into_iter()
            .map(|(sum, count)| Point3::from(sum / count as f64))
            .collect();
    }
}
