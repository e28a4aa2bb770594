#![allow(dead_code)]

use cv_core::nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Translation3, Vector3};
use cv_tracking::{
    CameraInfo, CameraIntrinsics, Descriptor, Frame, FrameExtractor, Odometry, StereoCamera,
    StereoFeature, TrackingInput, TransformTree,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub const FOCAL: f64 = 500.0;
pub const BASELINE: f64 = 0.5;
pub const ODOMETRY_FRAME: &str = "odom";
pub const ROBOT_FRAME: &str = "base_link";
pub const CAMERA_FRAME: &str = "camera_left";

/// Hands out the frame stored in the input, as if it had just been extracted.
#[derive(Debug, Default)]
pub struct PassThrough {
    pub calls: usize,
}

impl FrameExtractor<Frame> for PassThrough {
    fn extract(&mut self, images: &Frame, _camera: &StereoCamera) -> Frame {
        self.calls += 1;
        images.clone()
    }
}

pub fn pose(x: f64, y: f64, z: f64, yaw: f64) -> IsometryMatrix3<f64> {
    IsometryMatrix3::from_parts(
        Translation3::new(x, y, z),
        Rotation3::from_axis_angle(&Vector3::y_axis(), yaw),
    )
}

/// Pose of the left camera on the robot.
pub fn mount() -> IsometryMatrix3<f64> {
    pose(0.2, -0.1, 0.3, 0.0)
}

pub fn transform_tree() -> TransformTree {
    let mut tree = TransformTree::new();
    tree.insert(ROBOT_FRAME, CAMERA_FRAME, mount());
    tree
}

pub fn camera() -> StereoCamera {
    StereoCamera::new(
        CameraIntrinsics::identity()
            .focal(FOCAL)
            .principal_point(Point2::new(320.0, 240.0)),
        BASELINE,
    )
}

pub fn camera_info(frame_id: &str, tx: f64) -> CameraInfo {
    #[rustfmt::skip]
    let k = [
        FOCAL, 0.0, 320.0,
        0.0, FOCAL, 240.0,
        0.0, 0.0, 1.0,
    ];
    #[rustfmt::skip]
    let r = [
        1.0, 0.0, 0.0,
        0.0, 1.0, 0.0,
        0.0, 0.0, 1.0,
    ];
    #[rustfmt::skip]
    let p = [
        FOCAL, 0.0, 320.0, tx,
        0.0, FOCAL, 240.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    ];
    CameraInfo {
        frame_id: frame_id.to_owned(),
        width: 640,
        height: 480,
        k,
        d: vec![0.0; 5],
        r,
        p,
    }
}

/// A static world of uniquely described landmarks.
pub struct Scene {
    pub landmarks: Vec<(Point3<f64>, Descriptor)>,
    pub camera: StereoCamera,
}

impl Scene {
    pub fn new(count: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let landmarks = (0..count)
            .map(|_| {
                let point = Point3::new(
                    rng.gen_range(-4.0..4.0),
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(6.0..15.0),
                );
                let mut bytes = [0u8; 64];
                rng.fill(&mut bytes[..]);
                (point, Descriptor::new(bytes))
            })
            .collect();
        Self {
            landmarks,
            camera: camera(),
        }
    }

    /// The frame seen by a camera at `camera_pose` that observes exactly the landmarks `ids`.
    ///
    /// The odometry pose is left at identity, like a freshly extracted frame.
    pub fn observe(
        &self,
        camera_pose: IsometryMatrix3<f64>,
        ids: impl IntoIterator<Item = usize>,
    ) -> Frame {
        let camera_from_world = camera_pose.inverse();
        Frame::new(ids.into_iter().map(|id| {
            let (world, descriptor) = self.landmarks[id];
            let point = camera_from_world * world;
            let keypoint = self
                .camera
                .project(&point)
                .expect("landmark behind the camera");
            StereoFeature::new(keypoint, descriptor, point)
        }))
    }

    /// The tracker input of a camera at `camera_pose` observing `ids`.
    pub fn input(
        &self,
        camera_pose: IsometryMatrix3<f64>,
        ids: impl IntoIterator<Item = usize>,
    ) -> TrackingInput<Frame> {
        TrackingInput {
            odometry: Odometry {
                frame_id: ODOMETRY_FRAME.to_owned(),
                child_frame_id: ROBOT_FRAME.to_owned(),
                pose: camera_pose * mount().inverse(),
            },
            images: self.observe(camera_pose, ids),
            left_info: camera_info(CAMERA_FRAME, 0.0),
            right_info: camera_info("camera_right", -FOCAL * BASELINE),
        }
    }
}

/// Asserts two poses agree to within `epsilon` in both rotation angle and translation.
pub fn assert_pose_eq(a: &IsometryMatrix3<f64>, b: &IsometryMatrix3<f64>, epsilon: f64) {
    let angle = (a.rotation.inverse() * b.rotation).angle();
    let distance = (a.translation.vector - b.translation.vector).norm();
    assert!(
        angle < epsilon && distance < epsilon,
        "poses differ by {} rad and {} units:\n{:?}\n{:?}",
        angle,
        distance,
        a,
        b
    );
}
