//! Robust estimation of the relative motion between the current frame and the fixed frame.
//!
//! The pose is solved from the current frame's 3d points and the fixed frame's keypoints.
//! The resulting [`CameraToCamera`] maps points expressed in the current camera into the fixed
//! camera, which is also the pose of the current camera seen from the fixed camera.

use crate::{pixel_bearing, project_point, CameraIntrinsics, Correspondence, Frame};
use arrayvec::ArrayVec;
use cv_core::nalgebra::{
    dimension::{Dynamic, U1, U6},
    storage::Owned,
    DVector, IsometryMatrix3, Matrix2, Matrix2x3, Matrix3, OMatrix, Point2, Point3, Rotation3,
    VecStorage, Vector2, Vector3, Vector6,
};
use cv_core::sample_consensus::{Consensus, Estimator, Model};
use cv_core::{CameraToCamera, FeatureWorldMatch, WorldPoint};
use lambda_twist::LambdaTwist;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use rand::{seq::index::sample, Rng};

/// A keypoint observed in the fixed frame matched with a 3d point of the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPointWorldMatch {
    /// Pixel position in the fixed frame.
    pub keypoint: Point2<f64>,
    /// Position relative to the current camera.
    pub point: Point3<f64>,
}

/// A pose hypothesis scored by its pixel reprojection error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectionModel {
    pub pose: IsometryMatrix3<f64>,
    pub intrinsics: CameraIntrinsics,
}

impl Model<KeyPointWorldMatch> for ReprojectionModel {
    fn residual(&self, data: &KeyPointWorldMatch) -> f64 {
        project_point(&self.intrinsics, &(self.pose * data.point))
            .map(|projection| (projection - data.keypoint).norm())
            .unwrap_or(f64::INFINITY)
    }
}

/// Produces pose hypotheses from three matches with the Lambda Twist P3P solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct P3pEstimator {
    pub intrinsics: CameraIntrinsics,
    pub lambda_twist: LambdaTwist,
}

impl P3pEstimator {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            lambda_twist: LambdaTwist::new(),
        }
    }
}

impl Estimator<KeyPointWorldMatch> for P3pEstimator {
    type Model = ReprojectionModel;
    type ModelIter = ArrayVec<ReprojectionModel, 4>;
    const MIN_SAMPLES: usize = 3;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = KeyPointWorldMatch> + Clone,
    {
        let samples = data.take(Self::MIN_SAMPLES).map(|m| {
            FeatureWorldMatch(
                pixel_bearing(&self.intrinsics, m.keypoint),
                WorldPoint(m.point.to_homogeneous()),
            )
        });
        if samples.clone().count() < Self::MIN_SAMPLES {
            return ArrayVec::new();
        }
        self.lambda_twist
            .estimate(samples)
            .into_iter()
            .map(|pose| ReprojectionModel {
                pose: pose.0,
                intrinsics: self.intrinsics,
            })
            .collect()
    }
}

/// RANSAC with a fixed budget of minimal samples.
///
/// The search ends early once a hypothesis explains `max_inliers` data points, and the
/// returned inlier set never holds more than `max_inliers` indices.
#[derive(Debug, Clone)]
pub struct BoundedRansac<R> {
    pub max_iterations: usize,
    pub inlier_threshold: f64,
    pub max_inliers: usize,
    rng: R,
}

impl<R> BoundedRansac<R>
where
    R: Rng,
{
    pub fn new(max_iterations: usize, inlier_threshold: f64, max_inliers: usize, rng: R) -> Self {
        Self {
            max_iterations,
            inlier_threshold,
            max_inliers,
            rng,
        }
    }

    fn inliers<M, Data>(&self, model: &M, data: &[Data]) -> Vec<usize>
    where
        M: Model<Data>,
    {
        data.iter()
            .enumerate()
            .filter(|(_, datum)| model.residual(datum) <= self.inlier_threshold)
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Runs the consensus process, scoring `hint` before any random sample is drawn.
    pub fn model_inliers_with_hint<E, Data, I>(
        &mut self,
        estimator: &E,
        data: I,
        hint: Option<E::Model>,
    ) -> Option<(E::Model, Vec<usize>)>
    where
        E: Estimator<Data>,
        Data: Clone,
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        if data.len() < E::MIN_SAMPLES {
            return None;
        }
        let mut best: Option<(E::Model, Vec<usize>)> = hint.map(|model| {
            let inliers = self.inliers(&model, &data);
            (model, inliers)
        });
        let best_len = |best: &Option<(E::Model, Vec<usize>)>| {
            best.as_ref().map(|(_, inliers)| inliers.len()).unwrap_or(0)
        };
        for _ in 0..self.max_iterations {
            if best_len(&best) >= self.max_inliers {
                break;
            }
            let indices = sample(&mut self.rng, data.len(), E::MIN_SAMPLES);
            let samples: Vec<Data> = indices.iter().map(|ix| data[ix].clone()).collect();
            for model in estimator.estimate(samples.into_iter()) {
                let inliers = self.inliers(&model, &data);
                if inliers.len() > best_len(&best) {
                    best = Some((model, inliers));
                }
            }
        }
        best.filter(|(_, inliers)| inliers.len() >= E::MIN_SAMPLES)
            .map(|(model, mut inliers)| {
                inliers.truncate(self.max_inliers);
                (model, inliers)
            })
    }
}

impl<E, Data, R> Consensus<E, Data> for BoundedRansac<R>
where
    E: Estimator<Data>,
    Data: Clone,
    R: Rng,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers_with_hint(estimator, data, None)
    }
}

/// The outcome of one motion estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEstimate {
    /// Maps current camera points into the fixed camera. `None` if no pose was found or the
    /// solve was skipped.
    pub pose: Option<CameraToCamera>,
    /// Indices into the correspondence list that agree with `pose`.
    pub inliers: Vec<usize>,
    /// Whether the solve started from the previous estimate.
    pub used_warm_start: bool,
}

impl MotionEstimate {
    fn skipped() -> Self {
        Self {
            pose: None,
            inliers: vec![],
            used_warm_start: false,
        }
    }
}

/// Solves the fixed to current frame motion from descriptor correspondences.
#[derive(Debug, Clone)]
pub struct MotionEstimator<R> {
    /// Below this many correspondences the solve is not attempted.
    pub min_correspondences: usize,
    pub refinement_iterations: usize,
    consensus: BoundedRansac<R>,
}

impl<R> MotionEstimator<R>
where
    R: Rng,
{
    pub fn new(
        min_correspondences: usize,
        refinement_iterations: usize,
        consensus: BoundedRansac<R>,
    ) -> Self {
        Self {
            min_correspondences,
            refinement_iterations,
            consensus,
        }
    }

    /// Estimates the motion that maps the current frame's 3d points onto the fixed frame's
    /// keypoints.
    ///
    /// `warm_start` is scored as the first hypothesis and is the usual starting point for
    /// refinement when it stays the best one.
    pub fn estimate(
        &mut self,
        correspondences: &[Correspondence],
        fixed: &Frame,
        current: &Frame,
        intrinsics: &CameraIntrinsics,
        warm_start: Option<CameraToCamera>,
    ) -> MotionEstimate {
        if correspondences.len() < self.min_correspondences {
            debug!(
                "only {} correspondences, need {}; skipping motion estimation",
                correspondences.len(),
                self.min_correspondences
            );
            return MotionEstimate::skipped();
        }
        let matches: Vec<KeyPointWorldMatch> = correspondences
            .iter()
            .map(|c| KeyPointWorldMatch {
                keypoint: fixed.keypoint(c.fixed),
                point: current.camera_point(c.current),
            })
            .collect();

        let used_warm_start = warm_start.is_some();
        let hint = warm_start.map(|pose| ReprojectionModel {
            pose: pose.0,
            intrinsics: *intrinsics,
        });
        let estimator = P3pEstimator::new(*intrinsics);
        let (model, inliers) =
            match self
                .consensus
                .model_inliers_with_hint(&estimator, matches.iter().copied(), hint)
            {
                Some(found) => found,
                None => {
                    info!(
                        "no pose explains at least {} of {} correspondences",
                        P3pEstimator::MIN_SAMPLES,
                        matches.len()
                    );
                    return MotionEstimate {
                        pose: None,
                        inliers: vec![],
                        used_warm_start,
                    };
                }
            };

        let inlier_matches: Vec<KeyPointWorldMatch> =
            inliers.iter().map(|&ix| matches[ix]).collect();
        let refined = ReprojectionModel {
            pose: refine_pose(
                model.pose,
                intrinsics,
                &inlier_matches,
                self.refinement_iterations,
            ),
            intrinsics: *intrinsics,
        };
        let refined_inliers = self.consensus.inliers(&refined, &matches);
        let (model, mut inliers) = if refined_inliers.len() >= inliers.len() {
            (refined, refined_inliers)
        } else {
            (model, inliers)
        };
        inliers.truncate(self.consensus.max_inliers);
        debug!(
            "motion estimated with {} inliers out of {} correspondences",
            inliers.len(),
            matches.len()
        );
        MotionEstimate {
            pose: Some(CameraToCamera(model.pose)),
            inliers,
            used_warm_start,
        }
    }
}

/// The pixel reprojection error of a pose over a set of matches.
///
/// The parameters are the translation followed by the rotation as a scaled axis, so the
/// pose maps a point `p` to `exp(w) * p + t`.
#[derive(Clone)]
struct PoseRefinement<'a> {
    matches: &'a [KeyPointWorldMatch],
    intrinsics: CameraIntrinsics,
    translation: Vector3<f64>,
    rotation: Vector3<f64>,
}

impl<'a> PoseRefinement<'a> {
    fn new(
        pose: IsometryMatrix3<f64>,
        intrinsics: CameraIntrinsics,
        matches: &'a [KeyPointWorldMatch],
    ) -> Self {
        Self {
            matches,
            intrinsics,
            translation: pose.translation.vector,
            rotation: pose.rotation.scaled_axis(),
        }
    }

    fn pose(&self) -> IsometryMatrix3<f64> {
        IsometryMatrix3::new(self.translation, self.rotation)
    }
}

/// Derivative of `exp(w) * p` with respect to `w`, given `rotated = exp(w) * p`.
fn rotation_jacobian(w: &Vector3<f64>, rotated: &Vector3<f64>) -> Matrix3<f64> {
    let theta = w.norm();
    let skew = w.cross_matrix();
    // Left jacobian of SO(3).
    let left = if theta < 1e-8 {
        Matrix3::identity() + 0.5 * skew
    } else {
        let theta2 = theta * theta;
        Matrix3::identity()
            + (1.0 - theta.cos()) / theta2 * skew
            + (theta - theta.sin()) / (theta2 * theta) * skew * skew
    };
    -rotated.cross_matrix() * left
}

impl<'a> LeastSquaresProblem<f64, Dynamic, U6> for PoseRefinement<'a> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &Vector6<f64>) {
        self.translation = x.fixed_rows::<3>(0).into_owned();
        self.rotation = x.fixed_rows::<3>(3).into_owned();
    }

    fn params(&self) -> Vector6<f64> {
        let (t, w) = (self.translation, self.rotation);
        Vector6::new(t.x, t.y, t.z, w.x, w.y, w.z)
    }

    /// Two residuals per match, the pixel error along x and y.
    ///
    /// Matches that land behind the camera contribute nothing.
    fn residuals(&self) -> Option<DVector<f64>> {
        let pose = self.pose();
        Some(DVector::from_iterator(
            2 * self.matches.len(),
            self.matches.iter().flat_map(|m| {
                let error = project_point(&self.intrinsics, &(pose * m.point))
                    .map(|projection| projection - m.keypoint)
                    .unwrap_or_else(Vector2::zeros);
                [error.x, error.y]
            }),
        ))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U6>> {
        let rotation = Rotation3::new(self.rotation);
        #[rustfmt::skip]
        let d_pixel = Matrix2::new(
            self.intrinsics.focals.x, self.intrinsics.skew,
            0.0,                      self.intrinsics.focals.y,
        );
        let mut jacobian = OMatrix::<f64, Dynamic, U6>::zeros(2 * self.matches.len());
        for (ix, m) in self.matches.iter().enumerate() {
            let rotated = rotation * m.point.coords;
            let transformed = rotated + self.translation;
            if transformed.z <= f64::EPSILON {
                continue;
            }
            let iz = 1.0 / transformed.z;
            #[rustfmt::skip]
            let d_normalized = Matrix2x3::new(
                iz,  0.0, -transformed.x * iz * iz,
                0.0, iz,  -transformed.y * iz * iz,
            );
            let d_point = d_pixel * d_normalized;
            let mut rows = jacobian.fixed_rows_mut::<2>(2 * ix);
            rows.fixed_columns_mut::<3>(0).copy_from(&d_point);
            rows.fixed_columns_mut::<3>(3)
                .copy_from(&(d_point * rotation_jacobian(&self.rotation, &rotated)));
        }
        Some(jacobian)
    }
}

/// Minimizes the pixel reprojection error of `matches` with Levenberg-Marquardt.
///
/// `patience` bounds the number of residual evaluations per parameter. With fewer than a
/// minimal sample of matches the pose is returned unchanged.
pub fn refine_pose(
    pose: IsometryMatrix3<f64>,
    intrinsics: &CameraIntrinsics,
    matches: &[KeyPointWorldMatch],
    patience: usize,
) -> IsometryMatrix3<f64> {
    if matches.len() < P3pEstimator::MIN_SAMPLES || patience == 0 {
        return pose;
    }
    let (refinement, report) = LevenbergMarquardt::new()
        .with_patience(patience)
        .minimize(PoseRefinement::new(pose, *intrinsics, matches));
    trace!(
        "pose refinement stopped after {} evaluations: {:?}",
        report.number_of_evaluations,
        report.termination
    );
    if report.objective_function.is_finite() {
        refinement.pose()
    } else {
        pose
    }
}
