#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use std::time::Duration;

/// The settings for the tracking process.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrackingSettings {
    /// The minimum number of pose inliers for the fixed frame to be kept.
    ///
    /// This is also the minimum number of correspondences needed to attempt a pose solve.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_inliers"))]
    pub min_inliers: usize,
    /// Once a hypothesis reaches this many inliers the consensus search stops, and no more than
    /// this many inliers are returned.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_inliers"))]
    pub max_inliers: usize,
    /// The best descriptor match must be at most this fraction of the second best.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_match_ratio"))]
    pub match_ratio: f64,
    /// The maximum number of minimal samples drawn by the consensus process.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_iterations")
    )]
    pub consensus_iterations: usize,
    /// The reprojection error in pixels under which a correspondence is an inlier.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_reprojection_threshold")
    )]
    pub reprojection_threshold: f64,
    /// The Levenberg-Marquardt patience used to refine the consensus pose on its inliers.
    ///
    /// The refinement evaluates the residuals at most `refinement_iterations * 7` times.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_refinement_iterations")
    )]
    pub refinement_iterations: usize,
    /// The side length of the voxels used to merge world points before they enter the map.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_cluster_radius"))]
    pub cluster_radius: f64,
    /// How long the odometry to camera transform lookup may take, in milliseconds.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_transform_timeout_ms")
    )]
    pub transform_timeout_ms: u64,
    /// The seed of the random number generator used for consensus sampling.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_consensus_seed"))]
    pub consensus_seed: u64,
}

impl TrackingSettings {
    #[must_use]
    pub fn min_inliers(self, min_inliers: usize) -> Self {
        Self {
            min_inliers,
            ..self
        }
    }

    #[must_use]
    pub fn max_inliers(self, max_inliers: usize) -> Self {
        Self {
            max_inliers,
            ..self
        }
    }

    #[must_use]
    pub fn match_ratio(self, match_ratio: f64) -> Self {
        Self {
            match_ratio,
            ..self
        }
    }

    #[must_use]
    pub fn consensus_iterations(self, consensus_iterations: usize) -> Self {
        Self {
            consensus_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn reprojection_threshold(self, reprojection_threshold: f64) -> Self {
        Self {
            reprojection_threshold,
            ..self
        }
    }

    #[must_use]
    pub fn refinement_iterations(self, refinement_iterations: usize) -> Self {
        Self {
            refinement_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn cluster_radius(self, cluster_radius: f64) -> Self {
        Self {
            cluster_radius,
            ..self
        }
    }

    #[must_use]
    pub fn consensus_seed(self, consensus_seed: u64) -> Self {
        Self {
            consensus_seed,
            ..self
        }
    }

    #[must_use]
    pub fn transform_timeout_ms(self, transform_timeout_ms: u64) -> Self {
        Self {
            transform_timeout_ms,
            ..self
        }
    }

    /// The transform lookup timeout as a [`Duration`].
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            min_inliers: default_min_inliers(),
            max_inliers: default_max_inliers(),
            match_ratio: default_match_ratio(),
            consensus_iterations: default_consensus_iterations(),
            reprojection_threshold: default_reprojection_threshold(),
            refinement_iterations: default_refinement_iterations(),
            cluster_radius: default_cluster_radius(),
            transform_timeout_ms: default_transform_timeout_ms(),
            consensus_seed: default_consensus_seed(),
        }
    }
}

fn default_min_inliers() -> usize {
    30
}

fn default_max_inliers() -> usize {
    100
}

fn default_match_ratio() -> f64 {
    0.9
}

fn default_consensus_iterations() -> usize {
    100
}

fn default_reprojection_threshold() -> f64 {
    1.3
}

fn default_refinement_iterations() -> usize {
    10
}

fn default_cluster_radius() -> f64 {
    0.05
}

fn default_transform_timeout_ms() -> u64 {
    1000
}

fn default_consensus_seed() -> u64 {
    0
}
