use crate::{Frame, MapSink};
use log::*;

/// What to do with the fixed frame after a motion estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedFrameDecision {
    /// Tracking is healthy; keep the fixed frame.
    Keep,
    /// Still bootstrapping and the estimate was poor: the current frame becomes the fixed
    /// frame without touching the map.
    Restart,
    /// Bootstrapping succeeded: the fixed frame seeds the map and tracking starts.
    Promote,
    /// Tracking degraded: the current frame becomes the fixed frame and grows the map.
    Replace,
}

impl FixedFrameDecision {
    /// Whether the next cycle must solve without the previous estimate.
    pub fn resets_fixed_frame(self) -> bool {
        matches!(self, Self::Restart | Self::Replace)
    }
}

/// Decides when the fixed frame is replaced and performs the map growth that comes with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFrameManager {
    pub min_inliers: usize,
    /// Voxel size used when merging world points.
    pub cluster_radius: f64,
}

impl FixedFrameManager {
    pub fn new(min_inliers: usize, cluster_radius: f64) -> Self {
        Self {
            min_inliers,
            cluster_radius,
        }
    }

    pub fn decide(&self, bootstrapping: bool, inliers: usize) -> FixedFrameDecision {
        match (bootstrapping, inliers >= self.min_inliers) {
            (true, false) => FixedFrameDecision::Restart,
            (true, true) => FixedFrameDecision::Promote,
            (false, true) => FixedFrameDecision::Keep,
            (false, false) => FixedFrameDecision::Replace,
        }
    }

    /// Applies `decision` to the `fixed` slot, consuming `current`.
    ///
    /// Returns true if the map grew.
    pub fn apply<M>(
        &self,
        decision: FixedFrameDecision,
        fixed: &mut Frame,
        current: Frame,
        map: &mut M,
    ) -> bool
    where
        M: MapSink + ?Sized,
    {
        match decision {
            FixedFrameDecision::Keep => false,
            FixedFrameDecision::Restart => {
                debug!("bootstrap estimate was poor; restarting from the current frame");
                *fixed = current;
                false
            }
            FixedFrameDecision::Promote => {
                info!("bootstrap finished; seeding the map from the fixed frame");
                self.grow_map(fixed, map);
                true
            }
            FixedFrameDecision::Replace => {
                info!(
                    "only {} inliers against the fixed frame; replacing it",
                    current.inliers()
                );
                *fixed = current;
                self.grow_map(fixed, map);
                true
            }
        }
    }

    fn grow_map<M>(&self, frame: &mut Frame, map: &mut M)
    where
        M: MapSink + ?Sized,
    {
        frame.compute_world_points();
        frame.cluster_world_points(self.cluster_radius);
        map.add_points(frame);
    }
}
