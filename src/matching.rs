use crate::Descriptor;
use bitarray::Hamming;
use derive_more::Constructor;
use log::*;
use space::{Knn, LinearKnn};

/// A descriptor match between the fixed frame and the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Constructor)]
pub struct Correspondence {
    /// Feature index in the fixed frame.
    pub fixed: usize,
    /// Feature index in the current frame.
    pub current: usize,
}

/// Finds current to fixed descriptor matches that pass a distance ratio test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondenceMatcher {
    /// The best neighbor is accepted when its distance is at most `ratio` times the distance
    /// of the second best neighbor.
    pub ratio: f64,
}

impl CorrespondenceMatcher {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    /// Matches every current descriptor against the fixed descriptors.
    ///
    /// The output follows the order of `current`. A fixed feature may be matched by several
    /// current features. Queries with fewer than two neighbors are skipped.
    pub fn match_descriptors(
        &self,
        current: &[Descriptor],
        fixed: &[Descriptor],
    ) -> Vec<Correspondence> {
        let knn_fixed = LinearKnn {
            metric: Hamming,
            iter: fixed.iter(),
        };
        let correspondences: Vec<Correspondence> = current
            .iter()
            .enumerate()
            .filter_map(|(current_ix, descriptor)| {
                let neighbors = knn_fixed.knn(descriptor, 2);
                if neighbors.len() < 2 {
                    return None;
                }
                let (best, second) = (&neighbors[0], &neighbors[1]);
                if best.distance as f64 <= second.distance as f64 * self.ratio {
                    Some(Correspondence::new(best.index, current_ix))
                } else {
                    None
                }
            })
            .collect();
        debug!(
            "matched {} of {} current descriptors against {} fixed descriptors",
            correspondences.len(),
            current.len(),
            fixed.len()
        );
        correspondences
    }
}

impl Default for CorrespondenceMatcher {
    fn default() -> Self {
        Self::new(0.9)
    }
}
