//! AKAZE based stereo feature extraction for rectified image pairs.

use crate::{Descriptor, Frame, FrameExtractor, StereoCamera, StereoFeature};
use akaze::Akaze;
use bitarray::Hamming;
use cv_core::nalgebra::Point2;
use image::DynamicImage;
use log::*;
use space::Metric;

/// A rectified stereo image pair.
#[derive(Debug, Clone)]
pub struct StereoImages {
    pub left: DynamicImage,
    pub right: DynamicImage,
}

/// Extracts AKAZE features from both images and keeps the left features that have an
/// unambiguous match on the same row of the right image.
#[derive(Debug, Clone, Copy)]
pub struct AkazeStereoExtractor {
    pub akaze: Akaze,
    /// How far apart in rows, in pixels, a left and right feature may be and still match.
    pub epipolar_tolerance: f64,
    /// Matches with a smaller disparity than this are dropped, since their depth is unreliable.
    pub min_disparity: f64,
    /// The best right feature must be at most this fraction of the second best.
    pub ratio: f64,
}

impl AkazeStereoExtractor {
    pub fn new(akaze: Akaze) -> Self {
        Self {
            akaze,
            ..Default::default()
        }
    }

    /// Matches left features against right features along the epipolar rows and triangulates
    /// the surviving matches.
    pub fn match_stereo(
        &self,
        left: (&[Point2<f64>], &[Descriptor]),
        right: (&[Point2<f64>], &[Descriptor]),
        camera: &StereoCamera,
    ) -> Vec<StereoFeature> {
        let (left_keypoints, left_descriptors) = left;
        let (right_keypoints, right_descriptors) = right;
        left_keypoints
            .iter()
            .zip(left_descriptors)
            .filter_map(|(&keypoint, descriptor)| {
                let mut best: Option<(u32, f64)> = None;
                let mut second: Option<u32> = None;
                for (right_keypoint, right_descriptor) in
                    right_keypoints.iter().zip(right_descriptors)
                {
                    let disparity = keypoint.x - right_keypoint.x;
                    if (keypoint.y - right_keypoint.y).abs() > self.epipolar_tolerance
                        || disparity < self.min_disparity
                    {
                        continue;
                    }
                    let distance = Hamming.distance(descriptor, right_descriptor);
                    match best {
                        Some((best_distance, _)) if distance >= best_distance => {
                            if second.map_or(true, |second| distance < second) {
                                second = Some(distance);
                            }
                        }
                        _ => {
                            second = best.map(|(best_distance, _)| best_distance);
                            best = Some((distance, disparity));
                        }
                    }
                }
                let (best_distance, disparity) = best?;
                if let Some(second) = second {
                    if best_distance as f64 > second as f64 * self.ratio {
                        return None;
                    }
                }
                let point = camera.triangulate(keypoint, disparity)?;
                Some(StereoFeature::new(keypoint, *descriptor, point))
            })
            .collect()
    }
}

impl Default for AkazeStereoExtractor {
    fn default() -> Self {
        Self {
            akaze: Akaze::sparse(),
            epipolar_tolerance: 2.0,
            min_disparity: 1.0,
            ratio: 0.8,
        }
    }
}

impl FrameExtractor<StereoImages> for AkazeStereoExtractor {
    fn extract(&mut self, images: &StereoImages, camera: &StereoCamera) -> Frame {
        let pixels = |keypoints: Vec<akaze::KeyPoint>| -> Vec<Point2<f64>> {
            keypoints
                .iter()
                .map(|kp| Point2::new(kp.point.0 as f64, kp.point.1 as f64))
                .collect()
        };
        let (left_keypoints, left_descriptors) = self.akaze.extract(&images.left);
        let (right_keypoints, right_descriptors) = self.akaze.extract(&images.right);
        let left_keypoints = pixels(left_keypoints);
        let right_keypoints = pixels(right_keypoints);
        let features = self.match_stereo(
            (&left_keypoints[..], &left_descriptors[..]),
            (&right_keypoints[..], &right_descriptors[..]),
            camera,
        );
        debug!(
            "triangulated {} of {} left features ({} right features)",
            features.len(),
            left_keypoints.len(),
            right_keypoints.len()
        );
        Frame::new(features)
    }
}
