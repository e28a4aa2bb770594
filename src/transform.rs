use crate::TrackingError;
use cv_core::nalgebra::IsometryMatrix3;
use log::*;
use std::collections::HashMap;
use std::time::Duration;

/// A service that can resolve the rigid transform between two named coordinate frames.
pub trait TransformResolver {
    /// Retrieves the transform that maps points expressed in `source` into `target`.
    ///
    /// Implementations that block must give up after `timeout` and fail with
    /// [`TrackingError::TransformUnavailable`].
    fn lookup(
        &self,
        target: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<IsometryMatrix3<f64>, TrackingError>;
}

impl<T> TransformResolver for &T
where
    T: TransformResolver + ?Sized,
{
    fn lookup(
        &self,
        target: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<IsometryMatrix3<f64>, TrackingError> {
        (**self).lookup(target, source, timeout)
    }
}

/// Resolves the odometry child frame to camera frame transform once and keeps it for the
/// rest of the session.
#[derive(Debug, Clone)]
pub struct CoordinateFrameResolver<R> {
    resolver: R,
    timeout: Duration,
    cached: Option<IsometryMatrix3<f64>>,
}

impl<R> CoordinateFrameResolver<R>
where
    R: TransformResolver,
{
    pub fn new(resolver: R, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            cached: None,
        }
    }

    /// Returns the transform mapping camera points into the odometry child frame.
    ///
    /// The underlying resolver is only queried until the first success. A failure leaves
    /// nothing cached, so the next call queries again.
    pub fn resolve(
        &mut self,
        odometry_frame: &str,
        camera_frame: &str,
    ) -> Result<IsometryMatrix3<f64>, TrackingError> {
        if let Some(transform) = self.cached {
            return Ok(transform);
        }
        let transform = self
            .resolver
            .lookup(odometry_frame, camera_frame, self.timeout)
            .map_err(|e| {
                warn!("{}", e);
                e
            })?;
        info!(
            "resolved transform from `{}` to `{}`",
            camera_frame, odometry_frame
        );
        self.cached = Some(transform);
        Ok(transform)
    }

    /// The cached transform, if it was resolved.
    pub fn cached(&self) -> Option<IsometryMatrix3<f64>> {
        self.cached
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

/// A static tree of named coordinate frames.
///
/// Every frame other than a root has exactly one parent. Lookups are answered by walking both
/// frames up to their root, which must be shared.
#[derive(Debug, Clone, Default)]
pub struct TransformTree {
    /// Maps a child frame to its parent and the transform from child to parent coordinates.
    edges: HashMap<String, (String, IsometryMatrix3<f64>)>,
}

impl TransformTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pose of `child` in `parent`, which maps `child` points into `parent`.
    ///
    /// A previous parent of `child` is replaced.
    pub fn insert(
        &mut self,
        parent: impl Into<String>,
        child: impl Into<String>,
        parent_from_child: IsometryMatrix3<f64>,
    ) {
        self.edges
            .insert(child.into(), (parent.into(), parent_from_child));
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Walks from `frame` up to its root, returning the root name and the transform mapping
    /// `frame` points into the root.
    fn to_root<'a>(&'a self, frame: &'a str) -> Option<(&'a str, IsometryMatrix3<f64>)> {
        let mut current = frame;
        let mut root_from_frame = IsometryMatrix3::identity();
        // A well formed tree never visits more frames than it has edges.
        for _ in 0..=self.edges.len() {
            match self.edges.get(current) {
                Some((parent, parent_from_current)) => {
                    root_from_frame = parent_from_current * root_from_frame;
                    current = parent;
                }
                None => return Some((current, root_from_frame)),
            }
        }
        None
    }

    fn knows(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.edges.values().any(|(parent, _)| parent == frame)
    }
}

impl TransformResolver for TransformTree {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        _timeout: Duration,
    ) -> Result<IsometryMatrix3<f64>, TrackingError> {
        if target == source {
            return Ok(IsometryMatrix3::identity());
        }
        for frame in [target, source] {
            if !self.knows(frame) {
                return Err(TrackingError::transform_unavailable(
                    target,
                    source,
                    format!("frame `{}` does not exist", frame),
                ));
            }
        }
        let cycle =
            || TrackingError::transform_unavailable(target, source, "transform tree has a cycle");
        let (target_root, root_from_target) = self.to_root(target).ok_or_else(cycle)?;
        let (source_root, root_from_source) = self.to_root(source).ok_or_else(cycle)?;
        if target_root != source_root {
            return Err(TrackingError::transform_unavailable(
                target,
                source,
                format!(
                    "frames are in disconnected trees rooted at `{}` and `{}`",
                    target_root, source_root
                ),
            ));
        }
        Ok(root_from_target.inverse() * root_from_source)
    }
}
