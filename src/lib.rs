//! Stereo visual tracking front-end.
//!
//! Every synchronized input (odometry, a rectified stereo pair and both calibrations) is turned
//! into a [`Frame`] of triangulated features. The frame is matched against a fixed reference
//! frame, the relative motion is solved robustly, and the fixed frame is replaced whenever
//! tracking against it degrades. World points of fixed frames are handed to a [`MapSink`] and
//! every cycle is reported to a [`FramePublisher`].
//!
//! The entry point is [`Tracker::process`].

mod camera;
mod error;
mod fixed_frame;
mod frame;
mod map;
mod matching;
mod motion;
mod publisher;
mod settings;
mod stereo;
mod tracker;
mod transform;

pub use camera::*;
pub use error::*;
pub use fixed_frame::*;
pub use frame::*;
pub use map::*;
pub use matching::*;
pub use motion::*;
pub use publisher::*;
pub use settings::*;
pub use stereo::*;
pub use tracker::*;
pub use transform::*;
