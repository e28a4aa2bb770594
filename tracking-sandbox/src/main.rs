use akaze::Akaze;
use cv_core::nalgebra::{
    IsometryMatrix3, Quaternion, Translation3, UnitQuaternion, Vector3,
};
use cv_tracking::{
    AkazeStereoExtractor, CameraInfo, FramePublisher, LogPublisher, Odometry, PointMap,
    StereoImages, Tracker, TrackingEvent, TrackingInput, TrackingReport, TrackingSettings,
    TrackingState, TransformTree,
};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "tracking-sandbox",
    about = "A tool for running the stereo tracking front-end over recorded sequences"
)]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `cv_tracking::TrackingSettings`. Missing fields take their
    /// default value, and a missing file uses the default settings.
    #[structopt(short, long, default_value = "tracking-settings.json")]
    settings: PathBuf,
    /// The calibration of both rectified cameras, as `{"left": .., "right": ..}`.
    #[structopt(short, long)]
    calibration: PathBuf,
    /// The static transforms between named frames.
    #[structopt(short, long)]
    transforms: PathBuf,
    /// The AKAZE detector threshold.
    #[structopt(long, default_value = "0.001")]
    akaze_threshold: f64,
    /// How many rows apart stereo matches may be.
    #[structopt(long, default_value = "2.0")]
    epipolar_tolerance: f64,
    /// The smallest disparity, in pixels, that is triangulated.
    #[structopt(long, default_value = "1.0")]
    min_disparity: f64,
    /// Output JSON file to deposit the trajectory and map points.
    #[structopt(short, long)]
    output: Option<PathBuf>,
    /// The sequence of odometry samples and the image pairs recorded with them.
    #[structopt(parse(from_os_str))]
    sequence: PathBuf,
}

#[derive(Deserialize)]
struct Calibration {
    left: CameraInfo,
    right: CameraInfo,
}

/// A pose as a translation and an `[x, y, z, w]` quaternion.
#[derive(Deserialize, Clone, Copy)]
struct PoseRecord {
    translation: [f64; 3],
    rotation: [f64; 4],
}

impl PoseRecord {
    fn isometry(&self) -> IsometryMatrix3<f64> {
        let [x, y, z, w] = self.rotation;
        IsometryMatrix3::from_parts(
            Translation3::from(Vector3::from(self.translation)),
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)).to_rotation_matrix(),
        )
    }
}

#[derive(Deserialize)]
struct StaticTransform {
    parent: String,
    child: String,
    #[serde(flatten)]
    pose: PoseRecord,
}

#[derive(Deserialize)]
struct SequenceEntry {
    frame_id: String,
    child_frame_id: String,
    #[serde(flatten)]
    pose: PoseRecord,
    left: PathBuf,
    right: PathBuf,
}

#[derive(Serialize)]
struct TrajectoryEntry {
    cycle: u64,
    state: TrackingState,
    correspondences: usize,
    inliers: usize,
    fixed_frame_replaced: bool,
    position: Option<[f64; 3]>,
    odometry_position: [f64; 3],
}

impl From<&TrackingReport> for TrajectoryEntry {
    fn from(report: &TrackingReport) -> Self {
        let position = |pose: &IsometryMatrix3<f64>| {
            let t = pose.translation.vector;
            [t.x, t.y, t.z]
        };
        Self {
            cycle: report.cycle,
            state: report.state,
            correspondences: report.correspondences,
            inliers: report.inliers,
            fixed_frame_replaced: report.fixed_frame_replaced,
            position: report.pose.as_ref().map(position),
            odometry_position: position(&report.odometry_pose),
        }
    }
}

#[derive(Serialize)]
struct Output {
    trajectory: Vec<TrajectoryEntry>,
    points: Vec<[f64; 3]>,
}

/// Logs every report and keeps the trajectory for export.
#[derive(Default)]
struct Recorder {
    log: LogPublisher,
    trajectory: Vec<TrajectoryEntry>,
}

impl FramePublisher for Recorder {
    fn update(&mut self, report: &TrackingReport) {
        self.log.update(report);
        self.trajectory.push(report.into());
    }
}

fn read_json<T>(path: &Path) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!("unable to open {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_reader(file) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("unable to parse {}: {}", path.display(), e);
            None
        }
    }
}

fn load_pair(entry: &SequenceEntry) -> Option<StereoImages> {
    let open = |path: &Path| {
        image::open(path)
            .map_err(|e| warn!("unable to load image {}: {}", path.display(), e))
            .ok()
    };
    Some(StereoImages {
        left: open(&entry.left)?,
        right: open(&entry.right)?,
    })
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let settings = std::fs::File::open(&opt.settings)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    let settings: TrackingSettings = settings.unwrap_or_default();

    let (calibration, transforms, sequence) = match (
        read_json::<Calibration>(&opt.calibration),
        read_json::<Vec<StaticTransform>>(&opt.transforms),
        read_json::<Vec<SequenceEntry>>(&opt.sequence),
    ) {
        (Some(calibration), Some(transforms), Some(sequence)) => {
            (calibration, transforms, sequence)
        }
        _ => std::process::exit(1),
    };

    let mut tree = TransformTree::new();
    for transform in &transforms {
        tree.insert(
            transform.parent.clone(),
            transform.child.clone(),
            transform.pose.isometry(),
        );
    }
    info!("loaded {} static transforms", tree.len());

    let extractor = AkazeStereoExtractor {
        akaze: Akaze::new(opt.akaze_threshold),
        epipolar_tolerance: opt.epipolar_tolerance,
        min_disparity: opt.min_disparity,
        ..Default::default()
    };
    let mut tracker = Tracker::new(
        settings,
        extractor,
        tree,
        PointMap::new(),
        Recorder::default(),
    );

    for entry in &sequence {
        let images = match load_pair(entry) {
            Some(images) => images,
            None => continue,
        };
        let input = TrackingInput {
            odometry: Odometry {
                frame_id: entry.frame_id.clone(),
                child_frame_id: entry.child_frame_id.clone(),
                pose: entry.pose.isometry(),
            },
            images,
            left_info: calibration.left.clone(),
            right_info: calibration.right.clone(),
        };
        match tracker.process(&input) {
            Ok(TrackingEvent::Initialized) => info!("tracker initialized"),
            Ok(TrackingEvent::Tracked(_)) => {}
            Err(e) => warn!("dropped input: {}", e),
        }
    }

    info!(
        "finished in state {:?} with {} map points",
        tracker.state(),
        tracker.map().len()
    );

    if let Some(path) = opt.output {
        let output = Output {
            trajectory: std::mem::take(&mut tracker.publisher_mut().trajectory),
            points: tracker
                .map()
                .points
                .iter()
                .map(|p| [p.x, p.y, p.z])
                .collect(),
        };
        info!("exporting the trajectory to {}", path.display());
        match std::fs::File::create(&path) {
            Ok(file) => {
                if let Err(e) = serde_json::to_writer_pretty(file, &output) {
                    error!("unable to write output: {}", e);
                }
            }
            Err(e) => error!("unable to create {}: {}", path.display(), e),
        }
    }
}
