mod aggregator;
mod annotate;
mod controller;
mod object;
mod size;

pub use aggregator::{DetectionSet, Snapshot, SnapshotReader};
pub use annotate::{AnnotatedFrame, Annotator};
pub use controller::{ControllerError, RunStats, StreamController, TickOutcome};
pub use object::OnnxModelLoader;
pub use size::{SizeHistogram, SizeThresholds};
