use std::sync::{Arc, PoisonError, RwLock};

use super::annotate::AnnotatedFrame;
use super::object::Detection;
use super::size::{SizeHistogram, SizeThresholds};

/// Detections found in one frame, plus an optional rendered preview.
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
    detections: Vec<Detection>,
    annotated: Option<AnnotatedFrame>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>, annotated: Option<AnnotatedFrame>) -> Self {
        Self {
            detections,
            annotated,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn annotated(&self) -> Option<&AnnotatedFrame> {
        self.annotated.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub count: usize,
    pub running_max_count: usize,
    pub latest: Option<Arc<DetectionSet>>,
}

impl Snapshot {
    pub fn latest_annotated_frame(&self) -> Option<&AnnotatedFrame> {
        self.latest.as_deref().and_then(DetectionSet::annotated)
    }

    fn size_histogram(&self, thresholds: &SizeThresholds) -> SizeHistogram {
        match &self.latest {
            Some(set) => SizeHistogram::from_detections(set.detections(), thresholds),
            None => SizeHistogram::default(),
        }
    }
}

/// Read-only handle on the most recently published snapshot.
///
/// Snapshots are replaced whole, so a reader always sees a detection set
/// together with the running maximum that was current when it was observed.
#[derive(Clone)]
pub struct SnapshotReader {
    published: Arc<RwLock<Snapshot>>,
    thresholds: SizeThresholds,
}

impl SnapshotReader {
    pub fn snapshot(&self) -> Snapshot {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn size_histogram(&self) -> SizeHistogram {
        self.snapshot().size_histogram(&self.thresholds)
    }
}

/// Folds per-frame detections into the running statistics of one run.
pub struct StreamAggregator {
    running_max_count: usize,
    latest: Option<Arc<DetectionSet>>,
    thresholds: SizeThresholds,
    published: Arc<RwLock<Snapshot>>,
}

impl StreamAggregator {
    pub fn new(thresholds: SizeThresholds) -> Self {
        Self {
            running_max_count: 0,
            latest: None,
            thresholds,
            published: Arc::new(RwLock::new(Snapshot::default())),
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            published: Arc::clone(&self.published),
            thresholds: self.thresholds,
        }
    }

    /// Start of a new run: forget the previous maximum and detection set.
    pub fn reset(&mut self) {
        self.running_max_count = 0;
        self.latest = None;
        self.publish(Snapshot::default());
    }

    pub fn observe(&mut self, set: DetectionSet) -> Snapshot {
        let count = set.len();
        self.running_max_count = self.running_max_count.max(count);
        self.latest = Some(Arc::new(set));

        let snapshot = self.snapshot();
        self.publish(snapshot.clone());
        snapshot
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            count: self.latest.as_ref().map_or(0, |set| set.len()),
            running_max_count: self.running_max_count,
            latest: self.latest.clone(),
        }
    }

    pub fn snapshot_size_histogram(&self) -> SizeHistogram {
        self.snapshot().size_histogram(&self.thresholds)
    }

    pub fn running_max_count(&self) -> usize {
        self.running_max_count
    }

    fn publish(&self, snapshot: Snapshot) {
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}
