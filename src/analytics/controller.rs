use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use super::aggregator::{DetectionSet, Snapshot, SnapshotReader, StreamAggregator};
use super::annotate::{AnnotatedFrame, Annotator};
use super::object::{Detection, DetectionError, Detector, ModelLoadError, ModelLoader};
use super::size::{SizeHistogram, SizeThresholds};
use crate::source::{Frame, FrameSource, Mode, SourceError, SourceProvider};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no detection model loaded")]
    ModelMissing,
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("detection failed: {0}")]
    DetectionFailure(#[from] DetectionError),
    #[error("a {0} run is already in progress")]
    RunInProgress(Mode),
    #[error("controller is bound to {expected} mode, {requested} was requested")]
    ModeMismatch { expected: Mode, requested: Mode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No model loaded.
    Idle,
    /// Model loaded, no run yet.
    Ready,
    /// Source open, frames are pulled on each tick.
    Running,
    /// Source released; the last snapshot stays readable.
    Stopped,
}

#[derive(Debug)]
pub enum TickOutcome {
    Observed(Snapshot),
    /// The source ran dry and the run has stopped.
    EndOfStream,
    /// Nothing to do outside a run.
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub frames_observed: u64,
    pub detection_failures: u64,
}

/// Drives source, detector and aggregator for one input mode.
///
/// The controller never loops or sleeps on its own. Streaming modes advance
/// one frame per [`tick`](Self::tick), which the caller schedules; taking
/// `&mut self` keeps two ticks from ever overlapping.
pub struct StreamController {
    mode: Mode,
    state: ControllerState,
    loader: Box<dyn ModelLoader>,
    sources: Box<dyn SourceProvider>,
    detector: Option<Box<dyn Detector>>,
    source: Option<Box<dyn FrameSource>>,
    location: Option<String>,
    annotator: Option<Annotator>,
    aggregator: StreamAggregator,
    stats: RunStats,
}

impl StreamController {
    pub fn new<L, S>(
        mode: Mode,
        loader: L,
        sources: S,
        thresholds: SizeThresholds,
        annotator: Option<Annotator>,
    ) -> Self
    where
        L: ModelLoader + 'static,
        S: SourceProvider + 'static,
    {
        Self {
            mode,
            state: ControllerState::Idle,
            loader: Box::new(loader),
            sources: Box::new(sources),
            detector: None,
            source: None,
            location: None,
            annotator,
            aggregator: StreamAggregator::new(thresholds),
            stats: RunStats::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Location of the current or most recent run.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Handle for readers on other threads.
    pub fn reader(&self) -> SnapshotReader {
        self.aggregator.reader()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.aggregator.snapshot()
    }

    pub fn size_histogram(&self) -> SizeHistogram {
        self.aggregator.snapshot_size_histogram()
    }

    /// Install a detector built from `path`. A failed load keeps the
    /// previously loaded detector, and the running maximum is untouched.
    pub fn load_model(&mut self, path: &Path) -> Result<(), ControllerError> {
        if self.state == ControllerState::Running {
            return Err(ControllerError::RunInProgress(self.mode));
        }

        let detector = self.loader.load(path).map_err(|e| {
            tracing::error!(model = %path.display(), error = %e, "failed to load model");
            e
        })?;

        tracing::info!(
            mode = %self.mode,
            model = %path.display(),
            detector = %detector.name(),
            "model selected"
        );
        self.detector = Some(detector);
        if self.state == ControllerState::Idle {
            self.state = ControllerState::Ready;
        }
        Ok(())
    }

    pub fn start_run(&mut self, mode: Mode, location: &str) -> Result<(), ControllerError> {
        if mode != self.mode {
            return Err(ControllerError::ModeMismatch {
                expected: self.mode,
                requested: mode,
            });
        }
        if self.state == ControllerState::Running {
            return Err(ControllerError::RunInProgress(self.mode));
        }
        if self.detector.is_none() {
            return Err(ControllerError::ModelMissing);
        }

        let source = self.sources.open(mode, location).map_err(|e| {
            tracing::error!(
                mode = %mode,
                location = %location,
                error = %e,
                "failed to open source"
            );
            e
        })?;

        self.aggregator.reset();
        self.stats = RunStats::default();
        self.source = Some(source);
        self.location = Some(location.to_string());
        self.state = ControllerState::Running;

        tracing::info!(mode = %mode, location = %location, "run started");
        Ok(())
    }

    /// One pull-detect-observe step.
    ///
    /// A detection failure is returned as an error but only ends the run in
    /// image mode; streaming runs stay `Running` for the next tick.
    pub fn tick(&mut self) -> Result<TickOutcome, ControllerError> {
        if self.state != ControllerState::Running {
            return Ok(TickOutcome::Idle);
        }

        let Some(frame) = self.source.as_mut().and_then(|s| s.next_frame()) else {
            self.finish("end of stream");
            return Ok(TickOutcome::EndOfStream);
        };

        let result = match self.detector.as_mut() {
            Some(detector) => detector.detect(&frame),
            None => {
                self.finish("model missing");
                return Err(ControllerError::ModelMissing);
            }
        };

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detection_failures += 1;
                tracing::warn!(
                    mode = %self.mode,
                    frame = self.stats.frames_observed + self.stats.detection_failures,
                    error = %e,
                    "detection failed, frame skipped"
                );
                if !self.mode.is_streaming() {
                    self.finish("single pass failed");
                }
                return Err(e.into());
            }
        };

        let annotated = self.annotate(&frame, &detections);
        let snapshot = self
            .aggregator
            .observe(DetectionSet::new(detections, annotated));
        self.stats.frames_observed += 1;

        tracing::debug!(
            mode = %self.mode,
            count = snapshot.count,
            running_max = snapshot.running_max_count,
            "frame observed"
        );

        if !self.mode.is_streaming() {
            self.finish("single pass complete");
        }

        Ok(TickOutcome::Observed(snapshot))
    }

    /// Release the source now. Safe to call at any time; the last snapshot
    /// stays readable until the next run starts.
    pub fn stop_run(&mut self) {
        if self.state == ControllerState::Running {
            self.finish("stop requested");
        } else {
            tracing::trace!(state = ?self.state, "stop ignored outside a run");
        }
    }

    fn finish(&mut self, reason: &str) {
        self.source = None;
        self.state = ControllerState::Stopped;
        tracing::info!(
            mode = %self.mode,
            reason,
            frames = self.stats.frames_observed,
            failures = self.stats.detection_failures,
            running_max = self.aggregator.running_max_count(),
            "run stopped"
        );
    }

    fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Option<AnnotatedFrame> {
        let annotator = self.annotator.as_ref()?;
        match annotator.render(frame, detections) {
            Ok(annotated) => Some(annotated),
            Err(e) => {
                tracing::warn!(error = %e, "failed to render preview");
                None
            }
        }
    }
}
