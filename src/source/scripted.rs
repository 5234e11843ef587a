//! In-memory sources for exercising the controller without files or devices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Frame, FrameSource, Mode, SourceError, SourceProvider};

pub(crate) struct ScriptedSource {
    mode: Mode,
    frames: VecDeque<Frame>,
    released: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens sources holding `frames_per_run` blank frames (one for image mode).
pub(crate) struct ScriptedSources {
    frames_per_run: usize,
    unavailable: bool,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedSources {
    pub fn with_frames(frames_per_run: usize) -> Self {
        Self {
            frames_per_run,
            unavailable: false,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::with_frames(0)
        }
    }
}

impl SourceProvider for ScriptedSources {
    fn open(&mut self, mode: Mode, location: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        if self.unavailable {
            return Err(SourceError::unavailable(mode, location));
        }

        let count = if mode.is_streaming() {
            self.frames_per_run
        } else {
            1
        };
        let mut frames = VecDeque::with_capacity(count);
        for _ in 0..count {
            frames.push_back(Frame::blank(64, 48)?);
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            mode,
            frames,
            released: Arc::clone(&self.released),
        }))
    }
}
