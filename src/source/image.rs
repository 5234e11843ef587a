use std::path::Path;

use opencv::imgcodecs;
use opencv::prelude::*;

use super::{Frame, FrameSource, Mode, SourceError};

/// Yields a single decoded image once, then ends.
pub struct ImageSource {
    frame: Option<Frame>,
}

impl ImageSource {
    pub fn open(path: &str) -> Result<Self, SourceError> {
        if !Path::new(path).is_file() {
            return Err(SourceError::unavailable(Mode::Image, path));
        }

        let mat = imgcodecs::imread(path, imgcodecs::IMREAD_COLOR)?;
        if mat.empty() {
            return Err(SourceError::unavailable(Mode::Image, path));
        }

        tracing::debug!(
            path = %path,
            width = mat.cols(),
            height = mat.rows(),
            "image decoded"
        );

        Ok(Self::from_frame(Frame::new(mat)))
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl FrameSource for ImageSource {
    fn mode(&self) -> Mode {
        Mode::Image
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.frame.take()
    }
}
