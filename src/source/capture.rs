use std::path::Path;

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use super::{Frame, FrameSource, Mode, SourceError};

/// Video file or camera device read through `VideoCapture`.
pub struct CaptureSource {
    capture: VideoCapture,
    mode: Mode,
    location: String,
    frames_read: u64,
    finished: bool,
}

impl CaptureSource {
    pub fn open_video(path: &str) -> Result<Self, SourceError> {
        if !Path::new(path).is_file() {
            return Err(SourceError::unavailable(Mode::Video, path));
        }
        let capture = VideoCapture::from_file(path, videoio::CAP_ANY)?;
        Self::from_capture(capture, Mode::Video, path)
    }

    /// Numeric locations select a local device index, anything else is
    /// handed to the capture backend as a stream URL.
    pub fn open_camera(location: &str) -> Result<Self, SourceError> {
        let capture = match location.trim().parse::<i32>() {
            Ok(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
            Err(_) => VideoCapture::from_file(location, videoio::CAP_ANY)?,
        };
        Self::from_capture(capture, Mode::Camera, location)
    }

    fn from_capture(capture: VideoCapture, mode: Mode, location: &str) -> Result<Self, SourceError> {
        if !capture.is_opened()? {
            return Err(SourceError::unavailable(mode, location));
        }

        Ok(Self {
            capture,
            mode,
            location: location.to_string(),
            frames_read: 0,
            finished: false,
        })
    }
}

impl FrameSource for CaptureSource {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }

        let mut mat = Mat::default();
        match self.capture.read(&mut mat) {
            Ok(true) if !mat.empty() => {
                self.frames_read += 1;
                Some(Frame::new(mat))
            }
            Ok(_) => {
                tracing::debug!(
                    mode = %self.mode,
                    location = %self.location,
                    frames = self.frames_read,
                    "capture exhausted"
                );
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::warn!(
                    mode = %self.mode,
                    location = %self.location,
                    error = %e,
                    "capture read failed"
                );
                self.finished = true;
                None
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!(location = %self.location, error = %e, "failed to release capture");
        } else {
            tracing::debug!(mode = %self.mode, location = %self.location, "capture released");
        }
    }
}
