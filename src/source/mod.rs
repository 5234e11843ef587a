//! Frame sources for the three input modes.
//!
//! A source holds an exclusive handle on its file or device for as long as it
//! lives. Dropping the boxed source releases the handle, so a run that stops
//! early still closes the capture.

mod capture;
mod image;
#[cfg(test)]
pub(crate) mod scripted;

use std::fmt;
use std::str::FromStr;

use opencv::core::{Mat, Scalar, CV_8UC3};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::CaptureSource;
pub use image::ImageSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{mode} source unavailable: {location}")]
    Unavailable { mode: Mode, location: String },
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl SourceError {
    pub(crate) fn unavailable(mode: Mode, location: &str) -> Self {
        Self::Unavailable {
            mode,
            location: location.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Image,
    Video,
    #[default]
    Camera,
}

impl Mode {
    /// Video and camera runs advance one frame per external tick.
    pub fn is_streaming(self) -> bool {
        !matches!(self, Mode::Image)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Image => "image",
            Mode::Video => "video",
            Mode::Camera => "camera",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Mode::Image),
            "video" => Ok(Mode::Video),
            "camera" => Ok(Mode::Camera),
            other => Err(format!("unknown input mode '{other}'")),
        }
    }
}

/// A decoded BGR frame.
pub struct Frame {
    mat: Mat,
}

impl Frame {
    pub fn new(mat: Mat) -> Self {
        Self { mat }
    }

    /// Solid black frame, mostly useful for fakes.
    pub fn blank(width: i32, height: i32) -> opencv::Result<Self> {
        let mat = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
        Ok(Self { mat })
    }

    pub fn width(&self) -> i32 {
        self.mat.cols()
    }

    pub fn height(&self) -> i32 {
        self.mat.rows()
    }

    pub fn channels(&self) -> i32 {
        self.mat.channels()
    }

    pub fn mat(&self) -> &Mat {
        &self.mat
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("channels", &self.channels())
            .finish()
    }
}

pub trait FrameSource: Send {
    fn mode(&self) -> Mode;

    /// Pull the next frame. `None` marks the end of the stream and is sticky.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Opens frame sources on behalf of the controller.
pub trait SourceProvider: Send {
    fn open(&mut self, mode: Mode, location: &str) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Sources backed by OpenCV image decoding and `VideoCapture`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvSources;

impl SourceProvider for OpenCvSources {
    fn open(&mut self, mode: Mode, location: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let source: Box<dyn FrameSource> = match mode {
            Mode::Image => Box::new(ImageSource::open(location)?),
            Mode::Video => Box::new(CaptureSource::open_video(location)?),
            Mode::Camera => Box::new(CaptureSource::open_camera(location)?),
        };
        tracing::info!(mode = %mode, location = %location, "frame source opened");
        Ok(source)
    }
}
