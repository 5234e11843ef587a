use std::path::Path;

use serde::Serialize;

use crate::analytics::{RunStats, SizeHistogram, Snapshot, StreamController};
use crate::source::Mode;

/// Summary printed once a run has finished.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub location: Option<String>,
    pub count: usize,
    pub running_max_count: usize,
    pub sizes: SizeHistogram,
    #[serde(flatten)]
    pub stats: RunStats,
}

impl RunReport {
    pub fn from_controller(controller: &StreamController) -> Self {
        let snapshot = controller.snapshot();
        Self {
            mode: controller.mode(),
            location: controller.location().map(str::to_string),
            count: snapshot.count,
            running_max_count: snapshot.running_max_count,
            sizes: controller.size_histogram(),
            stats: controller.stats(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Overwrite `path` with the snapshot's preview, if it has one.
pub fn write_preview(snapshot: &Snapshot, path: &Path) -> std::io::Result<bool> {
    let Some(preview) = snapshot.latest_annotated_frame() else {
        return Ok(false);
    };
    std::fs::write(path, &preview.jpeg)?;
    tracing::trace!(
        path = %path.display(),
        width = preview.width,
        height = preview.height,
        "preview written"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analytics::{AnnotatedFrame, DetectionSet};

    #[test]
    fn report_serializes_flat_stats() {
        let report = RunReport {
            mode: Mode::Video,
            location: Some("tank.mp4".to_string()),
            count: 3,
            running_max_count: 5,
            sizes: SizeHistogram {
                small: 1,
                medium: 1,
                large: 1,
                total: 3,
            },
            stats: RunStats {
                frames_observed: 3,
                detection_failures: 0,
            },
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["mode"], "video");
        assert_eq!(value["running_max_count"], 5);
        assert_eq!(value["sizes"]["total"], 3);
        assert_eq!(value["frames_observed"], 3);
    }

    #[test]
    fn preview_written_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");

        assert!(!write_preview(&Snapshot::default(), &path).unwrap());
        assert!(!path.exists());

        let preview = AnnotatedFrame {
            width: 2,
            height: 2,
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
        };
        let snapshot = Snapshot {
            count: 0,
            running_max_count: 0,
            latest: Some(Arc::new(DetectionSet::new(Vec::new(), Some(preview)))),
        };
        assert!(write_preview(&snapshot, &path).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
