use serde::{Deserialize, Serialize};

use super::object::{BoundingBox, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
}

/// Area cut-offs in square frame pixels. Both boundaries belong to `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThresholds {
    small: u32,
    large: u32,
}

impl SizeThresholds {
    pub fn new(small: u32, large: u32) -> Self {
        Self { small, large }
    }

    pub fn classify(&self, bbox: &BoundingBox) -> SizeBucket {
        let area = bbox.area();
        if area < self.small as f32 {
            SizeBucket::Small
        } else if area <= self.large as f32 {
            SizeBucket::Medium
        } else {
            SizeBucket::Large
        }
    }
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self::new(500, 2000)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeHistogram {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub total: usize,
}

impl SizeHistogram {
    pub fn from_detections<'a, I>(detections: I, thresholds: &SizeThresholds) -> Self
    where
        I: IntoIterator<Item = &'a Detection>,
    {
        let mut histogram = Self::default();
        for detection in detections {
            histogram.record(thresholds.classify(&detection.bbox));
        }
        histogram
    }

    pub fn record(&mut self, bucket: SizeBucket) {
        match bucket {
            SizeBucket::Small => self.small += 1,
            SizeBucket::Medium => self.medium += 1,
            SizeBucket::Large => self.large += 1,
        }
        self.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_with_area(area: f32) -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 10.0 + area, 11.0)
    }

    #[test]
    fn boundaries_are_medium() {
        let thresholds = SizeThresholds::default();
        assert_eq!(thresholds.classify(&box_with_area(499.0)), SizeBucket::Small);
        assert_eq!(thresholds.classify(&box_with_area(500.0)), SizeBucket::Medium);
        assert_eq!(thresholds.classify(&box_with_area(2000.0)), SizeBucket::Medium);
        assert_eq!(thresholds.classify(&box_with_area(2001.0)), SizeBucket::Large);
    }

    #[test]
    fn degenerate_boxes_are_small() {
        let thresholds = SizeThresholds::default();
        let point = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        let inverted = BoundingBox::new(50.0, 50.0, 10.0, 60.0);
        assert_eq!(thresholds.classify(&point), SizeBucket::Small);
        assert_eq!(thresholds.classify(&inverted), SizeBucket::Small);
    }

    #[test]
    fn custom_thresholds_move_the_buckets() {
        let thresholds = SizeThresholds::new(100, 200);
        assert_eq!(thresholds.classify(&box_with_area(150.0)), SizeBucket::Medium);
        assert_eq!(thresholds.classify(&box_with_area(500.0)), SizeBucket::Large);
    }

    #[test]
    fn histogram_total_matches_buckets() {
        let detections: Vec<Detection> = [100.0, 1000.0, 3000.0, 20.0]
            .into_iter()
            .map(|area| Detection::new(box_with_area(area), 0.9))
            .collect();

        let histogram = SizeHistogram::from_detections(&detections, &SizeThresholds::default());
        assert_eq!(
            histogram,
            SizeHistogram {
                small: 2,
                medium: 1,
                large: 1,
                total: 4
            }
        );
    }

    #[test]
    fn empty_histogram_is_zero() {
        let histogram = SizeHistogram::from_detections(&[], &SizeThresholds::default());
        assert_eq!(histogram, SizeHistogram::default());
    }
}
