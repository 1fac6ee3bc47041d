//! Detection aggregation
//!
//! Turns one frame's raw inference batch into a [`DetectionSummary`]. The
//! aggregator is stateless across frames; every summary describes one frame.

use crate::labels::LabelTable;
use garuda_core::config::{MarkerLabels, VisionConfig};
use garuda_core::types::{
    Detection, DetectionSummary, FrameMeta, NormalizedBox, PixelBox, RawDetection,
};
use tracing::{debug, warn};

pub struct DetectionAggregator {
    labels: LabelTable,
    markers: MarkerLabels,
    min_confidence: f32,
}

impl DetectionAggregator {
    pub fn new(labels: LabelTable, config: &VisionConfig) -> Self {
        Self {
            labels,
            markers: config.labels.clone(),
            min_confidence: config.min_confidence,
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn aggregate(&self, meta: FrameMeta, raw: &[RawDetection]) -> DetectionSummary {
        let mut summary = DetectionSummary::empty(meta);

        for det in raw {
            if !self.passes_threshold(det.confidence) {
                continue;
            }

            let label = match self.labels.get(det.class_index) {
                Ok(label) => label,
                Err(err) => {
                    warn!(frame = meta.seq, error = %err, "dropping detection with unknown class");
                    summary.dropped_labels += 1;
                    continue;
                }
            };

            if label == self.markers.square {
                summary.counts.squares += 1;
            } else if label == self.markers.triangle {
                summary.counts.triangles += 1;
            }
            if label == self.markers.hotspot {
                summary.hotspot_present = true;
            }

            summary.detections.push(Detection {
                label: label.to_string(),
                confidence: det.confidence,
                bbox: to_pixels(&det.bbox, meta.width, meta.height),
            });
        }

        debug!(
            frame = meta.seq,
            raw = raw.len(),
            kept = summary.detections.len(),
            squares = summary.counts.squares,
            triangles = summary.counts.triangles,
            hotspot = summary.hotspot_present,
            "frame aggregated"
        );
        summary
    }

    /// Strictly above the threshold and no more than 1.0; NaN never passes
    fn passes_threshold(&self, confidence: f32) -> bool {
        confidence > self.min_confidence && confidence <= 1.0
    }
}

/// Scale a normalized box to pixel indices within `[1, dimension]`
pub fn to_pixels(bbox: &NormalizedBox, width: u32, height: u32) -> PixelBox {
    PixelBox {
        xmin: scale(bbox.xmin(), width),
        ymin: scale(bbox.ymin(), height),
        xmax: scale(bbox.xmax(), width),
        ymax: scale(bbox.ymax(), height),
    }
}

fn scale(coord: f32, dimension: u32) -> u32 {
    let dim = dimension.max(1) as f32;
    let px = coord * dim;
    if px.is_nan() {
        return 1;
    }
    px.clamp(1.0, dim) as u32
}
