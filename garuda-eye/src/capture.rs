//! Capture policy and persistence
//!
//! [`CapturePolicy`] decides which categories a frame qualifies for without any
//! side effects. [`CaptureRecorder`] names and stores the qualifying frames
//! through a [`CaptureSink`].

use garuda_core::config::{CaptureConfig, CollisionPolicy};
use garuda_core::error::PersistenceError;
use garuda_core::types::{
    CaptureCategory, CaptureRecord, Detection, DetectionSummary, Frame, PixelBox,
};
use chrono::{DateTime, Local, Timelike};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BOX_COLOUR: Rgb<u8> = Rgb([10, 255, 0]);
const BOX_THICKNESS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    enabled: bool,
}

impl CapturePolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Categories this frame qualifies for; shape-pair first, then hotspot
    pub fn evaluate(&self, summary: &DetectionSummary) -> Vec<CaptureCategory> {
        let mut categories = Vec::new();
        if !self.enabled {
            return categories;
        }
        if summary.counts.is_pair() {
            categories.push(CaptureCategory::ShapePair {
                squares: summary.counts.squares,
                triangles: summary.counts.triangles,
            });
        }
        if summary.hotspot_present {
            categories.push(CaptureCategory::Hotspot);
        }
        categories
    }
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Builds capture file paths and resolves same-second name collisions
#[derive(Debug)]
pub struct CaptureNaming {
    shapes_dir: PathBuf,
    hotspot_dir: PathBuf,
    collisions: CollisionPolicy,
    second: String,
    used: HashMap<String, u32>,
}

impl CaptureNaming {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            shapes_dir: config.shapes_dir.clone(),
            hotspot_dir: config.hotspot_dir.clone(),
            collisions: config.collision_policy,
            second: String::new(),
            used: HashMap::new(),
        }
    }

    pub fn path_for(&mut self, category: CaptureCategory, now: DateTime<Local>) -> PathBuf {
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        if stamp != self.second {
            self.used.clear();
            self.second = stamp.clone();
        }

        let (dir, stem) = match category {
            CaptureCategory::ShapePair { squares, triangles } => (
                &self.shapes_dir,
                format!("squares_{}_triangles_{}_{}", squares, triangles, stamp),
            ),
            CaptureCategory::Hotspot => (&self.hotspot_dir, format!("circle_{}", stamp)),
        };

        let name = match self.collisions {
            CollisionPolicy::Overwrite => format!("{}.jpg", stem),
            CollisionPolicy::Disambiguate => {
                let count = self.used.entry(stem.clone()).or_insert(0);
                let name = if *count == 0 {
                    format!("{}.jpg", stem)
                } else {
                    format!("{}_{}.jpg", stem, count)
                };
                *count += 1;
                name
            }
        };
        dir.join(name)
    }
}

/// Destination for captured frames
pub trait CaptureSink {
    /// Persist `frame` at `path`, returning where it actually landed
    fn store(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        path: &Path,
    ) -> Result<PathBuf, PersistenceError>;
}

/// Writes JPEG files, optionally with the detection boxes drawn in
#[derive(Debug, Clone)]
pub struct JpegFileSink {
    quality: u8,
    annotate: bool,
}

impl JpegFileSink {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            quality: config.jpeg_quality,
            annotate: config.annotate,
        }
    }
}

impl CaptureSink for JpegFileSink {
    fn store(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        path: &Path,
    ) -> Result<PathBuf, PersistenceError> {
        let fail = |reason: String| PersistenceError {
            path: path.display().to_string(),
            reason,
        };

        let mut image = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or_else(|| fail("frame buffer does not match its dimensions".to_string()))?;
        if self.annotate {
            for det in detections {
                draw_box(&mut image, &det.bbox);
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        let file = fs::File::create(path).map_err(|e| fail(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .map_err(|e| fail(e.to_string()))?;
        writer.flush().map_err(|e| fail(e.to_string()))?;

        Ok(path.to_path_buf())
    }
}

/// Keeps captures in memory; clones share the same store
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    stored: Arc<Mutex<Vec<PathBuf>>>,
    fail_with: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every store fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            stored: Arc::default(),
            fail_with: Some(reason.into()),
        }
    }

    pub fn stored(&self) -> Vec<PathBuf> {
        self.stored.lock().clone()
    }
}

impl CaptureSink for MemorySink {
    fn store(
        &mut self,
        _frame: &Frame,
        _detections: &[Detection],
        path: &Path,
    ) -> Result<PathBuf, PersistenceError> {
        if let Some(reason) = &self.fail_with {
            return Err(PersistenceError {
                path: path.display().to_string(),
                reason: reason.clone(),
            });
        }
        self.stored.lock().push(path.to_path_buf());
        Ok(path.to_path_buf())
    }
}

/// Applies the capture policy to each frame and persists what qualifies
pub struct CaptureRecorder {
    policy: CapturePolicy,
    naming: CaptureNaming,
    sink: Box<dyn CaptureSink + Send>,
    saved: u64,
    failed: u64,
}

impl CaptureRecorder {
    pub fn new(config: &CaptureConfig, sink: Box<dyn CaptureSink + Send>) -> Self {
        Self {
            policy: CapturePolicy::new(config.enabled),
            naming: CaptureNaming::new(config),
            sink,
            saved: 0,
            failed: 0,
        }
    }

    /// Recorder writing JPEG files as configured
    pub fn jpeg(config: &CaptureConfig) -> Self {
        Self::new(config, Box::new(JpegFileSink::new(config)))
    }

    /// Persist every category `summary` qualifies for. Storage failures are
    /// logged and skipped.
    pub fn record(
        &mut self,
        frame: &Frame,
        summary: &DetectionSummary,
        now: DateTime<Local>,
    ) -> Vec<CaptureRecord> {
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        let mut records = Vec::new();

        for category in self.policy.evaluate(summary) {
            let path = self.naming.path_for(category, timestamp);
            match self.sink.store(frame, &summary.detections, &path) {
                Ok(path) => {
                    info!(
                        frame = summary.frame_seq,
                        category = category.name(),
                        path = %path.display(),
                        "capture saved"
                    );
                    self.saved += 1;
                    records.push(CaptureRecord {
                        category,
                        path,
                        frame_seq: summary.frame_seq,
                        timestamp,
                    });
                }
                Err(err) => {
                    warn!(frame = summary.frame_seq, error = %err, "capture not saved");
                    self.failed += 1;
                }
            }
        }

        if records.is_empty() {
            debug!(frame = summary.frame_seq, "no capture for frame");
        }
        records
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

fn draw_box(image: &mut RgbImage, bbox: &PixelBox) {
    let (w, h) = image.dimensions();
    let x0 = bbox.xmin.min(w - 1);
    let x1 = bbox.xmax.min(w - 1);
    let y0 = bbox.ymin.min(h - 1);
    let y1 = bbox.ymax.min(h - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            image.put_pixel(x, (y0 + t).min(h - 1), BOX_COLOUR);
            image.put_pixel(x, y1.saturating_sub(t), BOX_COLOUR);
        }
        for y in y0..=y1 {
            image.put_pixel((x0 + t).min(w - 1), y, BOX_COLOUR);
            image.put_pixel(x1.saturating_sub(t), y, BOX_COLOUR);
        }
    }
}
