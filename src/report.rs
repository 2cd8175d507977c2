//! Session aggregation and defect reports.
//!
//! The report cutoff here is independent of the engine thresholds: the engine
//! decides what counts as a detection, the report decides which detections an
//! operator has to look at.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use serde_json::{json, Value};

use crate::detect::{BBox, FrameResult};
use crate::taxonomy::{DefectClass, ObjectClass};
use crate::worker::AnnotatedFrame;

pub const DEFAULT_REPORT_CUTOFF: f32 = 0.7;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const REPORT_SUFFIX: &str = "_defect_report.json";

/// Free-form session metrics, written alongside the rows.
pub type Metrics = BTreeMap<String, Value>;

/// Consumer of the worker's (annotated image, result) stream.
pub trait ReportSink {
    fn accept(&mut self, image: Arc<RgbImage>, result: FrameResult);

    /// Flush the session. Called once, after the last frame.
    fn finish(&mut self, metrics: &Metrics) -> Result<()>;
}

/// One defect worth an operator's attention.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportRow {
    pub frame_idx: u64,
    pub bbox: BBox,
    pub object_class: ObjectClass,
    pub object_confidence: f32,
    pub defect_class: DefectClass,
    pub defect_confidence: f32,
}

/// Defect-condition detections at or above `cutoff`, in frame then detector
/// order. Nominal detections never produce rows.
pub fn select_rows(results: &[FrameResult], cutoff: f32) -> Vec<ReportRow> {
    results
        .iter()
        .flat_map(|result| {
            result
                .detections
                .iter()
                .filter(move |d| d.is_defect() && d.defect_confidence >= cutoff)
                .map(move |d| ReportRow {
                    frame_idx: result.frame_idx,
                    bbox: d.bbox,
                    object_class: d.object_class,
                    object_confidence: d.object_confidence,
                    defect_class: d.defect_class,
                    defect_confidence: d.defect_confidence,
                })
        })
        .collect()
}

/// Results and annotated images of one session, kept in arrival order.
#[derive(Default)]
pub struct SessionCollector {
    results: Vec<FrameResult>,
    images: Vec<Arc<RgbImage>>,
}

impl SessionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: AnnotatedFrame) {
        self.results.push(frame.result);
        self.images.push(frame.image);
    }

    pub fn results(&self) -> &[FrameResult] {
        &self.results
    }

    /// Annotated images, index-aligned with [`results`](Self::results).
    pub fn images(&self) -> &[Arc<RgbImage>] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Frame totals and the share of frames holding a defect at or above
    /// `defect_cutoff`.
    pub fn metrics(&self, defect_cutoff: f32) -> Metrics {
        let total = self.results.len() as u64;
        let defect_frames = self
            .results
            .iter()
            .filter(|r| r.has_defect_at(defect_cutoff))
            .count() as u64;
        let share = defect_frames as f64 / total.max(1) as f64;

        let mut metrics = Metrics::new();
        metrics.insert("total_frames".into(), json!(total));
        metrics.insert("defect_frames".into(), json!(defect_frames));
        metrics.insert("defect_frame_share".into(), json!(share));
        metrics.insert("defect_cutoff".into(), json!(defect_cutoff));
        metrics
    }

    pub fn rows(&self, cutoff: f32) -> Vec<ReportRow> {
        select_rows(&self.results, cutoff)
    }
}

impl ReportSink for SessionCollector {
    fn accept(&mut self, image: Arc<RgbImage>, result: FrameResult) {
        self.push(AnnotatedFrame { image, result });
    }

    fn finish(&mut self, _metrics: &Metrics) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    #[serde(flatten)]
    row: &'a ReportRow,
    screenshot: Option<String>,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    source: &'a str,
    report_cutoff: f32,
    rows: Vec<ReportEntry<'a>>,
    metrics: &'a Metrics,
}

/// Writes `<name>_defect_report.json` plus one JPEG per frame with rows.
pub struct JsonReportWriter {
    report_dir: PathBuf,
    name: String,
    report_cutoff: f32,
    jpeg_quality: u8,
    session: SessionCollector,
    written: Option<PathBuf>,
}

impl JsonReportWriter {
    pub fn new(report_dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            report_dir: report_dir.into(),
            name: sanitize_name(name),
            report_cutoff: DEFAULT_REPORT_CUTOFF,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            session: SessionCollector::new(),
            written: None,
        }
    }

    pub fn with_report_cutoff(mut self, cutoff: f32) -> Self {
        self.report_cutoff = cutoff;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn session(&self) -> &SessionCollector {
        &self.session
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_dir
            .join(format!("{}{}", self.name, REPORT_SUFFIX))
    }

    /// Path of the report written by `finish`, once it has run.
    pub fn written(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    fn screenshot_name(&self, frame_idx: u64) -> String {
        format!("{}_frame_{:06}.jpg", self.name, frame_idx)
    }

    fn write_screenshot(&self, image: &RgbImage, file_name: &str) -> Result<()> {
        let path = self.report_dir.join(file_name);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        JpegEncoder::new_with_quality(BufWriter::new(file), self.jpeg_quality)
            .encode_image(image)
            .with_context(|| format!("failed to encode {}", path.display()))
    }
}

impl ReportSink for JsonReportWriter {
    fn accept(&mut self, image: Arc<RgbImage>, result: FrameResult) {
        self.session.accept(image, result);
    }

    fn finish(&mut self, metrics: &Metrics) -> Result<()> {
        fs::create_dir_all(&self.report_dir).with_context(|| {
            format!("failed to create report dir {}", self.report_dir.display())
        })?;

        let rows = self.session.rows(self.report_cutoff);
        let mut screenshots: BTreeMap<u64, String> = BTreeMap::new();
        for (result, image) in self.session.results().iter().zip(self.session.images()) {
            if !rows.iter().any(|row| row.frame_idx == result.frame_idx) {
                continue;
            }
            let file_name = self.screenshot_name(result.frame_idx);
            self.write_screenshot(image, &file_name)?;
            screenshots.insert(result.frame_idx, file_name);
        }

        let document = ReportDocument {
            source: &self.name,
            report_cutoff: self.report_cutoff,
            rows: rows
                .iter()
                .map(|row| ReportEntry {
                    row,
                    screenshot: screenshots.get(&row.frame_idx).cloned(),
                })
                .collect(),
            metrics,
        };
        let path = self.report_path();
        let body =
            serde_json::to_string_pretty(&document).context("failed to serialize report")?;
        fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;

        log::info!(
            "report saved to {} ({} rows, {} screenshots)",
            path.display(),
            rows.len(),
            screenshots.len()
        );
        self.written = Some(path);
        Ok(())
    }
}

/// Flush `sink`, then return the producer outcome.
///
/// The report is written even when `produced` is an error. If both fail the
/// producer error is returned and the report error logged.
pub fn finish_session<S: ReportSink, T>(
    sink: &mut S,
    metrics: &Metrics,
    produced: Result<T>,
) -> Result<T> {
    let written = sink.finish(metrics);
    match (produced, written) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => {
            log::error!("source failed, report covers frames analysed so far: {:#}", e);
            Err(e)
        }
        (Err(e), Err(report_err)) => {
            log::error!("failed to write report: {:#}", report_err);
            Err(e)
        }
    }
}

/// Report base name for a source location: the file stem for paths, the part
/// after the scheme for `stub://`, `stream` for other URLs.
pub fn report_name_for(location: &str) -> String {
    let raw = if let Some(rest) = location.strip_prefix("stub://") {
        if rest.is_empty() {
            "synthetic"
        } else {
            rest
        }
    } else if location.contains("://") {
        "stream"
    } else {
        Path::new(location)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("video")
    };
    sanitize_name(raw)
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn det(defect: &str, defect_conf: f32) -> Detection {
        Detection {
            bbox: BBox::new(10, 10, 40, 40).unwrap(),
            object_class: ObjectClass::from_name("vari-grip").unwrap(),
            object_confidence: 0.9,
            defect_class: DefectClass::from_name(defect).unwrap(),
            defect_confidence: defect_conf,
        }
    }

    fn frame(frame_idx: u64, detections: Vec<Detection>) -> FrameResult {
        FrameResult {
            frame_idx,
            detections,
        }
    }

    #[test]
    fn rows_are_defects_above_cutoff() {
        let results = vec![
            frame(0, vec![det("vari-grip_good", 0.99)]),
            frame(1, vec![det("vari-grip_rust", 0.65), det("vari-grip_bird-nest", 0.8)]),
            frame(2, vec![]),
        ];
        let rows = select_rows(&results, DEFAULT_REPORT_CUTOFF);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frame_idx, 1);
        assert_eq!(rows[0].defect_class.name(), "vari-grip_bird-nest");

        assert_eq!(select_rows(&results, 0.6).len(), 2);
    }

    #[test]
    fn metrics_count_defect_frames() {
        let mut session = SessionCollector::new();
        for result in [
            frame(0, vec![det("vari-grip_rust", 0.9)]),
            frame(1, vec![det("vari-grip_good", 0.9)]),
            frame(2, vec![det("vari-grip_rust", 0.5)]),
            frame(3, vec![]),
        ] {
            session.accept(Arc::new(RgbImage::new(4, 4)), result);
        }
        let metrics = session.metrics(0.7);
        assert_eq!(metrics["total_frames"], json!(4));
        assert_eq!(metrics["defect_frames"], json!(1));
        assert_eq!(metrics["defect_frame_share"], json!(0.25));

        assert_eq!(SessionCollector::new().metrics(0.7)["defect_frame_share"], json!(0.0));
    }

    #[test]
    fn names_follow_source_location() {
        assert_eq!(report_name_for("/data/flights/line 7.mp4"), "line_7");
        assert_eq!(report_name_for("rtsp://10.0.0.2/cam"), "stream");
        assert_eq!(report_name_for("stub://"), "synthetic");
        assert_eq!(report_name_for("stub://demo"), "demo");
    }
}
