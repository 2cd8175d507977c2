//! Frame sources feeding the inference worker.
//!
//! The backend is chosen from the location string:
//! - `stub://…` deterministic synthetic scene (tests, dry runs)
//! - a directory of images, or a single image file
//! - anything else is handed to FFmpeg: video files, RTSP/HTTP streams
//!   (feature: ingest-ffmpeg)
//!
//! Sources deliver owned RGB frames in capture order. Pacing to the source
//! cadence is done by [`run_producer`], not by the sources themselves.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
mod images;
mod producer;
mod synthetic;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;

use crate::frame::Frame;

pub use producer::{run_producer, ProducerStats};

pub const SYNTHETIC_SCHEME: &str = "stub://";

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name`, an image file or directory, or a video path / stream URL.
    pub location: String,
    /// Producer cadence in frames per second; 0 disables pacing.
    pub target_fps: u32,
    /// Stop after this many frames. `stub://` sources without a limit never end.
    pub max_frames: Option<u64>,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: "stub://synthetic".to_string(),
            target_fps: 30,
            max_frames: None,
            width: 640,
            height: 480,
        }
    }
}

impl SourceConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
    pub backend: &'static str,
}

enum Backend {
    Synthetic(synthetic::SyntheticSource),
    Images(images::ImageSequenceSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(ffmpeg::FfmpegSource),
}

/// Frame source selected by location.
pub struct VideoSource {
    config: SourceConfig,
    backend: Backend,
    frames_captured: u64,
}

impl VideoSource {
    pub fn open(config: SourceConfig) -> Result<Self> {
        if config.location.trim().is_empty() {
            anyhow::bail!("source location is empty");
        }
        let backend = if config.location.starts_with(SYNTHETIC_SCHEME) {
            Backend::Synthetic(synthetic::SyntheticSource::new(config.width, config.height))
        } else if images::handles(Path::new(&config.location)) {
            Backend::Images(images::ImageSequenceSource::open(Path::new(&config.location))?)
        } else {
            open_stream(&config)?
        };
        let source = Self {
            config,
            backend,
            frames_captured: 0,
        };
        log::info!(
            "source {} opened ({})",
            source.config.location,
            source.backend_name()
        );
        Ok(source)
    }

    /// Next frame in capture order; `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frames_captured >= max)
        {
            return Ok(None);
        }
        let image: Option<RgbImage> = match &mut self.backend {
            Backend::Synthetic(source) => Some(source.next_image()),
            Backend::Images(source) => source.next_image()?,
            #[cfg(feature = "ingest-ffmpeg")]
            Backend::Ffmpeg(source) => source.next_image()?,
        };
        Ok(image.map(|image| {
            let frame = Frame::new(image, self.frames_captured);
            self.frames_captured += 1;
            frame
        }))
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            Backend::Synthetic(_) => true,
            Backend::Images(source) => source.is_healthy(),
            #[cfg(feature = "ingest-ffmpeg")]
            Backend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            location: self.config.location.clone(),
            backend: self.backend_name(),
        }
    }

    pub fn location(&self) -> &str {
        &self.config.location
    }

    /// Time between frames at `target_fps`; `None` when pacing is off.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.config.target_fps > 0)
            .then(|| Duration::from_secs_f64(1.0 / self.config.target_fps as f64))
    }

    fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Synthetic(_) => "synthetic",
            Backend::Images(_) => "images",
            #[cfg(feature = "ingest-ffmpeg")]
            Backend::Ffmpeg(_) => "ffmpeg",
        }
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_stream(config: &SourceConfig) -> Result<Backend> {
    Ok(Backend::Ffmpeg(ffmpeg::FfmpegSource::open(&config.location)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_stream(config: &SourceConfig) -> Result<Backend> {
    anyhow::bail!(
        "source '{}' requires the ingest-ffmpeg feature",
        config.location
    )
}
