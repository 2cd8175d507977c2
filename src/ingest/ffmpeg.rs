//! FFmpeg-backed decoding for video files and network streams.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

/// A stream that has produced nothing for this long is reported unhealthy.
const STALL_GRACE: Duration = Duration::from_secs(5);

pub(super) struct FfmpegSource {
    location: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
    opened_at: Instant,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegSource {
    pub(super) fn open(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", location))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "ffmpeg decoding {} at {}x{}",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location: location.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
            opened_at: Instant::now(),
            last_frame_at: None,
            last_error: None,
        })
    }

    /// Next decoded frame; `None` once the decoder is drained after EOF.
    pub(super) fn next_image(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let image = self.to_rgb(&decoded).inspect_err(|e| {
                    self.last_error = Some(e.to_string());
                })?;
                self.last_frame_at = Some(Instant::now());
                return Ok(Some(image));
            }
            if self.flushed {
                log::debug!("{}: end of stream", self.location);
                return Ok(None);
            }

            let stream_index = self.stream_index;
            let next = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match next {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        self.last_error = Some(e.to_string());
                        return Err(anyhow!("send packet to ffmpeg decoder: {}", e));
                    }
                }
                None => {
                    self.decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let since = self.last_frame_at.unwrap_or(self.opened_at);
        self.flushed || since.elapsed() <= STALL_GRACE
    }

    fn to_rgb(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame buffer does not match {}x{}", width, height))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
