use anyhow::Result;
use image::RgbImage;
use std::path::Path;

use super::SampledFrame;

/// Opens videos for frame-level access.
pub trait VideoDecoder {
    type Source: FrameSource;

    fn open(&self, video_path: &Path) -> Result<Self::Source>;
}

/// An open, seekable video. Dropping it releases the underlying resource.
pub trait FrameSource {
    fn total_frames(&self) -> u64;

    fn decode_frame(&mut self, index: u64) -> Result<RgbImage>;
}

/// Evenly spaced positions strictly inside `0..total_frames`:
/// `floor(total * i / (frame_count + 1))` for `i = 1..=frame_count`.
pub fn sample_positions(total_frames: u64, frame_count: usize) -> Vec<u64> {
    if total_frames == 0 {
        return Vec::new();
    }
    let slots = frame_count as u64 + 1;
    (1..=frame_count as u64)
        .map(|i| total_frames * i / slots)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    frame_count: usize,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FRAME_COUNT)
    }
}

impl FrameSampler {
    pub fn new(frame_count: usize) -> Self {
        Self { frame_count }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Decode up to `frame_count` representative frames. Positions that fail
    /// to open, seek or decode are skipped, so the result may be empty.
    pub fn sample<D: VideoDecoder>(&self, decoder: &D, video_path: &Path) -> Vec<SampledFrame> {
        let mut source = match decoder.open(video_path) {
            Ok(source) => source,
            Err(err) => {
                log::warn!("Cannot open video {:?}: {:#}", video_path, err);
                return Vec::new();
            }
        };

        let total = source.total_frames();
        if total == 0 {
            log::warn!("Video {:?} reports no frames", video_path);
            return Vec::new();
        }

        let capacity = usize::try_from(total)
            .unwrap_or(usize::MAX)
            .min(self.frame_count);
        let mut frames = Vec::with_capacity(capacity);
        for position in sample_positions(total, self.frame_count) {
            match source.decode_frame(position) {
                Ok(image) => {
                    log::debug!("Sampled frame {}/{} of {:?}", position, total, video_path);
                    frames.push(SampledFrame { position, image });
                }
                Err(err) => {
                    log::debug!(
                        "Skipping frame {} of {:?}: {:#}",
                        position,
                        video_path,
                        err
                    );
                }
            }
        }

        if frames.is_empty() {
            log::warn!(
                "None of the {} sampled frames of {:?} could be decoded",
                self.frame_count,
                video_path
            );
        }

        frames
    }
}

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg_backend::{FfmpegDecoder, FfmpegVideo};

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use anyhow::{Context, Result};
    use ffmpeg_next as ffmpeg;
    use image::RgbImage;
    use std::path::Path;

    use super::{FrameSource, VideoDecoder};

    /// Decodes local video files through FFmpeg.
    #[derive(Debug, Clone, Copy)]
    pub struct FfmpegDecoder {
        _initialized: (),
    }

    impl FfmpegDecoder {
        /// Initialize FFmpeg. Safe to call more than once.
        pub fn new() -> Result<Self> {
            ffmpeg::init().context("Failed to initialize FFmpeg")?;

            Ok(Self { _initialized: () })
        }
    }

    impl VideoDecoder for FfmpegDecoder {
        type Source = FfmpegVideo;

        fn open(&self, video_path: &Path) -> Result<FfmpegVideo> {
            FfmpegVideo::open(video_path)
        }
    }

    pub struct FfmpegVideo {
        input: ffmpeg::format::context::Input,
        stream_index: usize,
        decoder: ffmpeg::decoder::Video,
        scaler: ffmpeg::software::scaling::context::Context,
        time_base: f64,
        frame_rate: Option<f64>,
        start_pts: i64,
        total_frames: u64,
    }

    fn rational_to_f64(value: ffmpeg::Rational) -> Option<f64> {
        if value.numerator() <= 0 || value.denominator() <= 0 {
            return None;
        }
        Some(f64::from(value))
    }

    impl FfmpegVideo {
        pub fn open<P: AsRef<Path>>(video_path: P) -> Result<Self> {
            let input =
                ffmpeg::format::input(&video_path).context("Failed to open video file")?;
            let container_duration = input.duration();

            let (stream_index, time_base, frame_rate, start_pts, total_frames, decoder) = {
                let video_stream = input
                    .streams()
                    .best(ffmpeg::media::Type::Video)
                    .context("Could not find video stream")?;

                let time_base = rational_to_f64(video_stream.time_base())
                    .context("Video stream has no time base")?;
                let frame_rate = rational_to_f64(video_stream.avg_frame_rate())
                    .or_else(|| rational_to_f64(video_stream.rate()));
                let start_pts = match video_stream.start_time() {
                    ffmpeg::ffi::AV_NOPTS_VALUE => 0,
                    start => start,
                };
                let total_frames =
                    count_frames(&video_stream, time_base, frame_rate, container_duration);

                let decoder =
                    ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                        .context("Failed to create codec context")?
                        .decoder()
                        .video()
                        .context("Failed to create video decoder")?;

                (
                    video_stream.index(),
                    time_base,
                    frame_rate,
                    start_pts,
                    total_frames,
                    decoder,
                )
            };

            let scaler = ffmpeg::software::scaling::context::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                ffmpeg::format::Pixel::RGB24,
                decoder.width(),
                decoder.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;

            Ok(Self {
                input,
                stream_index,
                decoder,
                scaler,
                time_base,
                frame_rate,
                start_pts,
                total_frames,
            })
        }
    }

    /// `nb_frames` when the container reports it, otherwise duration times
    /// average frame rate.
    fn count_frames(
        stream: &ffmpeg::format::stream::Stream,
        time_base: f64,
        frame_rate: Option<f64>,
        container_duration: i64,
    ) -> u64 {
        if stream.frames() > 0 {
            return stream.frames() as u64;
        }

        let seconds = if stream.duration() > 0 {
            stream.duration() as f64 * time_base
        } else if container_duration > 0 {
            container_duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        match frame_rate {
            Some(fps) if seconds > 0.0 => (seconds * fps).floor() as u64,
            _ => 0,
        }
    }

    impl FrameSource for FfmpegVideo {
        fn total_frames(&self) -> u64 {
            self.total_frames
        }

        fn decode_frame(&mut self, index: u64) -> Result<RgbImage> {
            let frame_rate = self
                .frame_rate
                .context("Video stream has no usable frame rate")?;

            let target_pts =
                self.start_pts + (index as f64 / frame_rate / self.time_base).round() as i64;
            let seek_ts = (target_pts as f64
                * self.time_base
                * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;

            // lands on the keyframe at or before the target
            self.input
                .seek(seek_ts, ..seek_ts)
                .with_context(|| format!("Failed to seek to frame {}", index))?;
            self.decoder.flush();

            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                if self.decoder.send_packet(&packet).is_err() {
                    continue;
                }
                if let Some(image) =
                    receive_target(&mut self.decoder, &mut self.scaler, &mut decoded, target_pts)?
                {
                    return Ok(image);
                }
            }

            self.decoder.send_eof().ok();
            if let Some(image) =
                receive_target(&mut self.decoder, &mut self.scaler, &mut decoded, target_pts)?
            {
                return Ok(image);
            }

            anyhow::bail!("Frame {} is past the end of the stream", index)
        }
    }

    /// Drain decoded frames until one reaches `target_pts`.
    fn receive_target(
        decoder: &mut ffmpeg::decoder::Video,
        scaler: &mut ffmpeg::software::scaling::context::Context,
        decoded: &mut ffmpeg::util::frame::video::Video,
        target_pts: i64,
    ) -> Result<Option<RgbImage>> {
        while decoder.receive_frame(decoded).is_ok() {
            let pts = decoded
                .timestamp()
                .or(decoded.pts())
                .context("Decoded frame carries no timestamp")?;
            if pts < target_pts {
                continue;
            }

            let mut rgb_frame = ffmpeg::util::frame::video::Video::empty();
            scaler
                .run(decoded, &mut rgb_frame)
                .context("Failed to scale frame")?;

            return frame_to_image(&rgb_frame).map(Some);
        }

        Ok(None)
    }

    /// Copy an RGB24 frame into an image buffer, dropping row padding.
    fn frame_to_image(frame: &ffmpeg::util::frame::video::Video) -> Result<RgbImage> {
        let width = frame.width();
        let height = frame.height();
        let stride = frame.stride(0);
        let row_len = width as usize * 3;

        let data = frame.data(0);
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_len)
                    .context("Frame data shorter than its dimensions")?,
            );
        }

        RgbImage::from_raw(width, height, pixels)
            .context("Failed to create image buffer from frame")
    }
}
