use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::video::FrameSource;

/// MIME type of every encoded frame.
pub const FRAME_MIME: &str = "image/jpeg";

/// One sampled frame, compressed to JPEG.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// Index of the frame in the source video (0-based).
    pub frame_number: u32,
    pub timestamp_seconds: f64,
    /// Compressed JPEG bytes.
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }

    /// `data:image/jpeg;base64,...` form used in image references.
    pub fn data_uri(&self) -> String {
        format!("data:{FRAME_MIME};base64,{}", self.to_base64())
    }
}

/// Gap between consecutive sampled frame indices: `max(1, floor(native / target))`.
pub fn stride(native_fps: f64, target_fps: f64) -> Result<u32> {
    if !target_fps.is_finite() || target_fps <= 0.0 {
        return Err(Error::InvalidSampleRate(target_fps));
    }
    if !native_fps.is_finite() || native_fps <= 0.0 {
        return Err(Error::FrameRateUnavailable(native_fps));
    }

    let ratio = (native_fps / target_fps).floor();
    Ok(if ratio < 1.0 { 1 } else { ratio.min(u32::MAX as f64) as u32 })
}

/// Compress an RGB frame with the encoder's default JPEG quality.
pub fn encode_jpeg(image: &RgbImage) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_with_encoder(JpegEncoder::new(&mut buf))?;
    Ok(buf.into_inner())
}

/// Lazily samples every `stride`-th frame of a source, starting at frame 0.
///
/// Owns the source, so the underlying decoder is released when the sampler
/// is dropped. Iteration stops after the first error.
pub struct FrameSampler<S: FrameSource> {
    source: S,
    stride: u32,
    sampled: usize,
    done: bool,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, target_fps: f64) -> Result<Self> {
        let native_fps = source.fps();
        let stride = stride(native_fps, target_fps)?;
        info!(native_fps, target_fps, stride, "frame sampler ready");

        Ok(Self {
            source,
            stride,
            sampled: 0,
            done: false,
        })
    }

    fn next_sample(&mut self) -> Result<Option<EncodedFrame>> {
        loop {
            let Some(frame) = self.source.next_frame()? else {
                info!(sampled = self.sampled, stride = self.stride, "sampling complete");
                return Ok(None);
            };

            if frame.frame_number % self.stride != 0 {
                continue;
            }

            let jpeg = encode_jpeg(&frame.image).map_err(|source| Error::Encode {
                frame_number: frame.frame_number,
                source,
            })?;

            debug!(
                frame_number = frame.frame_number,
                jpeg_bytes = jpeg.len(),
                "sampled frame"
            );
            self.sampled += 1;

            return Ok(Some(EncodedFrame {
                frame_number: frame.frame_number,
                timestamp_seconds: frame.timestamp_seconds,
                jpeg,
            }));
        }
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<EncodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_sample() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: FrameSource> std::iter::FusedIterator for FrameSampler<S> {}

/// Sample a whole source into memory, in ascending frame order.
pub fn sample_frames<S: FrameSource>(source: S, target_fps: f64) -> Result<Vec<EncodedFrame>> {
    FrameSampler::new(source, target_fps)?.collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use image::Rgb;
    use tracing_test::traced_test;

    use super::*;
    use crate::video::frame::Frame;

    /// Synthetic in-memory video: solid frames whose colour encodes the index.
    pub(crate) struct SyntheticVideo {
        pub fps: f64,
        pub total: u32,
        pub fail_at: Option<u32>,
        pub next: u32,
        pub released: Rc<Cell<u32>>,
    }

    impl SyntheticVideo {
        pub fn new(fps: f64, total: u32) -> Self {
            Self {
                fps,
                total,
                fail_at: None,
                next: 0,
                released: Rc::new(Cell::new(0)),
            }
        }
    }

    impl FrameSource for SyntheticVideo {
        fn fps(&self) -> f64 {
            self.fps
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if Some(self.next) == self.fail_at {
                return Err(Error::Decode(format!("corrupt frame {}", self.next)));
            }
            if self.next >= self.total {
                return Ok(None);
            }
            let shade = (self.next % 256) as u8;
            let image = RgbImage::from_pixel(16, 8, Rgb([shade, 255 - shade, 64]));
            let frame = Frame::new(image, self.next, self.fps);
            self.next += 1;
            Ok(Some(frame))
        }
    }

    impl Drop for SyntheticVideo {
        fn drop(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[test]
    fn stride_is_floor_of_ratio() {
        assert_eq!(stride(30.0, 1.0).unwrap(), 30);
        assert_eq!(stride(29.97, 1.0).unwrap(), 29);
        assert_eq!(stride(60.0, 7.0).unwrap(), 8);
        assert_eq!(stride(25.0, 2.5).unwrap(), 10);
    }

    #[test]
    fn stride_never_below_one() {
        assert_eq!(stride(30.0, 60.0).unwrap(), 1);
        assert_eq!(stride(24.0, 24.0).unwrap(), 1);
        assert_eq!(stride(1.0, 1000.0).unwrap(), 1);
    }

    #[test]
    fn stride_rejects_bad_target() {
        assert!(matches!(stride(30.0, 0.0), Err(Error::InvalidSampleRate(_))));
        assert!(matches!(stride(30.0, -1.0), Err(Error::InvalidSampleRate(_))));
        assert!(matches!(stride(30.0, f64::NAN), Err(Error::InvalidSampleRate(_))));
    }

    #[test]
    fn stride_rejects_unknown_native_rate() {
        assert!(matches!(stride(0.0, 1.0), Err(Error::FrameRateUnavailable(_))));
        assert!(matches!(stride(f64::INFINITY, 1.0), Err(Error::FrameRateUnavailable(_))));
    }

    #[test]
    #[traced_test]
    fn thirty_seconds_at_one_fps() {
        let video = SyntheticVideo::new(30.0, 30 * 30);
        let frames = sample_frames(video, 1.0).unwrap();

        assert_eq!(frames.len(), 30);
        let indices: Vec<u32> = frames.iter().map(|f| f.frame_number).collect();
        let expected: Vec<u32> = (0..30).map(|i| i * 30).collect();
        assert_eq!(indices, expected);
        assert_eq!(*indices.last().unwrap(), 870);
        assert!(logs_contain("sampling complete"));
    }

    #[test]
    fn sample_count_is_ceil_of_total_over_stride() {
        for (native, target, total) in [(30.0, 1.0, 31), (30.0, 4.0, 100), (24.0, 48.0, 7), (25.0, 3.0, 1)] {
            let s = stride(native, target).unwrap();
            let frames = sample_frames(SyntheticVideo::new(native, total), target).unwrap();
            assert_eq!(frames.len() as u32, total.div_ceil(s), "native={native} target={target}");

            for pair in frames.windows(2) {
                assert!(pair[0].frame_number < pair[1].frame_number);
            }
            for f in &frames {
                assert_eq!(f.frame_number % s, 0);
            }
        }
    }

    #[test]
    fn empty_video_yields_no_frames() {
        let frames = sample_frames(SyntheticVideo::new(30.0, 0), 1.0).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn frames_are_valid_jpeg() {
        let frames = sample_frames(SyntheticVideo::new(10.0, 10), 5.0).unwrap();
        assert_eq!(frames.len(), 5);
        for f in &frames {
            assert_eq!(&f.jpeg[..2], &[0xFF, 0xD8]);
            let decoded = image::load_from_memory(&f.jpeg).unwrap();
            assert_eq!(decoded.width(), 16);
            assert_eq!(decoded.height(), 8);
        }
    }

    #[test]
    fn data_uri_has_jpeg_prefix() {
        let frame = EncodedFrame {
            frame_number: 0,
            timestamp_seconds: 0.0,
            jpeg: vec![0xFF, 0xD8, 0xFF],
        };
        assert_eq!(frame.data_uri(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn decode_failure_is_fatal_and_releases_source() {
        let mut video = SyntheticVideo::new(30.0, 300);
        video.fail_at = Some(45);
        let released = Rc::clone(&video.released);

        let mut sampler = FrameSampler::new(video, 1.0).unwrap();
        assert_eq!(sampler.next().unwrap().unwrap().frame_number, 0);
        assert_eq!(sampler.next().unwrap().unwrap().frame_number, 30);
        assert!(matches!(sampler.next(), Some(Err(Error::Decode(_)))));
        assert!(sampler.next().is_none());

        drop(sampler);
        assert_eq!(released.get(), 1);

        let mut video = SyntheticVideo::new(30.0, 300);
        video.fail_at = Some(200);
        let released = Rc::clone(&video.released);
        assert!(matches!(sample_frames(video, 1.0), Err(Error::Decode(_))));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn source_released_after_normal_completion() {
        let video = SyntheticVideo::new(30.0, 90);
        let released = Rc::clone(&video.released);
        let frames = sample_frames(video, 1.0).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn invalid_target_releases_source() {
        let video = SyntheticVideo::new(30.0, 90);
        let released = Rc::clone(&video.released);
        assert!(matches!(sample_frames(video, 0.0), Err(Error::InvalidSampleRate(_))));
        assert_eq!(released.get(), 1);
    }
}
