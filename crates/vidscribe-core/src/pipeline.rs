use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::client::VisionClient;
use crate::cost::{CostBreakdown, Pricing};
use crate::debug::DebugRenderer;
use crate::error::{Error, Result};
use crate::request::{DetailLevel, InferenceRequest};
use crate::sampler::{EncodedFrame, FrameSampler};
use crate::video::decoder::VideoDecoder;
use crate::video::FrameSource;

/// Encoded payload size above which a request is likely to be rejected.
const LARGE_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

pub const DEFAULT_INSTRUCTION: &str =
    "These are frames sampled in order from a video. Describe what happens in the video.";

/// Parameters for one describe run.
pub struct PipelineConfig {
    /// Frames per second to sample from the video.
    pub target_fps: f64,
    pub detail: DetailLevel,
    pub instruction: String,
    /// Passed through to the model, not interpreted here.
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub pricing: Pricing,
    /// Directory to write the sampled frames to, or None to skip.
    pub debug_frames_dir: Option<PathBuf>,
    pub debug_font: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 1.0,
            detail: DetailLevel::Low,
            instruction: DEFAULT_INSTRUCTION.to_owned(),
            temperature: 0.0,
            max_tokens: None,
            pricing: Pricing::default(),
            debug_frames_dir: None,
            debug_font: None,
        }
    }
}

/// Everything a describe run produces.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub frame_numbers: Vec<u32>,
    pub description: String,
    pub cost: CostBreakdown,
}

impl RunReport {
    pub fn frame_count(&self) -> usize {
        self.frame_numbers.len()
    }
}

/// Open the video and sample it, writing debug frames when configured.
pub fn extract_frames(input: &Path, config: &PipelineConfig) -> Result<Vec<EncodedFrame>> {
    info!(?input, target_fps = config.target_fps, "extracting frames");

    let decoder = VideoDecoder::open(input)?;
    info!(width = decoder.width(), height = decoder.height(), "video opened");

    sample_with_debug(decoder, config)
}

fn sample_with_debug<S: FrameSource>(source: S, config: &PipelineConfig) -> Result<Vec<EncodedFrame>> {
    let debug_output = match &config.debug_frames_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            info!(?dir, "debug frames directory ready");
            Some((DebugRenderer::new(config.debug_font.as_deref()), dir))
        }
        None => None,
    };

    let mut frames = Vec::new();
    for frame in FrameSampler::new(source, config.target_fps)? {
        let frame = frame?;
        if let Some((renderer, dir)) = &debug_output {
            renderer.save_frame(&frame, dir)?;
        }
        frames.push(frame);
    }

    info!(total_sampled_frames = frames.len(), "frame extraction complete");
    Ok(frames)
}

/// Build the request for the sampled frames, call the model once and price the result.
pub fn describe_frames(
    frames: &[EncodedFrame],
    config: &PipelineConfig,
    client: &VisionClient,
) -> Result<RunReport> {
    if frames.is_empty() {
        warn!("no frames sampled, not sending a request");
        return Err(Error::EmptyResult);
    }

    let mut request = InferenceRequest::build(&config.instruction, frames, config.detail)
        .with_temperature(config.temperature);
    if let Some(max_tokens) = config.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let payload_bytes = request.payload_bytes();
    if payload_bytes > LARGE_PAYLOAD_BYTES {
        warn!(
            payload_bytes,
            image_count = request.image_count(),
            "request payload is large and may be rejected, consider a lower target fps"
        );
    }

    let completion = client.complete(&request)?;
    let cost = CostBreakdown::compute(completion.usage, frames.len(), &config.pricing)?;

    Ok(RunReport {
        frame_numbers: frames.iter().map(|f| f.frame_number).collect(),
        description: completion.text,
        cost,
    })
}

/// Run the full describe pipeline on a video file.
pub fn run_pipeline(input: &Path, config: &PipelineConfig, client: &VisionClient) -> Result<RunReport> {
    let frames = extract_frames(input, config)?;
    let report = describe_frames(&frames, config, client)?;
    info!(
        frame_count = report.frame_count(),
        total_cost = report.cost.total_cost,
        "pipeline complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::client::tests::{client_for, serve_once, REFERENCE_BODY};
    use crate::sampler::tests::SyntheticVideo;

    #[test]
    fn empty_frames_fail_before_any_request() {
        // Nothing listens here; an attempted request would surface as a remote failure.
        let client = client_for("http://127.0.0.1:9".into());
        let err = describe_frames(&[], &PipelineConfig::default(), &client).unwrap_err();
        assert!(matches!(err, Error::EmptyResult));
    }

    #[test]
    fn describe_prices_reference_usage_per_frame() {
        let frames = sample_with_debug(SyntheticVideo::new(30.0, 900), &PipelineConfig::default()).unwrap();
        assert_eq!(frames.len(), 30);

        let (endpoint, server) = serve_once("200 OK", REFERENCE_BODY);
        let config = PipelineConfig {
            detail: DetailLevel::High,
            max_tokens: Some(512),
            ..PipelineConfig::default()
        };
        let report = describe_frames(&frames, &config, &client_for(endpoint)).unwrap();

        assert_eq!(report.frame_count(), 30);
        assert_eq!(report.frame_numbers, (0..30).map(|i| i * 30).collect::<Vec<u32>>());
        assert_eq!(report.description, "A dog runs across a field.");
        assert!((report.cost.input_cost - 0.0102).abs() < 1e-12);
        assert!((report.cost.output_cost - 0.0024).abs() < 1e-12);
        assert!((report.cost.total_cost - 0.0126).abs() < 1e-12);
        assert!((report.cost.cost_per_frame - 0.00042).abs() < 1e-12);

        let received = server.join().unwrap();
        let body = &received[received.find("\r\n\r\n").unwrap() + 4..];
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        let content = sent["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 31);
        assert_eq!(content[0]["text"], DEFAULT_INSTRUCTION);
        assert!(content[1..].iter().all(|p| p["image_url"]["detail"] == "high"));
        assert_eq!(sent["max_tokens"], 512);
    }

    #[test]
    fn remote_rejection_ends_the_run() {
        let frames = sample_with_debug(SyntheticVideo::new(30.0, 60), &PipelineConfig::default()).unwrap();
        let (endpoint, server) = serve_once("413 Payload Too Large", "request too large");

        let err = describe_frames(&frames, &PipelineConfig::default(), &client_for(endpoint)).unwrap_err();
        assert!(matches!(err, Error::RemoteRequestFailure(m) if m.contains("413")));
        server.join().unwrap();
    }

    #[test]
    fn sampling_without_debug_output() {
        let frames = sample_with_debug(SyntheticVideo::new(30.0, 900), &PipelineConfig::default()).unwrap();
        assert_eq!(frames.len(), 30);
        assert_eq!(frames[29].frame_number, 870);
    }

    #[test]
    fn sampling_writes_one_debug_frame_per_sample() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("vidscribe-pipeline-{nanos}"));
        let config = PipelineConfig {
            target_fps: 2.0,
            debug_frames_dir: Some(dir.clone()),
            ..PipelineConfig::default()
        };

        let frames = sample_with_debug(SyntheticVideo::new(10.0, 20), &config).unwrap();
        assert_eq!(frames.len(), 4);

        let mut written: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        written.sort();
        assert_eq!(
            written,
            ["frame_00000000.png", "frame_00000005.png", "frame_00000010.png", "frame_00000015.png"]
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_video_is_resource_unavailable() {
        let err = extract_frames(Path::new("/nonexistent/input.mp4"), &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable(_)));
    }
}
