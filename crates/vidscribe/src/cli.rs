use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use vidscribe_core::client::{API_KEY_ENV, DEFAULT_API_VERSION, DEPLOYMENT_ENV, ENDPOINT_ENV};
use vidscribe_core::pipeline::DEFAULT_INSTRUCTION;
use vidscribe_core::request::DetailLevel;

#[derive(Parser)]
#[command(name = "vidscribe", about = "Describe a video with a vision language model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sample frames from a video and ask the model to describe them.
    Describe {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Per-image detail level sent to the model (low or high).
        #[arg(long, default_value_t = DetailLevel::Low)]
        detail: DetailLevel,

        /// Instruction placed before the frames.
        #[arg(short, long, default_value = DEFAULT_INSTRUCTION)]
        prompt: String,

        /// Azure OpenAI resource endpoint, e.g. https://<name>.openai.azure.com.
        #[arg(long, env = ENDPOINT_ENV)]
        endpoint: Option<String>,

        /// Model deployment name.
        #[arg(long, env = DEPLOYMENT_ENV)]
        deployment: Option<String>,

        #[arg(long, default_value = DEFAULT_API_VERSION)]
        api_version: String,

        /// Resource key. When absent, a token is requested from the Azure CLI.
        #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
        api_key: Option<String>,

        /// Sampling temperature passed through to the model.
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,

        /// Upper bound on generated tokens.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// USD per million input tokens.
        #[arg(long, default_value_t = 2.0)]
        input_price: f64,

        /// USD per million output tokens.
        #[arg(long, default_value_t = 8.0)]
        output_price: f64,
    },
    /// Sample frames only, without contacting the model.
    Sample {
        #[command(flatten)]
        sampling: SamplingArgs,
    },
}

#[derive(Args)]
pub struct SamplingArgs {
    /// Path to the input video file (MP4, etc.).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Frames per second to sample (default: 1).
    #[arg(short, long, default_value_t = 1.0)]
    pub target_fps: f64,

    /// Directory to save the sampled frames as PNG images.
    #[arg(long)]
    pub debug_frames: Option<PathBuf>,

    /// TrueType font used to label debug frames.
    #[arg(long, requires = "debug_frames")]
    pub debug_font: Option<PathBuf>,
}
