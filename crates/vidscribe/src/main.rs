mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use vidscribe_core::client::{ApiKey, AzureCliCredential, ClientConfig, Credential, VisionClient};
use vidscribe_core::cost::{CostBreakdown, Pricing};
use vidscribe_core::pipeline::{self, PipelineConfig, RunReport};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Describe {
            sampling,
            detail,
            prompt,
            endpoint,
            deployment,
            api_version,
            api_key,
            temperature,
            max_tokens,
            input_price,
            output_price,
        } => {
            info!(input = ?sampling.input, target_fps = sampling.target_fps, %detail, "starting describe");

            // Configuration problems surface before any frame is decoded.
            let client_config = ClientConfig::new(endpoint, deployment, api_version)
                .context("client configuration incomplete")?;
            let credential: Box<dyn Credential> = match api_key {
                Some(key) => Box::new(ApiKey::new(key)),
                None => {
                    info!("no API key given, using Azure CLI credential");
                    Box::new(AzureCliCredential::new())
                }
            };
            let client = VisionClient::new(client_config, credential)
                .context("failed to create vision client")?;

            let config = PipelineConfig {
                target_fps: sampling.target_fps,
                detail,
                instruction: prompt,
                temperature,
                max_tokens,
                pricing: Pricing {
                    input_per_million: input_price,
                    output_per_million: output_price,
                },
                debug_frames_dir: sampling.debug_frames,
                debug_font: sampling.debug_font,
            };

            let report = pipeline::run_pipeline(&sampling.input, &config, &client)
                .with_context(|| format!("failed to describe {}", sampling.input.display()))?;

            print_report(&report);
            Ok(())
        }
        cli::Command::Sample { sampling } => {
            let config = PipelineConfig {
                target_fps: sampling.target_fps,
                debug_frames_dir: sampling.debug_frames,
                debug_font: sampling.debug_font,
                ..PipelineConfig::default()
            };

            let frames = pipeline::extract_frames(&sampling.input, &config)
                .with_context(|| format!("failed to sample {}", sampling.input.display()))?;

            if frames.is_empty() {
                warn!("no frames sampled from video");
            }

            println!("Extracted {} frames", frames.len());
            let indices: Vec<String> = frames.iter().map(|f| f.frame_number.to_string()).collect();
            println!("Frame indices: {}", indices.join(", "));
            Ok(())
        }
    }
}

fn print_report(report: &RunReport) {
    println!("Extracted {} frames", report.frame_count());
    println!();
    println!("{}", report.description);
    println!();
    print_cost(&report.cost);
}

fn print_cost(cost: &CostBreakdown) {
    println!("Input tokens:   {}", cost.usage.input_tokens);
    println!("Output tokens:  {}", cost.usage.output_tokens);
    println!("Total tokens:   {}", cost.total_tokens());
    println!("Input cost:     ${:.6}", cost.input_cost);
    println!("Output cost:    ${:.6}", cost.output_cost);
    println!("Total cost:     ${:.6}", cost.total_cost);
    println!("Cost per frame: ${:.6}", cost.cost_per_frame);
}
