//! HTTP server command (`sketchpad serve`), plus the wiring shared with
//! `sketchpad generate`.

use std::sync::Arc;

use anyhow::{Context, Result};
use sketchpad::api::AppState;
use sketchpad::config::Config;
use sketchpad::llm::{AnthropicClient, CodeModel, ToolModel};
use sketchpad::pipeline::GenerationPipeline;
use sketchpad::sandbox::{DockerProvider, SandboxPool};

/// Docker-backed sandbox pool.
pub fn docker_pool(config: &Config) -> Result<Arc<SandboxPool>> {
    let provider = DockerProvider::connect(&config.toml.sandbox)
        .context("Failed to connect to the Docker daemon")?;
    Ok(Arc::new(SandboxPool::new(
        Arc::new(provider),
        config.toml.sandbox.clone(),
    )))
}

/// Pipeline backed by the Anthropic API and a Docker sandbox pool.
pub fn build_pipeline(config: &Config) -> Result<GenerationPipeline> {
    let client = Arc::new(
        AnthropicClient::new(&config.toml.model, config.api_key())
            .context("Failed to create the model client (is ANTHROPIC_API_KEY set?)")?,
    );
    let code_model: Arc<dyn CodeModel> = client.clone();
    let tool_model: Arc<dyn ToolModel> = client;
    let pool = docker_pool(config)?;
    Ok(GenerationPipeline::new(
        &config.toml,
        pool,
        code_model,
        tool_model,
    ))
}

pub async fn cmd_serve(config: &Config) -> Result<()> {
    for warning in config.toml.validate() {
        tracing::warn!(%warning, "configuration warning");
    }
    let pipeline = build_pipeline(config)?;
    let state = Arc::new(AppState::new(pipeline));
    sketchpad::server::start_server(state, &config.toml.server).await
}
