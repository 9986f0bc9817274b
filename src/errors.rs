//! Typed error hierarchy for sketchpad.
//!
//! Four top-level enums cover the subsystems:
//! - `SandboxError`: provisioning, command execution and file access
//! - `ModelError`: generation-model transport and protocol failures
//! - `GenerateError`: single-shot code generation and extraction
//! - `PipelineError`: request-fatal failures surfaced as `error` events
//!
//! Only `PipelineError` reaches the caller's event stream. Timeouts, failed
//! builds and tool failures are absorbed by the repair loop.

use thiserror::Error;

/// Errors from the sandbox layer (provider, pool, runner, file channel).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to provision sandbox: {0}")]
    Provision(String),

    #[error("Sandbox {id} not found")]
    NotFound { id: String },

    #[error("Command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Sandbox paths must be absolute, got '{path}'")]
    RelativePath { path: String },

    #[error("File not found in sandbox: {path}")]
    FileNotFound { path: String },

    #[error("Sandbox provider error: {0}")]
    Provider(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl SandboxError {
    /// True when the remote environment no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            SandboxError::NotFound { .. } => true,
            SandboxError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

/// Errors from the generation-model client.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("No API key configured (set ANTHROPIC_API_KEY)")]
    MissingApiKey,

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the single-shot code generator.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Failed to extract a code block from the model response")]
    Extraction,

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error("Code generation failed: {0}")]
    Model(#[from] ModelError),
}

/// Request-fatal pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerateError),

    #[error("Sandbox provisioning failed: {0}")]
    SandboxProvision(#[source] SandboxError),

    #[error("Client disconnected")]
    Cancelled,
}
