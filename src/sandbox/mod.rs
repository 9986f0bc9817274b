//! Remote execution environments.
//!
//! ## Module Map
//!
//! ```text
//! ┌───────────────────────────┐  create/connect/kill  ┌────────────────────┐
//! │  pool.rs   (SandboxPool)  │ ────────────────────> │                    │
//! │  runner.rs (CommandRunner)│ ──────── run ───────> │  SandboxProvider   │
//! │  files.rs  (FileChannel)  │ ── read/write/list ─> │  (docker.rs, or    │
//! └───────────────────────────┘                       │   testing doubles) │
//!                                                     └────────────────────┘
//! ```
//!
//! The pool exclusively owns [`SandboxHandle`]s. Everything else borrows a
//! handle for the duration of one call.

pub mod docker;
pub mod files;
pub mod pool;
pub mod runner;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;

pub use docker::DockerProvider;
pub use files::FileChannel;
pub use pool::{AcquireOrigin, AcquiredSandbox, SandboxPool};
pub use runner::CommandRunner;

/// Lifecycle of one sandbox: `provisioning → ready → (reused)* → terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Provisioning,
    Ready,
    Reused,
    Terminated,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxState::Provisioning => write!(f, "provisioning"),
            SandboxState::Ready => write!(f, "ready"),
            SandboxState::Reused => write!(f, "reused"),
            SandboxState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Reference to one remote execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxHandle {
    pub id: String,
    pub endpoint: String,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, state: SandboxState) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

/// Captured result of one shell command. A non-zero exit code is normal output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, separated by a newline when both are present.
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end().is_empty(), self.stderr.trim_end().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Options for a single bounded command execution.
///
/// Unbounded commands (the dev server) do not take `RunOptions`; they go
/// through [`CommandRunner::spawn_detached`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: Option<String>,
    pub timeout: Duration,
}

impl RunOptions {
    pub fn new(cwd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cwd: Some(cwd.into()),
            timeout,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Contract of the remote provisioning service.
///
/// Real implementation: [`DockerProvider`]. Test double:
/// `crate::testing::ScriptedProvider`.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new sandbox from a template. `timeout` bounds the sandbox's
    /// own lifetime on the provider side.
    async fn create(&self, template: &str, timeout: Duration) -> Result<String, SandboxError>;

    /// Connect to an existing sandbox by id.
    async fn connect(&self, id: &str) -> Result<(), SandboxError>;

    /// Run a shell command and wait for it to exit. Timeouts are enforced by
    /// the caller.
    async fn run(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SandboxError>;

    async fn write_file(&self, id: &str, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, id: &str, path: &str) -> Result<String, SandboxError>;

    /// Entry names directly under `path`.
    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<String>, SandboxError>;

    /// URL at which `port` inside the sandbox is reachable.
    async fn endpoint(&self, id: &str, port: u16) -> Result<String, SandboxError>;

    async fn kill(&self, id: &str) -> Result<(), SandboxError>;
}
