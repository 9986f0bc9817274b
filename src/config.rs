//! Unified configuration for sketchpad.
//!
//! Reads `.sketchpad/sketchpad.toml` from the project directory. Values are
//! layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [sandbox]
//! template = "sketchpad/react-template:latest"
//! project_dir = "/home/user/app"
//! component_path = "/home/user/app/src/App.tsx"
//! startup_grace_secs = 5
//!
//! [model]
//! model = "claude-sonnet-4-20250514"
//! generation_temperature = 1.0
//!
//! [repair]
//! max_iterations = 100
//! max_repair_turns = 20
//!
//! [logging]
//! format = "json"
//! dir = "/var/log/sketchpad"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project configuration directory.
pub const CONFIG_DIR: &str = ".sketchpad";

/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "sketchpad.toml";

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a frontend served from another origin
    #[serde(default)]
    pub dev_mode: bool,
    /// Upper bound for request bodies (sketch images are large)
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_max_body_mb() -> usize {
    16
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// Sandbox template and project layout inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// Template the provider creates sandboxes from (an image for Docker)
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_project_dir")]
    pub project_dir: String,
    /// Absolute path of the generated component
    #[serde(default = "default_component_path")]
    pub component_path: String,
    #[serde(default = "default_dev_command")]
    pub dev_command: String,
    #[serde(default = "default_dev_port")]
    pub dev_port: u16,
    #[serde(default = "default_build_command")]
    pub build_command: String,
    /// Fixed wait after starting the dev server
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
    /// Provider-side lifetime of a sandbox
    #[serde(default = "default_sandbox_timeout_secs")]
    pub sandbox_timeout_secs: u64,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    /// Host name used when building endpoint URLs
    #[serde(default = "default_endpoint_host")]
    pub endpoint_host: String,
}

fn default_template() -> String {
    "sketchpad/react-template:latest".to_string()
}

fn default_project_dir() -> String {
    "/home/user/app".to_string()
}

fn default_component_path() -> String {
    "/home/user/app/src/App.tsx".to_string()
}

fn default_dev_command() -> String {
    "npm run dev -- --host 0.0.0.0 --port 5173".to_string()
}

fn default_dev_port() -> u16 {
    5173
}

fn default_build_command() -> String {
    "npm run build".to_string()
}

fn default_startup_grace_secs() -> u64 {
    5
}

fn default_sandbox_timeout_secs() -> u64 {
    1800
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> f64 {
    2.0
}

fn default_endpoint_host() -> String {
    "localhost".to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            template: default_template(),
            project_dir: default_project_dir(),
            component_path: default_component_path(),
            dev_command: default_dev_command(),
            dev_port: default_dev_port(),
            build_command: default_build_command(),
            startup_grace_secs: default_startup_grace_secs(),
            sandbox_timeout_secs: default_sandbox_timeout_secs(),
            memory: default_memory(),
            cpus: default_cpus(),
            endpoint_host: default_endpoint_host(),
        }
    }
}

impl SandboxSection {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    /// Memory limit in bytes, parsed from values like "512m" or "2g".
    pub fn memory_bytes(&self) -> Option<i64> {
        parse_memory(&self.memory)
    }
}

/// Generation-model settings. The API key is never stored in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// High on purpose: repeated generations should differ
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_repair_temperature")]
    pub repair_temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_generation_temperature() -> f32 {
    1.0
}

fn default_repair_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            generation_temperature: default_generation_temperature(),
            repair_temperature: default_repair_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Iteration ceilings and timeouts of the build-repair loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSection {
    /// Ceiling for the whole request; generation counts as iteration 1
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Ceiling for model turns inside the repair sub-loop
    #[serde(default = "default_max_repair_turns")]
    pub max_repair_turns: u32,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    /// Diagnostic text handed to the model is cut to this many chars
    #[serde(default = "default_diagnostic_chars")]
    pub diagnostic_chars: usize,
    #[serde(default = "default_tool_output_chars")]
    pub tool_output_chars: usize,
    /// Emit a heuristic `quality` event before `complete`
    #[serde(default = "default_quality_score")]
    pub quality_score: bool,
}

fn default_max_iterations() -> u32 {
    100
}

fn default_max_repair_turns() -> u32 {
    20
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_build_timeout_secs() -> u64 {
    120
}

fn default_install_timeout_secs() -> u64 {
    120
}

fn default_diagnostic_chars() -> usize {
    3000
}

fn default_tool_output_chars() -> usize {
    2000
}

fn default_quality_score() -> bool {
    true
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_repair_turns: default_max_repair_turns(),
            command_timeout_secs: default_command_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            diagnostic_chars: default_diagnostic_chars(),
            tool_output_chars: default_tool_output_chars(),
            quality_score: default_quality_score(),
        }
    }
}

impl RepairSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// Operator log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Raw structure of `sketchpad.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SketchpadToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub repair: RepairSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl SketchpadToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sketchpad.toml")
    }

    /// Returns defaults when the file does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize sketchpad.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SKETCHPAD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SKETCHPAD_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(template) = lookup("SKETCHPAD_TEMPLATE") {
            self.sandbox.template = template;
        }
        if let Some(model) = lookup("ANTHROPIC_MODEL") {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("ANTHROPIC_BASE_URL") {
            self.model.base_url = base_url;
        }
        if let Some(n) = lookup("SKETCHPAD_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.repair.max_iterations = n;
        }
        if let Some(n) = lookup("SKETCHPAD_MAX_REPAIR_TURNS").and_then(|v| v.parse().ok()) {
            self.repair.max_repair_turns = n;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.repair.max_iterations == 0 {
            warnings.push("repair.max_iterations is 0: the repair loop will never run".into());
        }
        if self.repair.max_repair_turns == 0 {
            warnings.push("repair.max_repair_turns is 0: the repair loop will never run".into());
        }
        if self.repair.max_repair_turns >= self.repair.max_iterations
            && self.repair.max_iterations > 0
        {
            warnings.push(format!(
                "repair.max_repair_turns ({}) is not below repair.max_iterations ({}); the request ceiling will cut the repair loop short",
                self.repair.max_repair_turns, self.repair.max_iterations
            ));
        }
        for (key, path) in [
            ("sandbox.project_dir", &self.sandbox.project_dir),
            ("sandbox.component_path", &self.sandbox.component_path),
        ] {
            if !path.starts_with('/') {
                warnings.push(format!("{} must be an absolute path, got '{}'", key, path));
            }
        }
        if !self
            .sandbox
            .component_path
            .starts_with(&self.sandbox.project_dir)
        {
            warnings.push(format!(
                "sandbox.component_path '{}' is outside sandbox.project_dir '{}'",
                self.sandbox.component_path, self.sandbox.project_dir
            ));
        }
        if self.sandbox.build_command.trim().is_empty() {
            warnings.push("sandbox.build_command is empty".into());
        }
        if self.sandbox.memory_bytes().is_none() {
            warnings.push(format!(
                "Invalid sandbox.memory '{}': use a number with k, m or g suffix",
                self.sandbox.memory
            ));
        }

        warnings
    }
}

/// Parse "512m", "2g", "1024k" or a plain byte count.
pub fn parse_memory(value: &str) -> Option<i64> {
    let value = value.trim().to_lowercase();
    let (digits, multiplier) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1024),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        c if c.is_ascii_digit() => (value.as_str(), 1),
        _ => return None,
    };
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// Runtime configuration: the parsed file plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: SketchpadToml,
    /// CLI override: verbose logging
    pub verbose: bool,
}

impl Config {
    /// Load from `<project_dir>/.sketchpad/sketchpad.toml` and the process
    /// environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = SketchpadToml::load_or_default(&config_dir)?;
        toml.apply_env(|key| std::env::var(key).ok());
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config_dir,
            toml,
            verbose: false,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_format(mut self, format: Option<LogFormat>) -> Self {
        if let Some(format) = format {
            self.toml.logging.format = format;
        }
        self
    }

    pub fn with_server_overrides(mut self, host: Option<String>, port: Option<u16>, dev: bool) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        if dev {
            self.toml.server.dev_mode = true;
        }
        self
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}
