use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::SandboxError;
use crate::sandbox::{CommandRunner, RunOptions, SandboxHandle};
use crate::util::truncate_tail;

/// Result of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub success: bool,
    /// stdout + stderr of a failed build, truncated; empty on success.
    pub diagnostic_text: String,
}

impl BuildOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            diagnostic_text: String::new(),
        }
    }

    pub fn failed(diagnostic_text: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic_text: diagnostic_text.into(),
        }
    }
}

/// Runs the project's build command and classifies the result by exit code.
#[derive(Clone)]
pub struct BuildChecker {
    runner: CommandRunner,
    command: String,
    project_dir: String,
    timeout: Duration,
    max_diagnostic_chars: usize,
}

impl BuildChecker {
    pub fn new(
        runner: CommandRunner,
        command: impl Into<String>,
        project_dir: impl Into<String>,
        timeout: Duration,
        max_diagnostic_chars: usize,
    ) -> Self {
        Self {
            runner,
            command: command.into(),
            project_dir: project_dir.into(),
            timeout,
            max_diagnostic_chars,
        }
    }

    /// Run the build. Never fails: a timeout or a lost sandbox is reported
    /// as a failed build whose diagnostic explains what happened.
    pub async fn check(&self, handle: &SandboxHandle) -> BuildOutcome {
        let opts = RunOptions::new(self.project_dir.clone(), self.timeout);
        match self.runner.run(handle, &self.command, &opts).await {
            Ok(output) if output.success() => {
                info!(sandbox_id = %handle.id, "build passed");
                BuildOutcome::passed()
            }
            Ok(output) => {
                warn!(sandbox_id = %handle.id, exit_code = output.exit_code, "build failed");
                let text = format!("Exit code: {}\n{}", output.exit_code, output.combined());
                BuildOutcome::failed(truncate_tail(&text, self.max_diagnostic_chars))
            }
            Err(e @ SandboxError::CommandTimeout { .. }) => {
                warn!(sandbox_id = %handle.id, error = %e, "build timed out");
                BuildOutcome::failed(e.to_string())
            }
            Err(e) => {
                warn!(sandbox_id = %handle.id, error = %e, "build could not run");
                BuildOutcome::failed(format!("Build could not run: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use crate::testing::ScriptedProvider;
    use std::sync::Arc;

    fn checker(provider: &Arc<ScriptedProvider>, timeout: Duration, max: usize) -> BuildChecker {
        BuildChecker::new(
            CommandRunner::new(provider.clone()),
            "npm run build",
            "/home/user/app",
            timeout,
            max,
        )
    }

    #[tokio::test]
    async fn test_check_success_has_empty_diagnostics() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_command("npm run build", 0, "built in 1.2s", "");
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let outcome = checker(&provider, Duration::from_secs(120), 3000).check(&handle).await;
        assert_eq!(outcome, BuildOutcome::passed());
    }

    #[tokio::test]
    async fn test_check_failure_concatenates_and_truncates() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        let stdout = "vite v5 building...\n".repeat(200);
        provider.script_command("npm run build", 2, &stdout, "error TS1005: ';' expected.");
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let outcome = checker(&provider, Duration::from_secs(120), 300).check(&handle).await;
        assert!(!outcome.success);
        assert!(outcome.diagnostic_text.ends_with("error TS1005: ';' expected."));
        assert!(outcome.diagnostic_text.chars().count() < 400);
    }

    #[tokio::test]
    async fn test_check_unknown_exit_code_is_a_failed_build() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_command("npm run build", -1, "", "");
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let outcome = checker(&provider, Duration::from_secs(120), 3000).check(&handle).await;
        assert!(!outcome.success);
        assert!(outcome.diagnostic_text.starts_with("Exit code: -1"));
    }

    #[tokio::test]
    async fn test_check_timeout_is_a_failed_build() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_delay("npm run build", Duration::from_secs(10));
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let outcome = checker(&provider, Duration::from_millis(20), 3000).check(&handle).await;
        assert!(!outcome.success);
        assert!(outcome.diagnostic_text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_check_runs_in_project_dir() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        checker(&provider, Duration::from_secs(120), 3000).check(&handle).await;
        assert_eq!(
            provider.last_cwd(&id).as_deref(),
            Some("/home/user/app")
        );
    }
}
