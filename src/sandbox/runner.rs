use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{CommandOutput, RunOptions, SandboxHandle, SandboxProvider};
use crate::errors::SandboxError;

/// Executes shell commands inside a sandbox.
///
/// Every call through [`CommandRunner::run`] is bounded by a timeout. The
/// only unbounded command is the dev server, started with
/// [`CommandRunner::spawn_detached`] and never awaited.
#[derive(Clone)]
pub struct CommandRunner {
    provider: Arc<dyn SandboxProvider>,
}

impl CommandRunner {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self { provider }
    }

    /// Run `command` and capture its output. A non-zero exit code is returned
    /// as `Ok`; only connection failures and timeouts are errors.
    pub async fn run(
        &self,
        handle: &SandboxHandle,
        command: &str,
        opts: &RunOptions,
    ) -> Result<CommandOutput, SandboxError> {
        debug!(sandbox_id = %handle.id, command, cwd = ?opts.cwd, "running command");

        let fut = self.provider.run(&handle.id, command, opts.cwd.as_deref());
        match tokio::time::timeout(opts.timeout, fut).await {
            Ok(result) => {
                let output = result?;
                debug!(sandbox_id = %handle.id, exit_code = output.exit_code, "command finished");
                Ok(output)
            }
            Err(_) => {
                warn!(
                    sandbox_id = %handle.id,
                    command,
                    timeout_secs = opts.timeout.as_secs(),
                    "command timed out"
                );
                Err(SandboxError::CommandTimeout {
                    command: command.to_string(),
                    timeout_secs: opts.timeout.as_secs(),
                })
            }
        }
    }

    /// Start a long-running command (the dev server) as a detached task.
    ///
    /// The process must outlive the request that started it, so the task is
    /// not tracked and its result is only logged.
    pub fn spawn_detached(&self, handle: &SandboxHandle, command: &str, cwd: Option<&str>) {
        let provider = Arc::clone(&self.provider);
        let id = handle.id.clone();
        let command = command.to_string();
        let cwd = cwd.map(str::to_string);

        info!(sandbox_id = %id, command = %command, "starting detached process");
        tokio::spawn(async move {
            match provider.run(&id, &command, cwd.as_deref()).await {
                Ok(output) => info!(
                    sandbox_id = %id,
                    exit_code = output.exit_code,
                    "detached process exited"
                ),
                Err(e) => warn!(sandbox_id = %id, error = %e, "detached process failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    fn handle(id: &str) -> SandboxHandle {
        SandboxHandle::new(id, "http://localhost:5173", SandboxState::Ready)
    }

    #[tokio::test]
    async fn test_run_returns_non_zero_exit_as_ok() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_command("npm run build", 1, "", "error TS2304");
        let runner = CommandRunner::new(provider.clone());

        let out = runner
            .run(&handle(&id), "npm run build", &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stderr, "error TS2304");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_delay("sleep 100", Duration::from_secs(5));
        let runner = CommandRunner::new(provider.clone());

        let opts = RunOptions {
            cwd: None,
            timeout: Duration::from_millis(20),
        };
        let err = runner.run(&handle(&id), "sleep 100", &opts).await.unwrap_err();
        assert!(matches!(err, SandboxError::CommandTimeout { .. }));
    }

    #[tokio::test]
    async fn test_run_on_missing_sandbox_is_error() {
        let provider = Arc::new(ScriptedProvider::new());
        let runner = CommandRunner::new(provider);
        let err = runner
            .run(&handle("gone"), "ls", &RunOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_spawn_detached_does_not_block() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.script_delay("npm run dev", Duration::from_secs(3600));
        let runner = CommandRunner::new(provider.clone());

        runner.spawn_detached(&handle(&id), "npm run dev", Some("/home/user/app"));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(provider.commands(&id).iter().any(|c| c == "npm run dev"));
    }
}
