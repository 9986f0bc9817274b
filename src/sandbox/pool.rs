use std::sync::Arc;

use tracing::{info, warn};

use super::{CommandRunner, SandboxHandle, SandboxProvider, SandboxState};
use crate::config::SandboxSection;
use crate::errors::SandboxError;

/// How a sandbox was obtained for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOrigin {
    /// Connected to the id the caller asked for.
    Reused,
    /// Took the pool's pre-warmed sandbox.
    Prewarmed,
    /// Provisioned a new one.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct AcquiredSandbox {
    pub handle: SandboxHandle,
    pub origin: AcquireOrigin,
    /// Set when the caller asked for an id that could not be connected to.
    pub fallback_from: Option<String>,
}

/// Acquires sandboxes for requests and owns the single pre-warmed slot.
///
/// The pool does not enforce mutual exclusion on a sandbox id: two requests
/// naming the same id will race on file writes. Callers serialize requests
/// against one sandbox.
pub struct SandboxPool {
    provider: Arc<dyn SandboxProvider>,
    runner: CommandRunner,
    settings: SandboxSection,
    /// Held across provisioning so concurrent pre-warm calls share one sandbox.
    prewarmed: tokio::sync::Mutex<Option<SandboxHandle>>,
}

impl SandboxPool {
    pub fn new(provider: Arc<dyn SandboxProvider>, settings: SandboxSection) -> Self {
        Self {
            runner: CommandRunner::new(Arc::clone(&provider)),
            provider,
            settings,
            prewarmed: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SandboxSection {
        &self.settings
    }

    pub fn provider(&self) -> Arc<dyn SandboxProvider> {
        Arc::clone(&self.provider)
    }

    /// Reuse `existing_id` when it still exists, otherwise the pre-warmed
    /// sandbox, otherwise provision a new one.
    pub async fn create_or_reuse(
        &self,
        existing_id: Option<&str>,
    ) -> Result<AcquiredSandbox, SandboxError> {
        let mut fallback_from = None;

        if let Some(id) = existing_id {
            match self.connect(id).await {
                Ok(handle) => {
                    info!(sandbox_id = %id, "reusing existing sandbox");
                    return Ok(AcquiredSandbox {
                        handle,
                        origin: AcquireOrigin::Reused,
                        fallback_from: None,
                    });
                }
                Err(e) => {
                    warn!(sandbox_id = %id, error = %e, "could not connect, provisioning a new sandbox");
                    fallback_from = Some(id.to_string());
                }
            }
        } else if let Some(handle) = self.healthy_prewarmed().await {
            info!(sandbox_id = %handle.id, "using pre-warmed sandbox");
            return Ok(AcquiredSandbox {
                handle,
                origin: AcquireOrigin::Prewarmed,
                fallback_from: None,
            });
        }

        let handle = self.provision().await?;
        Ok(AcquiredSandbox {
            handle,
            origin: AcquireOrigin::Fresh,
            fallback_from,
        })
    }

    /// Provision the pre-warmed sandbox, or return the existing one unchanged.
    pub async fn prewarm(&self) -> Result<SandboxHandle, SandboxError> {
        let mut slot = self.prewarmed.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self.provision().await?;
        info!(sandbox_id = %handle.id, "sandbox pre-warmed");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Best-effort termination. Errors are logged and swallowed.
    pub async fn destroy(&self, id: &str) {
        if let Err(e) = self.provider.kill(id).await {
            warn!(sandbox_id = %id, error = %e, "failed to kill sandbox (may already be gone)");
        }
        let mut slot = self.prewarmed.lock().await;
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
        }
        info!(sandbox_id = %id, "sandbox destroyed");
    }

    pub async fn prewarmed(&self) -> Option<SandboxHandle> {
        self.prewarmed.lock().await.clone()
    }

    /// Forget the pre-warmed sandbox without terminating it.
    pub async fn clear_prewarmed(&self) -> Option<SandboxHandle> {
        self.prewarmed.lock().await.take()
    }

    /// Destroy the pre-warmed sandbox; called on server shutdown.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.clear_prewarmed().await {
            self.destroy(&handle.id).await;
        }
    }

    async fn connect(&self, id: &str) -> Result<SandboxHandle, SandboxError> {
        self.provider.connect(id).await?;
        let endpoint = self.provider.endpoint(id, self.settings.dev_port).await?;
        Ok(SandboxHandle::new(id, endpoint, SandboxState::Reused))
    }

    async fn healthy_prewarmed(&self) -> Option<SandboxHandle> {
        let mut slot = self.prewarmed.lock().await;
        let candidate = slot.clone()?;
        match self.provider.connect(&candidate.id).await {
            Ok(()) => {
                let mut handle = candidate;
                handle.state = SandboxState::Reused;
                Some(handle)
            }
            Err(e) => {
                warn!(sandbox_id = %candidate.id, error = %e, "pre-warmed sandbox is gone, clearing slot");
                *slot = None;
                None
            }
        }
    }

    async fn provision(&self) -> Result<SandboxHandle, SandboxError> {
        let id = self
            .provider
            .create(&self.settings.template, self.settings.sandbox_timeout())
            .await
            .map_err(|e| match e {
                SandboxError::Provision(msg) => SandboxError::Provision(msg),
                other => SandboxError::Provision(other.to_string()),
            })?;

        let mut handle = SandboxHandle::new(&id, "", SandboxState::Provisioning);

        self.runner.spawn_detached(
            &handle,
            &self.settings.dev_command,
            Some(&self.settings.project_dir),
        );

        let grace = self.settings.startup_grace();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }

        let endpoint = match self.provider.endpoint(&id, self.settings.dev_port).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let _ = self.provider.kill(&id).await;
                return Err(SandboxError::Provision(format!(
                    "sandbox {} has no reachable endpoint: {}",
                    id, e
                )));
            }
        };

        handle.endpoint = endpoint;
        handle.state = SandboxState::Ready;
        info!(sandbox_id = %id, endpoint = %handle.endpoint, "sandbox ready");
        Ok(handle)
    }
}
