use std::sync::Arc;

use tracing::debug;

use super::{SandboxHandle, SandboxProvider};
use crate::errors::SandboxError;

/// Whole-file reads and writes inside a sandbox.
///
/// Each call is independent: there is no transaction across files. Callers
/// that write several files sequence the calls and re-issue on failure.
#[derive(Clone)]
pub struct FileChannel {
    provider: Arc<dyn SandboxProvider>,
}

fn require_absolute(path: &str) -> Result<(), SandboxError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(SandboxError::RelativePath {
            path: path.to_string(),
        })
    }
}

impl FileChannel {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self { provider }
    }

    pub async fn write(
        &self,
        handle: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        require_absolute(path)?;
        debug!(sandbox_id = %handle.id, path, bytes = content.len(), "writing file");
        self.provider.write_file(&handle.id, path, content).await
    }

    pub async fn read(&self, handle: &SandboxHandle, path: &str) -> Result<String, SandboxError> {
        require_absolute(path)?;
        debug!(sandbox_id = %handle.id, path, "reading file");
        self.provider.read_file(&handle.id, path).await
    }

    pub async fn list(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<String>, SandboxError> {
        require_absolute(path)?;
        self.provider.list_files(&handle.id, path).await
    }

    /// Write, retrying once. Used for the initial component write where a
    /// transient failure should not leave the sandbox without source.
    pub async fn write_with_retry(
        &self,
        handle: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        match self.write(handle, path, content).await {
            Ok(()) => Ok(()),
            Err(SandboxError::RelativePath { path }) => Err(SandboxError::RelativePath { path }),
            Err(e) => {
                debug!(sandbox_id = %handle.id, path, error = %e, "write failed, retrying");
                self.write(handle, path, content).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        let files = FileChannel::new(provider.clone());
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        files
            .write(&handle, "/home/user/app/src/App.tsx", "export default 1")
            .await
            .unwrap();
        let content = files.read(&handle, "/home/user/app/src/App.tsx").await.unwrap();
        assert_eq!(content, "export default 1");
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        let files = FileChannel::new(provider.clone());
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let err = files.write(&handle, "src/App.tsx", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::RelativePath { .. }));
        assert!(provider.file(&id, "src/App.tsx").is_none());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        let files = FileChannel::new(provider.clone());
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let err = files.read(&handle, "/nope.txt").await.unwrap_err();
        assert!(matches!(err, SandboxError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_returns_direct_children() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.put_file(&id, "/app/src/App.tsx", "a");
        provider.put_file(&id, "/app/src/main.tsx", "b");
        provider.put_file(&id, "/app/src/components/ui/button.tsx", "c");
        let files = FileChannel::new(provider.clone());
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        let names = files.list(&handle, "/app/src").await.unwrap();
        assert_eq!(names, vec!["App.tsx", "components", "main.tsx"]);
    }

    #[tokio::test]
    async fn test_write_with_retry_recovers_from_one_failure() {
        let provider = Arc::new(ScriptedProvider::new());
        let id = provider.seed_sandbox();
        provider.fail_next_writes(1);
        let files = FileChannel::new(provider.clone());
        let handle = SandboxHandle::new(&id, "http://x", SandboxState::Ready);

        files.write_with_retry(&handle, "/app/a.txt", "ok").await.unwrap();
        assert_eq!(provider.file(&id, "/app/a.txt").as_deref(), Some("ok"));
    }
}
