use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::sync::scheduler::SyncCallback;

/// Runs a shell command as the ingestion callback. A non-zero exit status is
/// reported as a callback failure.
#[derive(Debug, Clone)]
pub struct CommandCallback {
    command: String,
}

impl CommandCallback {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl SyncCallback for CommandCallback {
    fn run(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        let command = self.command.clone();
        async move {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .kill_on_drop(true)
                .status()
                .await
                .with_context(|| format!("failed to spawn callback command `{command}`"))?;
            if !status.success() {
                anyhow::bail!("callback command `{command}` exited with {status}");
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn successful_command_completes() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ran");
        let callback = CommandCallback::new(format!("touch '{}'", marker.display()));

        callback.run().await.unwrap();

        assert!(marker.exists());
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let callback = CommandCallback::new("exit 3");
        let err = callback.run().await.unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }
}
