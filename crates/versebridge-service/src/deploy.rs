//! Deploy pull mechanics for the push webhook.
//!
//! A push to the default branch triggers a `git pull` of the running
//! checkout. The trait seam exists so webhook dispatch tests can use a
//! stub instead of a real repository.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Pulls the latest source and reports the resulting commit hash.
#[async_trait]
pub trait SourcePuller: std::fmt::Debug + Send + Sync {
    async fn pull(&self) -> Result<String>;
}

/// Shells out to the `git` CLI in a configured checkout.
#[derive(Debug)]
pub struct GitPuller {
    repo_dir: PathBuf,
}

impl GitPuller {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .with_context(|| format!("failed to run git {args:?}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {args:?} failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourcePuller for GitPuller {
    async fn pull(&self) -> Result<String> {
        let pull_output = self.git(&["pull", "--ff-only"]).await?;
        log::info!("git pull: {pull_output}");
        let commit = self.git(&["rev-parse", "HEAD"]).await?;
        log::info!("checkout now at {commit}");
        Ok(commit)
    }
}
