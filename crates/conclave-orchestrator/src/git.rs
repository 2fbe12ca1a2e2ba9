use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Hash of the created commit.
    pub commit_hash: String,
}

/// Commits files produced by the workflow.
///
/// Failures are reported as [`ConclaveError::Tool`], which the retry layer
/// never retries.
#[async_trait]
pub trait GitCapability: Send + Sync {
    async fn commit(&self, message: &str, files: &[String]) -> ConclaveResult<CommitInfo>;
}

/// [`GitCapability`] backed by a local repository through libgit2.
#[derive(Debug, Clone)]
pub struct Git2Committer {
    repo_path: PathBuf,
}

impl Git2Committer {
    /// Open an existing repository (the working directory, not `.git`).
    pub fn open(path: impl AsRef<Path>) -> ConclaveResult<Self> {
        let repo = git2::Repository::open(path.as_ref()).map_err(tool_error)?;
        let workdir = repo.workdir().ok_or_else(|| {
            ConclaveError::Tool(format!(
                "repository at {} is bare",
                path.as_ref().display()
            ))
        })?;
        Ok(Self {
            repo_path: workdir.to_path_buf(),
        })
    }

    /// Working tree the committer writes to.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

fn tool_error(e: git2::Error) -> ConclaveError {
    ConclaveError::Tool(format!("git: {}", e.message()))
}

fn commit_blocking(repo_path: &Path, message: &str, files: &[String]) -> ConclaveResult<String> {
    let repo = git2::Repository::open(repo_path).map_err(tool_error)?;
    let mut index = repo.index().map_err(tool_error)?;
    for file in files {
        index.add_path(Path::new(file)).map_err(tool_error)?;
    }
    index.write().map_err(tool_error)?;
    let tree_id = index.write_tree().map_err(tool_error)?;
    let tree = repo.find_tree(tree_id).map_err(tool_error)?;

    let signature = match repo.signature() {
        Ok(sig) => sig,
        Err(_) => git2::Signature::now("conclave", "conclave@localhost").map_err(tool_error)?,
    };

    // First commit has no parent.
    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit().map_err(tool_error)?),
        Err(_) => None,
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo
        .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .map_err(tool_error)?;
    Ok(oid.to_string())
}

#[async_trait]
impl GitCapability for Git2Committer {
    async fn commit(&self, message: &str, files: &[String]) -> ConclaveResult<CommitInfo> {
        if files.is_empty() {
            return Err(ConclaveError::Validation(
                "commit requires at least one file".to_string(),
            ));
        }
        let repo_path = self.repo_path.clone();
        let message = message.to_string();
        let files = files.to_vec();
        let count = files.len();

        let commit_hash = tokio::task::spawn_blocking(move || {
            commit_blocking(&repo_path, &message, &files)
        })
        .await
        .map_err(|e| ConclaveError::Tool(format!("git worker failed: {e}")))??;

        info!(commit = %commit_hash, files = count, "Committed artifact");
        Ok(CommitInfo { commit_hash })
    }
}
