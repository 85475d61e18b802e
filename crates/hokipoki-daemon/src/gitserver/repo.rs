//! Bare-repo lifecycle for a single task's Ephemeral Git Server.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::GitServerError;

/// Materialize a bare repo at `<tmp_dir>/<task_id>.git`, populate a `main`
/// work tree with `files`, commit, and push. `files` maps a path (relative
/// to the requester's current working directory, `..` components
/// stripped) to its contents.
pub async fn initialize(
    tmp_dir: &Path,
    task_id: &str,
    files: &[(PathBuf, Vec<u8>)],
) -> Result<PathBuf, GitServerError> {
    let bare_path = tmp_dir.join(format!("{task_id}.git"));
    tokio::fs::create_dir_all(&bare_path).await?;
    run_git(tmp_dir, ["init", "--bare", bare_path.to_string_lossy().as_ref()]).await?;
    run_git_in(&bare_path, ["config", "http.receivepack", "true"]).await?;

    let work_tree = tmp_dir.join(format!("{task_id}-worktree"));
    tokio::fs::create_dir_all(&work_tree).await?;
    run_git_in(&work_tree, ["init", "-b", "main"]).await?;
    run_git_in(&work_tree, ["remote", "add", "origin", bare_path.to_string_lossy().as_ref()]).await?;

    if files.is_empty() {
        // Testing affordance: an empty task would otherwise produce an
        // empty initial commit with nothing for the sandbox to diff against.
        let placeholder = work_tree.join("SOURCE.md");
        tokio::fs::write(&placeholder, b"# HokiPoki task\n").await?;
    } else {
        for (rel_path, content) in files {
            let sanitized = sanitize_relative_path(rel_path);
            let dest = work_tree.join(&sanitized);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, content).await?;
        }
    }

    run_git_in(&work_tree, ["add", "-A"]).await?;
    run_git_in(&work_tree, ["commit", "-m", "Initial task files"]).await?;
    run_git_in(&work_tree, ["push", "origin", "main"]).await?;

    info!(task_id, bare = %bare_path.display(), "ephemeral git repo initialized");
    Ok(bare_path)
}

/// Strip leading `..` (and root) components so a malicious relative path
/// cannot escape the work tree.
fn sanitize_relative_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect()
}

/// Clone the bare repo into a throwaway work tree and compute the unified
/// diff of everything committed after the initial commit.
pub async fn get_changes(bare_path: &Path, scratch_dir: &Path) -> Result<String, GitServerError> {
    let clone_dir = scratch_dir.join("diff-clone");
    if clone_dir.exists() {
        tokio::fs::remove_dir_all(&clone_dir).await?;
    }
    run_git(
        scratch_dir,
        ["clone", bare_path.to_string_lossy().as_ref(), clone_dir.to_string_lossy().as_ref()],
    )
    .await?;

    let log = run_git_in(&clone_dir, ["rev-list", "--count", "HEAD"]).await?;
    let commit_count: u32 = log.trim().parse().unwrap_or(1);

    let root = run_git_in(&clone_dir, ["rev-list", "--max-parents=0", "HEAD"]).await?;
    let root = root.trim().to_string();

    let diff = if commit_count >= 2 {
        run_git_in(&clone_dir, ["diff", &root, "HEAD"]).await?
    } else {
        run_git_in(&clone_dir, ["show", "HEAD"]).await?
    };

    debug!(task_commits = commit_count, "extracted diff from ephemeral repo");
    Ok(diff)
}

/// Overwrite every file in `bare_path`'s work tree with random bytes (up to
/// 1 MiB each) before removing the directory. Best-effort: tmpfs teardown on
/// process exit is the ultimate guarantee.
pub async fn shred(dir: &Path) -> Result<(), GitServerError> {
    shred_dir(dir).await?;
    tokio::fs::remove_dir_all(dir).await.ok();
    Ok(())
}

fn shred_dir(dir: &Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), GitServerError>> + Send + '_>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                shred_dir(&path).await?;
            } else {
                let len = (metadata.len() as usize).min(1024 * 1024);
                let mut random_bytes = vec![0u8; len];
                use rand::RngCore;
                rand::rng().fill_bytes(&mut random_bytes);
                tokio::fs::write(&path, random_bytes).await?;
            }
        }
        Ok(())
    })
}

async fn run_git<I, S>(cwd: &Path, args: I) -> Result<String, GitServerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    run_git_in(cwd, args).await
}

async fn run_git_in<I, S>(cwd: &Path, args: I) -> Result<String, GitServerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(GitServerError::GitCommandFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_parent_and_root_components() {
        let p = sanitize_relative_path(Path::new("../../etc/passwd"));
        assert_eq!(p, PathBuf::from("etc/passwd"));

        let p = sanitize_relative_path(Path::new("/etc/passwd"));
        assert_eq!(p, PathBuf::from("etc/passwd"));
    }

    #[tokio::test]
    async fn initialize_with_empty_files_synthesizes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let bare = initialize(tmp.path(), "task-1", &[]).await.unwrap();
        assert!(bare.exists());

        let diff = get_changes(&bare, tmp.path()).await.unwrap();
        assert!(diff.contains("SOURCE.md"));
    }

    #[tokio::test]
    async fn initialize_with_files_commits_them() {
        let tmp = tempfile::tempdir().unwrap();
        let files = vec![(PathBuf::from("src/main.rs"), b"fn main() {}\n".to_vec())];
        let bare = initialize(tmp.path(), "task-2", &files).await.unwrap();

        let diff = get_changes(&bare, tmp.path()).await.unwrap();
        assert!(diff.contains("main.rs"));
    }

    #[tokio::test]
    async fn shred_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("to-shred");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("secret.txt"), b"classified").await.unwrap();

        shred(&dir).await.unwrap();
        assert!(!dir.exists());
    }
}
