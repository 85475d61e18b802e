//! Diff splitting, new-file synthesis, and patch auto-apply for the
//! Requester Flow's result pipeline (§4.8). Uses `tokio::process::Command`
//! to shell out to `git apply` in the same spawn-and-capture style as the
//! Ephemeral Git Server's own git subprocess calls.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::FlowError;

/// The unified diff split into the AI's review/commentary section (the
/// `AI_OUTPUT.md` hunk) and the actual code changes, per §4.5/§4.8.
pub struct SplitDiff {
    pub ai_review: Option<String>,
    pub code_changes: Option<String>,
}

/// Split a unified diff produced by `EphemeralGitServer::get_changes` into
/// its `AI_OUTPUT.md` section (the AI's own review/summary) and every other
/// file's changes (the actual code diff).
pub fn split_diff(diff: &str) -> SplitDiff {
    let mut ai_review = String::new();
    let mut code_changes = String::new();
    let mut current_is_ai_output = false;

    for line in diff.lines() {
        if let Some(path) = diff_git_new_path(line) {
            current_is_ai_output = path == "AI_OUTPUT.md";
        }
        let target = if current_is_ai_output { &mut ai_review } else { &mut code_changes };
        target.push_str(line);
        target.push('\n');
    }

    SplitDiff {
        ai_review: non_empty(ai_review),
        code_changes: non_empty(code_changes),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Parse a `diff --git a/X b/X` header line's `b/` path, if this is one.
fn diff_git_new_path(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("diff --git a/")?;
    let (_, b_path) = rest.split_once(" b/")?;
    Some(b_path.trim_end())
}

/// Save a patch under `./patches/hokipoki-<taskId>-<ts>.patch`, creating the
/// directory if needed.
pub async fn save_patch(task_id: &str, now: i64, diff: &str) -> Result<PathBuf, FlowError> {
    let dir = PathBuf::from("patches");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("hokipoki-{task_id}-{now}.patch"));
    tokio::fs::write(&path, diff).await?;
    Ok(path)
}

/// New-file detection: a `diff --git a/X b/X` header immediately followed
/// (within its hunk) by `new file mode ...` means `git apply` expects `X`
/// to not exist yet. We materialize it from the accumulated `+` lines
/// before invoking `git apply`, matching the source's own pre-pass.
pub async fn materialize_new_files(cwd: &Path, diff: &str) -> Result<(), FlowError> {
    for file in new_files_in_diff(diff) {
        let dest = cwd.join(&file.path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, file.content).await?;
        info!(path = %file.path, "materialized new file ahead of patch apply");
    }
    Ok(())
}

struct NewFile {
    path: String,
    content: String,
}

fn new_files_in_diff(diff: &str) -> Vec<NewFile> {
    let mut files = Vec::new();
    let mut lines = diff.lines().peekable();
    let mut pending_path: Option<String> = None;
    let mut pending_content = String::new();
    let mut collecting = false;

    while let Some(line) = lines.next() {
        if let Some(path) = diff_git_new_path(line) {
            if let Some(path) = pending_path.take() {
                if collecting {
                    files.push(NewFile { path, content: pending_content.clone() });
                }
            }
            pending_path = Some(path.to_string());
            pending_content.clear();
            collecting = false;
            continue;
        }
        if line.starts_with("new file mode") {
            collecting = true;
            continue;
        }
        if collecting {
            if let Some(content) = line.strip_prefix('+') {
                if !line.starts_with("+++") {
                    pending_content.push_str(content);
                    pending_content.push('\n');
                }
            }
        }
    }
    if let Some(path) = pending_path {
        if collecting {
            files.push(NewFile { path, content: pending_content });
        }
    }
    files
}

/// Outcome of attempting to auto-apply a code diff.
pub enum ApplyOutcome {
    Applied,
    Conflict,
}

/// `git apply --check` then `git apply`, from `cwd`. A failing `--check`
/// is treated as `PatchConflict` per §7 — the patch file is left on disk
/// and the caller does not delete it.
pub async fn try_apply(cwd: &Path, patch_path: &Path) -> Result<ApplyOutcome, FlowError> {
    let check = run_git_apply(cwd, patch_path, true).await?;
    if !check {
        warn!(patch = %patch_path.display(), "git apply --check failed, leaving patch on disk");
        return Ok(ApplyOutcome::Conflict);
    }

    let applied = run_git_apply(cwd, patch_path, false).await?;
    if !applied {
        warn!(patch = %patch_path.display(), "git apply failed after a clean --check, leaving patch on disk");
        return Ok(ApplyOutcome::Conflict);
    }

    Ok(ApplyOutcome::Applied)
}

async fn run_git_apply(cwd: &Path, patch_path: &Path, check_only: bool) -> Result<bool, FlowError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(cwd).arg("apply");
    if check_only {
        cmd.arg("--check");
    }
    cmd.arg(patch_path);
    let output = cmd.output().await?;
    Ok(output.status.success())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "diff --git a/AI_OUTPUT.md b/AI_OUTPUT.md\nnew file mode 100644\nindex 0000000..abc\n--- /dev/null\n+++ b/AI_OUTPUT.md\n@@ -0,0 +1,2 @@\n+Fixed a typo in greeting.\n+Nothing else changed.\ndiff --git a/a.txt b/a.txt\nindex abc..def 100644\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-helo\n+hello\n";

    #[test]
    fn split_diff_separates_ai_output_from_code_changes() {
        let split = split_diff(SAMPLE_DIFF);
        let review = split.ai_review.unwrap();
        assert!(review.contains("AI_OUTPUT.md"));
        assert!(review.contains("Fixed a typo"));

        let code = split.code_changes.unwrap();
        assert!(code.contains("a.txt"));
        assert!(!code.contains("Fixed a typo"));
    }

    #[test]
    fn split_diff_with_only_code_changes_has_no_review() {
        let diff = "diff --git a/a.txt b/a.txt\nindex abc..def 100644\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-helo\n+hello\n";
        let split = split_diff(diff);
        assert!(split.ai_review.is_none());
        assert!(split.code_changes.is_some());
    }

    #[test]
    fn new_files_in_diff_extracts_added_content() {
        let diff = "diff --git a/new.txt b/new.txt\nnew file mode 100644\nindex 0000000..abc\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+line one\n+line two\n";
        let files = new_files_in_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "new.txt");
        assert_eq!(files[0].content, "line one\nline two\n");
    }

    #[test]
    fn new_files_in_diff_ignores_modified_files() {
        let diff = "diff --git a/a.txt b/a.txt\nindex abc..def 100644\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-helo\n+hello\n";
        assert!(new_files_in_diff(diff).is_empty());
    }

    #[tokio::test]
    async fn save_patch_writes_under_patches_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        let path = save_patch("task-1", 1_700_000_000, "diff content").await.unwrap();
        assert!(path.starts_with("patches"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "diff content");
    }
}
