//! State & Resume (SPEC_FULL §4.I).
//!
//! A small JSON checkpoint next to the repo, written after each successful
//! commit and after key conversation waypoints. Staleness is decided by
//! comparing against live `git` state rather than trusting the file, per
//! the Open Question resolution in DESIGN.md: the checkpoint is honored
//! only when both `last_commit_sha` equals current HEAD and `branch`
//! matches the current branch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::git::GitRepo;

const STATE_FILE_NAME: &str = ".gpt-review-state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationCheckpoint {
   pub conversation_id: String,
   pub last_commit_sha: String,
   pub branch:          String,
   pub timestamp:       String,
}

impl IterationCheckpoint {
   pub fn new(conversation_id: impl Into<String>, last_commit_sha: impl Into<String>, branch: impl Into<String>, timestamp: impl Into<String>) -> Self {
      Self {
         conversation_id: conversation_id.into(),
         last_commit_sha: last_commit_sha.into(),
         branch:          branch.into(),
         timestamp:       timestamp.into(),
      }
   }

   fn path(repo_root: &Path) -> PathBuf {
      repo_root.join(STATE_FILE_NAME)
   }

   pub fn save(&self, repo_root: &Path) -> Result<()> {
      let json = serde_json::to_string_pretty(self)?;
      std::fs::write(Self::path(repo_root), json)?;
      Ok(())
   }

   /// Loads the checkpoint if present and not stale, per §4.I: stale when
   /// the recorded commit no longer matches HEAD or the branch has moved.
   pub fn load_if_fresh(repo: &GitRepo) -> Option<Self> {
      let path = Self::path(repo.root());
      let contents = std::fs::read_to_string(path).ok()?;
      let checkpoint: Self = serde_json::from_str(&contents).ok()?;
      if checkpoint.last_commit_sha == repo.current_commit() && checkpoint.branch == repo.current_branch() {
         Some(checkpoint)
      } else {
         None
      }
   }
}

#[cfg(test)]
mod tests {
   use std::process::Command;

   use super::*;

   fn init_repo() -> (tempfile::TempDir, GitRepo) {
      let dir = tempfile::tempdir().unwrap();
      let commands: [&[&str]; 3] =
         [&["init", "-q"], &["config", "user.email", "test@example.com"], &["config", "user.name", "Test"]];
      for args in commands {
         Command::new("git").arg("-C").arg(dir.path()).args(args).status().unwrap();
      }
      let repo = GitRepo::new(dir.path());
      (dir, repo)
   }

   #[test]
   fn stale_checkpoint_is_rejected_after_commit_drifts() {
      let (dir, repo) = init_repo();
      std::fs::write(dir.path().join("a.txt"), "x").unwrap();
      repo.stage_paths(&["a.txt"]).unwrap();
      repo.commit_scoped("seed", &["a.txt"]).unwrap();

      let checkpoint = IterationCheckpoint::new("conv-1", repo.current_commit(), repo.current_branch(), "2026-01-01T00:00:00Z");
      checkpoint.save(dir.path()).unwrap();
      assert!(IterationCheckpoint::load_if_fresh(&repo).is_some());

      std::fs::write(dir.path().join("b.txt"), "y").unwrap();
      repo.stage_paths(&["b.txt"]).unwrap();
      repo.commit_scoped("drift", &["b.txt"]).unwrap();
      assert!(IterationCheckpoint::load_if_fresh(&repo).is_none());
   }
}
