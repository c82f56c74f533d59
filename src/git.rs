//! Scoped-staging Git port (SPEC_FULL §4.C).
//!
//! Every staging and commit operation carries an explicit pathspec. No
//! command here ever uses `git add -A` or an implicit parent directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;

use crate::error::{ReviewError, Result};

/// Sentinel returned by [`GitRepo::current_commit`] on an unborn HEAD
/// (§4.I, §8 property 3 note).
pub const NO_COMMITS_YET: &str = "<no-commits-yet>";

pub struct GitOutput {
   pub ok:     bool,
   pub stdout: String,
   pub stderr: String,
}

pub struct GitRepo {
   root: PathBuf,
}

impl GitRepo {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   fn run(&self, args: &[&str]) -> Result<GitOutput> {
      let output = Command::new("git")
         .arg("-C")
         .arg(&self.root)
         .args(args)
         .output()
         .map_err(|e| ReviewError::Git(format!("failed to spawn git {args:?}: {e}")))?;

      Ok(GitOutput {
         ok:     output.status.success(),
         stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
         stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      })
   }

   fn run_checked(&self, args: &[&str]) -> Result<GitOutput> {
      let out = self.run(args)?;
      if !out.ok {
         return Err(ReviewError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            if out.stderr.is_empty() { &out.stdout } else { &out.stderr }
         )));
      }
      Ok(out)
   }

   /// Preflight: `.git` must exist and the working tree must be clean.
   pub fn ensure_repo_ready(&self) -> Result<()> {
      if !self.root.join(".git").exists() {
         return Err(ReviewError::Fatal(format!("not a git repository: {}", self.root.display())));
      }
      let status = self.run(&["status", "--porcelain"])?;
      if !status.stdout.is_empty() {
         return Err(ReviewError::Fatal(
            "working tree is not clean; commit or stash your changes before starting".to_string(),
         ));
      }
      Ok(())
   }

   pub fn has_commits(&self) -> bool {
      self.run(&["rev-parse", "--verify", "-q", "HEAD"]).is_ok_and(|o| o.ok)
   }

   /// HEAD SHA, or [`NO_COMMITS_YET`] on a fresh repository.
   pub fn current_commit(&self) -> String {
      match self.run(&["rev-parse", "--verify", "-q", "HEAD"]) {
         Ok(out) if out.ok && !out.stdout.is_empty() => out.stdout,
         _ => NO_COMMITS_YET.to_string(),
      }
   }

   pub fn current_branch(&self) -> String {
      self
         .run(&["rev-parse", "--abbrev-ref", "HEAD"])
         .ok()
         .filter(|o| o.ok && !o.stdout.is_empty())
         .map_or_else(|| "HEAD".to_string(), |o| o.stdout)
   }

   pub fn is_tracked(&self, path: &str) -> bool {
      self.run(&["ls-files", "--error-unmatch", "--", path]).is_ok_and(|o| o.ok)
   }

   /// True if `git status --porcelain -- <path>` reports anything for this
   /// path (the local-change guard used before every destructive op).
   pub fn has_local_changes(&self, path: &str) -> bool {
      self.run(&["status", "--porcelain", "--", path]).is_ok_and(|o| !o.stdout.is_empty())
   }

   pub fn has_remote(&self, name: &str) -> bool {
      self.run(&["remote", "get-url", name]).is_ok_and(|o| o.ok && !o.stdout.is_empty())
   }

   /// `origin/HEAD` → local `main` → local `master` → current branch.
   pub fn guess_default_base(&self) -> String {
      if let Ok(out) = self.run(&["symbolic-ref", "-q", "refs/remotes/origin/HEAD"])
         && out.ok
         && let Some(base) = out.stdout.rsplit('/').next()
         && !base.is_empty()
      {
         return base.to_string();
      }
      if self.run(&["show-ref", "--verify", "--quiet", "refs/heads/main"]).is_ok_and(|o| o.ok) {
         return "main".to_string();
      }
      if self.run(&["show-ref", "--verify", "--quiet", "refs/heads/master"]).is_ok_and(|o| o.ok) {
         return "master".to_string();
      }
      self.current_branch()
   }

   /// Append a `-YYYYmmdd-HHMMSS` suffix if `desired` already exists.
   pub fn unique_branch_name(&self, desired: &str) -> String {
      let exists = self
         .run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{desired}")])
         .is_ok_and(|o| o.ok);
      if !exists {
         return desired.to_string();
      }
      let ts = Local::now().format("%Y%m%d-%H%M%S");
      format!("{desired}-{ts}")
   }

   /// Switch to `name` if it exists; otherwise create it from `base`
   /// (guessed if `None`), as an orphan branch when the repo has no
   /// commits yet. Returns the branch name actually used.
   pub fn checkout_branch(&self, name: &str, base: Option<&str>) -> Result<String> {
      let exists = self.run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")]).is_ok_and(|o| o.ok);
      if exists {
         self.run_checked(&["checkout", name])?;
         return Ok(name.to_string());
      }

      let unique = self.unique_branch_name(name);
      if self.has_commits() {
         let base = base.map_or_else(|| self.guess_default_base(), ToString::to_string);
         self.run_checked(&["checkout", "-b", &unique, &base])?;
      } else {
         self.run_checked(&["checkout", "--orphan", &unique])?;
      }
      Ok(unique)
   }

   /// `git add -- <paths...>`, existing paths only, never `-A`.
   pub fn stage_paths(&self, paths: &[&str]) -> Result<()> {
      let existing: Vec<&str> = paths.iter().copied().filter(|p| self.root.join(p).exists()).collect();
      if existing.is_empty() {
         return Ok(());
      }
      let mut args = vec!["add", "--"];
      args.extend(existing);
      self.run_checked(&args)?;
      Ok(())
   }

   /// `git rm -f -- <path>` for a tracked file.
   pub fn rm_path(&self, path: &str) -> Result<()> {
      self.run_checked(&["rm", "-f", "--", path])?;
      Ok(())
   }

   /// `git mv -- <src> <dst>` for a tracked file.
   pub fn mv_path(&self, src: &str, dst: &str) -> Result<()> {
      self.run_checked(&["mv", "--", src, dst])?;
      Ok(())
   }

   /// True if the index has staged changes at all (used to detect
   /// no-op commits before calling [`Self::commit_scoped`]).
   pub fn index_has_changes(&self) -> bool {
      self.run(&["diff", "--cached", "--quiet"]).is_ok_and(|o| !o.ok)
   }

   /// Commit with an explicit pathspec; skipped (returns `Ok(false)`) if
   /// there are no staged changes for those paths.
   pub fn commit_scoped(&self, message: &str, paths: &[&str]) -> Result<bool> {
      if !self.index_has_changes() {
         return Ok(false);
      }
      let mut args = vec!["commit", "-m", message, "--"];
      args.extend(paths);
      self.run_checked(&args)?;
      Ok(true)
   }

   /// Changed paths of the last commit (used by tests verifying §8
   /// property 1, scoped commits).
   pub fn last_commit_paths(&self) -> Result<Vec<String>> {
      let out = self.run_checked(&["diff-tree", "--no-commit-id", "--name-only", "-r", "HEAD"])?;
      Ok(out.stdout.lines().map(ToString::to_string).collect())
   }

   /// No-op if no remote is configured or HEAD is detached; otherwise
   /// pushes the current branch (`--set-upstream` when requested).
   pub fn push(&self, remote: &str, set_upstream: bool) -> Result<bool> {
      if !self.has_remote(remote) {
         return Ok(false);
      }
      let branch = self.current_branch();
      if branch == "HEAD" {
         return Ok(false);
      }
      let refspec = format!("HEAD:{branch}");
      let mut args = vec!["push"];
      if set_upstream {
         args.push("--set-upstream");
      }
      args.push(remote);
      args.push(&refspec);
      self.run_checked(&args)?;
      Ok(true)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn init_repo() -> (tempfile::TempDir, GitRepo) {
      let dir = tempfile::tempdir().unwrap();
      let repo = GitRepo::new(dir.path());
      repo.run_checked(&["init", "-q"]).unwrap();
      repo.run_checked(&["config", "user.email", "test@example.com"]).unwrap();
      repo.run_checked(&["config", "user.name", "Test"]).unwrap();
      (dir, repo)
   }

   #[test]
   fn current_commit_is_sentinel_on_fresh_repo() {
      let (_dir, repo) = init_repo();
      assert_eq!(repo.current_commit(), NO_COMMITS_YET);
      assert!(!repo.has_commits());
   }

   #[test]
   fn scoped_commit_only_touches_named_paths() {
      let (dir, repo) = init_repo();
      std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
      std::fs::write(dir.path().join("b.txt"), "b\n").unwrap();
      repo.stage_paths(&["a.txt", "b.txt"]).unwrap();
      repo.commit_scoped("initial", &["a.txt", "b.txt"]).unwrap();

      std::fs::write(dir.path().join("b.txt"), "b changed\n").unwrap();
      std::fs::write(dir.path().join("a.txt"), "a changed\n").unwrap();
      repo.stage_paths(&["a.txt"]).unwrap();
      let committed = repo.commit_scoped("update a only", &["a.txt"]).unwrap();
      assert!(committed);
      assert_eq!(repo.last_commit_paths().unwrap(), vec!["a.txt".to_string()]);
      assert!(repo.has_local_changes("b.txt"));
   }

   #[test]
   fn commit_scoped_is_noop_without_staged_changes() {
      let (dir, repo) = init_repo();
      std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
      repo.stage_paths(&["a.txt"]).unwrap();
      repo.commit_scoped("initial", &["a.txt"]).unwrap();
      let head_before = repo.current_commit();
      let committed = repo.commit_scoped("no changes staged", &["a.txt"]).unwrap();
      assert!(!committed);
      assert_eq!(repo.current_commit(), head_before);
   }

   #[test]
   fn guess_default_base_falls_back_to_current_branch() {
      let (_dir, repo) = init_repo();
      // No commits yet, so current_branch() reflects the not-yet-created
      // default branch name; guess_default_base must not panic or loop.
      let base = repo.guess_default_base();
      assert!(!base.is_empty());
   }
}
