//! End-to-end fixture support (SPEC_FULL §8): builds a real temporary Git
//! repository so the orchestrator's state machine, gating, and
//! reconciliation can be exercised against an actual working tree and
//! index instead of mocked Git calls.
//!
//! Grounded in the `init_repo()` helper duplicated across `git.rs`,
//! `apply.rs`, and `state.rs`'s own test modules; collected here once so
//! scenario tests don't each reimplement it.

use std::path::Path;
use std::process::Command;

use crate::git::GitRepo;

pub struct RepoFixture {
   pub dir:  tempfile::TempDir,
   pub repo: GitRepo,
}

impl RepoFixture {
   /// An initialized, empty repository with a committed `files` set
   /// (content keyed by repo-relative path).
   pub fn new(files: &[(&str, &str)]) -> Self {
      let dir = tempfile::tempdir().expect("tempdir");
      run_git(dir.path(), &["init", "-q"]);
      run_git(dir.path(), &["config", "user.email", "test@example.com"]);
      run_git(dir.path(), &["config", "user.name", "Test"]);

      let repo = GitRepo::new(dir.path());
      for (rel, content) in files {
         write(dir.path(), rel, content);
      }
      if !files.is_empty() {
         let paths: Vec<&str> = files.iter().map(|(rel, _)| *rel).collect();
         repo.stage_paths(&paths).expect("stage seed files");
         repo.commit_scoped("seed", &paths).expect("commit seed files");
      }
      Self { dir, repo }
   }

   pub fn write(&self, rel: &str, content: &str) {
      write(self.dir.path(), rel, content);
   }

   pub fn read(&self, rel: &str) -> String {
      std::fs::read_to_string(self.dir.path().join(rel)).unwrap_or_default()
   }

   pub fn exists(&self, rel: &str) -> bool {
      self.dir.path().join(rel).exists()
   }
}

fn write(root: &Path, rel: &str, content: &str) {
   let path = root.join(rel);
   if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("create parent dirs");
   }
   std::fs::write(path, content).expect("write fixture file");
}

fn run_git(dir: &Path, args: &[&str]) {
   let status = Command::new("git").arg("-C").arg(dir).args(args).status().expect("spawn git");
   assert!(status.success(), "git {args:?} failed in fixture setup");
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::apply;
   use crate::patch::validate_patch;

   #[test]
   fn fixture_seeds_a_clean_committed_repo() {
      let fx = RepoFixture::new(&[("README.md", "hello\n"), ("src/lib.rs", "fn main() {}\n")]);
      assert!(fx.repo.ensure_repo_ready().is_ok());
      assert_eq!(fx.read("README.md"), "hello\n");
   }

   #[test]
   fn applier_runs_cleanly_against_a_fresh_fixture_repo() {
      let fx = RepoFixture::new(&[("src/lib.rs", "fn main() {}\n")]);
      let patch = validate_patch(
         r#"{"op":"update","file":"src/lib.rs","body":"fn main() { println!(\"hi\"); }\n","status":"completed"}"#,
      )
      .unwrap();
      apply::apply_patch(&fx.repo, &patch).unwrap();
      assert_eq!(fx.read("src/lib.rs"), "fn main() { println!(\"hi\"); }\n");
      assert_eq!(fx.repo.last_commit_paths().unwrap(), vec!["src/lib.rs".to_string()]);
   }
}
