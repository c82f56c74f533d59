//! Patch applier (SPEC_FULL §4.D).
//!
//! Validate → guard against local modifications → write/stage/commit,
//! scoped to exactly the path(s) the operation touches.

use std::fs;
use std::path::Path;

use crate::content::looks_binary;
use crate::error::{ReviewError, Result};
use crate::git::GitRepo;
use crate::patch::{Content, Patch};

/// Apply a validated patch to `repo`. Returns `true` if a commit was made,
/// `false` for a recognized no-op (content/mode already matches, or an
/// untracked delete that leaves nothing to commit).
pub fn apply_patch(repo: &GitRepo, patch: &Patch) -> Result<bool> {
   let rel = patch.file();
   guard_local_changes(repo, patch)?;

   match patch {
      Patch::Create { file, content, .. } => apply_create(repo, file, content),
      Patch::Update { file, content, .. } => apply_update(repo, file, content),
      Patch::Delete { file, .. } => apply_delete(repo, file),
      Patch::Rename { file, target, .. } => apply_rename(repo, file, target),
      Patch::Chmod { file, mode, .. } => apply_chmod(repo, file, mode),
   }
   .map_err(|e| match e {
      ReviewError::Apply { .. } => e,
      other => ReviewError::Apply { path: rel.to_string(), reason: other.to_string() },
   })
}

/// Ops other than `create` refuse to touch a path with uncommitted local
/// changes (§8 property 2).
fn guard_local_changes(repo: &GitRepo, patch: &Patch) -> Result<()> {
   if matches!(patch, Patch::Create { .. }) {
      return Ok(());
   }
   let rel = patch.file();
   if repo.has_local_changes(rel) {
      return Err(ReviewError::DirtyWorkingTree { path: rel.to_string() });
   }
   Ok(())
}

fn resolve_in_repo<'a>(repo: &GitRepo, rel: &'a str) -> Result<std::path::PathBuf> {
   let target = repo.root().join(rel);
   let canonical_root = repo.root().canonicalize().unwrap_or_else(|_| repo.root().to_path_buf());
   // Parent may not exist yet for create/rename targets; only the
   // existing-ancestor chain needs to stay inside repo.
   let mut probe = target.clone();
   while !probe.exists() {
      if let Some(parent) = probe.parent() {
         probe = parent.to_path_buf();
      } else {
         break;
      }
   }
   let canonical_probe = probe.canonicalize().unwrap_or(probe);
   if !canonical_probe.starts_with(&canonical_root) {
      return Err(ReviewError::Safety(format!("path escapes repository root: {rel}")));
   }
   Ok(target)
}

fn apply_create(repo: &GitRepo, rel: &str, content: &Content) -> Result<bool> {
   let path = resolve_in_repo(repo, rel)?;
   if path.exists() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "file already exists".to_string() });
   }
   write_file(&path, content)?;
   commit_one(repo, &format!("create: {rel}"), rel)
}

fn apply_update(repo: &GitRepo, rel: &str, content: &Content) -> Result<bool> {
   let path = resolve_in_repo(repo, rel)?;
   if !path.exists() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "file does not exist".to_string() });
   }
   if same_contents(&path, content) {
      return Ok(false);
   }
   write_file(&path, content)?;
   commit_one(repo, &format!("update: {rel}"), rel)
}

fn apply_delete(repo: &GitRepo, rel: &str) -> Result<bool> {
   let path = resolve_in_repo(repo, rel)?;
   if !path.exists() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "file does not exist".to_string() });
   }
   if path.is_dir() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "path is a directory".to_string() });
   }
   if repo.is_tracked(rel) {
      repo.rm_path(rel)?;
      commit_one(repo, &format!("delete: {rel}"), rel)
   } else {
      fs::remove_file(&path)?;
      Ok(false)
   }
}

fn apply_rename(repo: &GitRepo, rel: &str, target_rel: &str) -> Result<bool> {
   let src = resolve_in_repo(repo, rel)?;
   let dst = resolve_in_repo(repo, target_rel)?;
   if !src.exists() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "source file does not exist".to_string() });
   }
   if dst.exists() {
      return Err(ReviewError::Apply {
         path: target_rel.to_string(),
         reason: "rename target already exists".to_string(),
      });
   }
   if let Some(parent) = dst.parent() {
      fs::create_dir_all(parent)?;
   }

   if repo.is_tracked(rel) {
      repo.mv_path(rel, target_rel)?;
      let committed = repo.commit_scoped(&format!("rename: {rel} -> {target_rel}"), &[rel, target_rel])?;
      Ok(committed)
   } else {
      fs::rename(&src, &dst)?;
      commit_one(repo, &format!("add (rename of untracked): {target_rel}"), target_rel)
   }
}

fn apply_chmod(repo: &GitRepo, rel: &str, mode: &str) -> Result<bool> {
   let path = resolve_in_repo(repo, rel)?;
   if !path.exists() {
      return Err(ReviewError::Apply { path: rel.to_string(), reason: "file does not exist".to_string() });
   }

   #[cfg(unix)]
   {
      use std::os::unix::fs::PermissionsExt;
      let desired = u32::from_str_radix(mode, 8).unwrap_or(0o644);
      let current = fs::metadata(&path)?.permissions().mode() & 0o777;
      if current == desired {
         return Ok(false);
      }
      fs::set_permissions(&path, fs::Permissions::from_mode(desired))?;
   }

   commit_one(repo, &format!("chmod {mode}: {rel}"), rel)
}

fn write_file(path: &Path, content: &Content) -> Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   fs::write(path, content.as_bytes())?;
   Ok(())
}

fn same_contents(path: &Path, content: &Content) -> bool {
   let Ok(existing) = fs::read(path) else {
      return false;
   };
   match content {
      Content::Text(_) if looks_binary(&existing) => false,
      _ => existing == content.as_bytes(),
   }
}

fn commit_one(repo: &GitRepo, message: &str, rel: &str) -> Result<bool> {
   repo.stage_paths(&[rel])?;
   repo.commit_scoped(message, &[rel])
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::patch::{Status, validate_patch};

   fn init_repo() -> (tempfile::TempDir, GitRepo) {
      let dir = tempfile::tempdir().unwrap();
      let repo = GitRepo::new(dir.path());
      std::process::Command::new("git").arg("-C").arg(dir.path()).args(["init", "-q"]).status().unwrap();
      std::process::Command::new("git")
         .arg("-C")
         .arg(dir.path())
         .args(["config", "user.email", "test@example.com"])
         .status()
         .unwrap();
      std::process::Command::new("git")
         .arg("-C")
         .arg(dir.path())
         .args(["config", "user.name", "Test"])
         .status()
         .unwrap();
      (dir, repo)
   }

   #[test]
   fn create_writes_and_commits() {
      let (dir, repo) = init_repo();
      let patch = validate_patch(r#"{"op":"create","file":"a.txt","body":"hello","status":"completed"}"#).unwrap();
      assert!(patch.status().is_completed());
      let committed = apply_patch(&repo, &patch).unwrap();
      assert!(committed);
      assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello\n");
   }

   #[test]
   fn create_rejects_existing_file() {
      let (dir, repo) = init_repo();
      fs::write(dir.path().join("a.txt"), "existing\n").unwrap();
      let patch = validate_patch(r#"{"op":"create","file":"a.txt","body":"x","status":"in_progress"}"#).unwrap();
      let err = apply_patch(&repo, &patch).unwrap_err();
      assert!(matches!(err, ReviewError::Apply { .. }));
   }

   #[test]
   fn update_is_noop_when_content_matches() {
      let (dir, repo) = init_repo();
      fs::write(dir.path().join("a.txt"), "same\n").unwrap();
      repo.stage_paths(&["a.txt"]).unwrap();
      repo.commit_scoped("seed", &["a.txt"]).unwrap();

      let patch = validate_patch(r#"{"op":"update","file":"a.txt","body":"same","status":"in_progress"}"#).unwrap();
      let committed = apply_patch(&repo, &patch).unwrap();
      assert!(!committed);
   }

   #[test]
   fn update_refuses_locally_dirty_file() {
      let (dir, repo) = init_repo();
      fs::write(dir.path().join("a.txt"), "v1\n").unwrap();
      repo.stage_paths(&["a.txt"]).unwrap();
      repo.commit_scoped("seed", &["a.txt"]).unwrap();
      fs::write(dir.path().join("a.txt"), "dirty locally\n").unwrap();

      let patch = validate_patch(r#"{"op":"update","file":"a.txt","body":"v2","status":"in_progress"}"#).unwrap();
      let err = apply_patch(&repo, &patch).unwrap_err();
      assert!(matches!(err, ReviewError::DirtyWorkingTree { .. }));
   }

   #[test]
   fn delete_of_untracked_file_is_not_committed() {
      let (dir, repo) = init_repo();
      fs::write(dir.path().join("scratch.txt"), "x\n").unwrap();
      let patch = validate_patch(r#"{"op":"delete","file":"scratch.txt","status":"in_progress"}"#).unwrap();
      let committed = apply_patch(&repo, &patch).unwrap();
      assert!(!committed);
      assert!(!dir.path().join("scratch.txt").exists());
   }

   #[test]
   fn rename_tracked_file_commits_both_paths() {
      let (dir, repo) = init_repo();
      fs::write(dir.path().join("old.txt"), "content\n").unwrap();
      repo.stage_paths(&["old.txt"]).unwrap();
      repo.commit_scoped("seed", &["old.txt"]).unwrap();

      let patch = validate_patch(r#"{"op":"rename","file":"old.txt","target":"new.txt","status":"completed"}"#)
         .unwrap();
      let committed = apply_patch(&repo, &patch).unwrap();
      assert!(committed);
      assert!(!dir.path().join("old.txt").exists());
      assert!(dir.path().join("new.txt").exists());
   }

   #[test]
   fn status_round_trips_through_validation() {
      let patch = validate_patch(r#"{"op":"delete","file":"a","status":"in_progress"}"#).unwrap();
      assert_eq!(patch.status(), Status::InProgress);
   }
}
