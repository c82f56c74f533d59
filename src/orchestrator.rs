//! Orchestrator (SPEC_FULL §4.G): the state machine that drives a review
//! run end to end — Preflight → Plan → Iter1 → Iter2 → Iter3 →
//! ErrorFixLoop → Push — plus the continuous single-session loop behind the
//! `api` subcommand (§2 supplement, grounded in `api_driver.py::run`).

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::apply;
use crate::config::ReviewConfig;
use crate::driver::{ConversationDriver, SubmitOutcome};
use crate::error::{ReviewError, Result};
use crate::git::GitRepo;
use crate::runner::{self, CommandOutput};
use crate::scanner::{self, RepoIndex, RepoScanner};
use crate::state::IterationCheckpoint;
use crate::style;
use crate::templates::{self, FileReviewPrompt};

/// Options for the `iterate` subcommand (§6 CLI surface).
pub struct IterateOptions {
   pub instructions:  String,
   pub repo:          PathBuf,
   pub model:         String,
   pub iterations:    u32,
   pub branch_prefix: Option<String>,
   pub remote:        Option<String>,
   pub no_push:       bool,
   /// `--run CMD`: when set, used as the sole validation command for the
   /// error-fix loop instead of the plan's `run_commands`/`test_commands`
   /// (Open Question resolution; see DESIGN.md).
   pub run_cmd:       Option<String>,
}

/// Options for the `api` subcommand (§6 CLI surface).
pub struct ApiOptions {
   pub instructions: String,
   pub repo:         PathBuf,
   pub model:        String,
   pub cmd:          Option<String>,
   pub timeout:      Duration,
}

/// `iterate`: the full Preflight → Plan → Iter{1,2,3} → ErrorFixLoop → Push
/// state machine.
pub fn run_iterate(config: &ReviewConfig, opts: &IterateOptions) -> Result<()> {
   let repo = GitRepo::new(&opts.repo);
   repo.ensure_repo_ready()?;

   let branch_prefix = opts.branch_prefix.clone().unwrap_or_else(|| config.branch_prefix.clone());
   let remote = opts.remote.clone().unwrap_or_else(|| config.remote.clone());

   let plan_branch = repo.checkout_branch(&format!("{branch_prefix}-plan"), None)?;
   let index = RepoScanner::new(&opts.repo).scan()?;

   let mut plan_driver = ConversationDriver::new(config.clone(), opts.model.clone())?;
   let plan_prompt = templates::render_plan_prompt(&opts.instructions, &index.summary())?;
   plan_driver.seed(plan_prompt.clone());
   let plan = plan_driver.propose_review_plan(plan_prompt)?;
   persist_plan_artifacts(&repo, &plan, ".gpt-review/initial_plan.json", "INITIAL_REVIEW_PLAN.md")?;
   save_checkpoint(&repo, "plan")?;

   style::print_info(&format!("plan: {}", plan.description));

   let iterations = opts.iterations.clamp(1, 3);
   for i in 1..=iterations {
      let branch = repo.checkout_branch(&format!("{branch_prefix}{i}"), Some(&plan_branch))?;
      style::print_info(&format!("iteration {i}/{iterations} on branch {branch}"));
      run_iteration(config, &opts.model, &repo, &opts.instructions, &plan, &index, i)?;
      save_checkpoint(&repo, &format!("iteration{i}"))?;
   }

   if iterations >= 3 {
      persist_plan_artifacts(&repo, &plan, ".gpt-review/review_plan.json", "REVIEW_GUIDE.md")?;
   }

   let run_commands: Vec<String> =
      opts.run_cmd.clone().map_or_else(|| plan.run_commands.clone(), |cmd| vec![cmd]);
   let test_commands: Vec<String> = if opts.run_cmd.is_some() { Vec::new() } else { plan.test_commands.clone() };
   let success = error_fix_loop(config, &opts.model, &repo, &run_commands, &test_commands)?;
   save_checkpoint(&repo, "error-fix-loop")?;

   if !success {
      return Err(ReviewError::Fatal(format!("error-fix loop exhausted after {} rounds", config.max_error_rounds)));
   }

   if !opts.no_push && repo.has_remote(&remote) {
      repo.push(&remote, true)?;
   }

   Ok(())
}

/// `api`: a continuous `submit_patch` loop until the model reports
/// `status:"completed"`, optionally followed by one validation command and
/// its own bounded error-fix loop.
pub fn run_api(config: &ReviewConfig, opts: &ApiOptions) -> Result<()> {
   let repo = GitRepo::new(&opts.repo);
   repo.ensure_repo_ready()?;

   let mut driver = ConversationDriver::new(config.clone(), opts.model.clone())?;
   driver.seed(opts.instructions.clone());

   loop {
      let outcome = driver.submit_patch(opts.instructions.clone(), false)?;
      let SubmitOutcome::Patch(patch) = outcome else {
         unreachable!("allow_keep=false never yields SubmitOutcome::Keep");
      };
      let completed = patch.status().is_completed();
      match apply::apply_patch(&repo, &patch) {
         Ok(_) => {},
         Err(e) => style::warn(&format!("apply failed for {}: {e}", patch.file())),
      }
      save_checkpoint(&repo, "api")?;
      if completed {
         break;
      }
   }

   if let Some(cmd) = &opts.cmd {
      let outcome = runner::run_command(&opts.repo, cmd, opts.timeout)?;
      if !outcome.ok {
         let success = error_fix_loop(config, &opts.model, &repo, &[], &[cmd.clone()])?;
         if !success {
            return Err(ReviewError::Fatal(format!("error-fix loop exhausted after {} rounds", config.max_error_rounds)));
         }
      }
   }

   Ok(())
}

/// One iteration of §4.G steps 2-5: per-file review in deterministic order,
/// new-file discovery, and (iteration 3 only) deferred-bucket processing.
fn run_iteration(config: &ReviewConfig, model: &str, repo: &GitRepo, instructions: &str, plan: &crate::driver::ReviewPlan, index: &RepoIndex, iteration: u32) -> Result<()> {
   let mut driver = ConversationDriver::new(config.clone(), model.to_string())?;
   let seed = format!("Iteration {iteration} review: {instructions}");
   driver.seed(seed);

   let files = index.files_for_iteration(iteration);

   for rel in &files {
      if let Err(e) = review_one_file(config, &mut driver, repo, instructions, &plan.hints, iteration, rel) {
         style::warn(&format!("review of {rel} failed: {e}"));
      }
   }

   let manifest = index.summary();
   let discovery_prompt = templates::render_new_files_prompt(instructions, iteration, &manifest)?;
   let discovered = match driver.ask_json_array(discovery_prompt) {
      Ok(items) => items,
      Err(e) => {
         style::warn(&format!("new-file discovery skipped: {e}"));
         Vec::new()
      },
   };
   for item in discovered {
      if let Err(e) = create_discovered_file(&mut driver, repo, instructions, iteration, &item) {
         style::warn(&format!("new-file creation failed: {e}"));
      }
   }

   Ok(())
}

fn review_one_file(config: &ReviewConfig, driver: &mut ConversationDriver, repo: &GitRepo, instructions: &str, hints: &[String], iteration: u32, rel: &str) -> Result<()> {
   let abs = repo.root().join(rel);
   let content = std::fs::read_to_string(&abs).unwrap_or_default();
   let excerpted = crate::content::excerpt(&content, config.max_prompt_bytes, config.head_tail_bytes);
   let language = templates::language_hint_for_path(rel);

   let prompt = templates::render_file_review_prompt(&FileReviewPrompt {
      instructions,
      iteration,
      path: rel,
      language,
      is_binary: false,
      content: &excerpted,
      hints,
   })?;

   match driver.submit_patch(prompt, true)? {
      SubmitOutcome::Keep => Ok(()),
      SubmitOutcome::Patch(patch) => apply_with_gating(repo, patch, iteration),
   }
}

fn create_discovered_file(driver: &mut ConversationDriver, repo: &GitRepo, instructions: &str, iteration: u32, item: &Value) -> Result<()> {
   let path = item.get("path").and_then(Value::as_str).ok_or_else(|| ReviewError::Schema("discovered file missing 'path'".to_string()))?;
   let rationale = item.get("rationale").and_then(Value::as_str).unwrap_or("");
   if iteration < 3 && scanner::is_deferred_bucket(path) {
      style::warn(&format!("{path}: deferred until iteration 3"));
      return Ok(());
   }
   let prompt = templates::render_create_file_prompt(instructions, path, rationale)?;
   match driver.submit_patch(prompt, false)? {
      SubmitOutcome::Keep => Ok(()),
      SubmitOutcome::Patch(patch) => apply_with_gating(repo, patch, iteration),
   }
}

/// Applies §4.G's path reconciliation and iteration gating before handing
/// the patch to the Applier. Gating runs against the full deferred-bucket
/// classification (docs/setup+CI/examples), not just a CI-prefix check, so
/// a reconciled patch onto e.g. `README.md` or `Cargo.toml` is coerced to
/// "keep" in iterations 1-2 just as a freshly-discovered one is (§8
/// property 7).
fn apply_with_gating(repo: &GitRepo, patch: crate::patch::Patch, iteration: u32) -> Result<()> {
   let reconciled = match reconcile(repo, patch) {
      Some(p) => p,
      None => return Ok(()),
   };
   if iteration < 3 && scanner::is_deferred_bucket(reconciled.file()) {
      style::warn(&format!("{}: deferred until iteration 3", reconciled.file()));
      return Ok(());
   }
   apply::apply_patch(repo, &reconciled)?;
   Ok(())
}

/// Path reconciliation (§4.G): `create` on an existing file becomes
/// `update`; `update` on a missing file becomes `create`; `delete` on a
/// missing file becomes "keep" (`None`).
fn reconcile(repo: &GitRepo, patch: crate::patch::Patch) -> Option<crate::patch::Patch> {
   use crate::patch::Patch;
   let exists = repo.root().join(patch.file()).exists();
   match patch {
      Patch::Create { file, content, status } if exists => Some(Patch::Update { file, content, status }),
      Patch::Update { file, content, status } if !exists => Some(Patch::Create { file, content, status }),
      Patch::Delete { ref file, .. } if !exists => {
         style::warn(&format!("{file}: delete of missing file treated as keep"));
         None
      },
      other => Some(other),
   }
}

fn persist_plan_artifacts(repo: &GitRepo, plan: &crate::driver::ReviewPlan, json_path: &str, guide_path: &str) -> Result<()> {
   let json = serde_json::json!({
      "description": plan.description,
      "run_commands": plan.run_commands,
      "test_commands": plan.test_commands,
      "hints": plan.hints,
   });
   let json_text = serde_json::to_string_pretty(&json)?;
   write_and_commit(repo, json_path, &json_text)?;

   let guide = render_guide(plan);
   write_and_commit(repo, guide_path, &guide)?;
   Ok(())
}

fn render_guide(plan: &crate::driver::ReviewPlan) -> String {
   let mut out = String::new();
   out.push_str("# Review Guide\n\n");
   out.push_str(&plan.description);
   out.push_str("\n\n## Build\n\n");
   for cmd in &plan.run_commands {
      out.push_str(&format!("- `{cmd}`\n"));
   }
   out.push_str("\n## Test\n\n");
   for cmd in &plan.test_commands {
      out.push_str(&format!("- `{cmd}`\n"));
   }
   if !plan.hints.is_empty() {
      out.push_str("\n## Hints\n\n");
      for hint in &plan.hints {
         out.push_str(&format!("- {hint}\n"));
      }
   }
   out
}

fn write_and_commit(repo: &GitRepo, rel: &str, content: &str) -> Result<()> {
   let abs = repo.root().join(rel);
   if let Some(parent) = abs.parent() {
      std::fs::create_dir_all(parent)?;
   }
   std::fs::write(&abs, content)?;
   repo.stage_paths(&[rel])?;
   repo.commit_scoped(&format!("plan: {rel}"), &[rel])?;
   Ok(())
}

/// §4.G error-fix loop: `run_commands` then `test_commands`, in order, up
/// to `config.max_error_rounds`. Returns `true` once every command passes.
fn error_fix_loop(config: &ReviewConfig, model: &str, repo: &GitRepo, run_commands: &[String], test_commands: &[String]) -> Result<bool> {
   let commands: Vec<&str> = run_commands.iter().chain(test_commands).map(String::as_str).collect();
   if commands.is_empty() {
      return Ok(true);
   }

   let mut driver = ConversationDriver::new(config.clone(), model.to_string())?;
   driver.seed("Fix any failing commands until the repository builds and tests cleanly.");

   for round in 0..config.max_error_rounds {
      let mut all_passed = true;
      for cmd in &commands {
         let cmd = *cmd;
         let output = runner::run_command(repo.root(), cmd, Duration::from_secs(config.command_timeout_secs))?;
         if output.ok {
            continue;
         }
         all_passed = false;
         style::print_info(&format!("round {}/{}: {cmd} failed (exit {})", round + 1, config.max_error_rounds, output.exit_code));
         handle_failure(&mut driver, repo, cmd, &output, config.log_tail_chars)?;
      }
      if all_passed {
         return Ok(true);
      }
   }
   Ok(false)
}

fn handle_failure(driver: &mut ConversationDriver, repo: &GitRepo, command: &str, output: &CommandOutput, log_tail_chars: usize) -> Result<()> {
   let tail = runner::tail_chars(&output.output, log_tail_chars);
   let index = RepoScanner::new(repo.root()).scan()?;
   let prompt = templates::render_error_fix_prompt(command, output.exit_code, tail, &index.all_files.join("\n"))?;
   let plan = driver.propose_error_fixes(prompt)?;
   for edit in plan.edits {
      if let Err(e) = apply_error_fix_edit(repo, &edit) {
         style::warn(&format!("{}: {e}", edit.path));
      }
   }
   Ok(())
}

fn apply_error_fix_edit(repo: &GitRepo, edit: &crate::driver::ErrorFixEdit) -> Result<()> {
   use crate::patch::{Content, Patch, Status};
   let status = Status::Completed;
   let patch = match edit.action.as_str() {
      "create" => Patch::Create {
         file: edit.path.clone(),
         content: Content::Text(edit.content.clone().unwrap_or_default()),
         status,
      },
      "update" => Patch::Update {
         file: edit.path.clone(),
         content: Content::Text(edit.content.clone().unwrap_or_default()),
         status,
      },
      "delete" => Patch::Delete { file: edit.path.clone(), status },
      other => return Err(ReviewError::Schema(format!("unknown error-fix action: {other}"))),
   };
   if !crate::content::is_safe_repo_rel_posix(&patch_file(&patch)) {
      return Err(ReviewError::Safety(format!("unsafe path in error-fix edit: {}", patch_file(&patch))));
   }
   match reconcile(repo, patch) {
      Some(p) => apply::apply_patch(repo, &p).map(|_| ()),
      None => Ok(()),
   }
}

fn patch_file(patch: &crate::patch::Patch) -> String {
   patch.file().to_string()
}

fn save_checkpoint(repo: &GitRepo, conversation_id: &str) -> Result<()> {
   let checkpoint = IterationCheckpoint::new(conversation_id, repo.current_commit(), repo.current_branch(), now_rfc3339());
   checkpoint.save(repo.root())
}

/// `chrono::Local::now()` wrapped so the one non-deterministic call in the
/// orchestrator is easy to find; tests never touch this path.
fn now_rfc3339() -> String {
   chrono::Local::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn gating_coerces_reconciled_patches_onto_deferred_buckets_to_keep() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("README.md"), "old\n").unwrap();
      let repo = GitRepo::new(dir.path());
      let patch =
         crate::patch::validate_patch(r#"{"op":"create","file":"README.md","body":"new","status":"completed"}"#)
            .unwrap();
      // create onto an existing file reconciles to update, then must still
      // be gated as a deferred doc path in iterations 1-2.
      apply_with_gating(&repo, patch, 1).unwrap();
      assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "old\n");
   }

   #[test]
   fn reconcile_maps_create_over_existing_to_update() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("a.txt"), "x").unwrap();
      let repo = GitRepo::new(dir.path());
      let patch = crate::patch::validate_patch(r#"{"op":"create","file":"a.txt","body":"y","status":"completed"}"#).unwrap();
      let reconciled = reconcile(&repo, patch).unwrap();
      assert_eq!(reconciled.op_name(), "update");
   }

   #[test]
   fn reconcile_maps_delete_of_missing_file_to_keep() {
      let dir = tempfile::tempdir().unwrap();
      let repo = GitRepo::new(dir.path());
      let patch = crate::patch::validate_patch(r#"{"op":"delete","file":"missing.txt","status":"completed"}"#).unwrap();
      assert!(reconcile(&repo, patch).is_none());
   }
}
