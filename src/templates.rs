//! Prompt templates (SPEC_FULL §4.F, §4.G — ambient).
//!
//! Same embed-plus-user-override harness as the teacher's `templates.rs`:
//! prompts are compiled in via `rust-embed`, a `~/.review-loop/prompts/`
//! directory can override any of them, and rendering goes through a single
//! shared `Tera` instance with auto-escaping disabled (these are Markdown/
//! plain-text prompts, not HTML).

use std::{path::PathBuf, sync::LazyLock};

use parking_lot::Mutex;
use rust_embed::RustEmbed;
use tera::{Context, Tera};

use crate::error::{ReviewError, Result};

#[derive(RustEmbed)]
#[folder = "prompts/"]
struct Prompts;

static TERA: LazyLock<Mutex<Tera>> = LazyLock::new(|| {
   let mut tera = Tera::default();
   for file in Prompts::iter() {
      if let Some(embedded) = Prompts::get(file.as_ref())
         && let Ok(content) = std::str::from_utf8(embedded.data.as_ref())
         && let Err(e) = tera.add_raw_template(file.as_ref(), content)
      {
         eprintln!("Warning: failed to register embedded prompt {}: {e}", file.as_ref());
      }
   }
   tera.autoescape_on(vec![]);
   Mutex::new(tera)
});

fn user_prompts_dir() -> Option<PathBuf> {
   std::env::var("HOME")
      .or_else(|_| std::env::var("USERPROFILE"))
      .ok()
      .map(|home| PathBuf::from(home).join(".review-loop").join("prompts"))
}

/// Prefer a user override file on disk; fall back to the embedded default.
fn load(name: &str) -> Result<String> {
   if let Some(dir) = user_prompts_dir() {
      let path = dir.join(name);
      if path.exists() {
         return std::fs::read_to_string(&path).map_err(Into::into);
      }
   }
   let embedded = Prompts::get(name).ok_or_else(|| ReviewError::Other(format!("prompt '{name}' not embedded")))?;
   std::str::from_utf8(embedded.data.as_ref())
      .map(ToString::to_string)
      .map_err(|e| ReviewError::Other(format!("prompt '{name}' is not valid UTF-8: {e}")))
}

fn render(name: &str, ctx: &Context) -> Result<String> {
   let content = load(name)?;
   let mut tera = TERA.lock();
   // render_str so a user-overridden file on disk still goes through the
   // same Tera syntax without needing to re-register a named template.
   tera
      .render_str(&content, ctx)
      .map_err(|e| ReviewError::Other(format!("failed to render prompt '{name}': {e}")))
}

pub fn render_system_prompt() -> Result<String> {
   render("system.md", &Context::new())
}

pub fn render_plan_prompt(instructions: &str, manifest: &str) -> Result<String> {
   let mut ctx = Context::new();
   ctx.insert("instructions", instructions);
   ctx.insert("manifest", manifest);
   render("plan.md", &ctx)
}

pub struct FileReviewPrompt<'a> {
   pub instructions: &'a str,
   pub iteration:    u32,
   pub path:         &'a str,
   pub language:     Option<&'a str>,
   pub is_binary:    bool,
   pub content:      &'a str,
   pub hints:        &'a [String],
}

pub fn render_file_review_prompt(p: &FileReviewPrompt<'_>) -> Result<String> {
   let mut ctx = Context::new();
   ctx.insert("instructions", p.instructions);
   ctx.insert("iteration", &p.iteration);
   ctx.insert("path", p.path);
   ctx.insert("language", &p.language);
   ctx.insert("is_binary", &p.is_binary);
   ctx.insert("content", p.content);
   ctx.insert("hints", p.hints);
   render("file_review.md", &ctx)
}

pub fn render_new_files_prompt(instructions: &str, iteration: u32, manifest: &str) -> Result<String> {
   let mut ctx = Context::new();
   ctx.insert("instructions", instructions);
   ctx.insert("iteration", &iteration);
   ctx.insert("manifest", manifest);
   render("new_files.md", &ctx)
}

pub fn render_create_file_prompt(instructions: &str, path: &str, rationale: &str) -> Result<String> {
   let mut ctx = Context::new();
   ctx.insert("instructions", instructions);
   ctx.insert("path", path);
   ctx.insert("rationale", rationale);
   render("create_file.md", &ctx)
}

pub fn render_error_fix_prompt(command: &str, exit_code: i32, output_tail: &str, file_list: &str) -> Result<String> {
   let mut ctx = Context::new();
   ctx.insert("command", command);
   ctx.insert("exit_code", &exit_code);
   ctx.insert("output_tail", output_tail);
   ctx.insert("file_list", file_list);
   render("error_fix.md", &ctx)
}

/// Best-effort language hint from a file extension, used to annotate the
/// per-file review prompt (grounded in the original's
/// `_language_hint_for_path` table).
pub fn language_hint_for_path(path: &str) -> Option<&'static str> {
   let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
   Some(match ext.as_str() {
      "py" => "python",
      "js" | "mjs" | "cjs" => "javascript",
      "ts" => "typescript",
      "tsx" => "tsx",
      "jsx" => "jsx",
      "sh" | "bash" | "zsh" => "bash",
      "toml" => "toml",
      "yaml" | "yml" => "yaml",
      "json" | "jsonc" => "json",
      "ini" | "cfg" | "conf" => "ini",
      "md" | "markdown" => "markdown",
      "rst" => "restructuredtext",
      "html" | "htm" => "html",
      "css" => "css",
      "scss" | "less" => "scss",
      "go" => "go",
      "rb" => "ruby",
      "rs" => "rust",
      "java" => "java",
      "kt" | "kts" => "kotlin",
      "c" => "c",
      "cc" | "cpp" => "c++",
      "h" => "c/c++ header",
      "hpp" => "c++ header",
      _ => return None,
   })
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn renders_system_prompt_without_tool_mention_of_prose() {
      let prompt = render_system_prompt().unwrap();
      assert!(prompt.contains("COMPLETE FILE"));
   }

   #[test]
   fn file_review_prompt_gates_deferred_buckets_by_iteration() {
      let p = FileReviewPrompt {
         instructions: "tighten error handling",
         iteration:    1,
         path:         "src/lib.rs",
         language:     Some("rust"),
         is_binary:    false,
         content:      "fn main() {}\n",
         hints:        &[],
      };
      let rendered = render_file_review_prompt(&p).unwrap();
      assert!(rendered.contains("deferred to iteration 3"));
   }

   #[test]
   fn language_hint_matches_known_extensions() {
      assert_eq!(language_hint_for_path("src/main.rs"), Some("rust"));
      assert_eq!(language_hint_for_path("README"), None);
   }
}
