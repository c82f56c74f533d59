use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ReviewError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
   pub api_base_url: String,

   /// Overridden by the `API_KEY` environment variable.
   pub api_key: Option<String>,

   /// Default model id, overridden by `MODEL`.
   pub model: String,

   /// Per-request LLM timeout in seconds, overridden by `API_TIMEOUT`.
   pub request_timeout_secs: u64,

   pub connect_timeout_secs: u64,
   pub max_retries:          u32,
   pub initial_backoff_ms:   u64,
   pub temperature:          f32,

   /// `2 * turn_pairs + slack` messages of tail are kept, overridden by
   /// `CTX_TURNS`.
   pub turn_pairs: usize,

   /// Characters of command output kept when feeding failures back to the
   /// model, overridden by `LOG_TAIL_CHARS`.
   pub log_tail_chars: usize,

   /// Byte threshold above which a file's prompt content is head+tail
   /// excerpted, overridden by `MAX_PROMPT_BYTES`.
   pub max_prompt_bytes: usize,

   /// Size of each half of the head+tail excerpt, overridden by
   /// `HEAD_TAIL_BYTES`.
   pub head_tail_bytes: usize,

   /// Rounds of the error-fix loop before giving up, overridden by
   /// `MAX_ERROR_ROUNDS`.
   pub max_error_rounds: u32,

   /// Branch name prefix for iteration branches, overridden by
   /// `BRANCH_PREFIX`.
   pub branch_prefix: String,

   /// Remote name to push to, overridden by `REMOTE`.
   pub remote: String,

   /// Timeout in seconds for user run/test commands (§4.H default 300s).
   pub command_timeout_secs: u64,

   /// Bounded nudge budget before `NoToolCallError` (resolved Open
   /// Question; see DESIGN.md).
   #[serde(default = "default_nudge_budget")]
   pub nudge_budget: u32,

   /// Bounded "tail + 2" slack in the context-pruning formula.
   #[serde(default = "default_context_slack")]
   pub context_slack: usize,
}

const fn default_nudge_budget() -> u32 {
   3
}

const fn default_context_slack() -> usize {
   2
}

/// Which wire shape to speak to the configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedApiMode {
   /// OpenAI-style `/chat/completions` with `tools`/`tool_choice`.
   ChatCompletions,
   /// Anthropic Messages API with `tools`/`tool_choice:{"type":"tool",...}`.
   AnthropicMessages,
}

impl Default for ReviewConfig {
   fn default() -> Self {
      Self {
         api_base_url:         "http://localhost:4000".to_string(),
         api_key:              None,
         model:                "gpt-5-codex".to_string(),
         request_timeout_secs: 120,
         connect_timeout_secs: 30,
         max_retries:          3,
         initial_backoff_ms:   1000,
         temperature:          0.2,
         turn_pairs:           6,
         log_tail_chars:       20_000,
         max_prompt_bytes:     200_000,
         head_tail_bytes:      60_000,
         max_error_rounds:     6,
         branch_prefix:        "iteration".to_string(),
         remote:               "origin".to_string(),
         command_timeout_secs: 300,
         nudge_budget:         default_nudge_budget(),
         context_slack:        default_context_slack(),
      }
   }
}

impl ReviewConfig {
   /// Load config from the default location, applying environment
   /// overrides on top of (or instead of) the file.
   pub fn load() -> Result<Self> {
      let config_path = if let Ok(custom_path) = std::env::var("REVIEW_LOOP_CONFIG") {
         PathBuf::from(custom_path)
      } else {
         Self::default_config_path().unwrap_or_default()
      };

      let mut config = if config_path.as_os_str().is_empty() || !config_path.exists() {
         Self::default()
      } else {
         Self::from_file(&config_path)?
      };

      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   pub fn from_file(path: &Path) -> Result<Self> {
      let contents = std::fs::read_to_string(path)?;
      let mut config: Self = toml::from_str(&contents)?;
      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   fn apply_env_overrides(config: &mut Self) {
      if let Ok(v) = std::env::var("API_BASE_URL") {
         config.api_base_url = v;
      }
      if let Ok(v) = std::env::var("API_KEY") {
         config.api_key = Some(v);
      }
      if let Ok(v) = std::env::var("MODEL") {
         config.model = v;
      }
      if let Ok(v) = std::env::var("API_TIMEOUT").ok().and_then(|s| s.parse().ok()) {
         config.request_timeout_secs = v;
      }
      if let Ok(v) = std::env::var("CTX_TURNS").ok().and_then(|s| s.parse().ok()) {
         config.turn_pairs = v;
      }
      if let Ok(v) = std::env::var("LOG_TAIL_CHARS").ok().and_then(|s| s.parse().ok()) {
         config.log_tail_chars = v;
      }
      if let Ok(v) = std::env::var("MAX_PROMPT_BYTES").ok().and_then(|s| s.parse().ok()) {
         config.max_prompt_bytes = v;
      }
      if let Ok(v) = std::env::var("HEAD_TAIL_BYTES").ok().and_then(|s| s.parse().ok()) {
         config.head_tail_bytes = v;
      }
      if let Ok(v) = std::env::var("MAX_ERROR_ROUNDS").ok().and_then(|s| s.parse().ok()) {
         config.max_error_rounds = v;
      }
      if let Ok(v) = std::env::var("BRANCH_PREFIX") {
         config.branch_prefix = v;
      }
      if let Ok(v) = std::env::var("REMOTE") {
         config.remote = v;
      }
   }

   /// `~/.config/review-loop/config.toml`, falling back to `USERPROFILE` on
   /// Windows.
   pub fn default_config_path() -> Result<PathBuf> {
      if let Ok(home) = std::env::var("HOME") {
         return Ok(PathBuf::from(home).join(".config/review-loop/config.toml"));
      }
      if let Ok(home) = std::env::var("USERPROFILE") {
         return Ok(PathBuf::from(home).join(".config/review-loop/config.toml"));
      }
      Err(ReviewError::Other("no home directory found (tried HOME and USERPROFILE)".to_string()))
   }

   /// Resolve the wire shape from the model name / base URL: anything that
   /// looks like an Anthropic model id or endpoint speaks the Messages API,
   /// everything else speaks OpenAI-style chat completions.
   pub fn resolved_api_mode(&self, model: &str) -> ResolvedApiMode {
      let model_lower = model.to_lowercase();
      let base_lower = self.api_base_url.to_lowercase();
      if model_lower.starts_with("claude") || base_lower.contains("anthropic") {
         ResolvedApiMode::AnthropicMessages
      } else {
         ResolvedApiMode::ChatCompletions
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn defaults_match_spec() {
      let cfg = ReviewConfig::default();
      assert_eq!(cfg.turn_pairs, 6);
      assert_eq!(cfg.context_slack, 2);
      assert_eq!(cfg.max_error_rounds, 6);
      assert_eq!(cfg.command_timeout_secs, 300);
      assert_eq!(cfg.log_tail_chars, 20_000);
      assert_eq!(cfg.max_prompt_bytes, 200_000);
      assert_eq!(cfg.head_tail_bytes, 60_000);
      assert_eq!(cfg.nudge_budget, 3);
   }

   #[test]
   fn env_overrides_take_precedence() {
      // SAFETY: test runs single-threaded within this process's env mutation.
      unsafe {
         std::env::set_var("BRANCH_PREFIX", "custom-iter");
      }
      let mut cfg = ReviewConfig::default();
      ReviewConfig::apply_env_overrides(&mut cfg);
      assert_eq!(cfg.branch_prefix, "custom-iter");
      // SAFETY: see above.
      unsafe {
         std::env::remove_var("BRANCH_PREFIX");
      }
   }
}
