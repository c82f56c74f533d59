//! CLI surface (SPEC_FULL §6, ambient): `clap::Parser`-based subcommands
//! matching the teacher's `Args`/`Mode` layout, generalized from a single
//! flat flag set to `iterate|api|validate|schema|scan|version`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "review-loop", version, about = "LLM-driven multi-round Git code review: propose, apply, test, fix")]
pub struct Cli {
   #[command(subcommand)]
   pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
   /// Full Preflight → Plan → Iter{1,2,3} → ErrorFixLoop → Push run.
   Iterate {
      /// Natural-language review instructions.
      instructions: String,
      /// Path to the repository to review.
      repo: PathBuf,
      /// Model id, overriding the configured default.
      #[arg(long)]
      model: Option<String>,
      /// Per-request LLM timeout in seconds.
      #[arg(long = "api-timeout")]
      api_timeout: Option<u64>,
      /// Number of review iterations to run (1-3).
      #[arg(long, default_value_t = 3)]
      iterations: u32,
      /// Prefix for the iteration branches (default from config).
      #[arg(long)]
      branch_prefix: Option<String>,
      /// Remote to push the final branch to (default from config).
      #[arg(long)]
      remote: Option<String>,
      /// Skip the final push even if a remote is configured.
      #[arg(long)]
      no_push: bool,
      /// Single command that replaces the plan's run/test commands in the
      /// error-fix loop.
      #[arg(long)]
      run: Option<String>,
   },
   /// Continuous single-session `submit_patch` loop until completion.
   Api {
      /// Natural-language review instructions.
      instructions: String,
      /// Path to the repository to review.
      repo: PathBuf,
      /// Optional command to validate the result; failures trigger a
      /// bounded error-fix loop.
      #[arg(long)]
      cmd: Option<String>,
      /// Timeout in seconds for `--cmd` (default from config).
      #[arg(long)]
      timeout: Option<u64>,
      /// Model id, overriding the configured default.
      #[arg(long)]
      model: Option<String>,
      /// Per-request LLM timeout in seconds.
      #[arg(long = "api-timeout")]
      api_timeout: Option<u64>,
   },
   /// Validate a patch payload against the schema without applying it.
   Validate {
      /// Patch JSON text.
      #[arg(long, conflicts_with = "file")]
      payload: Option<String>,
      /// Read the patch JSON from a file (`-` for stdin).
      #[arg(long, conflicts_with = "payload")]
      file: Option<String>,
   },
   /// Print the canonical JSON schema for a patch.
   Schema,
   /// Scan a repository and print its file classification summary.
   Scan {
      /// Path to the repository to scan.
      repo: PathBuf,
      /// Cap the number of paths printed per bucket.
      #[arg(long)]
      max_lines: Option<usize>,
   },
   /// Print the version and exit.
   Version,
}
