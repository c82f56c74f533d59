//! `review-loop` binary entry point (SPEC_FULL §6).
//!
//! Ctrl-C is not trapped: the default SIGINT disposition already terminates
//! the process with exit code 130, which matches §6's CLI contract without
//! pulling in a signal-handling dependency the teacher never carried.

mod cli;

use std::io::Read as _;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use review_loop::config::ReviewConfig;
use review_loop::error::ReviewError;
use review_loop::orchestrator::{self, ApiOptions, IterateOptions};
use review_loop::patch::{self, SCHEMA_JSON};
use review_loop::scanner::RepoScanner;

use cli::{Cli, Command};

fn main() -> ExitCode {
   dotenvy::dotenv().ok();
   let cli = Cli::parse();

   let mut config = match ReviewConfig::load() {
      Ok(config) => config,
      Err(e) => return fail(&e.to_string()),
   };

   match run(&mut config, cli.command) {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => fail(&e.to_string()),
   }
}

fn fail(message: &str) -> ExitCode {
   eprintln!("{} {message}", review_loop::style::error("error:"));
   ExitCode::FAILURE
}

fn run(config: &mut ReviewConfig, command: Command) -> review_loop::Result<()> {
   match command {
      Command::Iterate { instructions, repo, model, api_timeout, iterations, branch_prefix, remote, no_push, run } => {
         if let Some(secs) = api_timeout {
            config.request_timeout_secs = secs;
         }
         let opts = IterateOptions {
            instructions,
            repo,
            model: model.unwrap_or_else(|| config.model.clone()),
            iterations,
            branch_prefix,
            remote,
            no_push,
            run_cmd: run,
         };
         orchestrator::run_iterate(config, &opts)
      },
      Command::Api { instructions, repo, cmd, timeout, model, api_timeout } => {
         if let Some(secs) = api_timeout {
            config.request_timeout_secs = secs;
         }
         let opts = ApiOptions {
            instructions,
            repo,
            model: model.unwrap_or_else(|| config.model.clone()),
            cmd,
            timeout: Duration::from_secs(timeout.unwrap_or(config.command_timeout_secs)),
         };
         orchestrator::run_api(config, &opts)
      },
      Command::Validate { payload, file } => validate(payload, file),
      Command::Schema => {
         println!("{SCHEMA_JSON}");
         Ok(())
      },
      Command::Scan { repo, max_lines } => scan(&repo, max_lines),
      Command::Version => {
         println!("review-loop {}", env!("CARGO_PKG_VERSION"));
         Ok(())
      },
   }
}

fn validate(payload: Option<String>, file: Option<String>) -> review_loop::Result<()> {
   // `--payload -` and `--file -` are both documented as the stdin form
   // (§6); only a payload value other than the literal "-" is taken as
   // inline JSON text.
   let json_text = match (payload, file) {
      (Some(payload), _) if payload != "-" => payload,
      (_, Some(file)) if file != "-" => std::fs::read_to_string(&file).map_err(ReviewError::Io)?,
      _ => {
         let mut buf = String::new();
         std::io::stdin().read_to_string(&mut buf).map_err(ReviewError::Io)?;
         buf
      },
   };

   let patch = patch::validate_patch(&json_text)?;
   println!(
      "{} {} ({})",
      review_loop::style::success("valid:"),
      patch.file(),
      patch.op_name()
   );
   Ok(())
}

fn scan(repo: &std::path::Path, max_lines: Option<usize>) -> review_loop::Result<()> {
   let index = RepoScanner::new(repo).scan()?;
   println!("{}", index.summary());

   let buckets: [(&str, &[String]); 6] = [
      ("code", &index.code_files),
      ("test", &index.test_files),
      ("docs", &index.docs_files),
      ("setup", &index.setup_files),
      ("example", &index.example_files),
      ("binary", &index.binary_files),
   ];
   for (label, files) in buckets {
      println!("\n{label}:");
      let limit = max_lines.unwrap_or(files.len());
      for rel in files.iter().take(limit) {
         println!("  {rel}");
      }
      if files.len() > limit {
         println!("  ... ({} more)", files.len() - limit);
      }
   }
   Ok(())
}
