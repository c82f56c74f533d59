//! Command Runner (SPEC_FULL §4.H).
//!
//! Grounded in `original_source/gpt_review/api_driver.py::_run_cmd`: a shell
//! string run via `sh -c` in the repo directory, combined stdout+stderr,
//! timeout-bounded with `wait-timeout` (the teacher has no equivalent — this
//! is new ambient plumbing built the way the rest of the crate shells out
//! to `git`, via `std::process::Command`). Mirrors `subprocess.communicate`'s
//! concurrent draining: stdout/stderr are read on their own threads while we
//! wait, so a command that writes more than the OS pipe buffer never
//! deadlocks against a blocked `wait_timeout`.

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::{ReviewError, Result};

/// Result of one command run, §4.H's `{ok, exit_code, output}`.
#[derive(Debug, Clone)]
pub struct CommandOutput {
   pub ok:        bool,
   pub exit_code: i32,
   pub output:    String,
}

fn drain_thread(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
   thread::spawn(move || {
      let mut buf = Vec::new();
      let _ = pipe.read_to_end(&mut buf);
      buf
   })
}

fn spawn_readers(child: &mut Child) -> (JoinHandle<Vec<u8>>, JoinHandle<Vec<u8>>) {
   let stdout: ChildStdout = child.stdout.take().expect("child spawned with piped stdout");
   let stderr: ChildStderr = child.stderr.take().expect("child spawned with piped stderr");
   (drain_thread(stdout), drain_thread(stderr))
}

fn join_combined(stdout: JoinHandle<Vec<u8>>, stderr: JoinHandle<Vec<u8>>) -> String {
   let out = stdout.join().unwrap_or_default();
   let err = stderr.join().unwrap_or_default();
   let mut combined = String::from_utf8_lossy(&out).into_owned();
   if !err.is_empty() {
      if !combined.is_empty() {
         combined.push('\n');
      }
      combined.push_str(&String::from_utf8_lossy(&err));
   }
   combined
}

/// Runs `command` as a shell string inside `repo_dir`, capturing combined
/// stdout+stderr and killing it after `timeout` elapses.
pub fn run_command(repo_dir: &Path, command: &str, timeout: Duration) -> Result<CommandOutput> {
   let mut child = Command::new("sh")
      .arg("-c")
      .arg(command)
      .current_dir(repo_dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| ReviewError::Other(format!("failed to spawn '{command}': {e}")))?;

   let (stdout_reader, stderr_reader) = spawn_readers(&mut child);

   match child.wait_timeout(timeout).map_err(|e| ReviewError::Other(format!("failed to wait on '{command}': {e}")))? {
      Some(status) => {
         let output = join_combined(stdout_reader, stderr_reader);
         let exit_code = status.code().unwrap_or(-1);
         Ok(CommandOutput { ok: status.success(), exit_code, output })
      },
      None => {
         let _ = child.kill();
         let _ = child.wait();
         let output = join_combined(stdout_reader, stderr_reader);
         let banner = format!("TIMEOUT: command exceeded {}s\n", timeout.as_secs());
         Ok(CommandOutput { ok: false, exit_code: 124, output: format!("{banner}{output}") })
      },
   }
}

/// Keeps only the last `chars` characters, per §4.H "log tailing" (the
/// Driver always prompts with a bounded slice of command output).
pub fn tail_chars(text: &str, chars: usize) -> &str {
   if text.chars().count() <= chars {
      return text;
   }
   let start = text.char_indices().rev().nth(chars.saturating_sub(1)).map(|(i, _)| i).unwrap_or(0);
   &text[start..]
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn captures_combined_output_and_exit_code() {
      let dir = tempfile::tempdir().unwrap();
      let out = run_command(dir.path(), "echo out; echo err 1>&2; exit 3", Duration::from_secs(5)).unwrap();
      assert!(!out.ok);
      assert_eq!(out.exit_code, 3);
      assert!(out.output.contains("out"));
      assert!(out.output.contains("err"));
   }

   #[test]
   fn large_output_does_not_deadlock_against_the_timeout() {
      // Writes well past a typical 64 KiB pipe buffer on both streams; if
      // draining isn't concurrent with waiting, this blocks on write() and
      // gets falsely killed as a timeout instead of exiting on its own.
      let dir = tempfile::tempdir().unwrap();
      let out = run_command(
         dir.path(),
         "yes out | head -c 200000; yes err 1>&2 | head -c 200000 1>&2",
         Duration::from_secs(10),
      )
      .unwrap();
      assert!(out.ok);
      assert_eq!(out.exit_code, 0);
      assert!(out.output.len() >= 400_000);
   }

   #[test]
   fn timeout_produces_banner_and_124() {
      let dir = tempfile::tempdir().unwrap();
      let out = run_command(dir.path(), "sleep 5", Duration::from_millis(100)).unwrap();
      assert!(!out.ok);
      assert_eq!(out.exit_code, 124);
      assert!(out.output.starts_with("TIMEOUT: command exceeded 0s"));
   }

   #[test]
   fn tail_chars_keeps_only_the_suffix() {
      let text = "abcdefghij";
      assert_eq!(tail_chars(text, 4), "ghij");
      assert_eq!(tail_chars(text, 100), text);
   }
}
