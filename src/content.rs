//! Path safety, text normalization, and binary detection (SPEC_FULL §4.B).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Canonical repo-relative POSIX path guard.
///
/// Rejects absolute paths, backslashes, Windows drive letters, `..`
/// segments, anything under or equal to `.git`, and any path whose
/// normalized form differs from the input (no `./`, `//`, trailing `/`).
pub fn is_safe_repo_rel_posix(path: &str) -> bool {
   let raw = path.trim();
   if raw.is_empty() {
      return false;
   }
   if raw.contains('\\') || raw.starts_with('/') {
      return false;
   }
   if has_drive_prefix(raw) {
      return false;
   }
   if raw.split('/').any(|seg| seg == "..") {
      return false;
   }
   if raw == ".git" || raw.starts_with(".git/") || raw.contains("/.git/") || raw.ends_with("/.git") {
      return false;
   }

   let segments: Vec<&str> = raw.split('/').collect();
   if segments.iter().any(|seg| seg.is_empty()) {
      return false;
   }
   // A normalized PurePosixPath round-trip would collapse "." segments and
   // drop a leading "./"; reject anything that isn't already normalized.
   if segments.iter().any(|seg| *seg == ".") {
      return false;
   }
   let normalized = segments.join("/");
   normalized == raw
}

fn has_drive_prefix(raw: &str) -> bool {
   let mut chars = raw.chars();
   matches!(
      (chars.next(), chars.next()),
      (Some(c), Some(':')) if c.is_ascii_alphabetic()
   )
}

/// CRLF/CR → LF, with a guaranteed trailing LF. Writes and equality checks
/// both go through this so an "already equal" update is detected and
/// skipped (§4.D no-op idempotence).
pub fn normalize_text(text: &str) -> String {
   let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
   if !out.ends_with('\n') {
      out.push('\n');
   }
   out
}

const SNIFF_BYTES: usize = 4096;

/// Heuristic binary detector: NUL byte anywhere in the first 4 KiB, or
/// control-character density (excluding tab/lf/cr) over 30%.
pub fn looks_binary(bytes: &[u8]) -> bool {
   let sample = &bytes[..bytes.len().min(SNIFF_BYTES)];
   if sample.is_empty() {
      return false;
   }
   if sample.contains(&0) {
      return true;
   }
   let ctrl = sample.iter().filter(|&&b| b < 32 && !matches!(b, 9 | 10 | 13)).count();
   (ctrl as f64 / sample.len() as f64) > 0.30
}

/// Strict base64 decode: rejects non-canonical padding/characters.
pub fn decode_base64(s: &str) -> Result<Vec<u8>, String> {
   BASE64.decode(s.trim()).map_err(|e| format!("invalid base64: {e}"))
}

pub fn encode_base64(bytes: &[u8]) -> String {
   BASE64.encode(bytes)
}

/// Head+tail excerpt for prompt content that exceeds `threshold` bytes,
/// grounded in `original_source/gpt_review/fullfile_api_driver.py::
/// _excerpt_bytes_to_text`: the first `half` bytes, a marker line, then the
/// last `half` bytes. Operates on bytes and falls back to the nearest char
/// boundary so multi-byte UTF-8 sequences are never split.
pub fn excerpt(content: &str, threshold: usize, half: usize) -> String {
   let bytes = content.as_bytes();
   if bytes.len() <= threshold {
      return content.to_string();
   }
   let head_end = floor_char_boundary(content, half.min(bytes.len()));
   let tail_start = ceil_char_boundary(content, bytes.len().saturating_sub(half));
   let marker = format!("<<EXCERPT: file too large ({} bytes); sending head+tail>>", bytes.len());
   format!("{}\n{marker}\n{}", &content[..head_end], &content[tail_start.max(head_end)..])
}

fn floor_char_boundary(s: &str, idx: usize) -> usize {
   let mut idx = idx.min(s.len());
   while idx > 0 && !s.is_char_boundary(idx) {
      idx -= 1;
   }
   idx
}

fn ceil_char_boundary(s: &str, idx: usize) -> usize {
   let mut idx = idx.min(s.len());
   while idx < s.len() && !s.is_char_boundary(idx) {
      idx += 1;
   }
   idx
}

/// Normalize and whitelist-check a chmod mode string (3-4 octal digits,
/// leading zeros stripped). Only `644`/`755` are accepted (SPEC_FULL §9
/// Open Question resolution: whitelist stays conservative).
pub fn normalize_mode(mode: &str) -> Option<&'static str> {
   if mode.is_empty() || mode.len() > 4 || !mode.chars().all(|c| ('0'..='7').contains(&c)) {
      return None;
   }
   let stripped = mode.trim_start_matches('0');
   let canonical = if stripped.is_empty() { "0" } else { stripped };
   match canonical {
      "644" => Some("644"),
      "755" => Some("755"),
      _ => None,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn rejects_absolute_and_traversal() {
      assert!(!is_safe_repo_rel_posix("/etc/passwd"));
      assert!(!is_safe_repo_rel_posix("../evil"));
      assert!(!is_safe_repo_rel_posix("a/../b"));
      assert!(!is_safe_repo_rel_posix("C:/windows"));
      assert!(!is_safe_repo_rel_posix("a\\b"));
   }

   #[test]
   fn rejects_git_internals() {
      assert!(!is_safe_repo_rel_posix(".git"));
      assert!(!is_safe_repo_rel_posix(".git/config"));
      assert!(!is_safe_repo_rel_posix("a/.git/config"));
      assert!(!is_safe_repo_rel_posix("a/.git"));
   }

   #[test]
   fn rejects_non_normalized_forms() {
      assert!(!is_safe_repo_rel_posix("./a"));
      assert!(!is_safe_repo_rel_posix("a//b"));
      assert!(!is_safe_repo_rel_posix("a/./b"));
      assert!(!is_safe_repo_rel_posix("a/"));
      assert!(!is_safe_repo_rel_posix(""));
   }

   #[test]
   fn accepts_safe_paths() {
      assert!(is_safe_repo_rel_posix("a.txt"));
      assert!(is_safe_repo_rel_posix("src/lib.rs"));
      assert!(is_safe_repo_rel_posix("a/b/c.d"));
   }

   #[test]
   fn normalizes_crlf_and_ensures_trailing_newline() {
      assert_eq!(normalize_text("a\r\nb\r\n"), "a\nb\n");
      assert_eq!(normalize_text("a\nb"), "a\nb\n");
      assert_eq!(normalize_text("a\rb"), "a\nb\n");
   }

   #[test]
   fn detects_nul_and_control_density() {
      assert!(looks_binary(b"\x00abc"));
      assert!(!looks_binary(b"hello\nworld\n"));
      let noisy: Vec<u8> = (0u8..20).collect();
      assert!(looks_binary(&noisy));
   }

   #[test]
   fn chmod_whitelist_is_conservative() {
      assert_eq!(normalize_mode("644"), Some("644"));
      assert_eq!(normalize_mode("0644"), Some("644"));
      assert_eq!(normalize_mode("755"), Some("755"));
      assert_eq!(normalize_mode("0755"), Some("755"));
      assert_eq!(normalize_mode("600"), None);
      assert_eq!(normalize_mode("444"), None);
      assert_eq!(normalize_mode("abcd"), None);
   }

   #[test]
   fn excerpt_passes_small_content_through_unchanged() {
      assert_eq!(excerpt("short", 200_000, 60_000), "short");
   }

   #[test]
   fn excerpt_splits_oversized_content_head_and_tail() {
      let big = "a".repeat(10) + &"b".repeat(10);
      let out = excerpt(&big, 15, 5);
      assert!(out.starts_with("aaaaa"));
      assert!(out.ends_with("bbbbb"));
      assert!(out.contains("<<EXCERPT: file too large (20 bytes); sending head+tail>>"));
   }

   #[test]
   fn base64_round_trip() {
      let data = b"hello world";
      let encoded = encode_base64(data);
      assert_eq!(decode_base64(&encoded).unwrap(), data);
      assert!(decode_base64("not base64!!").is_err());
   }
}
