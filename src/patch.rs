//! Patch schema & validator (SPEC_FULL §4.A, §3).
//!
//! The patch is modeled as a tagged enum instead of a stringly-typed `op`
//! field: construction *is* validation. A single JSON Schema document is
//! still bundled (and printable via the `schema` CLI subcommand) for wire
//! interop with §6, but the Rust-side checker never consults it — it's a
//! hand-written predicate over the parsed value, per the redesign note in
//! §9.

use serde_json::Value;

use crate::content::{decode_base64, encode_base64, is_safe_repo_rel_posix, normalize_mode, normalize_text};
use crate::error::{ReviewError, Result};

/// The canonical wire schema, embedded at compile time.
pub const SCHEMA_JSON: &str = include_str!("../assets/schema.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
   InProgress,
   Completed,
}

impl Status {
   fn parse(s: &str) -> Option<Self> {
      match s {
         "in_progress" => Some(Self::InProgress),
         "completed" => Some(Self::Completed),
         _ => None,
      }
   }

   pub fn is_completed(self) -> bool {
      matches!(self, Self::Completed)
   }
}

/// Create/update payload: exactly one of `body`/`body_b64` on the wire.
#[derive(Debug, Clone)]
pub enum Content {
   Text(String),
   Binary(Vec<u8>),
}

impl Content {
   /// Bytes ready to write to disk. Text content is run through
   /// [`normalize_text`] so writes and equality checks always agree
   /// (§4.D no-op idempotence).
   pub fn as_bytes(&self) -> Vec<u8> {
      match self {
         Self::Text(s) => normalize_text(s).into_bytes(),
         Self::Binary(b) => b.clone(),
      }
   }
}

#[derive(Debug, Clone)]
pub enum Patch {
   Create { file: String, content: Content, status: Status },
   Update { file: String, content: Content, status: Status },
   Delete { file: String, status: Status },
   Rename { file: String, target: String, status: Status },
   Chmod { file: String, mode: &'static str, status: Status },
}

impl Patch {
   pub fn file(&self) -> &str {
      match self {
         Self::Create { file, .. }
         | Self::Update { file, .. }
         | Self::Delete { file, .. }
         | Self::Rename { file, .. }
         | Self::Chmod { file, .. } => file,
      }
   }

   pub fn status(&self) -> Status {
      match self {
         Self::Create { status, .. }
         | Self::Update { status, .. }
         | Self::Delete { status, .. }
         | Self::Rename { status, .. }
         | Self::Chmod { status, .. } => *status,
      }
   }

   pub fn op_name(&self) -> &'static str {
      match self {
         Self::Create { .. } => "create",
         Self::Update { .. } => "update",
         Self::Delete { .. } => "delete",
         Self::Rename { .. } => "rename",
         Self::Chmod { .. } => "chmod",
      }
   }
}

/// Parse and validate a patch from JSON text.
pub fn validate_patch(json_text: &str) -> Result<Patch> {
   let value: Value = serde_json::from_str(json_text).map_err(|e| ReviewError::Schema(e.to_string()))?;
   validate_patch_value(&value)
}

/// Parse and validate a patch from an already-parsed JSON value (e.g. a
/// tool call's `arguments`).
pub fn validate_patch_value(value: &Value) -> Result<Patch> {
   let obj = value.as_object().ok_or_else(|| ReviewError::Schema("patch must be a JSON object".into()))?;

   let op = str_field(obj, "op").ok_or_else(|| ReviewError::Schema("missing or invalid 'op'".into()))?;
   let status_raw =
      str_field(obj, "status").ok_or_else(|| ReviewError::Schema("missing or invalid 'status'".into()))?;
   let status =
      Status::parse(status_raw).ok_or_else(|| ReviewError::Schema(format!("invalid 'status': {status_raw}")))?;

   match op {
      "create" | "update" => {
         let file = safe_path_field(obj, "file")?;
         let content = read_content(obj)?;
         if op == "create" {
            Ok(Patch::Create { file, content, status })
         } else {
            Ok(Patch::Update { file, content, status })
         }
      },
      "delete" => {
         let file = safe_path_field(obj, "file")?;
         Ok(Patch::Delete { file, status })
      },
      "rename" => {
         let file = safe_path_field(obj, "file")?;
         let target = safe_path_field(obj, "target")?;
         if file == target {
            return Err(ReviewError::Safety(format!("rename 'file' and 'target' are identical: {file}")));
         }
         Ok(Patch::Rename { file, target, status })
      },
      "chmod" => {
         let file = safe_path_field(obj, "file")?;
         let mode_raw =
            str_field(obj, "mode").ok_or_else(|| ReviewError::Schema("missing 'mode' for chmod".into()))?;
         let mode = normalize_mode(mode_raw)
            .ok_or_else(|| ReviewError::Safety(format!("mode not in whitelist {{644,755}}: {mode_raw}")))?;
         Ok(Patch::Chmod { file, mode, status })
      },
      other => Err(ReviewError::Schema(format!("invalid 'op': {other}"))),
   }
}

fn str_field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
   obj.get(key)?.as_str()
}

fn safe_path_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<String> {
   let raw = str_field(obj, key).ok_or_else(|| ReviewError::Schema(format!("missing or empty '{key}'")))?;
   if raw.trim().is_empty() {
      return Err(ReviewError::Schema(format!("missing or empty '{key}'")));
   }
   if !is_safe_repo_rel_posix(raw) {
      return Err(ReviewError::Safety(format!("unsafe path in '{key}': {raw}")));
   }
   Ok(raw.to_string())
}

fn read_content(obj: &serde_json::Map<String, Value>) -> Result<Content> {
   let body = str_field(obj, "body");
   let body_b64 = str_field(obj, "body_b64");
   match (body, body_b64) {
      (Some(_), Some(_)) => Err(ReviewError::Schema("exactly one of 'body'/'body_b64' is allowed".into())),
      (None, None) => Err(ReviewError::Schema("one of 'body'/'body_b64' is required".into())),
      (Some(text), None) => Ok(Content::Text(text.to_string())),
      (None, Some(b64)) => {
         let bytes = decode_base64(b64).map_err(ReviewError::Safety)?;
         Ok(Content::Binary(bytes))
      },
   }
}

/// Render a patch back into its canonical wire JSON (used by tests and by
/// the driver when echoing a patch back for logging).
pub fn patch_to_json(patch: &Patch) -> Value {
   let status = match patch.status() {
      Status::InProgress => "in_progress",
      Status::Completed => "completed",
   };
   match patch {
      Patch::Create { file, content, .. } | Patch::Update { file, content, .. } => {
         let mut map = serde_json::Map::new();
         map.insert("op".into(), Value::String(patch.op_name().into()));
         map.insert("file".into(), Value::String(file.clone()));
         match content {
            Content::Text(t) => {
               map.insert("body".into(), Value::String(t.clone()));
            },
            Content::Binary(b) => {
               map.insert("body_b64".into(), Value::String(encode_base64(b)));
            },
         }
         map.insert("status".into(), Value::String(status.into()));
         Value::Object(map)
      },
      Patch::Delete { file, .. } => serde_json::json!({"op": "delete", "file": file, "status": status}),
      Patch::Rename { file, target, .. } => {
         serde_json::json!({"op": "rename", "file": file, "target": target, "status": status})
      },
      Patch::Chmod { file, mode, .. } => {
         serde_json::json!({"op": "chmod", "file": file, "mode": mode, "status": status})
      },
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn create_requires_exactly_one_body_field() {
      assert!(validate_patch(r#"{"op":"create","file":"a.txt","status":"in_progress"}"#).is_err());
      assert!(
         validate_patch(
            r#"{"op":"create","file":"a.txt","body":"x","body_b64":"eA==","status":"in_progress"}"#
         )
         .is_err()
      );
      assert!(validate_patch(r#"{"op":"create","file":"a.txt","body":"x","status":"in_progress"}"#).is_ok());
   }

   #[test]
   fn rejects_unsafe_paths() {
      let err = validate_patch(r#"{"op":"create","file":"../evil","body":"x","status":"in_progress"}"#)
         .unwrap_err();
      assert!(matches!(err, ReviewError::Safety(_)));
   }

   #[test]
   fn rename_rejects_identical_endpoints() {
      let err =
         validate_patch(r#"{"op":"rename","file":"a","target":"a","status":"in_progress"}"#).unwrap_err();
      assert!(matches!(err, ReviewError::Safety(_)));
   }

   #[test]
   fn chmod_whitelist_enforced() {
      assert!(validate_patch(r#"{"op":"chmod","file":"a","mode":"600","status":"in_progress"}"#).is_err());
      assert!(validate_patch(r#"{"op":"chmod","file":"a","mode":"0755","status":"in_progress"}"#).is_ok());
   }

   #[test]
   fn delete_and_rename_round_trip_json() {
      let patch = validate_patch(r#"{"op":"delete","file":"a.txt","status":"completed"}"#).unwrap();
      let json = patch_to_json(&patch);
      assert_eq!(json["op"], "delete");
      assert_eq!(json["file"], "a.txt");
   }

   #[test]
   fn binary_content_round_trips_through_base64() {
      let encoded = encode_base64(b"\x00\x01binary");
      let text = format!(r#"{{"op":"create","file":"a.bin","body_b64":"{encoded}","status":"in_progress"}}"#);
      let patch = validate_patch(&text).unwrap();
      match patch {
         Patch::Create { content: Content::Binary(b), .. } => assert_eq!(b, b"\x00\x01binary"),
         _ => panic!("expected binary create"),
      }
   }
}
