use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
   #[error("git command failed: {0}")]
   Git(String),

   #[error("patch failed schema validation: {0}")]
   Schema(String),

   #[error("patch failed safety validation: {0}")]
   Safety(String),

   #[error("local changes present on {path}; refusing to touch it")]
   DirtyWorkingTree { path: String },

   #[error("could not apply patch to {path}: {reason}")]
   Apply { path: String, reason: String },

   #[error("command failed (exit {exit_code}): {command}")]
   Command { command: String, exit_code: i32 },

   #[error("LLM transport error: {0}")]
   Transport(String),

   #[error("API request failed (HTTP {status}): {body}")]
   Api { status: u16, body: String },

   #[error("API call failed after {retries} retries: {source}")]
   ApiRetryExhausted {
      retries: u32,
      #[source]
      source:  Box<Self>,
   },

   #[error("model did not return the required tool call after {attempts} nudges")]
   NoToolCall { attempts: u32 },

   #[error("repository is not ready: {0}")]
   Fatal(String),

   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),

   #[error("TOML error: {0}")]
   Toml(#[from] toml::de::Error),

   #[error("HTTP error: {0}")]
   Http(#[from] reqwest::Error),

   #[error("template error: {0}")]
   Template(#[from] tera::Error),

   #[error("{0}")]
   Other(String),
}

pub type Result<T> = std::result::Result<T, ReviewError>;
