//! LLM transport (SPEC_FULL §4.F, §6 — dual-mode chat/tool-call client).
//!
//! Generalizes the teacher's `api.rs` (`ResolvedApiMode`, request/response
//! structs, `retry_api_call`) from one-shot commit-analysis calls to a
//! reusable "call with exactly one forced tool" primitive the conversation
//! driver builds its four operations on top of.

use std::{thread, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ResolvedApiMode, ReviewConfig};
use crate::error::{ReviewError, Result};

/// A message in the rolling conversation buffer (§3 `ConversationState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
   System,
   User,
   Assistant,
   Tool,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
   pub role:    Role,
   pub content: String,
}

impl ChatMessage {
   pub fn system(content: impl Into<String>) -> Self {
      Self { role: Role::System, content: content.into() }
   }

   pub fn user(content: impl Into<String>) -> Self {
      Self { role: Role::User, content: content.into() }
   }

   pub fn assistant(content: impl Into<String>) -> Self {
      Self { role: Role::Assistant, content: content.into() }
   }

   pub fn tool(content: impl Into<String>) -> Self {
      Self { role: Role::Tool, content: content.into() }
   }

   fn role_str(&self) -> &'static str {
      match self.role {
         Role::System => "system",
         Role::User => "user",
         Role::Assistant => "assistant",
         Role::Tool => "tool",
      }
   }
}

/// A tool (function) declaration forced on a single turn.
pub struct ToolSpec {
   pub name:        &'static str,
   pub description: &'static str,
   /// JSON Schema `{"type":"object","properties":{...},"required":[...]}`.
   pub schema:      Value,
}

/// Outcome of one forced-tool-call turn (§4.F, §7 `NoToolCallError`).
pub enum ToolCallOutcome {
   Called { arguments: Value },
   NoCall { text: String },
}

#[derive(Debug, Serialize)]
struct Message {
   role:    String,
   content: String,
}

#[derive(Debug, Serialize)]
struct FunctionParameters<'a> {
   #[serde(flatten)]
   schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct Function<'a> {
   name:        &'a str,
   description: &'a str,
   parameters:  FunctionParameters<'a>,
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
   #[serde(rename = "type")]
   tool_type: &'static str,
   function:  Function<'a>,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
   model:       &'a str,
   max_tokens:  u32,
   temperature: f32,
   tools:       Vec<Tool<'a>>,
   tool_choice: Value,
   messages:    Vec<Message>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
   name:         &'a str,
   description:  &'a str,
   input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct AnthropicToolChoice<'a> {
   #[serde(rename = "type")]
   choice_type: &'static str,
   name:        &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
   role:    String,
   content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
   model:       &'a str,
   max_tokens:  u32,
   temperature: f32,
   #[serde(skip_serializing_if = "Option::is_none")]
   system:      Option<&'a str>,
   tools:       Vec<AnthropicTool<'a>>,
   tool_choice: AnthropicToolChoice<'a>,
   messages:    Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
   function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
   arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
   #[serde(default)]
   tool_calls: Vec<ToolCall>,
   #[serde(default)]
   content:    Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
   message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
   #[serde(default)]
   choices: Vec<Choice>,
}

fn build_client(config: &ReviewConfig) -> Result<reqwest::blocking::Client> {
   reqwest::blocking::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
      .build()
      .map_err(|e| ReviewError::Transport(format!("failed to build HTTP client: {e}")))
}

fn anthropic_messages_url(base_url: &str) -> String {
   let trimmed = base_url.trim_end_matches('/');
   if trimmed.ends_with("/v1") { format!("{trimmed}/messages") } else { format!("{trimmed}/v1/messages") }
}

fn chat_completions_url(base_url: &str) -> String {
   let trimmed = base_url.trim_end_matches('/');
   if trimmed.ends_with("/v1") || trimmed.contains("/chat/completions") {
      format!("{trimmed}/chat/completions")
   } else {
      format!("{trimmed}/v1/chat/completions")
   }
}

fn extract_anthropic_content(body: &str, tool_name: &str) -> Result<ToolCallOutcome> {
   let value: Value =
      serde_json::from_str(body).map_err(|e| ReviewError::Transport(format!("malformed Anthropic response: {e}")))?;
   let mut tool_input = None;
   let mut text_parts = Vec::new();
   if let Some(content) = value.get("content").and_then(Value::as_array) {
      for item in content {
         match item.get("type").and_then(Value::as_str).unwrap_or("") {
            "tool_use" => {
               if item.get("name").and_then(Value::as_str) == Some(tool_name)
                  && let Some(input) = item.get("input")
               {
                  tool_input = Some(input.clone());
               }
            },
            "text" => {
               if let Some(text) = item.get("text").and_then(Value::as_str) {
                  text_parts.push(text.to_string());
               }
            },
            _ => {},
         }
      }
   }
   match tool_input {
      Some(arguments) => Ok(ToolCallOutcome::Called { arguments }),
      None => Ok(ToolCallOutcome::NoCall { text: text_parts.join("\n") }),
   }
}

/// Issue one chat turn with exactly one tool forced, retrying transport-level
/// failures (network errors, 5xx responses) with exponential backoff up to
/// `config.max_retries` (grounded in the teacher's `retry_api_call`).
pub fn call_tool(
   config: &ReviewConfig,
   model: &str,
   system: &str,
   messages: &[ChatMessage],
   tool: &ToolSpec,
) -> Result<ToolCallOutcome> {
   let mode = config.resolved_api_mode(model);
   let mut attempt = 0u32;
   loop {
      attempt += 1;
      match call_tool_once(config, mode, model, system, messages, tool) {
         Ok(outcome) => return Ok(outcome),
         Err(err) if attempt < config.max_retries => {
            let backoff_ms = config.initial_backoff_ms * (1u64 << (attempt - 1));
            eprintln!("{}", crate::style::warning(&format!("transport error: {err} — retry {attempt}/{}", config.max_retries)));
            thread::sleep(Duration::from_millis(backoff_ms));
         },
         Err(err) => {
            return Err(ReviewError::ApiRetryExhausted { retries: config.max_retries, source: Box::new(err) });
         },
      }
   }
}

fn call_tool_once(
   config: &ReviewConfig,
   mode: ResolvedApiMode,
   model: &str,
   system: &str,
   messages: &[ChatMessage],
   tool: &ToolSpec,
) -> Result<ToolCallOutcome> {
   let client = build_client(config)?;
   match mode {
      ResolvedApiMode::ChatCompletions => call_chat_completions(&client, config, model, system, messages, tool),
      ResolvedApiMode::AnthropicMessages => call_anthropic_messages(&client, config, model, system, messages, tool),
   }
}

fn call_chat_completions(
   client: &reqwest::blocking::Client,
   config: &ReviewConfig,
   model: &str,
   system: &str,
   messages: &[ChatMessage],
   tool: &ToolSpec,
) -> Result<ToolCallOutcome> {
   let mut wire_messages = vec![Message { role: "system".to_string(), content: system.to_string() }];
   wire_messages.extend(messages.iter().map(|m| Message { role: m.role_str().to_string(), content: m.content.clone() }));

   let request = ApiRequest {
      model,
      max_tokens: 8192,
      temperature: config.temperature,
      tools: vec![Tool {
         tool_type: "function",
         function: Function { name: tool.name, description: tool.description, parameters: FunctionParameters { schema: &tool.schema } },
      }],
      tool_choice: serde_json::json!({"type": "function", "function": {"name": tool.name}}),
      messages: wire_messages,
   };

   let mut builder = client.post(chat_completions_url(&config.api_base_url)).header("content-type", "application/json");
   if let Some(key) = &config.api_key {
      builder = builder.header("Authorization", format!("Bearer {key}"));
   }
   let response = builder.json(&request).send().map_err(|e| ReviewError::Transport(e.to_string()))?;
   let status = response.status();
   let body = response.text().map_err(|e| ReviewError::Transport(e.to_string()))?;
   if !status.is_success() {
      return Err(ReviewError::Api { status: status.as_u16(), body });
   }

   let parsed: ChatCompletionsResponse =
      serde_json::from_str(&body).map_err(|e| ReviewError::Transport(format!("malformed chat completion response: {e}")))?;
   let Some(choice) = parsed.choices.into_iter().next() else {
      return Err(ReviewError::Transport("response carried no choices".to_string()));
   };
   if let Some(call) = choice.message.tool_calls.into_iter().next() {
      let arguments: Value = serde_json::from_str(&call.function.arguments)
         .map_err(|e| ReviewError::Schema(format!("tool arguments were not valid JSON: {e}")))?;
      return Ok(ToolCallOutcome::Called { arguments });
   }
   Ok(ToolCallOutcome::NoCall { text: choice.message.content.unwrap_or_default() })
}

fn call_anthropic_messages(
   client: &reqwest::blocking::Client,
   config: &ReviewConfig,
   model: &str,
   system: &str,
   messages: &[ChatMessage],
   tool: &ToolSpec,
) -> Result<ToolCallOutcome> {
   let wire_messages: Vec<AnthropicMessage> = messages
      .iter()
      .map(|m| AnthropicMessage { role: if matches!(m.role, Role::Assistant) { "assistant" } else { "user" }.to_string(), content: m.content.clone() })
      .collect();

   let request = AnthropicRequest {
      model,
      max_tokens: 8192,
      temperature: config.temperature,
      system: Some(system),
      tools: vec![AnthropicTool { name: tool.name, description: tool.description, input_schema: &tool.schema }],
      tool_choice: AnthropicToolChoice { choice_type: "tool", name: tool.name },
      messages: wire_messages,
   };

   let api_key = config.api_key.as_deref().unwrap_or_default();
   let response = client
      .post(anthropic_messages_url(&config.api_base_url))
      .header("x-api-key", api_key)
      .header("anthropic-version", "2023-06-01")
      .header("content-type", "application/json")
      .json(&request)
      .send()
      .map_err(|e| ReviewError::Transport(e.to_string()))?;
   let status = response.status();
   let body = response.text().map_err(|e| ReviewError::Transport(e.to_string()))?;
   if !status.is_success() {
      return Err(ReviewError::Api { status: status.as_u16(), body });
   }
   extract_anthropic_content(&body, tool.name)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn resolved_api_mode_picks_anthropic_for_claude_models() {
      let config = ReviewConfig::default();
      assert_eq!(config.resolved_api_mode("claude-sonnet-4-5"), ResolvedApiMode::AnthropicMessages);
      assert_eq!(config.resolved_api_mode("gpt-5-codex"), ResolvedApiMode::ChatCompletions);
   }

   #[test]
   fn anthropic_content_extraction_prefers_matching_tool_use() {
      let body = serde_json::json!({
         "content": [
            {"type": "text", "text": "thinking..."},
            {"type": "tool_use", "name": "submit_patch", "input": {"op": "keep"}}
         ]
      })
      .to_string();
      let outcome = extract_anthropic_content(&body, "submit_patch").unwrap();
      match outcome {
         ToolCallOutcome::Called { arguments } => assert_eq!(arguments["op"], "keep"),
         ToolCallOutcome::NoCall { .. } => panic!("expected a tool call"),
      }
   }

   #[test]
   fn anthropic_content_extraction_reports_no_call_when_absent() {
      let body = serde_json::json!({"content": [{"type": "text", "text": "no tool this time"}]}).to_string();
      let outcome = extract_anthropic_content(&body, "submit_patch").unwrap();
      assert!(matches!(outcome, ToolCallOutcome::NoCall { .. }));
   }
}
