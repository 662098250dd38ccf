//! Model client
//!
//! One blocking request per cycle: the rendered context payload goes out as
//! the user message, the raw answer text comes back for the edit parser.

use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::time::Duration;

use crate::core::context::ContextPayload;
use crate::core::error::PatchError;
use crate::infra::config::{API_KEY_ENV, Credentials, ModelConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Built-in instructions describing the edit document the parser expects.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a code editing assistant. You receive source files and an instruction.
Answer with a single JSON object, optionally inside a ```json fenced block, of this exact shape:

{"files": [{"filename": "path/relative/to/repo",
            "changes": [{"search": ["exact", "lines"], "replace": ["new", "lines"]}]}]}

Rules:
- "search" lists consecutive lines copied EXACTLY from the current file, including indentation and blank lines. It must match exactly one place in the file.
- "replace" lists the lines that take their place. An empty list deletes the matched lines.
- Changes to one file are applied in order; a later search sees the result of earlier changes.
- To create a new file, use an empty "search" and put the whole file in "replace".
- Lines never include their trailing newline.
- Include only files that change."#;

/// System and user text for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPrompt {
    pub system: String,
    pub user: String,
}

/// Assemble the request text from the payload and the instruction
pub fn build_prompt(config: &ModelConfig, payload: &ContextPayload, instruction: &str) -> ModelPrompt {
    let system = config
        .system_prompt
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    ModelPrompt {
        system,
        user: payload.render(instruction),
    }
}

/// Anything that turns a prompt into raw response text
pub trait ModelClient {
    fn complete(&self, prompt: &ModelPrompt) -> Result<String, PatchError>;
}

/// Messages API client
pub struct AnthropicClient {
    http: Client,
    config: ModelConfig,
    credentials: Credentials,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig, credentials: Credentials) -> Result<Self, PatchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PatchError::ModelRequestFailed(format!("create http client: {e}")))?;

        Ok(Self {
            http,
            config: config.clone(),
            credentials,
        })
    }

    /// Client from the environment credential; fails before any request
    pub fn from_env(config: &ModelConfig) -> Result<Self, PatchError> {
        let credentials = Credentials::from_env().ok_or(PatchError::MissingCredential(API_KEY_ENV))?;
        Self::new(config, credentials)
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.api_base.trim_end_matches('/'))
    }
}

impl ModelClient for AnthropicClient {
    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.config.name))]
    fn complete(&self, prompt: &ModelPrompt) -> Result<String, PatchError> {
        let body = json!({
            "model": self.config.name,
            "max_tokens": self.config.max_tokens,
            "system": prompt.system,
            "messages": [{"role": "user", "content": prompt.user}],
        });

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.credentials.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let text = resp.text().map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(PatchError::ModelRequestFailed(format!("{status}: {detail}")));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| PatchError::ModelRequestFailed(format!("invalid response body: {e}")))?;
        let answer = parse_message_text(&value)
            .ok_or_else(|| PatchError::ModelRequestFailed("response carried no text content".into()))?;

        tracing::debug!(chars = answer.len(), "model answered");
        Ok(answer)
    }
}

impl AnthropicClient {
    fn transport_error(&self, e: reqwest::Error) -> PatchError {
        if e.is_timeout() {
            PatchError::ModelTimeout {
                secs: self.config.timeout_secs,
            }
        } else {
            PatchError::ModelRequestFailed(e.to_string())
        }
    }
}

/// Concatenate the `text` blocks of a Messages API response
pub fn parse_message_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let mut buf = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("text")
            && let Some(t) = block.get("text").and_then(Value::as_str)
        {
            buf.push_str(t);
        }
    }
    (!buf.is_empty()).then_some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::SelectedFile;
    use std::path::PathBuf;

    #[test]
    fn message_text_joins_text_blocks_only() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Here you go:\n"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "{\"files\": []}"}
            ]
        });
        assert_eq!(
            parse_message_text(&body).as_deref(),
            Some("Here you go:\n{\"files\": []}")
        );
        assert_eq!(parse_message_text(&json!({"content": []})), None);
        assert_eq!(parse_message_text(&json!({"error": {}})), None);
    }

    #[test]
    fn prompt_uses_override_when_present() {
        let payload = ContextPayload {
            files: vec![SelectedFile {
                path: PathBuf::from("a.py"),
                content: "def f():\n    return 1\n".into(),
            }],
            failures: vec![],
        };

        let mut cfg = ModelConfig::default();
        let prompt = build_prompt(&cfg, &payload, "return 2");
        assert_eq!(prompt.system, DEFAULT_SYSTEM_PROMPT);
        assert!(prompt.user.contains("File: a.py"));
        assert!(prompt.user.contains("return 2"));

        cfg.system_prompt = Some("custom".into());
        assert_eq!(build_prompt(&cfg, &payload, "x").system, "custom");

        cfg.system_prompt = Some("   ".into());
        assert_eq!(build_prompt(&cfg, &payload, "x").system, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn silent_server_is_a_timeout() {
        // Connections queue in the backlog and never get an answer
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = ModelConfig {
            api_base: format!("http://{}", listener.local_addr().unwrap()),
            timeout_secs: 1,
            ..ModelConfig::default()
        };
        let client = AnthropicClient::new(
            &cfg,
            Credentials {
                api_key: "test".into(),
            },
        )
        .unwrap();
        let prompt = ModelPrompt {
            system: "s".into(),
            user: "u".into(),
        };

        match client.complete(&prompt) {
            Err(PatchError::ModelTimeout { secs }) => assert_eq!(secs, 1),
            other => panic!("unexpected: {other:?}"),
        }
        drop(listener);
    }

    #[test]
    fn unreachable_endpoint_is_a_request_failure() {
        let cfg = ModelConfig {
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 5,
            ..ModelConfig::default()
        };
        let client = AnthropicClient::new(
            &cfg,
            Credentials {
                api_key: "test".into(),
            },
        )
        .unwrap();
        let prompt = ModelPrompt {
            system: "s".into(),
            user: "u".into(),
        };
        assert!(matches!(
            client.complete(&prompt),
            Err(PatchError::ModelRequestFailed(_)) | Err(PatchError::ModelTimeout { .. })
        ));
    }
}
