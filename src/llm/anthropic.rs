//! Anthropic Messages API client.
//!
//! Implements both [`CodeModel`] (single request) and [`ToolModel`]
//! (a session that replays its growing history on every turn).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{AgentTurn, CodeModel, PromptPart, ToolCall, ToolModel, ToolSession, ToolSpec, TurnInput};
use crate::config::ModelSection;
use crate::errors::ModelError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Media types the Messages API accepts for image blocks.
const IMAGE_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSpec]>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Split an image payload into `(media_type, base64_data)`.
///
/// Accepts `data:<media>;base64,<data>` URLs and bare base64 (taken as PNG).
pub fn split_image_payload(payload: &str) -> Result<(String, String), String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err("image payload is empty".to_string());
    }
    let Some(rest) = payload.strip_prefix("data:") else {
        return Ok(("image/png".to_string(), payload.to_string()));
    };
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no ',' separator".to_string())?;
    let media_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
    if !IMAGE_MEDIA_TYPES.contains(&media_type) {
        return Err(format!("unsupported image type '{}'", media_type));
    }
    Ok((media_type.to_string(), data.to_string()))
}

impl AnthropicClient {
    pub fn new(settings: &ModelSection, api_key: Option<String>) -> Result<Self, ModelError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ModelError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    async fn post_messages(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, messages = request.messages.len(), "sending model request");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), message = %message, "model request failed");
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }
}

fn prompt_block(part: &PromptPart) -> Result<Value, ModelError> {
    match part {
        PromptPart::Text(text) => Ok(json!({"type": "text", "text": text})),
        PromptPart::Image(payload) => {
            let (media_type, data) =
                split_image_payload(payload).map_err(ModelError::InvalidResponse)?;
            Ok(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }))
        }
    }
}

#[async_trait]
impl CodeModel for AnthropicClient {
    async fn generate(
        &self,
        parts: &[PromptPart],
        temperature: f32,
    ) -> Result<String, ModelError> {
        let content = parts.iter().map(prompt_block).collect::<Result<Vec<_>, _>>()?;
        let messages = [json!({"role": "user", "content": content})];
        let response = self
            .post_messages(&MessagesRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                temperature,
                system: None,
                messages: &messages,
                tools: None,
            })
            .await?;

        let text: Vec<&str> = response
            .content
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.is_empty() {
            return Err(ModelError::InvalidResponse(
                "response contained no text".to_string(),
            ));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl ToolModel for AnthropicClient {
    async fn start_conversation(
        &self,
        system: &str,
        tools: &[ToolSpec],
        temperature: f32,
    ) -> Result<Box<dyn ToolSession>, ModelError> {
        Ok(Box::new(AnthropicSession {
            client: self.clone(),
            system: system.to_string(),
            tools: tools.to_vec(),
            temperature,
            messages: Vec::new(),
        }))
    }
}

pub struct AnthropicSession {
    client: AnthropicClient,
    system: String,
    tools: Vec<ToolSpec>,
    temperature: f32,
    messages: Vec<Value>,
}

impl AnthropicSession {
    fn user_message(input: &TurnInput) -> Value {
        let mut content: Vec<Value> = input
            .tool_results
            .iter()
            .map(|r| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": r.call_id,
                    "content": r.content,
                    "is_error": r.is_error,
                })
            })
            .collect();
        if let Some(text) = &input.text {
            content.push(json!({"type": "text", "text": text}));
        }
        if content.is_empty() {
            content.push(json!({"type": "text", "text": "Continue."}));
        }
        json!({"role": "user", "content": content})
    }
}

#[async_trait]
impl ToolSession for AnthropicSession {
    async fn send(&mut self, input: TurnInput) -> Result<AgentTurn, ModelError> {
        self.messages.push(Self::user_message(&input));

        let result = self
            .client
            .post_messages(&MessagesRequest {
                model: &self.client.model,
                max_tokens: self.client.max_tokens,
                temperature: self.temperature,
                system: Some(&self.system),
                messages: &self.messages,
                tools: Some(&self.tools),
            })
            .await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                // Keep the history alternating user/assistant.
                self.messages.pop();
                return Err(e);
            }
        };

        let mut turn = AgentTurn::default();
        let mut assistant_content = Vec::new();
        let mut text = Vec::new();
        for block in response.content {
            match block {
                ResponseBlock::Text { text: t } => {
                    assistant_content.push(json!({"type": "text", "text": t}));
                    text.push(t);
                }
                ResponseBlock::ToolUse { id, name, input } => {
                    assistant_content.push(json!({
                        "type": "tool_use", "id": id, "name": name, "input": input,
                    }));
                    turn.tool_calls.push(ToolCall { id, name, input });
                }
                ResponseBlock::Other => {}
            }
        }
        if assistant_content.is_empty() {
            assistant_content.push(json!({"type": "text", "text": "(no content)"}));
        }
        self.messages
            .push(json!({"role": "assistant", "content": assistant_content}));
        turn.free_text = text.join("\n");

        debug!(
            tool_calls = turn.tool_calls.len(),
            stop_reason = ?response.stop_reason,
            "model turn received"
        );
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolResult;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> AnthropicClient {
        let settings = ModelSection {
            base_url: base_url.to_string(),
            ..ModelSection::default()
        };
        AnthropicClient::new(&settings, Some("test-key".into())).unwrap()
    }

    #[test]
    fn test_missing_api_key() {
        let err = AnthropicClient::new(&ModelSection::default(), Some("  ".into()))
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::MissingApiKey));
    }

    #[test]
    fn test_split_image_payload() {
        let (media, data) = split_image_payload("data:image/jpeg;base64,AAAA").unwrap();
        assert_eq!(media, "image/jpeg");
        assert_eq!(data, "AAAA");

        let (media, data) = split_image_payload("iVBORw0KGgo=").unwrap();
        assert_eq!(media, "image/png");
        assert_eq!(data, "iVBORw0KGgo=");

        assert!(split_image_payload("").is_err());
        assert!(split_image_payload("data:text/plain;base64,AAAA").is_err());
        assert!(split_image_payload("data:image/png,raw").is_err());
    }

    #[tokio::test]
    async fn test_generate_returns_joined_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Here you go:"},
                    {"type": "text", "text": "```tsx\nexport default function App() {}\n```"}
                ],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let text = client(&server.uri())
            .generate(
                &[
                    PromptPart::Text("build this".into()),
                    PromptPart::Image("data:image/png;base64,AAAA".into()),
                ],
                1.0,
            )
            .await
            .unwrap();
        assert!(text.starts_with("Here you go:\n```tsx"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["messages"][0]["content"][1]["type"], "image");
        assert_eq!(
            body["messages"][0]["content"][1]["source"]["media_type"],
            "image/png"
        );
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_api_error_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .generate(&[PromptPart::Text("x".into())], 1.0)
            .await
            .unwrap_err();
        match err {
            ModelError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_replays_history_with_tool_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Let me look."},
                    {"type": "tool_use", "id": "toolu_1", "name": "read_file",
                     "input": {"path": "/home/user/app/src/App.tsx"}}
                ],
                "stop_reason": "tool_use"
            })))
            .mount(&server)
            .await;

        let tools = vec![ToolSpec {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }];
        let mut session = client(&server.uri())
            .start_conversation("fix the build", &tools, 0.2)
            .await
            .unwrap();

        let turn = session
            .send(TurnInput {
                text: Some("The build failed.".into()),
                tool_results: vec![],
            })
            .await
            .unwrap();
        assert_eq!(turn.free_text, "Let me look.");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "read_file");
        assert_eq!(
            turn.tool_calls[0].str_arg("path"),
            Some("/home/user/app/src/App.tsx")
        );

        session
            .send(TurnInput {
                text: Some("Continue.".into()),
                tool_results: vec![ToolResult {
                    call_id: "toolu_1".into(),
                    content: "Error: file not found".into(),
                    is_error: true,
                }],
            })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(second["system"], "fix the build");
        assert_eq!(second["tools"][0]["name"], "read_file");
        let messages = second["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["is_error"], true);
        assert_eq!(messages[2]["content"][1]["text"], "Continue.");
    }

    #[tokio::test]
    async fn test_failed_turn_does_not_corrupt_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "ok"}]
            })))
            .mount(&server)
            .await;

        let mut session = client(&server.uri())
            .start_conversation("sys", &[], 0.2)
            .await
            .unwrap();
        let err = session.send(TurnInput::default()).await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 500, .. }));

        session.send(TurnInput::default()).await.unwrap();
        let requests = server.received_requests().await.unwrap();
        let last: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(last["messages"].as_array().unwrap().len(), 1);
    }
}
