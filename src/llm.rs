//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{AnalystError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> AnalystError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AnalystError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    AnalystError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

/// Azure OpenAI chat completions client.
///
/// Missing credentials are not checked here; the first request fails instead.
#[derive(Clone)]
pub struct AzureOpenAIClient {
    http: reqwest::Client,
    deployment: String,
    api_key: Option<String>,
    endpoint: Option<String>,
    api_version: String,
}

impl AzureOpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = cfg.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder
                .build()
                .map_err(|err| AnalystError::Config(format!("http client error: {err}")))?,
            deployment: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            endpoint: cfg.endpoint.clone(),
            api_version: cfg.api_version.clone(),
        })
    }

    fn completions_url(&self) -> Result<String> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            AnalystError::LanguageModel("no Azure OpenAI endpoint configured".into())
        })?;
        Ok(format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        ))
    }

    fn to_openai_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string();

                let tool_calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| OpenAiToolCall {
                                id: call.id.clone(),
                                r#type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: call.name.clone(),
                                    arguments: serialize_tool_arguments(&call.arguments),
                                },
                            })
                            .collect(),
                    )
                };

                let content = match &message.tool_result {
                    Some(result) => Some(serialize_tool_arguments(&result.output)),
                    None if tool_calls.is_some() && message.content.is_empty() => None,
                    None => Some(message.content.clone()),
                };

                OpenAiMessage {
                    role,
                    content,
                    tool_call_id: message
                        .tool_result
                        .as_ref()
                        .and_then(|result| result.tool_call_id.clone()),
                    tool_calls,
                }
            })
            .collect()
    }

    fn to_openai_tools(tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    fn build_payload(messages: &[Message], tools: &[ToolDescription]) -> Value {
        let mut payload = json!({ "messages": Self::to_openai_messages(messages) });
        if let Some(tools) = Self::to_openai_tools(tools) {
            payload["tools"] = json!(tools);
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[async_trait]
impl LanguageModel for AzureOpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let url = self.completions_url()?;
        let payload = Self::build_payload(messages, tools);

        let mut builder = self.http.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| AnalystError::LanguageModel(format!("Azure OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "azure-openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AnalystError::LanguageModel(format!("Azure OpenAI response parse error: {err}"))
        })?;
        completion_from_response(body)
    }
}

fn completion_from_response(body: OpenAiResponse) -> Result<ModelCompletion> {
    let first = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AnalystError::LanguageModel("Azure OpenAI returned no choices".into()))?;

    let tool_calls = first
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ModelCompletion {
        content: first.message.content,
        tool_calls,
    })
}

/// A deterministic model used for tests and demos.
///
/// Each scripted response is either a JSON directive
/// (`{"action":"respond",...}` / `{"action":"call_tool",...}`) or plain text.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = self
            .responses
            .lock()
            .map_err(|_| AnalystError::LanguageModel("stub model poisoned".into()))?
            .pop_front()
            .ok_or_else(|| {
                AnalystError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some(format!("call_{}", self.calls())),
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}
