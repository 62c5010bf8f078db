//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling and speaks the
//! `generateContent` function-calling dialect.

use super::{Completion, CompletionRequest, LanguageModel, ModelTurn, ToolCall, ToolSpec};
use crate::error::AdvisorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiModel {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{}:generateContent", BASE_URL, model),
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn complete(&self, request: CompletionRequest) -> crate::Result<Completion> {
        if self.api_key.is_empty() {
            return Err(AdvisorError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let body = build_request(&request);

        debug!(
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AdvisorError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AdvisorError::LlmError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AdvisorError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let completion = parse_response(gemini_response)?;

        info!(
            tool_calls = completion.tool_calls.len(),
            has_text = completion.text.is_some(),
            "Gemini response received"
        );

        Ok(completion)
    }
}

fn build_request(request: &CompletionRequest) -> GeminiRequest {
    let mut contents: Vec<Content> = Vec::with_capacity(request.turns.len());

    for turn in &request.turns {
        let (role, part) = match turn {
            ModelTurn::User(text) => ("user", Part::text(text)),
            ModelTurn::Model(text) => ("model", Part::text(text)),
            ModelTurn::ToolCall(call) => (
                "model",
                Part {
                    function_call: Some(FunctionCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    }),
                    ..Part::default()
                },
            ),
            ModelTurn::ToolResult { name, content } => (
                "function",
                Part {
                    function_response: Some(FunctionResponse {
                        name: name.clone(),
                        response: json!({ "content": content }),
                    }),
                    ..Part::default()
                },
            ),
        };

        // Adjacent parts from the same role share one content block
        match contents.last_mut() {
            Some(last) if last.role == role => last.parts.push(part),
            _ => contents.push(Content {
                role: role.to_string(),
                parts: vec![part],
            }),
        }
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(vec![ToolBlock {
            function_declarations: request.tools.iter().map(declaration).collect(),
        }])
    };

    GeminiRequest {
        contents,
        tools,
        generation_config: GenerationConfig {
            temperature: 0.0,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
        },
        system_instruction: SystemInstruction {
            parts: vec![Part::text(&request.system)],
        },
    }
}

fn declaration(spec: &ToolSpec) -> FunctionDeclaration {
    let has_properties = spec
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| !props.is_empty())
        .unwrap_or(false);

    FunctionDeclaration {
        name: spec.name.clone(),
        description: spec.description.clone(),
        parameters: has_properties.then(|| spec.parameters.clone()),
    }
}

fn parse_response(response: GeminiResponse) -> crate::Result<Completion> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AdvisorError::LlmError("No response from Gemini API".to_string()))?;

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                name: call.name,
                args: call.args,
            });
        } else if let Some(text) = part.text {
            texts.push(text);
        }
    }

    if texts.is_empty() && tool_calls.is_empty() {
        return Err(AdvisorError::LlmError(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(Completion {
        text: (!texts.is_empty()).then(|| texts.concat()),
        tool_calls,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolBlock>>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolBlock {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_groups_parts_by_role() {
        let request = CompletionRequest {
            system: "You are the analyst".to_string(),
            turns: vec![
                ModelTurn::User("what is the eth price".to_string()),
                ModelTurn::ToolCall(ToolCall {
                    name: "get_token_price".to_string(),
                    args: json!({"symbol": "ethereum"}),
                }),
                ModelTurn::ToolResult {
                    name: "get_token_price".to_string(),
                    content: "📈 ethereum 当前价格: $3000".to_string(),
                },
            ],
            tools: vec![ToolSpec {
                name: "get_balance".to_string(),
                description: "wallet balance".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        };

        let json = serde_json::to_value(build_request(&request)).unwrap();
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "get_token_price");
        assert_eq!(contents[2]["role"], "function");
        // Parameterless tools omit the schema entirely
        assert!(json["tools"][0]["functionDeclarations"][0].get("parameters").is_none());
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are the analyst");
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "get_balance", "args": {}}}]
                },
                "finishReason": "STOP"
            }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        let completion = parse_response(response).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "get_balance");
        assert!(completion.text.is_none());
    }

    #[test]
    fn test_empty_candidates_is_error() {
        let response: GeminiResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(parse_response(response).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let model = GeminiModel::new(String::new(), "gemini-2.0-flash").unwrap();
        let result = model.complete(CompletionRequest::default()).await;
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("GEMINI_API_KEY"));
    }
}
