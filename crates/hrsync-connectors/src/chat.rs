use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use hrsync_common::{ModelConfig, ModelProvider};
use hrsync_core::{PlanRequest, PlanStrategy, SchemaStrategy};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build chat http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// `None` when the provider is disabled, has no endpoint, or needs a key that is unset.
    pub fn from_config(config: &ModelConfig) -> Result<Option<Self>> {
        if config.provider == ModelProvider::Disabled {
            return Ok(None);
        }
        let Some(endpoint) = config.resolved_endpoint() else {
            return Ok(None);
        };
        let api_key = config.resolve_api_key();
        if api_key.is_none() && config.provider == ModelProvider::OpenAi {
            return Ok(None);
        }
        Self::new(
            &endpoint,
            &config.model_id,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one system+user exchange and parses the reply as JSON.
    pub fn complete_json(&self, system: &str, user: String) -> Result<Value> {
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system.to_string(),
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response: CompletionResponse = builder
            .send()
            .with_context(|| "chat completion request failed")?
            .error_for_status()
            .with_context(|| "chat completion rejected")?
            .json()
            .with_context(|| "invalid chat completion response")?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("no completion in response"))?;
        debug!(model = %self.model, chars = content.len(), "chat completion received");
        serde_json::from_str(strip_code_fences(&content))
            .with_context(|| "completion is not valid JSON")
    }
}

/// Removes a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    let body = match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with(['{', '[']) => rest,
        _ => body,
    };
    body.trim()
}

const PLAN_SYSTEM_PROMPT: &str = "You maintain an HR employee spreadsheet. Given the sheet \
columns, one employee's current row, an event and its details, reply with the exact cell \
updates for that row as JSON: {\"updates\": {\"<exact column>\": <value>}, \"new_columns\": \
[\"<column>\"]}. Use column names exactly as given. Write final numbers, not arithmetic. \
On an approved leave with a duration, add it to taken columns and subtract it from \
remaining/balance/available columns; never change entitlement or carry-forward columns. \
Applied and rejected events change statuses only. Never write the primary key column. \
Reply with JSON only.";

const SCHEMA_SYSTEM_PROMPT: &str = "You analyze the header row of an HR employee \
spreadsheet. Reply with JSON only: {\"primary_key\": col, \"employee_name\": col, \
\"email\": col|null, \"phone\": col|null, \"messaging_handle\": col|null, \
\"role_column\": col|null, \"categories\": {tag: [cols]}}. Every column name must be copied \
exactly from the input and appear in exactly one place. Suggested category tags: personal, \
job, leave, payroll, status, other.";

/// Plan generation through a chat model.
pub struct ChatPlanStrategy {
    client: ChatClient,
}

impl ChatPlanStrategy {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

impl PlanStrategy for ChatPlanStrategy {
    fn name(&self) -> &str {
        "chat"
    }

    fn generate(&self, request: &PlanRequest<'_>) -> Result<Value> {
        let user = serde_json::to_string_pretty(&serde_json::json!({
            "columns": request.headers,
            "current_row": request.record,
            "event": request.event_name,
            "details": request.context,
            "primary_key": request.primary_key,
        }))?;
        self.client.complete_json(PLAN_SYSTEM_PROMPT, user)
    }
}

/// Schema inference through a chat model.
pub struct ChatSchemaStrategy {
    client: ChatClient,
}

impl ChatSchemaStrategy {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

impl SchemaStrategy for ChatSchemaStrategy {
    fn name(&self) -> &str {
        "chat"
    }

    fn analyze(&self, headers: &[String]) -> Result<Value> {
        let user = serde_json::to_string_pretty(&serde_json::json!({ "headers": headers }))?;
        self.client.complete_json(SCHEMA_SYSTEM_PROMPT, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn disabled_provider_yields_no_client() {
        let config = ModelConfig::default();
        assert!(ChatClient::from_config(&config).expect("config").is_none());
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = ModelConfig {
            provider: ModelProvider::Ollama,
            api_key_env: None,
            ..ModelConfig::default()
        };
        let client = ChatClient::from_config(&config)
            .expect("config")
            .expect("client");
        assert_eq!(client.model(), "gpt-4o-mini");
    }
}
