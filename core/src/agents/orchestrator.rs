use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pricing::calculate_cost;
use super::registry::{pricing_key, ModelSpec, ProviderKind};
use crate::config::{ProviderEndpoints, Secrets, SYSTEM_PROMPT};
use crate::retrieval::{Citation, RetrievedContext};

pub const ANSWER_MAX_TOKENS: u32 = 2048;
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"));

/// One model's contribution to a comparison. Failures are carried in
/// `error` and rendered into `answer`; they never abort the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAnswer {
    pub model: String,
    pub provider: ProviderKind,
    pub answer: String,
    pub error: Option<String>,
    pub citations: Vec<Citation>,
    pub cost_thb: f64,
    pub elapsed_secs: f64,
    /// Row id once the answer has been stored; feedback is keyed by it.
    #[serde(default)]
    pub response_id: Option<i64>,
}

impl ModelAnswer {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Settings for a single completion round-trip.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct AiOrchestrator {
    client: Client,
    secrets: Secrets,
    endpoints: ProviderEndpoints,
}

impl AiOrchestrator {
    pub fn new(secrets: Secrets, endpoints: ProviderEndpoints) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .user_agent(concat!("LexCompare/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            secrets,
            endpoints,
        })
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn is_available(&self, spec: &ModelSpec) -> bool {
        self.secrets.key_for(spec.provider).is_some()
    }

    /// Ask one model. Every failure is folded into the returned answer.
    pub async fn call_single_model(
        &self,
        spec: &ModelSpec,
        prompt: &str,
        context: &RetrievedContext,
        temperature: f32,
    ) -> ModelAnswer {
        let full_input = compose_prompt(&context.text, prompt);
        let params = CompletionParams {
            temperature,
            max_tokens: ANSWER_MAX_TOKENS,
            timeout: ANSWER_TIMEOUT,
        };
        let started = Instant::now();
        let outcome = self.complete(spec, &full_input, params).await;
        let elapsed_secs = started.elapsed().as_secs_f64();

        let (answer, error) = match outcome {
            Ok(text) => (text, None),
            Err(err) => {
                let message = format!("{err:#}");
                (format!("⚠️ Error: {message}"), Some(message))
            }
        };

        ModelAnswer {
            model: spec.name.to_string(),
            provider: spec.provider,
            cost_thb: calculate_cost(&pricing_key(spec.name), &full_input, &answer),
            answer,
            error,
            citations: context.citations.clone(),
            elapsed_secs,
            response_id: None,
        }
    }

    /// Single-message completion with think blocks removed.
    pub async fn complete(
        &self,
        spec: &ModelSpec,
        input: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let raw = match spec.provider {
            ProviderKind::ThaiLlm => self.chat_thaillm(spec, input, params).await?,
            ProviderKind::OpenAi => self.chat_openai(spec, input, params).await?,
            ProviderKind::Anthropic => self.chat_anthropic(spec, input, params).await?,
            ProviderKind::Gemini => self.chat_gemini(spec, input, params).await?,
        };
        Ok(strip_think(&raw))
    }

    fn api_key(&self, spec: &ModelSpec) -> Result<&str> {
        self.secrets
            .key_for(spec.provider)
            .ok_or_else(|| anyhow!("{} API key is not configured", spec.provider))
    }

    fn base_url(&self, provider: ProviderKind) -> &str {
        self.endpoints.base_for(provider).trim_end_matches('/')
    }

    async fn chat_thaillm(
        &self,
        spec: &ModelSpec,
        input: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let key = self.api_key(spec)?;
        let url = format!("{}{}", self.base_url(spec.provider), spec.path);
        let payload = serde_json::json!({
            "model": spec.model_id,
            "messages": [{ "role": "user", "content": input }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        let request = self
            .client
            .post(url)
            .header("apikey", key)
            .bearer_auth(key)
            .json(&payload);
        let body = send_json(request, params.timeout).await?;
        Ok(openai_content(&body))
    }

    async fn chat_openai(
        &self,
        spec: &ModelSpec,
        input: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let key = self.api_key(spec)?;
        let url = format!("{}/v1/chat/completions", self.base_url(spec.provider));
        let payload = serde_json::json!({
            "model": spec.model_id,
            "messages": [{ "role": "user", "content": input }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        let request = self.client.post(url).bearer_auth(key).json(&payload);
        let body = send_json(request, params.timeout).await?;
        Ok(openai_content(&body))
    }

    async fn chat_anthropic(
        &self,
        spec: &ModelSpec,
        input: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let key = self.api_key(spec)?;
        let url = format!("{}/v1/messages", self.base_url(spec.provider));
        let payload = serde_json::json!({
            "model": spec.model_id,
            "max_tokens": params.max_tokens,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": input }],
            }],
            "temperature": params.temperature,
        });
        let request = self
            .client
            .post(url)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload);
        let body = send_json(request, params.timeout).await?;
        Ok(body
            .get("content")
            .and_then(|c| c.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }

    async fn chat_gemini(
        &self,
        spec: &ModelSpec,
        input: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let key = self.api_key(spec)?;
        let url = format!("{}/{}:generateContent", self.base_url(spec.provider), spec.model_id);
        let payload = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": input }] }],
            "generationConfig": {
                "temperature": params.temperature,
                "maxOutputTokens": params.max_tokens,
            }
        });
        let request = self.client.post(url).query(&[("key", key)]).json(&payload);
        let body = send_json(request, params.timeout).await?;
        Ok(body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(|part| part.get("text"))
            .and_then(|text| text.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// Prompt sent to every model: system instructions, retrieved context, then
/// the user's question.
pub fn compose_prompt(context: &str, question: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\nContext:\n{context}\n\nUser Question: {question}")
}

pub fn strip_think(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

async fn send_json(request: RequestBuilder, timeout: Duration) -> Result<Value> {
    let response = request.timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(anyhow!("API Error: {} - {}", status.as_u16(), detail.trim()));
    }
    response
        .json::<Value>()
        .await
        .context("provider returned a body that is not JSON")
}

fn openai_content(body: &Value) -> String {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|val| val.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_blocks_are_removed_across_lines() {
        let raw = "<think>\nweighing\nthe options\n</think>\n\nคำตอบ";
        assert_eq!(strip_think(raw), "คำตอบ");
        assert_eq!(strip_think("a <think>x</think> b <think>y</think>"), "a  b");
        assert_eq!(strip_think("  plain  "), "plain");
    }

    #[test]
    fn prompt_places_context_before_question() {
        let prompt = compose_prompt("- chunk\n", "What is a stay of execution?");
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        let ctx = prompt.find("Context:\n- chunk").unwrap();
        let question = prompt.find("User Question: What is a stay").unwrap();
        assert!(ctx < question);
    }

    #[test]
    fn openai_content_tolerates_missing_fields() {
        assert_eq!(openai_content(&serde_json::json!({})), "");
        let body = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(openai_content(&body), "hi");
    }
}
