//! Knowledge-base retrieval against the managed Bedrock agent runtime.
//!
//! The REST call is signed with SigV4 and sent through the shared reqwest
//! client, which keeps the endpoint swappable for tests.

use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const RESULTS_PER_QUERY: u32 = 5;
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, kb_id: &str) -> Result<RetrievedContext>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievalResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub content: ResultContent,
    #[serde(default)]
    pub location: Option<ResultLocation>,
}

#[derive(Debug, Deserialize)]
pub struct ResultContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultLocation {
    #[serde(default)]
    pub s3_location: Option<S3Location>,
}

#[derive(Debug, Deserialize)]
pub struct S3Location {
    #[serde(default)]
    pub uri: Option<String>,
}

pub struct BedrockRetriever {
    client: Client,
    endpoint: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl BedrockRetriever {
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }

    fn signed_headers(&self, url: &str, body: &[u8]) -> Result<Vec<(String, String)>> {
        let identity: Identity =
            Credentials::new(&self.access_key, &self.secret_key, None, None, "lexcompare").into();
        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("bedrock")
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|err| anyhow!("invalid signing parameters: {err}"))?
            .into();
        let headers = [("content-type", "application/json")];
        let signable = SignableRequest::new(
            "POST",
            url,
            headers.iter().copied(),
            SignableBody::Bytes(body),
        )
        .map_err(|err| anyhow!("request cannot be signed: {err}"))?;
        let (instructions, _signature) = sign(signable, &params)
            .map_err(|err| anyhow!("signing failed: {err}"))?
            .into_parts();
        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}

#[async_trait]
impl Retriever for BedrockRetriever {
    async fn retrieve(&self, query: &str, kb_id: &str) -> Result<RetrievedContext> {
        if kb_id.trim().is_empty() {
            return Ok(RetrievedContext::default());
        }
        let url = format!(
            "{}/knowledgebases/{}/retrieve",
            self.endpoint.trim_end_matches('/'),
            kb_id
        );
        let payload = serde_json::json!({
            "retrievalQuery": { "text": query },
            "retrievalConfiguration": {
                "vectorSearchConfiguration": { "numberOfResults": RESULTS_PER_QUERY }
            }
        });
        let body = serde_json::to_vec(&payload)?;

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json");
        for (name, value) in self.signed_headers(&url, &body)? {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("knowledge base {kb_id} returned {status}: {detail}"));
        }
        let parsed: RetrieveResponse = response
            .json()
            .await
            .context("malformed retrieval response")?;
        Ok(build_context(&parsed.retrieval_results))
    }
}

/// Render ranked chunks as a bullet list and keep the first excerpt per
/// source file.
pub fn build_context(results: &[RetrievalResult]) -> RetrievedContext {
    let mut context = RetrievedContext::default();
    for result in results {
        let chunk = &result.content.text;
        context.text.push_str("- ");
        context.text.push_str(chunk);
        context.text.push('\n');

        let uri = result
            .location
            .as_ref()
            .and_then(|l| l.s3_location.as_ref())
            .and_then(|s3| s3.uri.as_deref())
            .unwrap_or("Unknown");
        let source = uri.rsplit('/').next().unwrap_or(uri).to_string();
        if context.citations.iter().any(|c| c.source == source) {
            continue;
        }
        let excerpt: String = chunk.chars().take(EXCERPT_CHARS).collect();
        context.citations.push(Citation {
            source,
            excerpt: format!("{}...", excerpt.replace('\n', " ")),
        });
    }
    context
}
