//! Google Sheets sink authenticated with a service-account key.
//!
//! The signed JWT is exchanged for a bearer token which is cached until a
//! minute before it expires.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{AuditRow, AuditSink};

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service account {}", path.display()))?;
        serde_json::from_str(&raw).context("service account file is not valid JSON")
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

pub struct SheetsAuditSink {
    client: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    spreadsheet_id: String,
    range: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsAuditSink {
    pub fn new(
        key: ServiceAccountKey,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
    ) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private key is not an RSA PEM")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            key,
            signing_key,
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn access_token(&self) -> Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("failed to sign service account assertion")?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange returned {status}: {detail}"));
        }
        let token: TokenResponse = response.json().await.context("malformed token response")?;
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS),
        });
        Ok(value)
    }

    fn append_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base).context("invalid Sheets API base URL")?;
        let append_segment = format!("{}:append", self.range);
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets API base URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.spreadsheet_id.as_str(),
                "values",
                append_segment.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl AuditSink for SheetsAuditSink {
    async fn append(&self, row: &AuditRow) -> Result<()> {
        let token = self.access_token().await?;
        let payload = serde_json::json!({ "values": [row.cells()] });
        let response = self
            .client
            .post(self.append_url()?)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("sheet append returned {status}: {detail}"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Google Sheet {} ({})", self.spreadsheet_id, self.range)
    }
}
