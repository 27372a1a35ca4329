//! Process configuration read from the environment at startup.
//!
//! Secrets the comparison flow cannot run without are checked eagerly so the
//! binary refuses to start instead of failing on the first prompt.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::UtcOffset;

use crate::agents::registry::{ProviderKind, DEFAULT_KNOWLEDGE_BASES};
use crate::errors::AppError;

pub const SYSTEM_PROMPT: &str = "You are a legal research assistant for the Administrative Court. Answer in Thai, using only the supplied context. Cite the relevant documents and say so plainly when the context does not contain the answer.";

/// Exchange rate applied to USD list prices.
pub const THB_RATE: f64 = 35.0;
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const MAX_COMPARE_MODELS: usize = 4;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const REQUIRED_SECRETS: &[&str] = &["AWS_ACCESS_KEY", "AWS_SECRET_KEY", "THAILLM_API_KEY"];

#[derive(Clone)]
pub struct Secrets {
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub thaillm_api_key: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Secrets {
    pub fn key_for(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::ThaiLlm => Some(self.thaillm_api_key.as_str()),
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
            ProviderKind::Gemini => self.gemini_api_key.as_deref(),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai", &self.openai_api_key.is_some())
            .field("anthropic", &self.anthropic_api_key.is_some())
            .field("gemini", &self.gemini_api_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Base URLs per provider; overridable so staging gateways and test servers
/// can stand in for the vendors.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub thaillm: String,
    pub openai: String,
    pub anthropic: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            thaillm: "https://thaillm.or.th/api".to_string(),
            openai: "https://api.openai.com".to_string(),
            anthropic: "https://api.anthropic.com".to_string(),
            gemini: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl ProviderEndpoints {
    pub fn base_for(&self, provider: ProviderKind) -> &str {
        match provider {
            ProviderKind::ThaiLlm => &self.thaillm,
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Gemini => &self.gemini,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub service_account_file: PathBuf,
    pub spreadsheet_id: String,
    pub range: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub secrets: Secrets,
    pub region: String,
    pub bedrock_endpoint: String,
    pub endpoints: ProviderEndpoints,
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub sheets: Option<SheetsConfig>,
    pub data_dir: PathBuf,
    pub bind: String,
    /// Offset for displayed and audited timestamps. Resolved once here since
    /// the local offset cannot be read safely after worker threads start.
    pub utc_offset: UtcOffset,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Blank values
    /// count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| AppError::MissingSecret(key.to_string()));

        let secrets = Secrets {
            aws_access_key: require("AWS_ACCESS_KEY")?,
            aws_secret_key: require("AWS_SECRET_KEY")?,
            thaillm_api_key: require("THAILLM_API_KEY")?,
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY"),
        };

        let region = get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let bedrock_endpoint = get("BEDROCK_AGENT_ENDPOINT")
            .unwrap_or_else(|| format!("https://bedrock-agent-runtime.{region}.amazonaws.com"));

        let mut endpoints = ProviderEndpoints::default();
        if let Some(url) = get("THAILLM_BASE_URL") {
            endpoints.thaillm = url;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            endpoints.openai = url;
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            endpoints.anthropic = url;
        }
        if let Some(url) = get("GEMINI_BASE_URL") {
            endpoints.gemini = url;
        }

        let knowledge_bases = match get("LEXCOMPARE_KNOWLEDGE_BASES") {
            Some(raw) => parse_knowledge_bases(&raw),
            None => Vec::new(),
        };
        let knowledge_bases = if knowledge_bases.is_empty() {
            DEFAULT_KNOWLEDGE_BASES
                .iter()
                .map(|(name, id)| KnowledgeBase {
                    name: name.to_string(),
                    id: id.to_string(),
                })
                .collect()
        } else {
            knowledge_bases
        };

        let sheets = match (get("GOOGLE_SERVICE_ACCOUNT_FILE"), get("AUDIT_SPREADSHEET_ID")) {
            (Some(file), Some(spreadsheet_id)) => Some(SheetsConfig {
                service_account_file: PathBuf::from(file),
                spreadsheet_id,
                range: get("AUDIT_SHEET_RANGE").unwrap_or_else(|| "Sheet1".to_string()),
            }),
            _ => None,
        };

        let utc_offset = match get("LEXCOMPARE_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw)
                .ok_or_else(|| AppError::InvalidSetting("LEXCOMPARE_UTC_OFFSET".into(), raw))?,
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        };

        Ok(Self {
            secrets,
            region,
            bedrock_endpoint,
            endpoints,
            knowledge_bases,
            sheets,
            data_dir: get("LEXCOMPARE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            bind: get("LEXCOMPARE_BIND").unwrap_or_else(|| "127.0.0.1:8501".to_string()),
            utc_offset,
        })
    }

    pub fn knowledge_base(&self, name: &str) -> Option<&KnowledgeBase> {
        self.knowledge_bases.iter().find(|kb| kb.name == name)
    }

    pub fn default_knowledge_base(&self) -> Option<&KnowledgeBase> {
        self.knowledge_bases.first()
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("org", "LexCompare", "LexCompare") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("LexCompare")
    }
}

/// `+07:00`, `-03:30` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<UtcOffset> {
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(raw, &format).ok()
}

/// Parse `Name=ID;Other Name=ID2`. Malformed pairs are skipped.
pub fn parse_knowledge_bases(raw: &str) -> Vec<KnowledgeBase> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, id) = pair.split_once('=')?;
            let (name, id) = (name.trim(), id.trim());
            if name.is_empty() || id.is_empty() {
                return None;
            }
            Some(KnowledgeBase {
                name: name.to_string(),
                id: id.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("AWS_ACCESS_KEY", "AKIA"),
        ("AWS_SECRET_KEY", "secret"),
        ("THAILLM_API_KEY", "thai"),
    ];

    #[test]
    fn every_required_secret_is_enforced() {
        for missing in REQUIRED_SECRETS {
            let pairs: Vec<_> = BASE.iter().copied().filter(|(k, _)| k != missing).collect();
            let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert_eq!(err.code(), "CFG-1001");
            assert!(err.to_string().contains(missing));
        }
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        let mut pairs = BASE.to_vec();
        pairs[2] = ("THAILLM_API_KEY", "   ");
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, AppError::MissingSecret(ref k) if k == "THAILLM_API_KEY"));
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = AppConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(
            config.bedrock_endpoint,
            "https://bedrock-agent-runtime.us-east-1.amazonaws.com"
        );
        assert!(config.sheets.is_none());
        assert!(config.secrets.openai_api_key.is_none());
        assert_eq!(config.knowledge_bases.len(), DEFAULT_KNOWLEDGE_BASES.len());
        assert_eq!(config.bind, "127.0.0.1:8501");
    }

    #[test]
    fn utc_offset_comes_from_setting_when_present() {
        let mut pairs = BASE.to_vec();
        pairs.push(("LEXCOMPARE_UTC_OFFSET", "+07:00"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.utc_offset, UtcOffset::from_hms(7, 0, 0).unwrap());

        assert_eq!(parse_utc_offset("Z"), Some(UtcOffset::UTC));
        assert_eq!(parse_utc_offset("-03:30"), UtcOffset::from_hms(-3, -30, 0).ok());
        assert_eq!(parse_utc_offset("7"), None);

        pairs.pop();
        pairs.push(("LEXCOMPARE_UTC_OFFSET", "Bangkok"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err.code(), "CFG-1002");
    }

    #[test]
    fn sheets_require_both_file_and_spreadsheet() {
        let mut pairs = BASE.to_vec();
        pairs.push(("GOOGLE_SERVICE_ACCOUNT_FILE", "/etc/sa.json"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).unwrap().sheets.is_none());

        pairs.push(("AUDIT_SPREADSHEET_ID", "sheet-id"));
        let sheets = AppConfig::from_lookup(lookup(&pairs)).unwrap().sheets.unwrap();
        assert_eq!(sheets.range, "Sheet1");
        assert_eq!(sheets.spreadsheet_id, "sheet-id");
    }

    #[test]
    fn knowledge_base_list_parses_pairs() {
        let kbs = parse_knowledge_bases("Cases=KB1; Rules = KB2;broken;=KB3");
        assert_eq!(
            kbs,
            vec![
                KnowledgeBase { name: "Cases".into(), id: "KB1".into() },
                KnowledgeBase { name: "Rules".into(), id: "KB2".into() },
            ]
        );
    }
}
