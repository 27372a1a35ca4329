//! Static model registry: display name → provider tag, wire identifier and
//! card metadata. Display names are the keys used by the UI, the history
//! tables and the audit sheet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "thaillm")]
    ThaiLlm,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThaiLlm => "thaillm",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "thaillm" => Ok(Self::ThaiLlm),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("unknown provider tag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub provider: ProviderKind,
    pub model_id: &'static str,
    /// Path appended to the provider base URL. Only ThaiLLM routes models by
    /// path; the other vendors route by `model_id`.
    pub path: &'static str,
    pub badge: &'static str,
    pub description: &'static str,
    pub color: &'static str,
}

pub static MODEL_SEEDS: &[ModelSpec] = &[
    ModelSpec {
        name: "Typhoon 2.1",
        provider: ProviderKind::ThaiLlm,
        model_id: "/model",
        path: "/typhoon/v1/chat/completions",
        badge: "SCB 10X",
        description: "Thai-first instruction model with strong legal reading comprehension.",
        color: "#6c5ce7",
    },
    ModelSpec {
        name: "OpenThaiGPT 1.5",
        provider: ProviderKind::ThaiLlm,
        model_id: "/model",
        path: "/openthaigpt/v1/chat/completions",
        badge: "AIEAT",
        description: "Open Thai model tuned on government and public-sector text.",
        color: "#00b894",
    },
    ModelSpec {
        name: "Pathumma 1.0",
        provider: ProviderKind::ThaiLlm,
        model_id: "/model",
        path: "/pathumma/v1/chat/completions",
        badge: "NECTEC",
        description: "National research model with long-context retrieval tuning.",
        color: "#0984e3",
    },
    ModelSpec {
        name: "THaLLE 0.1",
        provider: ProviderKind::ThaiLlm,
        model_id: "/model",
        path: "/thalle/v1/chat/completions",
        badge: "KBTG",
        description: "Reasoning-oriented model; emits think blocks that are stripped.",
        color: "#e17055",
    },
    ModelSpec {
        name: "GPT-4o mini",
        provider: ProviderKind::OpenAi,
        model_id: "gpt-4o-mini",
        path: "",
        badge: "OpenAI",
        description: "General-purpose reference model.",
        color: "#2d3436",
    },
    ModelSpec {
        name: "Claude 3.5 Haiku",
        provider: ProviderKind::Anthropic,
        model_id: "claude-3-5-haiku-latest",
        path: "",
        badge: "Anthropic",
        description: "Fast reference model with careful citation behaviour.",
        color: "#d35400",
    },
    ModelSpec {
        name: "Gemini 1.5 Flash",
        provider: ProviderKind::Gemini,
        model_id: "models/gemini-1.5-flash",
        path: "",
        badge: "Google",
        description: "Low-latency reference model.",
        color: "#4285f4",
    },
];

/// USD per one million tokens, `(input, output)`, keyed by [`pricing_key`].
pub static MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("typhoon", 0.10, 0.30),
    ("openthaigpt", 0.10, 0.30),
    ("pathumma", 0.10, 0.30),
    ("thalle", 0.15, 0.45),
    ("gpt-4o", 0.15, 0.60),
    ("claude", 0.80, 4.00),
    ("gemini", 0.075, 0.30),
];

pub static DEFAULT_KNOWLEDGE_BASES: &[(&str, &str)] = &[
    ("Administrative Court Judgments", "KBJUDGMENT1"),
    ("Administrative Procedure Act", "KBPROCACT01"),
];

pub fn list_models() -> &'static [ModelSpec] {
    MODEL_SEEDS
}

pub fn find_model(name: &str) -> Option<&'static ModelSpec> {
    MODEL_SEEDS.iter().find(|m| m.name == name)
}

/// Models whose provider has a credential configured, in registry order.
pub fn available_models(secrets: &Secrets) -> Vec<&'static ModelSpec> {
    MODEL_SEEDS
        .iter()
        .filter(|m| secrets.key_for(m.provider).is_some())
        .collect()
}

/// The first four available models.
pub fn default_selection(secrets: &Secrets) -> Vec<String> {
    available_models(secrets)
        .into_iter()
        .take(crate::config::MAX_COMPARE_MODELS)
        .map(|m| m.name.to_string())
        .collect()
}

/// Lower-cased first word of a display name.
pub fn pricing_key(name: &str) -> String {
    name.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

pub fn price_for(key: &str) -> (f64, f64) {
    MODEL_PRICING
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((0.0, 0.0))
}
