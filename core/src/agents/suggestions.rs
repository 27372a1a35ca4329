//! Follow-up question generation shown under each comparison.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

use super::orchestrator::{AiOrchestrator, CompletionParams};
use super::registry::{ModelSpec, MODEL_SEEDS};

pub const MAX_SUGGESTIONS: usize = 3;
const CONTEXT_PREVIEW_CHARS: usize = 500;
const MIN_QUESTION_CHARS: usize = 5;

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\-\*\.]+\s*").expect("static regex"));

/// Typhoon is preferred for suggestions, then OpenThaiGPT, then whatever the
/// user selected first.
pub fn pick_suggestion_model<'a>(
    orchestrator: &AiOrchestrator,
    selected: &[&'a ModelSpec],
) -> Option<&'a ModelSpec> {
    for needle in ["Typhoon", "OpenThaiGPT"] {
        if let Some(spec) = MODEL_SEEDS
            .iter()
            .find(|m| m.name.contains(needle) && orchestrator.is_available(m))
        {
            return Some(spec);
        }
    }
    selected.first().copied()
}

pub fn suggestion_prompt(query: &str, context: &str) -> String {
    let preview: String = context.chars().take(CONTEXT_PREVIEW_CHARS).collect();
    format!(
        "Instructions:\n\
         Based on the user's question and context, suggest 3 RELEVANT and VERY SHORT follow-up questions in Thai.\n\n\
         Strict Rules:\n\
         1. NO <think> tags. Output ONLY the questions.\n\
         2. Questions must be under 10 words.\n\
         3. No numbering (e.g. 1.), no bullets.\n\
         4. Focus on Administrative Court procedures.\n\n\
         Context: {preview}...\n\
         User Question: {query}\n\n\
         Suggested Questions:\n"
    )
}

pub async fn generate_related_questions(
    orchestrator: &AiOrchestrator,
    spec: &ModelSpec,
    query: &str,
    context: &str,
) -> Result<Vec<String>> {
    let params = CompletionParams {
        temperature: 0.7,
        max_tokens: 200,
        timeout: Duration::from_secs(20),
    };
    let content = orchestrator
        .complete(spec, &suggestion_prompt(query, context), params)
        .await?;
    Ok(parse_suggestions(&content))
}

/// Drop list markers and fragments; keep at most three questions.
pub fn parse_suggestions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|q| q.chars().count() > MIN_QUESTION_CHARS)
        .take(MAX_SUGGESTIONS)
        .collect()
}
