//! One prompt, several models: retrieval, fan-out, persistence, audit and
//! follow-up suggestions.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::UtcOffset;

use crate::agents::registry::find_model;
use crate::agents::suggestions::{generate_related_questions, pick_suggestion_model};
use crate::agents::{AiOrchestrator, ModelAnswer, ModelSpec};
use crate::audit::{AuditRow, AuditSink};
use crate::config::{KnowledgeBase, DEFAULT_TEMPERATURE, MAX_COMPARE_MODELS};
use crate::db::DbPool;
use crate::errors::AppError;
use crate::history::ConversationStore;
use crate::logging::spawn_event;
use crate::retrieval::{RetrievedContext, Retriever};

const MODULE: &str = "comparison";

#[derive(Debug, Clone, Deserialize)]
pub struct ComparisonRequest {
    /// Anonymous API callers are answered but not stored in history.
    #[serde(default)]
    pub username: Option<String>,
    pub prompt: String,
    pub models: Vec<String>,
    pub knowledge_base: KnowledgeBase,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonOutcome {
    pub conversation_id: Option<i64>,
    pub prompt: String,
    pub knowledge_base: String,
    pub answers: Vec<ModelAnswer>,
    pub suggestions: Vec<String>,
    pub audited: bool,
}

pub struct ComparisonService {
    store: ConversationStore,
    orchestrator: Arc<AiOrchestrator>,
    retriever: Arc<dyn Retriever>,
    audit: Arc<dyn AuditSink>,
    utc_offset: UtcOffset,
}

impl ComparisonService {
    pub fn new(
        pool: DbPool,
        orchestrator: Arc<AiOrchestrator>,
        retriever: Arc<dyn Retriever>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store: ConversationStore::new(pool),
            orchestrator,
            retriever,
            audit,
            utc_offset: UtcOffset::UTC,
        }
    }

    /// Offset used for audit timestamps.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &AiOrchestrator {
        &self.orchestrator
    }

    pub fn audit_label(&self) -> String {
        self.audit.describe()
    }

    /// Resolve the selection to registered, credentialed models in the order
    /// given, dropping duplicates.
    pub fn resolve_models(&self, names: &[String]) -> Result<Vec<&'static ModelSpec>, AppError> {
        let mut specs: Vec<&'static ModelSpec> = Vec::new();
        for name in names {
            let name = name.trim();
            if name.is_empty() || specs.iter().any(|s| s.name == name) {
                continue;
            }
            let spec = find_model(name)
                .filter(|spec| self.orchestrator.is_available(spec))
                .ok_or_else(|| AppError::UnknownModel(name.to_string()))?;
            specs.push(spec);
        }
        if specs.is_empty() {
            return Err(AppError::InvalidRequest("select at least one model".into()));
        }
        if specs.len() > MAX_COMPARE_MODELS {
            return Err(AppError::InvalidRequest(format!(
                "at most {MAX_COMPARE_MODELS} models can be compared at once"
            )));
        }
        Ok(specs)
    }

    pub async fn compare(&self, request: ComparisonRequest) -> Result<ComparisonOutcome, AppError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".into()));
        }
        let specs = self.resolve_models(&request.models)?;
        let temperature = if request.temperature.is_finite() {
            request.temperature.clamp(0.0, 1.0)
        } else {
            DEFAULT_TEMPERATURE
        };
        let username = request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let kb = request.knowledge_base;

        let context = self.retrieve(&prompt, &kb).await;

        let calls = specs.iter().map(|spec| {
            self.orchestrator
                .call_single_model(spec, &prompt, &context, temperature)
        });
        let answers = join_all(calls).await;
        self.record_invocations(&answers);

        let (conversation_id, answers) = match &username {
            Some(name) => self.persist(name, &prompt, &kb, answers).await,
            None => (None, answers),
        };

        let audited = self
            .append_audit(username.as_deref().unwrap_or_default(), &prompt, &answers)
            .await;
        let suggestions = self.suggest(&specs, &prompt, &context).await;

        Ok(ComparisonOutcome {
            conversation_id,
            prompt,
            knowledge_base: kb.name,
            answers,
            suggestions,
            audited,
        })
    }

    async fn retrieve(&self, prompt: &str, kb: &KnowledgeBase) -> RetrievedContext {
        match self.retriever.retrieve(prompt, &kb.id).await {
            Ok(context) => context,
            Err(err) => {
                let err = AppError::Retrieval(format!("{err:#}"));
                log::warn!(target: "lexcompare::retrieval", "{err}; answering without context");
                spawn_event(
                    &self.store.pool(),
                    "warn",
                    err.code(),
                    MODULE,
                    err.to_string(),
                    Some(json!({ "knowledge_base": kb.name })),
                );
                RetrievedContext::default()
            }
        }
    }

    /// The calls are already paid for, so a storage failure is logged and the
    /// answers are returned without response ids.
    async fn persist(
        &self,
        username: &str,
        prompt: &str,
        kb: &KnowledgeBase,
        answers: Vec<ModelAnswer>,
    ) -> (Option<i64>, Vec<ModelAnswer>) {
        match self
            .store
            .save_comparison(
                username.to_string(),
                prompt.to_string(),
                kb.name.clone(),
                answers.clone(),
            )
            .await
        {
            Ok((id, stored)) => (Some(id), stored),
            Err(err) => {
                log::error!(target: "lexcompare::history", "comparison for {username} not stored: {err}");
                spawn_event(
                    &self.store.pool(),
                    "error",
                    err.code(),
                    MODULE,
                    format!("comparison not stored: {err}"),
                    Some(json!({ "username": username })),
                );
                (None, answers)
            }
        }
    }

    fn record_invocations(&self, answers: &[ModelAnswer]) {
        let pool = self.store.pool();
        for answer in answers {
            match &answer.error {
                None => spawn_event(
                    &pool,
                    "info",
                    "MDL-2000",
                    MODULE,
                    format!("{} answered", answer.model),
                    Some(json!({
                        "provider": answer.provider.as_str(),
                        "elapsed_secs": answer.elapsed_secs,
                        "cost_thb": answer.cost_thb,
                    })),
                ),
                Some(error) => spawn_event(
                    &pool,
                    "warn",
                    "MDL-2001",
                    MODULE,
                    format!("{} failed", answer.model),
                    Some(json!({
                        "provider": answer.provider.as_str(),
                        "error": error,
                    })),
                ),
            }
        }
    }

    async fn append_audit(&self, username: &str, prompt: &str, answers: &[ModelAnswer]) -> bool {
        let mut row = AuditRow::new(username, prompt, answers);
        row.timestamp = row.timestamp.to_offset(self.utc_offset);
        match self.audit.append(&row).await {
            Ok(()) => true,
            Err(err) => {
                let err = AppError::Audit(format!("{err:#}"));
                log::error!(target: "lexcompare::audit", "{err}");
                spawn_event(
                    &self.store.pool(),
                    "error",
                    err.code(),
                    MODULE,
                    err.to_string(),
                    Some(json!({ "sink": self.audit.describe() })),
                );
                false
            }
        }
    }

    async fn suggest(
        &self,
        specs: &[&'static ModelSpec],
        prompt: &str,
        context: &RetrievedContext,
    ) -> Vec<String> {
        let Some(spec) = pick_suggestion_model(&self.orchestrator, specs) else {
            return Vec::new();
        };
        match generate_related_questions(&self.orchestrator, spec, prompt, &context.text).await {
            Ok(questions) => questions,
            Err(err) => {
                log::warn!(target: "lexcompare::suggestions", "{} suggestions failed: {err:#}", spec.name);
                spawn_event(
                    &self.store.pool(),
                    "warn",
                    "MDL-2002",
                    MODULE,
                    format!("suggestions from {} failed", spec.name),
                    Some(json!({ "error": format!("{err:#}") })),
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::config::{ProviderEndpoints, Secrets};
    use crate::db::init_memory_db;
    use async_trait::async_trait;

    struct NoContext;

    #[async_trait]
    impl Retriever for NoContext {
        async fn retrieve(&self, _query: &str, _kb_id: &str) -> anyhow::Result<RetrievedContext> {
            Ok(RetrievedContext::default())
        }
    }

    fn service() -> ComparisonService {
        let secrets = Secrets {
            aws_access_key: "a".into(),
            aws_secret_key: "b".into(),
            thaillm_api_key: "c".into(),
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
        };
        let orchestrator =
            Arc::new(AiOrchestrator::new(secrets, ProviderEndpoints::default()).unwrap());
        ComparisonService::new(
            init_memory_db().unwrap(),
            orchestrator,
            Arc::new(NoContext),
            Arc::new(NullAuditSink),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selection_is_deduplicated_in_order() {
        let svc = service();
        let specs = svc
            .resolve_models(&names(&["Pathumma 1.0", "Typhoon 2.1", "Pathumma 1.0"]))
            .unwrap();
        let picked: Vec<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(picked, ["Pathumma 1.0", "Typhoon 2.1"]);
    }

    #[test]
    fn models_without_credentials_are_rejected() {
        let svc = service();
        let err = svc.resolve_models(&names(&["GPT-4o mini"])).unwrap_err();
        assert_eq!(err.code(), "MDL-1001");
        assert!(matches!(
            svc.resolve_models(&[]).unwrap_err(),
            AppError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn blank_prompt_never_reaches_a_model() {
        let svc = service();
        let err = svc
            .compare(ComparisonRequest {
                username: Some("alice".into()),
                prompt: "   ".into(),
                models: names(&["Typhoon 2.1"]),
                knowledge_base: KnowledgeBase {
                    name: "kb".into(),
                    id: "KB1".into(),
                },
                temperature: 0.3,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
