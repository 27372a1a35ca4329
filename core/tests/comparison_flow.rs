//! End-to-end comparison runs: retrieval, fan-out, storage and audit.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lexcompare_core::agents::AiOrchestrator;
use lexcompare_core::audit::{AuditRow, AuditSink};
use lexcompare_core::comparison::{ComparisonRequest, ComparisonService};
use lexcompare_core::config::{KnowledgeBase, ProviderEndpoints, Secrets};
use lexcompare_core::db::init_memory_db;
use lexcompare_core::retrieval::{Citation, RetrievedContext, Retriever};
use serde_json::json;
use time::UtcOffset;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    rows: Mutex<Vec<AuditRow>>,
    fail: bool,
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn append(&self, row: &AuditRow) -> Result<()> {
        self.rows.lock().unwrap().push(row.clone());
        if self.fail {
            return Err(anyhow!("sheet quota exceeded"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".into()
    }
}

struct StaticRetriever {
    fail: bool,
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, kb_id: &str) -> Result<RetrievedContext> {
        if self.fail {
            return Err(anyhow!("bedrock unreachable"));
        }
        assert_eq!(kb_id, "KB1");
        Ok(RetrievedContext {
            text: "- คำพิพากษาที่ อ.123/2560\n".into(),
            citations: vec![Citation {
                source: "a123-2560.pdf".into(),
                excerpt: "คำพิพากษาที่ อ.123/2560...".into(),
            }],
        })
    }
}

fn secrets() -> Secrets {
    Secrets {
        aws_access_key: "AKIDEXAMPLE".into(),
        aws_secret_key: "secret".into(),
        thaillm_api_key: "thai-key".into(),
        openai_api_key: None,
        anthropic_api_key: None,
        gemini_api_key: None,
    }
}

fn chat_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": text } }]
    }))
}

async fn thaillm_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/typhoon/v1/chat/completions"))
        .and(body_string_contains("Suggested Questions"))
        .respond_with(chat_reply(
            "1. ต้องยื่นฟ้องภายในกี่วัน\n2. ค่าธรรมเนียมศาลเท่าไร\nok",
        ))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/typhoon/v1/chat/completions"))
        .respond_with(chat_reply("Typhoon: ยื่นฟ้องภายใน 90 วัน"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pathumma/v1/chat/completions"))
        .respond_with(chat_reply("Pathumma: ภายในเก้าสิบวัน"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/thalle/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;
    server
}

fn service(uri: &str, sink: Arc<RecordingSink>, retrieval_fails: bool) -> ComparisonService {
    service_on(init_memory_db().unwrap(), uri, sink, retrieval_fails)
}

fn service_on(
    pool: lexcompare_core::db::DbPool,
    uri: &str,
    sink: Arc<RecordingSink>,
    retrieval_fails: bool,
) -> ComparisonService {
    let endpoints = ProviderEndpoints {
        thaillm: uri.to_string(),
        ..ProviderEndpoints::default()
    };
    let orchestrator = Arc::new(AiOrchestrator::new(secrets(), endpoints).unwrap());
    ComparisonService::new(
        pool,
        orchestrator,
        Arc::new(StaticRetriever { fail: retrieval_fails }),
        sink,
    )
}

fn request(models: &[&str]) -> ComparisonRequest {
    ComparisonRequest {
        username: Some("Legal Officer (Senior) - Central Court".into()),
        prompt: "ระยะเวลาการฟ้องคดีปกครอง".into(),
        models: models.iter().map(|m| m.to_string()).collect(),
        knowledge_base: KnowledgeBase {
            name: "Administrative Court Judgments".into(),
            id: "KB1".into(),
        },
        temperature: 0.3,
    }
}

#[tokio::test]
async fn completed_comparison_writes_exactly_one_audit_row() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let svc = service(&server.uri(), sink.clone(), false);

    let outcome = svc
        .compare(request(&["Pathumma 1.0", "Typhoon 2.1", "THaLLE 0.1"]))
        .await
        .unwrap();

    let models: Vec<_> = outcome.answers.iter().map(|a| a.model.as_str()).collect();
    assert_eq!(models, ["Pathumma 1.0", "Typhoon 2.1", "THaLLE 0.1"]);
    assert_eq!(outcome.answers[0].answer, "Pathumma: ภายในเก้าสิบวัน");
    assert!(outcome.answers[2].is_error());
    assert_eq!(outcome.answers[1].citations[0].source, "a123-2560.pdf");
    assert!(outcome.audited);

    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entries.len(), 3);
    assert_eq!(rows[0].username, "Legal Officer (Senior) - Central Court");

    assert_eq!(
        outcome.suggestions,
        vec![
            "ต้องยื่นฟ้องภายในกี่วัน".to_string(),
            "ค่าธรรมเนียมศาลเท่าไร".to_string()
        ]
    );
}

#[tokio::test]
async fn answers_are_stored_with_response_ids() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let svc = service(&server.uri(), sink, false);

    let outcome = svc
        .compare(request(&["Typhoon 2.1", "Pathumma 1.0"]))
        .await
        .unwrap();
    let conversation_id = outcome.conversation_id.unwrap();
    assert!(outcome.answers.iter().all(|a| a.response_id.is_some()));

    let history = svc
        .store()
        .load_history("Legal Officer (Senior) - Central Court".into(), 10, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, conversation_id);
    assert_eq!(history[0].responses.len(), 2);
    assert_eq!(
        history[0].knowledge_base.as_deref(),
        Some("Administrative Court Judgments")
    );

    let typhoon = outcome.answers[0].response_id.unwrap();
    svc.store().save_feedback(typhoon, 4).await.unwrap();
    assert!(svc.store().save_feedback(typhoon, 6).await.is_err());
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_comparison() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..RecordingSink::default()
    });
    let svc = service(&server.uri(), sink.clone(), false);

    let outcome = svc.compare(request(&["Typhoon 2.1"])).await.unwrap();
    assert!(!outcome.audited);
    assert_eq!(outcome.answers.len(), 1);
    assert_eq!(sink.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn storage_failure_still_returns_answers_and_audits() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let pool = init_memory_db().unwrap();
    pool.get()
        .unwrap()
        .execute_batch("DROP TABLE feedback; DROP TABLE responses;")
        .unwrap();
    let svc = service_on(pool.clone(), &server.uri(), sink.clone(), false);

    let outcome = svc.compare(request(&["Typhoon 2.1"])).await.unwrap();
    assert!(outcome.conversation_id.is_none());
    assert_eq!(outcome.answers[0].answer, "Typhoon: ยื่นฟ้องภายใน 90 วัน");
    assert!(outcome.answers[0].response_id.is_none());
    assert!(outcome.audited);
    assert_eq!(sink.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn audit_rows_carry_the_configured_offset() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let bangkok = UtcOffset::from_hms(7, 0, 0).unwrap();
    let svc = service(&server.uri(), sink.clone(), false).with_utc_offset(bangkok);

    svc.compare(request(&["Typhoon 2.1"])).await.unwrap();
    assert_eq!(sink.rows.lock().unwrap()[0].timestamp.offset(), bangkok);
}

#[tokio::test]
async fn retrieval_failure_still_answers_without_context() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let svc = service(&server.uri(), sink.clone(), true);

    let outcome = svc.compare(request(&["Typhoon 2.1"])).await.unwrap();
    assert_eq!(outcome.answers[0].answer, "Typhoon: ยื่นฟ้องภายใน 90 วัน");
    assert!(outcome.answers[0].citations.is_empty());
    assert_eq!(sink.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn anonymous_requests_are_audited_but_not_stored() {
    let server = thaillm_server().await;
    let sink = Arc::new(RecordingSink::default());
    let svc = service(&server.uri(), sink.clone(), false);

    let mut req = request(&["Typhoon 2.1"]);
    req.username = None;
    let outcome = svc.compare(req).await.unwrap();
    assert!(outcome.conversation_id.is_none());
    assert!(outcome.answers[0].response_id.is_none());
    assert_eq!(sink.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn uncredentialed_model_is_rejected_before_any_call() {
    let server = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());
    let svc = service(&server.uri(), sink.clone(), false);

    let err = svc
        .compare(request(&["Typhoon 2.1", "GPT-4o mini"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MDL-1001");
    assert!(sink.rows.lock().unwrap().is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
