//! Version 1 routes.
//!
//! Page handlers follow post/redirect/get: mutations store a one-shot notice
//! on the session and redirect back to `/`.

use std::collections::BTreeMap;

use axum::extract::{Form, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::task::spawn_blocking;

use super::views::{self, AdminView, ChatView};
use super::{clear_session_cookie, session_cookie, session_id, with_cookie, AppState};
use crate::agents::registry::{available_models, default_selection, pricing_key, price_for};
use crate::analytics::{self, FeedbackLogRow};
use crate::comparison::{ComparisonOutcome, ComparisonRequest};
use crate::config::KnowledgeBase;
use crate::db::DbPool;
use crate::errors::AppError;
use crate::logging::{list_events, spawn_event, EventRecord};
use crate::session::{ChatTurn, Session, Theme};

const HISTORY_PAGE_SIZE: usize = 20;
const EXPORT_LIMIT: usize = 10_000;
const EXPIRED_NOTICE: &str =
    "⏳ หมดเวลาการใช้งาน (Session Timeout) เนื่องจากไม่มีการใช้งานเกิน 15 นาที";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/ask", post(ask))
        .route("/settings", post(settings))
        .route("/reset", post(reset))
        .route("/feedback", post(feedback))
        .route("/history", get(history))
        .route("/export/chat.txt", get(export_chat))
        .route("/export/history.csv", get(export_history))
        .route("/admin", get(admin))
        .route("/admin/report.csv", get(admin_report))
        .route("/healthz", get(healthz))
        .route("/api/models", get(api_models))
        .route("/api/compare", post(api_compare))
        .route("/api/events", get(api_events))
}

fn current_session(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let id = session_id(headers).ok_or(AppError::UnknownSession)?;
    state.sessions.touch(id)
}

/// Where a page request without a live session ends up.
fn back_to_login(err: AppError) -> Response {
    let target = match err {
        AppError::SessionExpired => "/?expired=1",
        _ => "/",
    };
    Redirect::to(target).into_response()
}

fn set_notice(state: &AppState, session: &Session, notice: impl Into<String>) {
    let notice = notice.into();
    let _ = state.sessions.update(session.id, |s| s.notice = Some(notice));
}

fn active_knowledge_base<'a>(state: &'a AppState, session: &Session) -> Option<&'a KnowledgeBase> {
    session
        .knowledge_base
        .as_deref()
        .and_then(|name| state.config.knowledge_base(name))
        .or_else(|| state.config.default_knowledge_base())
}

fn clock(offset: UtcOffset) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .to_offset(offset)
        .format(&format)
        .unwrap_or_default()
}

async fn blocking<T, F>(db: &DbPool, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&r2d2_sqlite::rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
{
    let pool = db.clone();
    spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn).map_err(AppError::from)
    })
    .await
    .map_err(|err| AppError::Internal(anyhow::anyhow!(err.to_string())))?
}

fn attachment(content_type: &'static str, filename: &str, body: String) -> Response {
    (
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

#[derive(Deserialize)]
struct IndexQuery {
    expired: Option<u8>,
}

async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IndexQuery>,
) -> Response {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => {
            let expired = matches!(err, AppError::SessionExpired) || query.expired.is_some();
            let page = views::login_page(expired.then_some(EXPIRED_NOTICE), None);
            let response = Html(page.into_string()).into_response();
            return match err {
                AppError::SessionExpired => with_cookie(response, clear_session_cookie()),
                _ => response,
            };
        }
    };

    let notice = state
        .sessions
        .update(session.id, |s| s.take_notice())
        .ok()
        .flatten();
    let models = available_models(&state.config.secrets);
    let page = views::chat_page(&ChatView {
        session: &session,
        models: &models,
        knowledge_bases: &state.config.knowledge_bases,
        active_kb: active_knowledge_base(&state, &session),
        notice: notice.as_deref(),
    });
    Html(page.into_string()).into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let defaults = default_selection(&state.config.secrets);
    match state.sessions.login(&form.username, defaults) {
        Ok(session) => {
            spawn_event(
                &state.db,
                "info",
                "SES-0000",
                "session",
                "user signed in",
                Some(json!({ "username": session.username })),
            );
            with_cookie(Redirect::to("/").into_response(), session_cookie(session.id))
        }
        Err(err) => {
            let page = views::login_page(None, Some("⚠️ กรุณากรอกชื่อก่อนเริ่มใช้งาน"));
            log::debug!("login rejected: {err}");
            (StatusCode::UNPROCESSABLE_ENTITY, Html(page.into_string())).into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&headers) {
        state.sessions.logout(id);
    }
    with_cookie(Redirect::to("/").into_response(), clear_session_cookie())
}

#[derive(Deserialize)]
struct AskForm {
    #[serde(default)]
    prompt: String,
}

async fn ask(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<AskForm>) -> Response {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return back_to_login(err),
    };
    let Some(kb) = active_knowledge_base(&state, &session).cloned() else {
        let err = AppError::UnknownKnowledgeBase(session.knowledge_base.clone().unwrap_or_default());
        set_notice(&state, &session, format!("{}: {}", err.code(), err));
        return Redirect::to("/").into_response();
    };

    let request = ComparisonRequest {
        username: Some(session.username.clone()),
        prompt: form.prompt,
        models: session.selected_models.clone(),
        knowledge_base: kb,
        temperature: session.temperature,
    };
    match state.comparisons.compare(request).await {
        Ok(outcome) => record_turn(&state, &session, outcome),
        Err(err) => {
            log::warn!("comparison rejected for {}: {err}", session.username);
            set_notice(&state, &session, format!("⚠️ {}: {}", err.code(), err));
        }
    }
    Redirect::to("/").into_response()
}

fn record_turn(state: &AppState, session: &Session, outcome: ComparisonOutcome) {
    let stamp = clock(state.config.utc_offset);
    let _ = state.sessions.update(session.id, |s| {
        for answer in &outcome.answers {
            let line = match &answer.error {
                None => format!(
                    "[{stamp}] ✅ {} {:.2}s {:.4} THB",
                    answer.model, answer.elapsed_secs, answer.cost_thb
                ),
                Some(error) => format!("[{stamp}] ❌ {}: {error}", answer.model),
            };
            s.push_log(line);
        }
        if !outcome.audited {
            s.push_log(format!("[{stamp}] ⚠️ audit row was not exported"));
        }
        if outcome.suggestions.is_empty() {
            s.notice = Some("⚠️ ไม่สามารถสร้างคำถามแนะนำได้ (API Error or Empty)".to_string());
        }
        s.transcript.push(ChatTurn {
            conversation_id: outcome.conversation_id,
            prompt: outcome.prompt,
            knowledge_base: outcome.knowledge_base,
            answers: outcome.answers,
            suggestions: outcome.suggestions,
        });
    });
}

async fn settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return back_to_login(err),
    };

    let mut theme = session.theme;
    let mut temperature = session.temperature;
    let mut knowledge_base = session.knowledge_base.clone();
    let mut models = Vec::new();
    for (key, value) in fields {
        match key.as_str() {
            "theme" => theme = Theme::parse(&value),
            "temperature" => {
                if let Ok(t) = value.trim().parse::<f32>() {
                    if t.is_finite() {
                        temperature = t.clamp(0.0, 1.0);
                    }
                }
            }
            "knowledge_base" => knowledge_base = Some(value),
            "models" => models.push(value),
            _ => {}
        }
    }

    let mut problems = Vec::new();
    if let Some(name) = knowledge_base.as_deref() {
        if state.config.knowledge_base(name).is_none() {
            problems.push(AppError::UnknownKnowledgeBase(name.to_string()));
            knowledge_base = session.knowledge_base.clone();
        }
    }
    let selected = match state.comparisons.resolve_models(&models) {
        Ok(specs) => specs.iter().map(|s| s.name.to_string()).collect(),
        Err(err) => {
            problems.push(err);
            session.selected_models.clone()
        }
    };

    let _ = state.sessions.update(session.id, |s| {
        s.theme = theme;
        s.temperature = temperature;
        s.knowledge_base = knowledge_base;
        s.selected_models = selected;
        s.notice = problems
            .first()
            .map(|err| format!("⚠️ {}: {}", err.code(), err));
    });
    Redirect::to("/").into_response()
}

async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_session(&state, &headers) {
        Ok(session) => {
            let _ = state.sessions.reset(session.id);
            Redirect::to("/").into_response()
        }
        Err(err) => back_to_login(err),
    }
}

#[derive(Deserialize)]
struct FeedbackForm {
    response_id: i64,
    score: i64,
}

async fn feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<FeedbackForm>,
) -> Response {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return back_to_login(err),
    };
    if !session.owns_response(form.response_id) {
        let err = AppError::InvalidRequest("response is not part of this conversation".into());
        set_notice(&state, &session, format!("⚠️ {}: {}", err.code(), err));
        return Redirect::to("/").into_response();
    }
    match state
        .comparisons
        .store()
        .save_feedback(form.response_id, form.score)
        .await
    {
        Ok(()) => {
            let _ = state.sessions.update(session.id, |s| {
                s.ratings.insert(form.response_id, form.score);
                s.notice = Some(format!("✅ บันทึกคะแนนเรียบร้อย ({} ดาว)", form.score));
            });
        }
        Err(err) => set_notice(&state, &session, format!("⚠️ {}: {}", err.code(), err)),
    }
    Redirect::to("/").into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    q: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, AppError> {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return Ok(back_to_login(err)),
    };
    let store = state.comparisons.store();
    let records = store
        .load_history(session.username.clone(), HISTORY_PAGE_SIZE, query.q.clone())
        .await?;
    let stats = store.stats(Some(session.username.clone())).await?;
    let page = views::history_page(
        &session,
        &records,
        &stats,
        query.q.as_deref(),
        state.config.utc_offset,
    );
    Ok(Html(page.into_string()).into_response())
}

async fn export_chat(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return back_to_login(err),
    };
    attachment("text/plain; charset=utf-8", "log.txt", chat_transcript(&session))
}

/// Plain-text transcript of the session's chat.
pub fn chat_transcript(session: &Session) -> String {
    let mut out = String::new();
    for turn in &session.transcript {
        out.push_str(&format!("user: {}\n", turn.prompt));
        for answer in &turn.answers {
            out.push_str(&format!("{}: {}\n", answer.model, answer.answer));
        }
        out.push('\n');
    }
    out
}

async fn export_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return Ok(back_to_login(err)),
    };
    let records = state
        .comparisons
        .store()
        .load_history(session.username.clone(), EXPORT_LIMIT, None)
        .await?;
    Ok(attachment(
        "text/csv; charset=utf-8",
        "history.csv",
        analytics::history_csv(&records, state.config.utc_offset),
    ))
}

struct AdminData {
    summary: analytics::AdminSummary,
    leaderboard: Vec<analytics::ModelLeaderboardRow>,
    monthly: Vec<analytics::MonthlyUsage>,
    feedback: Vec<FeedbackLogRow>,
    role_preferences: BTreeMap<String, BTreeMap<String, f64>>,
}

async fn admin(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let session = match current_session(&state, &headers) {
        Ok(session) => session,
        Err(err) => return Ok(back_to_login(err)),
    };
    let data = blocking(&state.db, |conn| {
        Ok(AdminData {
            summary: analytics::admin_summary(conn)?,
            leaderboard: analytics::model_leaderboard(conn)?,
            monthly: analytics::monthly_usage(conn)?,
            feedback: analytics::feedback_log(conn, 200)?,
            role_preferences: analytics::role_preferences(conn)?,
        })
    })
    .await?;
    let (roles, agencies) = analytics::demographics(&data.feedback);
    let insights = analytics::model_insights(&data.leaderboard);
    let page = views::admin_page(
        session.theme,
        &AdminView {
            summary: &data.summary,
            leaderboard: &data.leaderboard,
            monthly: &data.monthly,
            feedback: &data.feedback,
            roles: &roles,
            agencies: &agencies,
            role_preferences: &data.role_preferences,
            insights: &insights,
            utc_offset: state.config.utc_offset,
        },
    );
    Ok(Html(page.into_string()).into_response())
}

async fn admin_report(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Err(err) = current_session(&state, &headers) {
        return Ok(back_to_login(err));
    }
    let rows = blocking(&state.db, |conn| analytics::feedback_log(conn, EXPORT_LIMIT)).await?;
    Ok(attachment(
        "text/csv; charset=utf-8",
        "feedback_report.csv",
        analytics::feedback_log_csv(&rows, state.config.utc_offset),
    ))
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let db_ok = state.db.get().is_ok();
    Json(json!({
        "ok": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
        "sessions": state.sessions.active_count(),
        "audit": state.comparisons.audit_label(),
    }))
}

async fn api_models(State(state): State<AppState>) -> Json<Vec<Value>> {
    let models = available_models(&state.config.secrets)
        .into_iter()
        .map(|spec| {
            let (input, output) = price_for(&pricing_key(spec.name));
            json!({
                "name": spec.name,
                "provider": spec.provider,
                "badge": spec.badge,
                "description": spec.description,
                "price_per_million_usd": { "input": input, "output": output },
            })
        })
        .collect();
    Json(models)
}

#[derive(Deserialize)]
struct CompareInput {
    #[serde(default)]
    username: Option<String>,
    prompt: String,
    models: Vec<String>,
    #[serde(default)]
    knowledge_base: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

async fn api_compare(
    State(state): State<AppState>,
    Json(input): Json<CompareInput>,
) -> Result<Json<ComparisonOutcome>, AppError> {
    let kb = match input.knowledge_base.as_deref() {
        Some(name) => state
            .config
            .knowledge_base(name)
            .ok_or_else(|| AppError::UnknownKnowledgeBase(name.to_string()))?,
        None => state
            .config
            .default_knowledge_base()
            .ok_or_else(|| AppError::UnknownKnowledgeBase(String::new()))?,
    };
    let outcome = state
        .comparisons
        .compare(ComparisonRequest {
            username: input.username,
            prompt: input.prompt,
            models: input.models,
            knowledge_base: kb.clone(),
            temperature: input.temperature.unwrap_or(crate::config::DEFAULT_TEMPERATURE),
        })
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct EventsQuery {
    module: Option<String>,
    limit: Option<usize>,
}

/// Events carry usernames and vendor errors, so they sit behind the same
/// gate as the dashboard.
async fn api_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>, AppError> {
    current_session(&state, &headers)?;
    let limit = query.limit.unwrap_or(50).min(500);
    let events = blocking(&state.db, move |conn| {
        Ok(list_events(conn, query.module.as_deref(), limit)?)
    })
    .await?;
    Ok(Json(events))
}
