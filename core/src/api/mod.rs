//! HTTP surface: server-rendered pages for the browser plus a small JSON API.
//!
//! Versioned handlers live in `v1`; `views` holds the maud templates.

pub mod v1;
pub mod views;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use serde_json::json;
use uuid::Uuid;

use crate::agents::AiOrchestrator;
use crate::audit::{AuditSink, NullAuditSink, ServiceAccountKey, SheetsAuditSink};
use crate::comparison::ComparisonService;
use crate::config::AppConfig;
use crate::db::{init_db, DbPool};
use crate::errors::AppError;
use crate::logging::log_event;
use crate::retrieval::{BedrockRetriever, Retriever};
use crate::session::SessionStore;

pub const SESSION_COOKIE: &str = "lexcompare_session";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub sessions: Arc<SessionStore>,
    pub comparisons: Arc<ComparisonService>,
}

impl AppState {
    /// Open the database and construct the vendor clients from configuration.
    pub fn build(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;
        let db = init_db(config.data_dir.clone())?;

        let orchestrator = Arc::new(AiOrchestrator::new(
            config.secrets.clone(),
            config.endpoints.clone(),
        )?);
        let retriever: Arc<dyn Retriever> = Arc::new(BedrockRetriever::new(
            config.bedrock_endpoint.clone(),
            config.region.clone(),
            config.secrets.aws_access_key.clone(),
            config.secrets.aws_secret_key.clone(),
        )?);
        let audit: Arc<dyn AuditSink> = match &config.sheets {
            Some(sheets) => {
                let key = ServiceAccountKey::from_file(&sheets.service_account_file)?;
                Arc::new(SheetsAuditSink::new(
                    key,
                    sheets.spreadsheet_id.clone(),
                    sheets.range.clone(),
                )?)
            }
            None => {
                log::warn!(
                    target: "lexcompare::audit",
                    "GOOGLE_SERVICE_ACCOUNT_FILE or AUDIT_SPREADSHEET_ID not set; audit rows will not be exported"
                );
                Arc::new(NullAuditSink)
            }
        };

        Ok(Self::from_parts(config, db, orchestrator, retriever, audit))
    }

    pub fn from_parts(
        config: AppConfig,
        db: DbPool,
        orchestrator: Arc<AiOrchestrator>,
        retriever: Arc<dyn Retriever>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let comparisons = Arc::new(
            ComparisonService::new(db.clone(), orchestrator, retriever, audit)
                .with_utc_offset(config.utc_offset),
        );
        Self {
            config: Arc::new(config),
            db,
            sessions: Arc::new(SessionStore::default()),
            comparisons,
        }
    }
}

pub fn router(state: AppState) -> Router {
    v1::routes().with_state(state)
}

/// Bind and serve until the process is interrupted.
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", state.config.bind))?;

    if let Ok(conn) = state.db.get() {
        let _ = log_event(
            &conn,
            "info",
            Some("APP-0000"),
            "server",
            "server starting",
            None,
            Some(json!({ "addr": addr.to_string(), "audit": state.comparisons.audit_label() })),
        );
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("⚖️ LexCompare listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await
        .context("server error")
}

/// Session id from the request's `Cookie` header, if any.
pub fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(id: Uuid) -> HeaderValue {
    let value = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("lexcompare_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

pub(crate) fn with_cookie(mut response: Response, cookie: HeaderValue) -> Response {
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::SessionExpired | AppError::UnknownSession => StatusCode::UNAUTHORIZED,
            AppError::DbUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            err if err.is_client_error() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("{}: {:#}", self.code(), self);
        }
        let body = Json(json!({
            "ok": false,
            "code": self.code(),
            "message": self.to_string(),
            "explain": self.explain(),
        }));
        (status, body).into_response()
    }
}
