//! Per-browser login sessions with an inactivity timeout.
//!
//! Sessions live in memory only; a restart signs everyone out, which matches
//! how the chat transcript is scoped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::agents::ModelAnswer;
use crate::config::{DEFAULT_TEMPERATURE, SESSION_TIMEOUT};
use crate::errors::AppError;

const MAX_SYSTEM_LOGS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("dark") {
            Theme::Dark
        } else {
            Theme::Light
        }
    }
}

/// One completed comparison as shown in the chat transcript.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub conversation_id: Option<i64>,
    pub prompt: String,
    pub knowledge_base: String,
    pub answers: Vec<ModelAnswer>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub theme: Theme,
    pub temperature: f32,
    pub knowledge_base: Option<String>,
    pub selected_models: Vec<String>,
    pub transcript: Vec<ChatTurn>,
    pub system_logs: Vec<String>,
    /// Stars given in this session, keyed by response id.
    pub ratings: BTreeMap<i64, i64>,
    /// One-shot message shown on the next page render.
    pub notice: Option<String>,
    #[serde(skip)]
    last_active: Instant,
}

impl Session {
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.system_logs.push(line.into());
        if self.system_logs.len() > MAX_SYSTEM_LOGS {
            let overflow = self.system_logs.len() - MAX_SYSTEM_LOGS;
            self.system_logs.drain(..overflow);
        }
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Whether the response was produced for this session.
    pub fn owns_response(&self, response_id: i64) -> bool {
        self.transcript
            .iter()
            .flat_map(|turn| turn.answers.iter())
            .any(|answer| answer.response_id == Some(response_id))
    }
}

pub struct SessionStore {
    timeout: Duration,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TIMEOUT)
    }
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        // A poisoned map still holds valid sessions.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session for a non-blank name.
    pub fn login(&self, username: &str, default_models: Vec<String>) -> Result<Session, AppError> {
        self.login_at(username, default_models, Instant::now())
    }

    pub fn login_at(
        &self,
        username: &str,
        default_models: Vec<String>,
        now: Instant,
    ) -> Result<Session, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::EmptyUsername);
        }
        let session = Session {
            id: Uuid::new_v4(),
            username: username.to_string(),
            theme: Theme::Light,
            temperature: DEFAULT_TEMPERATURE,
            knowledge_base: None,
            selected_models: default_models,
            transcript: Vec::new(),
            system_logs: Vec::new(),
            ratings: BTreeMap::new(),
            notice: None,
            last_active: now,
        };
        let mut sessions = self.lock();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_active) <= self.timeout);
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// Refresh the activity clock and return the session. An idle session is
    /// dropped and reported as expired.
    pub fn touch(&self, id: Uuid) -> Result<Session, AppError> {
        self.touch_at(id, Instant::now())
    }

    pub fn touch_at(&self, id: Uuid, now: Instant) -> Result<Session, AppError> {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(&id) else {
            return Err(AppError::UnknownSession);
        };
        if now.saturating_duration_since(session.last_active) > self.timeout {
            sessions.remove(&id);
            return Err(AppError::SessionExpired);
        }
        session.last_active = now;
        Ok(session.clone())
    }

    /// Apply `f` to a live session without refreshing its activity clock.
    pub fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> T) -> Result<T, AppError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(AppError::UnknownSession)?;
        Ok(f(session))
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Session> {
        self.lock().get(&id).cloned()
    }

    /// Clear the transcript and logs but keep the login and preferences.
    pub fn reset(&self, id: Uuid) -> Result<(), AppError> {
        self.update(id, |session| {
            session.transcript.clear();
            session.system_logs.clear();
            session.notice = None;
        })
    }

    pub fn logout(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
