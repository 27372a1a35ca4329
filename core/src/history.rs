//! Conversation history: every comparison, its answers and the star ratings
//! users give them.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use r2d2_sqlite::rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use crate::agents::ModelAnswer;
use crate::db::DbPool;
use crate::errors::AppError;

#[derive(Clone, Debug, Serialize)]
pub struct StoredResponse {
    pub id: i64,
    pub model_name: String,
    pub answer: String,
    pub cost: f64,
    pub response_time: f64,
    pub score: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub created_at: i64,
    pub username: String,
    pub question: String,
    pub knowledge_base: Option<String>,
    pub responses: Vec<StoredResponse>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UsageStats {
    pub total_conversations: i64,
    pub total_cost: f64,
    pub avg_response_times: BTreeMap<String, f64>,
}

/// Async facade over the history tables; queries run on the blocking pool.
#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    async fn run<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AppError> + Send + 'static,
    {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|err| AppError::Internal(anyhow!(err.to_string())))?
    }

    /// Store a comparison and return its id with the answers' row ids filled in.
    pub async fn save_comparison(
        &self,
        username: String,
        question: String,
        knowledge_base: String,
        answers: Vec<ModelAnswer>,
    ) -> Result<(i64, Vec<ModelAnswer>), AppError> {
        self.run(move |conn| {
            let mut answers = answers;
            let id = save_conversation(conn, &username, &question, &answers, &knowledge_base)?;
            for answer in answers.iter_mut() {
                answer.response_id = get_response_id(conn, id, &answer.model)?;
            }
            Ok((id, answers))
        })
        .await
    }

    pub async fn save_feedback(&self, response_id: i64, score: i64) -> Result<(), AppError> {
        self.run(move |conn| save_feedback(conn, response_id, score)).await
    }

    pub async fn load_history(
        &self,
        username: String,
        limit: usize,
        search: Option<String>,
    ) -> Result<Vec<ConversationRecord>, AppError> {
        self.run(move |conn| Ok(load_history(conn, &username, limit, search.as_deref())?))
            .await
    }

    pub async fn stats(&self, username: Option<String>) -> Result<UsageStats, AppError> {
        self.run(move |conn| Ok(get_stats(conn, username.as_deref())?)).await
    }
}

pub fn save_conversation(
    conn: &Connection,
    username: &str,
    question: &str,
    answers: &[ModelAnswer],
    knowledge_base: &str,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    tx.execute(
        "INSERT INTO conversations (created_at, username, question, knowledge_base) VALUES (?1, ?2, ?3, ?4)",
        params![now, username, question, knowledge_base],
    )?;
    let conversation_id = tx.last_insert_rowid();
    for answer in answers {
        tx.execute(
            "INSERT INTO responses (conversation_id, model_name, answer, cost, response_time) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                answer.model,
                answer.answer,
                answer.cost_thb,
                answer.elapsed_secs
            ],
        )?;
    }
    tx.commit()?;
    Ok(conversation_id)
}

pub fn get_response_id(
    conn: &Connection,
    conversation_id: i64,
    model_name: &str,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM responses WHERE conversation_id = ?1 AND model_name = ?2",
            params![conversation_id, model_name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Record a 1–5 star rating; rating the same response again replaces it.
pub fn save_feedback(conn: &Connection, response_id: i64, score: i64) -> Result<(), AppError> {
    if !(1..=5).contains(&score) {
        return Err(AppError::InvalidScore);
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO feedback (response_id, score, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(response_id) DO UPDATE SET score = excluded.score, created_at = excluded.created_at",
        params![response_id, score, now],
    )
    .map_err(|err| AppError::Internal(err.into()))?;
    Ok(())
}

pub fn load_history(
    conn: &Connection,
    username: &str,
    limit: usize,
    search: Option<&str>,
) -> Result<Vec<ConversationRecord>> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", escape_like(s)));
    let mut stmt = conn.prepare(
        "SELECT id, created_at, question, knowledge_base FROM conversations
         WHERE username = ?1 AND (?2 IS NULL OR question LIKE ?2 ESCAPE '\\')
         ORDER BY created_at DESC, id DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![username, pattern, limit as i64], |row| {
        Ok(ConversationRecord {
            id: row.get(0)?,
            created_at: row.get(1)?,
            username: username.to_string(),
            question: row.get(2)?,
            knowledge_base: row.get(3)?,
            responses: Vec::new(),
        })
    })?;

    let mut conversations = Vec::new();
    for row in rows {
        let mut conversation = row?;
        conversation.responses = list_responses(conn, conversation.id)?;
        conversations.push(conversation);
    }
    Ok(conversations)
}

fn list_responses(conn: &Connection, conversation_id: i64) -> Result<Vec<StoredResponse>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.model_name, r.answer, r.cost, r.response_time, f.score
         FROM responses r LEFT JOIN feedback f ON f.response_id = r.id
         WHERE r.conversation_id = ?1 ORDER BY r.id",
    )?;
    let rows = stmt.query_map([conversation_id], |row| {
        Ok(StoredResponse {
            id: row.get(0)?,
            model_name: row.get(1)?,
            answer: row.get(2)?,
            cost: row.get(3)?,
            response_time: row.get(4)?,
            score: row.get(5)?,
        })
    })?;
    let mut responses = Vec::new();
    for row in rows {
        responses.push(row?);
    }
    Ok(responses)
}

pub fn get_stats(conn: &Connection, username: Option<&str>) -> Result<UsageStats> {
    let total_conversations: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conversations WHERE ?1 IS NULL OR username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    let total_cost: Option<f64> = conn.query_row(
        "SELECT SUM(r.cost) FROM responses r JOIN conversations c ON r.conversation_id = c.id
         WHERE ?1 IS NULL OR c.username = ?1",
        params![username],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT r.model_name, AVG(r.response_time) FROM responses r
         JOIN conversations c ON r.conversation_id = c.id
         WHERE ?1 IS NULL OR c.username = ?1
         GROUP BY r.model_name",
    )?;
    let rows = stmt.query_map(params![username], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut avg_response_times = BTreeMap::new();
    for row in rows {
        let (model, avg) = row?;
        avg_response_times.insert(model, avg);
    }

    Ok(UsageStats {
        total_conversations,
        total_cost: total_cost.unwrap_or(0.0),
        avg_response_times,
    })
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ProviderKind;
    use crate::db::init_memory_db;

    fn answer(model: &str, cost: f64, secs: f64) -> ModelAnswer {
        ModelAnswer {
            model: model.into(),
            provider: ProviderKind::ThaiLlm,
            answer: format!("answer from {model}"),
            error: None,
            citations: Vec::new(),
            cost_thb: cost,
            elapsed_secs: secs,
            response_id: None,
        }
    }

    #[test]
    fn conversation_round_trips_with_ordered_responses() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        let id = save_conversation(
            &conn,
            "alice",
            "How do I file?",
            &[answer("Typhoon 2.1", 0.5, 2.0), answer("Pathumma 1.0", 0.25, 4.0)],
            "Judgments",
        )
        .unwrap();

        let history = load_history(&conn, "alice", 10, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].knowledge_base.as_deref(), Some("Judgments"));
        let models: Vec<_> = history[0].responses.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(models, ["Typhoon 2.1", "Pathumma 1.0"]);
        assert!(load_history(&conn, "bob", 10, None).unwrap().is_empty());
    }

    #[test]
    fn history_is_newest_first_limited_and_searchable() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        for q in ["first 100%", "second", "third"] {
            save_conversation(&conn, "alice", q, &[answer("Typhoon 2.1", 0.1, 1.0)], "kb").unwrap();
        }
        let latest = load_history(&conn, "alice", 2, None).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].question, "third");

        let found = load_history(&conn, "alice", 10, Some("100%")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].question, "first 100%");
        assert!(load_history(&conn, "alice", 10, Some("_")).unwrap().is_empty());
    }

    #[test]
    fn feedback_is_upserted_and_validated() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        let id = save_conversation(&conn, "alice", "q", &[answer("Typhoon 2.1", 0.1, 1.0)], "kb").unwrap();
        let response_id = get_response_id(&conn, id, "Typhoon 2.1").unwrap().unwrap();
        assert!(get_response_id(&conn, id, "GPT-4o mini").unwrap().is_none());

        save_feedback(&conn, response_id, 2).unwrap();
        save_feedback(&conn, response_id, 5).unwrap();
        assert!(matches!(save_feedback(&conn, response_id, 0), Err(AppError::InvalidScore)));
        assert!(matches!(save_feedback(&conn, response_id, 6), Err(AppError::InvalidScore)));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM feedback", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let history = load_history(&conn, "alice", 1, None).unwrap();
        assert_eq!(history[0].responses[0].score, Some(5));
    }

    #[test]
    fn stats_aggregate_per_user_and_globally() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        save_conversation(&conn, "alice", "q1", &[answer("Typhoon 2.1", 1.0, 2.0)], "kb").unwrap();
        save_conversation(&conn, "alice", "q2", &[answer("Typhoon 2.1", 2.0, 4.0)], "kb").unwrap();
        save_conversation(&conn, "bob", "q3", &[answer("Pathumma 1.0", 4.0, 1.0)], "kb").unwrap();

        let alice = get_stats(&conn, Some("alice")).unwrap();
        assert_eq!(alice.total_conversations, 2);
        assert!((alice.total_cost - 3.0).abs() < 1e-9);
        assert_eq!(alice.avg_response_times.get("Typhoon 2.1"), Some(&3.0));
        assert!(!alice.avg_response_times.contains_key("Pathumma 1.0"));

        let all = get_stats(&conn, None).unwrap();
        assert_eq!(all.total_conversations, 3);
        assert!((all.total_cost - 7.0).abs() < 1e-9);

        let nobody = get_stats(&conn, Some("carol")).unwrap();
        assert_eq!(nobody.total_conversations, 0);
        assert_eq!(nobody.total_cost, 0.0);
    }

    #[tokio::test]
    async fn store_attaches_response_ids() {
        let store = ConversationStore::new(init_memory_db().unwrap());
        let (id, answers) = store
            .save_comparison(
                "alice".into(),
                "q".into(),
                "kb".into(),
                vec![answer("Typhoon 2.1", 0.1, 1.0), answer("Pathumma 1.0", 0.1, 1.0)],
            )
            .await
            .unwrap();
        assert!(id > 0);
        assert!(answers.iter().all(|a| a.response_id.is_some()));
        store.save_feedback(answers[1].response_id.unwrap(), 4).await.unwrap();
        let history = store.load_history("alice".into(), 5, None).await.unwrap();
        assert_eq!(history[0].responses[1].score, Some(4));
    }
}
