//! Aggregate views for the admin dashboard and the CSV reports.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use r2d2_sqlite::rusqlite::{params, Connection};
use regex::Regex;
use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::history::ConversationRecord;

static USER_METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(?:\s+\((.*?)\))?\s+-\s+(.*)$").expect("static regex"));

/// Position, level and agency parsed from a login name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMetadata {
    pub role: String,
    pub level: String,
    pub agency: String,
}

/// Names follow `Role (Level) - Agency` or `Role - Agency` by convention;
/// anything else is a bare role.
pub fn parse_user_metadata(username: &str) -> UserMetadata {
    let name = username.trim();
    if name.is_empty() {
        return UserMetadata {
            role: "Unknown".into(),
            level: "Unknown".into(),
            agency: "Unknown".into(),
        };
    }
    if let Some(caps) = USER_METADATA.captures(name) {
        return UserMetadata {
            role: caps[1].trim().to_string(),
            level: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| "General".into()),
            agency: caps[3].trim().to_string(),
        };
    }
    UserMetadata {
        role: name.to_string(),
        level: "General".into(),
        agency: "Unknown".into(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelLeaderboardRow {
    pub model_name: String,
    pub total_responses: i64,
    pub avg_time_secs: f64,
    pub avg_cost: f64,
    pub avg_chars: f64,
    pub feedback_count: i64,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyUsage {
    pub month: String,
    pub conversations: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackLogRow {
    pub conversation_id: i64,
    pub created_at: i64,
    pub username: String,
    pub user: UserMetadata,
    pub question: String,
    pub model_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminSummary {
    pub total_responses: i64,
    pub total_cost: f64,
    pub total_feedback: i64,
    pub active_users: i64,
}

pub fn admin_summary(conn: &Connection) -> Result<AdminSummary> {
    let (total_responses, total_cost): (i64, Option<f64>) =
        conn.query_row("SELECT COUNT(*), SUM(cost) FROM responses", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    let total_feedback: i64 =
        conn.query_row("SELECT COUNT(*) FROM feedback", [], |row| row.get(0))?;
    let active_users: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT username) FROM conversations",
        [],
        |row| row.get(0),
    )?;
    Ok(AdminSummary {
        total_responses,
        total_cost: total_cost.unwrap_or(0.0),
        total_feedback,
        active_users,
    })
}

/// Per-model efficiency and rating, best rated first.
pub fn model_leaderboard(conn: &Connection) -> Result<Vec<ModelLeaderboardRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.model_name,
                COUNT(r.id),
                AVG(r.response_time),
                AVG(r.cost),
                AVG(LENGTH(r.answer)),
                COUNT(f.id),
                COALESCE(AVG(f.score), 0.0)
         FROM responses r LEFT JOIN feedback f ON f.response_id = r.id
         GROUP BY r.model_name
         ORDER BY COALESCE(AVG(f.score), 0.0) DESC, r.model_name ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ModelLeaderboardRow {
            model_name: row.get(0)?,
            total_responses: row.get(1)?,
            avg_time_secs: row.get(2)?,
            avg_cost: row.get(3)?,
            avg_chars: row.get(4)?,
            feedback_count: row.get(5)?,
            avg_score: row.get(6)?,
        })
    })?;
    let mut board = Vec::new();
    for row in rows {
        board.push(row?);
    }
    Ok(board)
}

pub fn monthly_usage(conn: &Connection) -> Result<Vec<MonthlyUsage>> {
    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', c.created_at, 'unixepoch') AS month,
                COUNT(DISTINCT c.id),
                COALESCE(SUM(r.cost), 0.0)
         FROM conversations c JOIN responses r ON c.id = r.conversation_id
         GROUP BY month ORDER BY month DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(MonthlyUsage {
            month: row.get(0)?,
            conversations: row.get(1)?,
            cost: row.get(2)?,
        })
    })?;
    let mut usage = Vec::new();
    for row in rows {
        usage.push(row?);
    }
    Ok(usage)
}

pub fn feedback_log(conn: &Connection, limit: usize) -> Result<Vec<FeedbackLogRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.created_at, c.username, c.question, r.model_name, f.score
         FROM responses r
         JOIN feedback f ON r.id = f.response_id
         JOIN conversations c ON r.conversation_id = c.id
         ORDER BY c.created_at DESC, f.id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let username: String = row.get(2)?;
        Ok(FeedbackLogRow {
            conversation_id: row.get(0)?,
            created_at: row.get(1)?,
            user: parse_user_metadata(&username),
            username,
            question: row.get(3)?,
            model_name: row.get(4)?,
            score: row.get(5)?,
        })
    })?;
    let mut log = Vec::new();
    for row in rows {
        log.push(row?);
    }
    Ok(log)
}

/// Distinct users per role and per agency, from the feedback log.
pub fn demographics(rows: &[FeedbackLogRow]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let mut seen = std::collections::BTreeSet::new();
    let mut roles = BTreeMap::new();
    let mut agencies = BTreeMap::new();
    for row in rows {
        if !seen.insert(row.username.as_str()) {
            continue;
        }
        *roles.entry(row.user.role.clone()).or_insert(0) += 1;
        *agencies.entry(row.user.agency.clone()).or_insert(0) += 1;
    }
    (roles, agencies)
}

/// Mean satisfaction score per role, per model. Roles come from the parsed
/// login name, so the grouping happens here rather than in SQL.
pub fn role_preferences(conn: &Connection) -> Result<BTreeMap<String, BTreeMap<String, f64>>> {
    let mut stmt = conn.prepare(
        "SELECT c.username, r.model_name, f.score
         FROM responses r
         JOIN feedback f ON r.id = f.response_id
         JOIN conversations c ON r.conversation_id = c.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut totals: BTreeMap<String, BTreeMap<String, (i64, u32)>> = BTreeMap::new();
    for row in rows {
        let (username, model, score) = row?;
        let role = parse_user_metadata(&username).role;
        let entry = totals.entry(role).or_default().entry(model).or_insert((0, 0));
        entry.0 += score;
        entry.1 += 1;
    }
    Ok(totals
        .into_iter()
        .map(|(role, models)| {
            let means = models
                .into_iter()
                .map(|(model, (sum, count))| (model, sum as f64 / f64::from(count)))
                .collect();
            (role, means)
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPick {
    pub model_name: String,
    pub value: f64,
}

/// Headline picks for the dashboard summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelInsights {
    /// Highest average rating among models that have been rated at all.
    pub best_rated: Option<ModelPick>,
    /// Lowest average response time.
    pub fastest: Option<ModelPick>,
}

pub fn model_insights(board: &[ModelLeaderboardRow]) -> ModelInsights {
    let mut insights = ModelInsights::default();
    for row in board {
        if row.feedback_count > 0
            && insights
                .best_rated
                .as_ref()
                .map_or(true, |best| row.avg_score > best.value)
        {
            insights.best_rated = Some(ModelPick {
                model_name: row.model_name.clone(),
                value: row.avg_score,
            });
        }
        if insights
            .fastest
            .as_ref()
            .map_or(true, |fastest| row.avg_time_secs < fastest.value)
        {
            insights.fastest = Some(ModelPick {
                model_name: row.model_name.clone(),
                value: row.avg_time_secs,
            });
        }
    }
    insights
}

pub fn format_timestamp(ts: i64, offset: UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .map(|dt| dt.to_offset(offset))
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// One line per stored answer, UTF-8 with BOM so spreadsheet tools pick the
/// right encoding for Thai text.
pub fn history_csv(history: &[ConversationRecord], offset: UtcOffset) -> String {
    let mut out = String::from("\u{feff}");
    push_csv_row(
        &mut out,
        &["Timestamp", "Question", "Model", "Answer", "Cost", "Score"],
    );
    for conversation in history {
        let timestamp = format_timestamp(conversation.created_at, offset);
        for response in &conversation.responses {
            let cost = format!("{:.4}", response.cost);
            let score = response.score.map(|s| s.to_string()).unwrap_or_default();
            push_csv_row(
                &mut out,
                &[
                    &timestamp,
                    &conversation.question,
                    &response.model_name,
                    &response.answer,
                    &cost,
                    &score,
                ],
            );
        }
    }
    out
}

pub fn feedback_log_csv(rows: &[FeedbackLogRow], offset: UtcOffset) -> String {
    let mut out = String::from("\u{feff}");
    push_csv_row(
        &mut out,
        &[
            "conversation_id",
            "timestamp",
            "username",
            "user_role",
            "user_level",
            "user_agency",
            "question",
            "model_name",
            "score",
        ],
    );
    for row in rows {
        let id = row.conversation_id.to_string();
        let timestamp = format_timestamp(row.created_at, offset);
        let score = row.score.to_string();
        push_csv_row(
            &mut out,
            &[
                &id,
                &timestamp,
                &row.username,
                &row.user.role,
                &row.user.level,
                &row.user.agency,
                &row.question,
                &row.model_name,
                &score,
            ],
        );
    }
    out
}

fn push_csv_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ModelAnswer, ProviderKind};
    use crate::db::init_memory_db;
    use crate::history::{get_response_id, load_history, save_conversation, save_feedback};

    fn answer(model: &str, text: &str, secs: f64) -> ModelAnswer {
        ModelAnswer {
            model: model.into(),
            provider: ProviderKind::ThaiLlm,
            answer: text.into(),
            error: None,
            citations: Vec::new(),
            cost_thb: 1.0,
            elapsed_secs: secs,
            response_id: None,
        }
    }

    #[test]
    fn user_metadata_variants() {
        assert_eq!(
            parse_user_metadata("Legal Officer (Senior) - Central Court"),
            UserMetadata {
                role: "Legal Officer".into(),
                level: "Senior".into(),
                agency: "Central Court".into()
            }
        );
        assert_eq!(
            parse_user_metadata("Clerk - Region 3"),
            UserMetadata {
                role: "Clerk".into(),
                level: "General".into(),
                agency: "Region 3".into()
            }
        );
        assert_eq!(parse_user_metadata("สมชาย").role, "สมชาย");
        assert_eq!(parse_user_metadata("สมชาย").agency, "Unknown");
        assert_eq!(parse_user_metadata("  ").level, "Unknown");
    }

    #[test]
    fn leaderboard_orders_by_rating_and_counts_unrated() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        let id = save_conversation(
            &conn,
            "Clerk - Region 3",
            "q",
            &[answer("Typhoon 2.1", "abcd", 2.0), answer("Pathumma 1.0", "ab", 4.0)],
            "kb",
        )
        .unwrap();
        let pathumma = get_response_id(&conn, id, "Pathumma 1.0").unwrap().unwrap();
        save_feedback(&conn, pathumma, 5).unwrap();

        let board = model_leaderboard(&conn).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].model_name, "Pathumma 1.0");
        assert_eq!(board[0].feedback_count, 1);
        assert_eq!(board[0].avg_score, 5.0);
        assert_eq!(board[1].feedback_count, 0);
        assert_eq!(board[1].avg_chars, 4.0);

        let summary = admin_summary(&conn).unwrap();
        assert_eq!(summary.total_responses, 2);
        assert_eq!(summary.total_feedback, 1);
        assert_eq!(summary.active_users, 1);

        let usage = monthly_usage(&conn).unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].conversations, 1);
        assert!((usage[0].cost - 2.0).abs() < 1e-9);

        let log = feedback_log(&conn, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user.agency, "Region 3");
        let (roles, agencies) = demographics(&log);
        assert_eq!(roles.get("Clerk"), Some(&1));
        assert_eq!(agencies.get("Region 3"), Some(&1));
    }

    #[test]
    fn role_preferences_average_per_role_and_model() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        let rate = |user: &str, scores: &[(&str, i64)]| {
            let answers: Vec<_> = scores.iter().map(|(m, _)| answer(m, "x", 1.0)).collect();
            let id = save_conversation(&conn, user, "q", &answers, "kb").unwrap();
            for (model, score) in scores {
                let response = get_response_id(&conn, id, model).unwrap().unwrap();
                save_feedback(&conn, response, *score).unwrap();
            }
        };
        rate("Clerk - Region 3", &[("Typhoon 2.1", 4), ("Pathumma 1.0", 2)]);
        rate("Clerk (Senior) - Central Court", &[("Typhoon 2.1", 5)]);
        rate("Judge - Central Court", &[("Pathumma 1.0", 3)]);

        let prefs = role_preferences(&conn).unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs["Clerk"]["Typhoon 2.1"], 4.5);
        assert_eq!(prefs["Clerk"]["Pathumma 1.0"], 2.0);
        assert_eq!(prefs["Judge"].get("Typhoon 2.1"), None);
        assert_eq!(prefs["Judge"]["Pathumma 1.0"], 3.0);
    }

    #[test]
    fn insights_pick_best_rated_and_fastest() {
        let row = |name: &str, secs: f64, ratings: i64, score: f64| ModelLeaderboardRow {
            model_name: name.into(),
            total_responses: 3,
            avg_time_secs: secs,
            avg_cost: 0.1,
            avg_chars: 100.0,
            feedback_count: ratings,
            avg_score: score,
        };
        let board = [
            row("Pathumma 1.0", 4.0, 2, 4.5),
            row("Typhoon 2.1", 2.5, 3, 4.0),
            row("THaLLE 0.1", 1.2, 0, 0.0),
        ];
        let insights = model_insights(&board);
        assert_eq!(
            insights.best_rated,
            Some(ModelPick { model_name: "Pathumma 1.0".into(), value: 4.5 })
        );
        assert_eq!(
            insights.fastest,
            Some(ModelPick { model_name: "THaLLE 0.1".into(), value: 1.2 })
        );

        let unrated = model_insights(&board[2..]);
        assert!(unrated.best_rated.is_none());
        assert_eq!(model_insights(&[]), ModelInsights::default());
    }

    #[test]
    fn csv_quotes_fields_that_need_it() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        save_conversation(
            &conn,
            "alice",
            "Is \"stay\" allowed, and when?",
            &[answer("Typhoon 2.1", "line one\nline two", 1.0)],
            "kb",
        )
        .unwrap();
        let csv = history_csv(&load_history(&conn, "alice", 10, None).unwrap(), UtcOffset::UTC);
        assert!(csv.starts_with("\u{feff}Timestamp,Question,Model,Answer,Cost,Score\r\n"));
        assert!(csv.contains("\"Is \"\"stay\"\" allowed, and when?\",Typhoon 2.1,\"line one\nline two\",1.0000,\r\n"));
    }

    #[test]
    fn timestamps_render_in_the_configured_offset() {
        assert_eq!(format_timestamp(0, UtcOffset::UTC), "1970-01-01 00:00:00");
        let bangkok = UtcOffset::from_hms(7, 0, 0).unwrap();
        assert_eq!(format_timestamp(0, bangkok), "1970-01-01 07:00:00");
    }
}
