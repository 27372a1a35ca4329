use r2d2_sqlite::rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::DbPool;

/// Row of the `event_log` table as surfaced to diagnostics views.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub explain: Option<String>,
    pub data: Option<Value>,
}

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    mirror_to_log(level, code, module, message, data.as_ref());
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

/// Fire-and-forget variant for async call sites. The row is written on the
/// blocking pool; failures only reach the process log.
pub fn spawn_event(
    pool: &DbPool,
    level: &'static str,
    code: &'static str,
    module: &'static str,
    message: impl Into<String>,
    data: Option<Value>,
) {
    let pool = pool.clone();
    let message = message.into();
    tokio::task::spawn_blocking(move || match pool.get() {
        Ok(conn) => {
            if let Err(err) = log_event(&conn, level, Some(code), module, &message, None, data) {
                log::warn!(target: "lexcompare::events", "event_log insert failed: {err}");
            }
        }
        Err(err) => log::warn!(target: "lexcompare::events", "event_log unavailable: {err}"),
    });
}

pub fn list_events(
    conn: &Connection,
    module: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<EventRecord>> {
    let mut events = Vec::new();
    if let Some(module) = module {
        let mut stmt = conn.prepare(
            "SELECT id, ts, level, code, module, message, explain, data FROM event_log WHERE module = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![module, limit as i64], map_event)?;
        for row in rows {
            events.push(row?);
        }
        return Ok(events);
    }

    let mut stmt = conn.prepare(
        "SELECT id, ts, level, code, module, message, explain, data FROM event_log ORDER BY ts DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], map_event)?;
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

fn map_event(row: &Row) -> rusqlite::Result<EventRecord> {
    let data_str: Option<String> = row.get(7)?;
    Ok(EventRecord {
        id: row.get(0)?,
        ts: row.get(1)?,
        level: row.get(2)?,
        code: row.get(3)?,
        module: row.get(4)?,
        message: row.get(5)?,
        explain: row.get(6)?,
        data: data_str.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

fn mirror_to_log(level: &str, code: Option<&str>, module: &str, message: &str, data: Option<&Value>) {
    let level = match level {
        "error" => log::Level::Error,
        "warn" => log::Level::Warn,
        "debug" => log::Level::Debug,
        _ => log::Level::Info,
    };
    let code = code.unwrap_or("-");
    match data {
        Some(data) => log::log!(target: "lexcompare::events", level, "[{module}] {code} {message} {data}"),
        None => log::log!(target: "lexcompare::events", level, "[{module}] {code} {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    #[test]
    fn events_are_listed_newest_first_and_filtered_by_module() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        log_event(&conn, "info", Some("A-1"), "ai.runtime", "first", None, None).unwrap();
        log_event(&conn, "warn", Some("R-1"), "retrieval", "second", None, None).unwrap();
        log_event(
            &conn,
            "info",
            Some("A-2"),
            "ai.runtime",
            "third",
            Some("explained"),
            Some(serde_json::json!({ "model": "Typhoon" })),
        )
        .unwrap();

        let all = list_events(&conn, None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "third");

        let runtime = list_events(&conn, Some("ai.runtime"), 10).unwrap();
        assert_eq!(runtime.len(), 2);
        assert_eq!(runtime[0].data.as_ref().unwrap()["model"], "Typhoon");
        assert_eq!(runtime[0].explain.as_deref(), Some("explained"));
    }
}
