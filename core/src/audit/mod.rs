//! Append-only audit trail: one spreadsheet row per completed comparison.

pub mod sheets;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::agents::ModelAnswer;

pub use sheets::{ServiceAccountKey, SheetsAuditSink};

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub model: String,
    pub answer: String,
    pub cost_thb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRow {
    pub timestamp: OffsetDateTime,
    pub username: String,
    pub prompt: String,
    pub entries: Vec<AuditEntry>,
}

impl AuditRow {
    pub fn new(username: &str, prompt: &str, answers: &[ModelAnswer]) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            username: username.to_string(),
            prompt: prompt.to_string(),
            entries: answers
                .iter()
                .map(|a| AuditEntry {
                    model: a.model.clone(),
                    answer: a.answer.clone(),
                    cost_thb: a.cost_thb,
                })
                .collect(),
        }
    }

    /// `timestamp, username, prompt` followed by `model, answer, cost` per
    /// compared model.
    pub fn cells(&self) -> Vec<String> {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let mut cells = vec![
            self.timestamp.format(&format).unwrap_or_default(),
            self.username.clone(),
            self.prompt.clone(),
        ];
        for entry in &self.entries {
            cells.push(entry.model.clone());
            cells.push(entry.answer.clone());
            cells.push(format!("{:.4}", entry.cost_thb));
        }
        cells
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, row: &AuditRow) -> Result<()>;

    /// Short label for logs and the status page.
    fn describe(&self) -> String;
}

/// Used when no spreadsheet is configured; rows are only logged.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn append(&self, row: &AuditRow) -> Result<()> {
        log::debug!(
            target: "lexcompare::audit",
            "audit sheet disabled; dropping row for {} ({} models)",
            row.username,
            row.entries.len()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        "disabled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ProviderKind;
    use time::macros::datetime;

    fn answer(model: &str, text: &str, cost: f64) -> ModelAnswer {
        ModelAnswer {
            model: model.into(),
            provider: ProviderKind::ThaiLlm,
            answer: text.into(),
            error: None,
            citations: Vec::new(),
            cost_thb: cost,
            elapsed_secs: 1.0,
            response_id: None,
        }
    }

    #[test]
    fn two_model_row_matches_sheet_layout() {
        let mut row = AuditRow::new(
            "Officer A",
            "คำถาม",
            &[answer("Typhoon 2.1", "left", 0.123456), answer("Pathumma 1.0", "right", 2.0)],
        );
        row.timestamp = datetime!(2026-03-04 05:06:07 UTC);
        assert_eq!(
            row.cells(),
            vec![
                "2026-03-04 05:06:07",
                "Officer A",
                "คำถาม",
                "Typhoon 2.1",
                "left",
                "0.1235",
                "Pathumma 1.0",
                "right",
                "2.0000",
            ]
        );
    }

    #[test]
    fn single_model_row_has_one_triplet() {
        let row = AuditRow::new("u", "p", &[answer("Typhoon 2.1", "a", 0.0)]);
        assert_eq!(row.cells().len(), 6);
    }
}
