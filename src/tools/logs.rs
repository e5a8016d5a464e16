// src/tools/logs.rs
// get_logs: read the in-memory ring buffer back with filters.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{KitError, Result};
use crate::logbuf::{LogEntry, LogFilter, LogLevel};

use super::ToolContext;

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LogsResult {
    pub total: usize,
    /// Structured entries (empty when `format` is "text").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<LogEntry>,
    /// Rendered lines (empty when `format` is "structured").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
}

pub struct LogsParams {
    pub min_level: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub contains: Option<String>,
    pub limit: Option<usize>,
    /// "structured" (default) or "text".
    pub format: Option<String>,
}

fn parse_time(field: &str, value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| {
            KitError::validation(format!("invalid {field} timestamp '{value}': {e}"))
                .with_context("field", field)
        })
}

pub async fn execute(ctx: &impl ToolContext, params: &LogsParams) -> Result<LogsResult> {
    let min_level = params
        .min_level
        .as_deref()
        .map(|s| s.parse::<LogLevel>().map_err(KitError::validation))
        .transpose()?;

    let filter = LogFilter {
        min_level,
        since: params
            .since
            .as_deref()
            .map(|s| parse_time("since", s))
            .transpose()?,
        until: params
            .until
            .as_deref()
            .map(|s| parse_time("until", s))
            .transpose()?,
        contains: params.contains.clone(),
        limit: params.limit,
    };

    let entries = ctx.logs().query(&filter);
    let total = entries.len();

    Ok(match params.format.as_deref() {
        Some("text") => LogsResult {
            total,
            lines: entries.iter().map(LogEntry::to_text).collect(),
            entries: Vec::new(),
        },
        _ => LogsResult {
            total,
            entries,
            lines: Vec::new(),
        },
    })
}
