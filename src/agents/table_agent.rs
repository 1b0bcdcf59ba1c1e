//! The Table agent: turns a sub-query into one SQL `SELECT`, executes it
//! against the relational substrate, and renders the result as prose.

use crate::error::{CoreError, Result, QUERY_FAILURE_MESSAGE};
use crate::llm::{system_message, user_message, LlmClient};
use crate::relational::{QueryResultSet, RelationalStore};
use crate::table::TableSchema;
use std::sync::Arc;
use tracing::{debug, warn};

const NO_STRUCTURED_DATA_MESSAGE: &str =
    "This document has no structured table data available.";
const NO_MATCHING_ROWS_MESSAGE: &str = "No matching rows were found for that query.";

/// Column names that mark a result set as "two-team match" shaped, so it
/// renders as a sentence per row instead of a generic pipe table.
const MATCH_ROW_COLUMNS: [&str; 4] = ["home_team", "away_team", "home_score", "away_score"];

pub struct TableAgent {
    llm: Arc<dyn LlmClient>,
    relational: Arc<RelationalStore>,
}

impl TableAgent {
    pub fn new(llm: Arc<dyn LlmClient>, relational: Arc<RelationalStore>) -> Self {
        Self { llm, relational }
    }

    pub async fn answer(&self, sub_query: &str, schemas: &[TableSchema]) -> Result<String> {
        if schemas.is_empty() {
            return Ok(NO_STRUCTURED_DATA_MESSAGE.to_string());
        }

        let sql = match self.generate_sql(sub_query, schemas).await {
            Ok(sql) => sql,
            Err(e) if e.is_quota_exceeded() => return Err(e.into_quota_marker()),
            Err(e) => {
                warn!("table agent failed to produce SQL: {}", e);
                return Ok(QUERY_FAILURE_MESSAGE.to_string());
            }
        };

        debug!(sql = %sql, "executing generated SQL");
        match self.relational.execute_select(&sql).await {
            Ok(result) => Ok(render_result_set(&result)),
            Err(e) => {
                warn!("table query execution failed: {}", e);
                Ok(QUERY_FAILURE_MESSAGE.to_string())
            }
        }
    }

    async fn generate_sql(&self, sub_query: &str, schemas: &[TableSchema]) -> Result<String> {
        let schema_summary = schemas
            .iter()
            .map(|s| {
                format!(
                    "Table \"{}\" columns: {}",
                    s.table_name,
                    s.column_names().join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            system_message(
                "You write exactly one SQLite SELECT statement that answers the question using the \
                 given tables. Quote every identifier with double quotes. Respond with the SQL only: \
                 no markdown fences, no comments, no trailing semicolon, no explanation.",
            ),
            user_message(format!("{schema_summary}\n\nQuestion: {sub_query}")),
        ];

        let response = self.llm.generate(&messages).await?;
        let sql = clean_sql(&response.text);

        if !sql.to_uppercase().starts_with("SELECT") {
            return Err(CoreError::RetrievalFailure);
        }

        Ok(sql)
    }
}

fn clean_sql(raw: &str) -> String {
    let mut cleaned = raw.trim();
    cleaned = cleaned
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    cleaned.trim_end_matches(';').trim().to_string()
}

fn render_result_set(result: &QueryResultSet) -> String {
    if result.rows.is_empty() {
        return NO_MATCHING_ROWS_MESSAGE.to_string();
    }

    if result.rows.len() == 1 && result.columns.len() == 1 {
        return format!("Result: {}", format_cell(result.rows[0].values[0].as_deref()));
    }

    if result.columns.len() == 1 {
        return render_dedup_list(result);
    }

    if is_match_row_shape(&result.columns) {
        return render_match_rows(result);
    }

    render_pipe_table(result)
}

fn is_match_row_shape(columns: &[String]) -> bool {
    let lowered: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    MATCH_ROW_COLUMNS.iter().all(|needed| lowered.iter().any(|c| c == needed))
}

fn render_match_rows(result: &QueryResultSet) -> String {
    let index_of = |name: &str| result.columns.iter().position(|c| c.eq_ignore_ascii_case(name));
    let (year_i, round_i, home_team_i, away_team_i, home_score_i, away_score_i) = (
        index_of("year"),
        index_of("round"),
        index_of("home_team"),
        index_of("away_team"),
        index_of("home_score"),
        index_of("away_score"),
    );

    result
        .rows
        .iter()
        .filter_map(|row| {
            let home_team = home_team_i.and_then(|i| row.values[i].as_deref())?;
            let away_team = away_team_i.and_then(|i| row.values[i].as_deref())?;
            let home_score = home_score_i.and_then(|i| row.values[i].as_deref()).unwrap_or("?");
            let away_score = away_score_i.and_then(|i| row.values[i].as_deref()).unwrap_or("?");

            let year = year_i.and_then(|i| row.values[i].as_deref());
            let round = round_i.and_then(|i| row.values[i].as_deref());
            let prefix = match (year, round) {
                (Some(y), Some(r)) => format!("{y} {r}, "),
                (Some(y), None) => format!("{y}, "),
                (None, Some(r)) => format!("{r}, "),
                (None, None) => String::new(),
            };

            Some(format!("{prefix}{home_team} {home_score} - {away_score} {away_team}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-column results: a bullet list deduplicated case-sensitively,
/// keeping first-occurrence order.
fn render_dedup_list(result: &QueryResultSet) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut lines = Vec::new();

    for row in &result.rows {
        let value = format_cell(row.values[0].as_deref());
        if seen.insert(value.clone()) {
            lines.push(format!("- {value}"));
        }
    }

    lines.join("\n")
}

fn render_pipe_table(result: &QueryResultSet) -> String {
    let header = result.columns.join(" | ");
    let rows = result
        .rows
        .iter()
        .map(|row| {
            row.values
                .iter()
                .map(|v| format_cell(v.as_deref()))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>();

    std::iter::once(header).chain(rows).collect::<Vec<_>>().join("\n")
}

fn format_cell(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(s) => match s.parse::<f64>() {
            Ok(n) if s.contains('.') => format!("{n:.2}"),
            _ => s.to_string(),
        },
    }
}
