//! Typed table schema: the semantic type vocabulary and coercion rules
//! shared by the schema inferrer, the table writer, and the table agent.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type assigned to a column during schema inference.
///
/// Percentage convention (decided, not guessed — see DESIGN.md): a cell
/// read as `"35%"` is coerced to the float `35.0`, not `0.35`. The percent
/// sign is stripped and the numeric value kept in its natural "percent
/// points" form, matching how the figure reads in the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Currency,
    Percentage,
    Date,
}

/// A coerced cell value. Coercion failures become `Null`, never a string
/// fallback — a column typed `Integer` either holds integers or nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum CellValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Date(String),
}

/// The typed schema for one extracted table. Columns are kept in the raw
/// table's original header order, not sorted by name: the writer zips this
/// list positionally against each raw row's cells, and the DDL/`INSERT`
/// column lists follow the same order, so all three stay aligned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub doc_id: String,
    pub description: String,
    pub columns: Vec<(String, SemanticType)>,
    pub created_at: DateTime<Utc>,
}

impl TableSchema {
    /// Column names in raw-header order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Look up a column's semantic type by name.
    pub fn semantic_type_of(&self, name: &str) -> Option<SemanticType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }
}

/// Coerce a raw string cell according to a column's semantic type.
/// Never returns a `String` fallback for a non-`String` type; a value that
/// cannot be coerced becomes `Null` instead.
pub fn coerce_cell(raw: &str, semantic_type: SemanticType) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellValue::Null;
    }

    match semantic_type {
        SemanticType::String => CellValue::String(trimmed.to_string()),
        SemanticType::Integer => strip_numeric_decoration(trimmed)
            .parse::<i64>()
            .map(CellValue::Integer)
            .unwrap_or(CellValue::Null),
        SemanticType::Float => strip_numeric_decoration(trimmed)
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        SemanticType::Currency => strip_currency_symbols(trimmed)
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        SemanticType::Percentage => trimmed
            .trim_end_matches('%')
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        SemanticType::Date => parse_canonical_date(trimmed)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
    }
}

fn strip_numeric_decoration(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect()
}

fn strip_currency_symbols(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect()
}

/// Formats tried in order against a raw cell; the first that parses wins.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Parse a raw cell into a canonical `YYYY-MM-DD` date string, or `None` if
/// it doesn't match any known format.
fn parse_canonical_date(raw: &str) -> Option<String> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}
