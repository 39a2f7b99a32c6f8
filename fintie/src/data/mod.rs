//! Market data layer for Chinese equities.
//!
//! Fetches reference and quote data from public financial sites, falls back
//! across sources in a configured order, and archives results on disk.
//!
//! # Data Sources
//! - **qq** (Tencent): company profile, tick downloads, snapshot quotes
//! - **sina**: company profile, tick downloads, snapshot quotes
//! - **cninfo**: profiles, company list, delistings, calendar, announcements
//! - **exchange** (SSE/SZSE): official listed-company lists
//! - **netease** (163): snapshot quotes, financial statement CSVs
//! - **xueqiu**: K-lines, live quotes, quote lists, shareholders, F10 tables, screener
//!
//! # Flow
//!
//! ```text
//! CategoryRequest ─▶ SourceRouter ─▶ DataSource (in order) ─▶ HttpSession
//!                         │
//!                         ▼
//!                    FetchResult ─▶ ArtifactWriter ─▶ file
//! ```

mod bars;
mod batch;
mod collector;
mod model;
mod parse;
mod provider;
mod request;
mod router;
mod session;
mod symbol;
mod writer;
pub mod sources;

pub use bars::{resample_ticks, tick_trades, BAR_COLUMNS};
pub use batch::{fetch_batch, successes, BatchItem};
pub use collector::{AnnouncementArchive, Collector};
pub use model::{CurrentQuote, PriceLevel, StockProfile, TickTrade, TradeSide};
pub use provider::{fetch_from, DataSource, SourceError, SourceOutcome};
pub use request::{
    ArtifactFormat, Category, CategoryRequest, FetchParams, FqType, Frequency, RequestError,
    ANNOUNCEMENT_KINDS,
};
pub use router::{fetch_category, RouterConfig, SourceInfo, SourceRouter};
pub use session::{HttpSession, SessionProvider};
pub use symbol::{filter_symbols, filter_table_by_symbol, Exchange, Symbol, SymbolKind};
pub use writer::ArtifactWriter;

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Core Data Types
// ============================================================================

/// Structured result: named fields mapped to JSON-typed values.
pub type Record = serde_json::Map<String, Value>;

/// Tabular result: named columns and rows of JSON-typed cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Build from JSON objects; columns are the union of keys in first-seen order.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let records: Vec<&Record> = records.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Build from JSON values, keeping only objects.
    pub fn from_values(values: &[Value]) -> Self {
        Self::from_records(values.iter().filter_map(Value::as_object))
    }

    /// Build from serializable structs (each must serialize to an object).
    pub fn from_rows<T: Serialize>(items: &[T]) -> Result<Self, serde_json::Error> {
        let values = items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_values(&values))
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Append another table's rows, aligning columns by name.
    pub fn extend(&mut self, other: Table) {
        if self.columns.is_empty() {
            *self = other;
            return;
        }
        if self.columns == other.columns {
            self.rows.extend(other.rows);
            return;
        }

        let mut records = self.to_records();
        records.extend(other.to_records());
        *self = Self::from_records(&records);
    }
}

/// Normalized result of one successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Record(Record),
    Table(Table),
}

impl FetchResult {
    /// Serialize a struct into a record result.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self::Record(map)),
            other => {
                let mut record = Record::new();
                record.insert("value".to_string(), other);
                Ok(Self::Record(record))
            }
        }
    }

    /// No fields or no rows.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Record(record) => record.is_empty(),
            Self::Table(table) => table.is_empty(),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            Self::Record(_) => None,
        }
    }

    /// JSON form: an object for records, an array of row objects for tables.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Record(record) => Value::Object(record.clone()),
            Self::Table(table) => {
                Value::Array(table.to_records().into_iter().map(Value::Object).collect())
            }
        }
    }
}

impl From<Record> for FetchResult {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Table> for FetchResult {
    fn from(table: Table) -> Self {
        Self::Table(table)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_table_from_records_unions_columns() {
        let a = record(json!({"code": "sz000001", "name": "平安银行"}));
        let b = record(json!({"code": "sh600000", "market": "sh"}));
        let table = Table::from_records([&a, &b]);

        assert_eq!(table.columns, vec!["code", "name", "market"]);
        assert_eq!(table.get(1, "name"), Some(&Value::Null));
        assert_eq!(table.get(1, "market"), Some(&json!("sh")));
    }

    #[test]
    fn test_push_row_pads() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![json!(1)]);
        table.push_row(vec![json!(1), json!(2), json!(3)]);
        assert_eq!(table.rows, vec![vec![json!(1), Value::Null], vec![json!(1), json!(2)]]);
    }

    #[test]
    fn test_extend_aligns_columns() {
        let mut first = Table::new(vec!["a".into()]);
        first.push_row(vec![json!(1)]);
        let mut second = Table::new(vec!["b".into(), "a".into()]);
        second.push_row(vec![json!("x"), json!(2)]);

        first.extend(second);
        assert_eq!(first.columns, vec!["a", "b"]);
        assert_eq!(first.rows, vec![vec![json!(1), Value::Null], vec![json!(2), json!("x")]]);
    }

    #[test]
    fn test_fetch_result_json_shapes() {
        let mut table = Table::new(vec!["price".into()]);
        table.push_row(vec![json!(10.5)]);
        assert_eq!(FetchResult::Table(table).to_json(), json!([{"price": 10.5}]));

        let rec = FetchResult::from(record(json!({"company_name": "X"})));
        assert_eq!(rec.to_json(), json!({"company_name": "X"}));
        assert!(!rec.is_empty());
        assert!(FetchResult::Record(Record::new()).is_empty());
    }
}
