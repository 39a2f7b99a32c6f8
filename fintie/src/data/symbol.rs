//! Exchange-qualified instrument symbols.
//!
//! Every site wants the same instrument spelled differently:
//!
//! | Site            | Form        |
//! |-----------------|-------------|
//! | sina / qq       | `sz000001`  |
//! | xueqiu          | `SZ000001`  |
//! | 163             | `1000001`   |
//! | cninfo / exch.  | `000001`    |
//!
//! [`Symbol`] parses any of the caller-facing forms and renders the rest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::request::RequestError;
use super::Table;

// ============================================================================
// Exchange
// ============================================================================

/// Stock exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Shanghai Stock Exchange
    Sh,
    /// Shenzhen Stock Exchange
    Sz,
}

impl Exchange {
    /// Lowercase prefix ("sh" / "sz")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Sz => "sz",
        }
    }

    /// Uppercase suffix ("SH" / "SZ")
    pub fn as_upper(&self) -> &'static str {
        match self {
            Self::Sh => "SH",
            Self::Sz => "SZ",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sh" => Some(Self::Sh),
            "sz" => Some(Self::Sz),
            _ => None,
        }
    }

    /// Guess the exchange of a bare 6-digit code.
    ///
    /// Shanghai: A/B shares (`6`, `9`), funds (`5`) and bonds (`10`, `11`).
    /// Everything else is Shenzhen, including its `12` bonds.
    fn infer(code: &str) -> Self {
        if code.starts_with(['5', '6', '9']) || code.starts_with("10") || code.starts_with("11") {
            Self::Sh
        } else {
            Self::Sz
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

// ============================================================================
// Symbol Kind
// ============================================================================

/// Instrument class derived from the code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    AShare,
    BShare,
    Index,
    Etf,
    ConvertibleBond,
    Other,
}

fn classify(exchange: Exchange, code: &str) -> SymbolKind {
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| code.starts_with(p));

    match exchange {
        Exchange::Sh => {
            if starts(&["00"]) {
                SymbolKind::Index
            } else if starts(&["6"]) {
                SymbolKind::AShare
            } else if starts(&["9"]) {
                SymbolKind::BShare
            } else if starts(&["51"]) {
                SymbolKind::Etf
            } else if starts(&["100", "110", "112", "113"]) {
                SymbolKind::ConvertibleBond
            } else {
                SymbolKind::Other
            }
        }
        Exchange::Sz => {
            if starts(&["399"]) {
                SymbolKind::Index
            } else if starts(&["00", "30"]) {
                SymbolKind::AShare
            } else if starts(&["2"]) {
                SymbolKind::BShare
            } else if starts(&["15", "16"]) {
                SymbolKind::Etf
            } else if starts(&["12"]) {
                SymbolKind::ConvertibleBond
            } else {
                SymbolKind::Other
            }
        }
    }
}

// ============================================================================
// Symbol
// ============================================================================

/// An exchange-qualified 6-digit instrument code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    exchange: Exchange,
    code: String,
}

impl Symbol {
    /// Build from parts, checking the code is six ASCII digits.
    pub fn new(exchange: Exchange, code: &str) -> Result<Self, RequestError> {
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RequestError::InvalidSymbol(code.to_string()));
        }
        Ok(Self {
            exchange,
            code: code.to_string(),
        })
    }

    /// Parse `000001.sz`, `000001.SZ`, `sz000001`, `SZ000001` or a bare `000001`.
    pub fn parse(s: &str) -> Result<Self, RequestError> {
        let s = s.trim();
        let invalid = || RequestError::InvalidSymbol(s.to_string());

        if let Some((code, exch)) = s.split_once('.') {
            let exchange = Exchange::parse(exch).ok_or_else(invalid)?;
            return Self::new(exchange, code).map_err(|_| invalid());
        }

        if s.len() == 8 && s.is_char_boundary(2) {
            let (exch, code) = s.split_at(2);
            let exchange = Exchange::parse(exch).ok_or_else(invalid)?;
            return Self::new(exchange, code).map_err(|_| invalid());
        }

        if s.len() == 6 {
            return Self::new(Exchange::infer(s), s).map_err(|_| invalid());
        }

        Err(invalid())
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Bare 6-digit code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// `sz000001`
    pub fn prefixed(&self) -> String {
        format!("{}{}", self.exchange.as_str(), self.code)
    }

    /// `SZ000001`
    pub fn upper_prefixed(&self) -> String {
        format!("{}{}", self.exchange.as_upper(), self.code)
    }

    /// `000001.SZ`
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.code, self.exchange.as_upper())
    }

    /// 163 market-prefixed code: `1000001` for Shenzhen, `0600000` for Shanghai.
    pub fn netease(&self) -> String {
        let market = match self.exchange {
            Exchange::Sh => '0',
            Exchange::Sz => '1',
        };
        format!("{}{}", market, self.code)
    }

    pub fn kind(&self) -> SymbolKind {
        classify(self.exchange, &self.code)
    }

    /// Whether this symbol passes an optional kind/exchange filter.
    pub fn matches(&self, kind: Option<SymbolKind>, exchange: Option<Exchange>) -> bool {
        kind.map_or(true, |k| self.kind() == k) && exchange.map_or(true, |e| self.exchange == e)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.exchange.as_upper())
    }
}

impl FromStr for Symbol {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = RequestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.dotted()
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Keep symbols matching an optional kind and exchange.
pub fn filter_symbols(
    symbols: impl IntoIterator<Item = Symbol>,
    kind: Option<SymbolKind>,
    exchange: Option<Exchange>,
) -> Vec<Symbol> {
    symbols
        .into_iter()
        .filter(|s| s.matches(kind, exchange))
        .collect()
}

/// Keep table rows whose `column` holds a symbol matching the filter.
///
/// Rows whose cell does not parse as a symbol are dropped. A missing column
/// leaves the table unchanged.
pub fn filter_table_by_symbol(
    table: &Table,
    column: &str,
    kind: Option<SymbolKind>,
    exchange: Option<Exchange>,
) -> Table {
    let Some(idx) = table.column(column) else {
        return table.clone();
    };

    let rows = table
        .rows
        .iter()
        .filter(|row| {
            row.get(idx)
                .and_then(|v| v.as_str())
                .and_then(|s| Symbol::parse(s).ok())
                .is_some_and(|s| s.matches(kind, exchange))
        })
        .cloned()
        .collect();

    Table {
        columns: table.columns.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("000001.sz", Exchange::Sz, "000001")]
    #[test_case("000001.SZ", Exchange::Sz, "000001")]
    #[test_case("sz000001", Exchange::Sz, "000001")]
    #[test_case("SZ000001", Exchange::Sz, "000001")]
    #[test_case(" 000001 ", Exchange::Sz, "000001")]
    #[test_case("600000", Exchange::Sh, "600000")]
    #[test_case("900901", Exchange::Sh, "900901")]
    #[test_case("510300", Exchange::Sh, "510300")]
    #[test_case("300750", Exchange::Sz, "300750")]
    #[test_case("100303", Exchange::Sh, "100303")]
    #[test_case("113001", Exchange::Sh, "113001")]
    #[test_case("128001", Exchange::Sz, "128001")]
    #[test_case("159915", Exchange::Sz, "159915")]
    fn test_parse_forms(input: &str, exchange: Exchange, code: &str) {
        assert_eq!(Symbol::parse(input).unwrap(), Symbol::new(exchange, code).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("00001.SZ").is_err());
        assert!(Symbol::parse("000001.HK").is_err());
        assert!(Symbol::parse("xx000001").is_err());
        assert!(Symbol::parse("平安银行").is_err());
    }

    #[test]
    fn test_renderings() {
        let s = Symbol::parse("sh600000").unwrap();
        assert_eq!(s.prefixed(), "sh600000");
        assert_eq!(s.upper_prefixed(), "SH600000");
        assert_eq!(s.dotted(), "600000.SH");
        assert_eq!(s.netease(), "0600000");
        assert_eq!(Symbol::parse("000001.sz").unwrap().netease(), "1000001");
        assert_eq!(s.to_string(), "600000.SH");
    }

    #[test]
    fn test_kind() {
        let kind = |s: &str| Symbol::parse(s).unwrap().kind();
        assert_eq!(kind("SH600000"), SymbolKind::AShare);
        assert_eq!(kind("SH000300"), SymbolKind::Index);
        assert_eq!(kind("SZ000001"), SymbolKind::AShare);
        assert_eq!(kind("SZ300750"), SymbolKind::AShare);
        assert_eq!(kind("SZ399001"), SymbolKind::Index);
        assert_eq!(kind("SH900901"), SymbolKind::BShare);
        assert_eq!(kind("SZ200002"), SymbolKind::BShare);
        assert_eq!(kind("SH510300"), SymbolKind::Etf);
        assert_eq!(kind("SZ159915"), SymbolKind::Etf);
        assert_eq!(kind("SH113001"), SymbolKind::ConvertibleBond);
        assert_eq!(kind("SZ128002"), SymbolKind::ConvertibleBond);
    }

    #[test]
    fn test_serde_as_string() {
        let s = Symbol::parse("sz000001").unwrap();
        assert_eq!(serde_json::to_value(&s).unwrap(), json!("000001.SZ"));
        let back: Symbol = serde_json::from_value(json!("SZ000001")).unwrap();
        assert_eq!(back, s);
        assert!(serde_json::from_value::<Symbol>(json!("bogus")).is_err());
    }

    #[test]
    fn test_filter_symbols() {
        let symbols = ["SH600000", "SZ000001", "SH510300", "SZ399001"]
            .iter()
            .map(|s| Symbol::parse(s).unwrap());
        let a_sz = filter_symbols(symbols, Some(SymbolKind::AShare), Some(Exchange::Sz));
        assert_eq!(a_sz, vec![Symbol::parse("SZ000001").unwrap()]);
    }

    #[test]
    fn test_filter_table_by_symbol() {
        let mut table = Table::new(vec!["symbol".into(), "name".into()]);
        table.push_row(vec![json!("SH600000"), json!("浦发银行")]);
        table.push_row(vec![json!("SZ159915"), json!("创业板")]);
        table.push_row(vec![json!(null), json!("?")]);

        let etfs = filter_table_by_symbol(&table, "symbol", Some(SymbolKind::Etf), None);
        assert_eq!(etfs.len(), 1);
        assert_eq!(etfs.rows[0][1], json!("创业板"));

        let untouched = filter_table_by_symbol(&table, "code", Some(SymbolKind::Etf), None);
        assert_eq!(untouched.len(), 3);
    }
}
