//! Typed shapes of the normalized records that several sources share.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Company profile, identical across qq / sina / cninfo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockProfile {
    pub company_name: String,
    pub list_date: Option<NaiveDate>,
    pub website: String,
    pub intro: String,
    pub business: String,
    pub reg_addr: String,
    pub work_addr: String,
    /// IPO price in yuan
    pub issue_price: Option<f64>,
    /// Registered capital in yuan
    pub reg_cap: Option<f64>,
    pub concept: String,
    pub industry: String,
    pub found_date: Option<NaiveDate>,
}

/// One level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    /// Shares
    pub volume: f64,
}

/// Snapshot quote with five bid/ask levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentQuote {
    pub code: String,
    pub name: String,
    pub open: f64,
    /// Previous close
    pub close: f64,
    pub now: f64,
    pub high: f64,
    pub low: f64,
    pub turnover: Option<f64>,
    /// Shares
    pub volume: f64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub dt: Option<NaiveDateTime>,
}

/// Aggressor side of a trade, persisted as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TradeSide {
    Neutral,
    Buy,
    Sell,
}

impl TradeSide {
    /// Map the Chinese labels used by the tick downloads.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "买盘" => Some(Self::Buy),
            "卖盘" => Some(Self::Sell),
            "中性盘" | "中性" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl From<TradeSide> for u8 {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Neutral => 0,
            TradeSide::Buy => 1,
            TradeSide::Sell => 2,
        }
    }
}

impl TryFrom<u8> for TradeSide {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Buy),
            2 => Ok(Self::Sell),
            other => Err(format!("invalid trade side {other}")),
        }
    }
}

/// One tick trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickTrade {
    pub time: NaiveDateTime,
    pub price: f64,
    pub price_change: Option<f64>,
    /// Shares (lots × 100)
    pub volume: f64,
    pub turnover: f64,
    pub character: TradeSide,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trade_side_labels() {
        assert_eq!(TradeSide::from_label("买盘"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::from_label("卖盘"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::from_label("中性盘"), Some(TradeSide::Neutral));
        assert_eq!(TradeSide::from_label(" 中性 "), Some(TradeSide::Neutral));
        assert_eq!(TradeSide::from_label("buy"), None);
    }

    #[test]
    fn test_profile_serializes_dates_as_iso() {
        let profile = StockProfile {
            company_name: "平安银行股份有限公司".into(),
            list_date: NaiveDate::from_ymd_opt(1991, 4, 3),
            issue_price: Some(40.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["list_date"], json!("1991-04-03"));
        assert_eq!(value["found_date"], json!(null));
        assert_eq!(value["issue_price"], json!(40.0));
    }

    #[test]
    fn test_trade_side_serializes_as_number() {
        assert_eq!(serde_json::to_value(TradeSide::Sell).unwrap(), json!(2));
        let side: TradeSide = serde_json::from_value(json!(1)).unwrap();
        assert_eq!(side, TradeSide::Buy);
    }
}
