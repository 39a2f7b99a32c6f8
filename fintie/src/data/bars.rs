//! Tick-to-bar resampling.
//!
//! Ticks are grouped into fixed intervals anchored at midnight. Each interval
//! `[start, start + interval)` becomes one bar labelled by its right edge, so
//! the 1-minute bar holding trades from 09:30:00 to 09:30:59 is `09:31:00`.
//! Bars without volume are dropped.

use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use fintie_common::util::parse_datetime;

use super::model::{TickTrade, TradeSide};
use super::Table;

pub const BAR_COLUMNS: [&str; 7] = ["time", "high", "low", "open", "close", "turnover", "volume"];

#[derive(Debug, Clone, PartialEq)]
struct Bar {
    high: f64,
    low: f64,
    open: f64,
    close: f64,
    turnover: f64,
    volume: f64,
}

impl Bar {
    fn open_with(tick: &TickTrade) -> Self {
        Self {
            high: tick.price,
            low: tick.price,
            open: tick.price,
            close: tick.price,
            turnover: tick.turnover,
            volume: tick.volume,
        }
    }

    fn push(&mut self, tick: &TickTrade) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.turnover += tick.turnover;
        self.volume += tick.volume;
    }
}

/// Right edge of the interval holding `time`.
fn bar_label(time: NaiveDateTime, interval_ms: i64) -> NaiveDateTime {
    let midnight = time.date().and_time(chrono::NaiveTime::MIN);
    let offset = (time - midnight).num_milliseconds();
    let bucket = offset.div_euclid(interval_ms);
    midnight + Duration::milliseconds((bucket + 1) * interval_ms)
}

/// Resample ticks into OHLC bars with summed turnover and volume.
///
/// Open and close follow input order within an interval, so ticks should be
/// chronological. A non-positive interval yields an empty table.
pub fn resample_ticks(ticks: &[TickTrade], interval: Duration) -> Table {
    let mut table = Table::new(BAR_COLUMNS.iter().map(|c| c.to_string()).collect());

    let interval_ms = interval.num_milliseconds();
    if interval_ms <= 0 {
        warn!(interval_ms, "Ignoring non-positive resample interval");
        return table;
    }

    let mut bars: BTreeMap<NaiveDateTime, Bar> = BTreeMap::new();
    for tick in ticks {
        bars.entry(bar_label(tick.time, interval_ms))
            .and_modify(|bar| bar.push(tick))
            .or_insert_with(|| Bar::open_with(tick));
    }

    for (label, bar) in bars.into_iter().filter(|(_, bar)| bar.volume > 0.0) {
        table.push_row(vec![
            json!(label.format("%Y-%m-%d %H:%M:%S").to_string()),
            json!(bar.high),
            json!(bar.low),
            json!(bar.open),
            json!(bar.close),
            json!(bar.turnover),
            json!(bar.volume),
        ]);
    }

    debug!(ticks = ticks.len(), bars = table.len(), "Resampled ticks");
    table
}

/// Read trades back from a normalized tick table.
///
/// Rows with an unreadable time or price are skipped.
pub fn tick_trades(table: &Table) -> Vec<TickTrade> {
    let number = |row: usize, column: &str| -> Option<f64> {
        match table.get(row, column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };

    (0..table.len())
        .filter_map(|row| {
            let time = table.get(row, "time")?.as_str().and_then(parse_datetime)?;
            let character = table
                .get(row, "character")
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok())
                .and_then(|v| TradeSide::try_from(v).ok())
                .unwrap_or(TradeSide::Neutral);
            Some(TickTrade {
                time,
                price: number(row, "price")?,
                price_change: number(row, "price_change"),
                volume: number(row, "volume").unwrap_or(0.0),
                turnover: number(row, "turnover").unwrap_or(0.0),
                character,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tick(h: u32, m: u32, s: u32, price: f64, volume: f64) -> TickTrade {
        TickTrade {
            time: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
            price,
            price_change: None,
            volume,
            turnover: price * volume,
            character: TradeSide::Buy,
        }
    }

    #[test]
    fn test_bars_labelled_by_right_edge() {
        let ticks = vec![
            tick(9, 30, 0, 10.0, 100.0),
            tick(9, 30, 20, 10.5, 200.0),
            tick(9, 30, 59, 9.75, 100.0),
            tick(9, 31, 0, 10.1, 300.0),
        ];

        let bars = resample_ticks(&ticks, Duration::minutes(1));

        assert_eq!(bars.columns, BAR_COLUMNS);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars.get(0, "time"), Some(&json!("2024-03-15 09:31:00")));
        assert_eq!(bars.get(0, "open"), Some(&json!(10.0)));
        assert_eq!(bars.get(0, "high"), Some(&json!(10.5)));
        assert_eq!(bars.get(0, "low"), Some(&json!(9.75)));
        assert_eq!(bars.get(0, "close"), Some(&json!(9.75)));
        assert_eq!(bars.get(0, "volume"), Some(&json!(400.0)));
        assert_eq!(bars.get(0, "turnover"), Some(&json!(4075.0)));
        assert_eq!(bars.get(1, "time"), Some(&json!("2024-03-15 09:32:00")));
        assert_eq!(bars.get(1, "open"), Some(&json!(10.1)));
    }

    #[test]
    fn test_wider_interval_groups_ticks() {
        let ticks = vec![
            tick(9, 30, 0, 10.0, 100.0),
            tick(9, 34, 59, 11.0, 100.0),
            tick(9, 35, 0, 12.0, 100.0),
        ];

        let bars = resample_ticks(&ticks, Duration::minutes(5));

        assert_eq!(bars.len(), 2);
        assert_eq!(bars.get(0, "time"), Some(&json!("2024-03-15 09:35:00")));
        assert_eq!(bars.get(0, "close"), Some(&json!(11.0)));
        assert_eq!(bars.get(1, "time"), Some(&json!("2024-03-15 09:40:00")));
    }

    #[test]
    fn test_single_tick() {
        let bars = resample_ticks(&[tick(14, 59, 57, 10.5, 1200.0)], Duration::minutes(1));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars.get(0, "time"), Some(&json!("2024-03-15 15:00:00")));
        for column in ["high", "low", "open", "close"] {
            assert_eq!(bars.get(0, column), Some(&json!(10.5)));
        }
    }

    #[test]
    fn test_empty_input() {
        let bars = resample_ticks(&[], Duration::minutes(1));
        assert!(bars.is_empty());
        assert_eq!(bars.columns.len(), 7);
    }

    #[test]
    fn test_zero_volume_bar_dropped() {
        let ticks = vec![
            tick(9, 30, 10, 10.0, 0.0),
            tick(9, 31, 10, 10.2, 500.0),
        ];

        let bars = resample_ticks(&ticks, Duration::minutes(1));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars.get(0, "time"), Some(&json!("2024-03-15 09:32:00")));
    }

    #[test]
    fn test_non_positive_interval() {
        let bars = resample_ticks(&[tick(9, 30, 0, 10.0, 1.0)], Duration::zero());
        assert!(bars.is_empty());
    }

    #[test]
    fn test_tick_trades_from_table() {
        let mut table = Table::new(
            ["time", "price", "price_change", "volume", "turnover", "character"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        table.push_row(vec![
            json!("2024-03-15 09:30:00"),
            json!(10.5),
            Value::Null,
            json!(300.0),
            json!(3150.0),
            json!(2),
        ]);
        table.push_row(vec![json!("not a time"), json!(1.0)]);
        table.push_row(vec![json!("2024-03-15 09:30:03"), json!("10.6"), json!("0.1"), json!("100")]);

        let trades = tick_trades(&table);

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].character, TradeSide::Sell);
        assert_eq!(trades[0].price_change, None);
        assert_eq!(trades[1].price, 10.6);
        assert_eq!(trades[1].volume, 100.0);
        assert_eq!(trades[1].character, TradeSide::Neutral);
    }
}
