use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::engine::holdings::HoldingSnapshot;
use crate::model::CASH_TICKER;
use crate::pricing::PriceSeries;

/// Market value of a ticker on a single date
#[derive(Debug, Clone, PartialEq)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub market_value: Decimal,
}

/// Market value of one holding snapshot
///
/// Uses the most recent price at or before the snapshot date. Cash is
/// valued at its balance (no price lookup). A held position with no price
/// available falls back to its average cost.
pub fn snapshot_value(ticker: &str, snapshot: &HoldingSnapshot, prices: &PriceSeries) -> Decimal {
    if ticker == CASH_TICKER {
        return snapshot.cost_basis;
    }
    if snapshot.units == Decimal::ZERO {
        return Decimal::ZERO;
    }
    let price = prices
        .price_on(ticker, snapshot.date)
        .unwrap_or(snapshot.average_price);
    snapshot.units * price
}

/// Daily market-value series per ticker from dense holding series
pub fn value(
    holdings: &BTreeMap<String, Vec<HoldingSnapshot>>,
    prices: &PriceSeries,
) -> BTreeMap<String, Vec<ValuationPoint>> {
    holdings
        .iter()
        .map(|(ticker, series)| {
            let points = series
                .iter()
                .map(|snapshot| ValuationPoint {
                    date: snapshot.date,
                    market_value: snapshot_value(ticker, snapshot, prices),
                })
                .collect();
            (ticker.clone(), points)
        })
        .collect()
}

/// Aggregate portfolio market value for one date's snapshots
///
/// Sum across tickers; the cash ticker contributes its balance since cash
/// has no separate price.
pub fn portfolio_value(
    snapshots: &BTreeMap<String, HoldingSnapshot>,
    prices: &PriceSeries,
) -> Decimal {
    snapshots
        .iter()
        .map(|(ticker, snapshot)| snapshot_value(ticker, snapshot, prices))
        .sum()
}
