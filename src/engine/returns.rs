use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::engine::cost_basis::AveragePosition;
use crate::engine::holdings::{self, HoldingSnapshot};
use crate::engine::valuation::{portfolio_value, snapshot_value};
use crate::model::{PerformanceRecord, Transaction, TransactionType, CASH_TICKER, PORTFOLIO_TICKER};
use crate::pricing::PriceSeries;

/// Convergence tolerance for the rate solve
const RATE_TOLERANCE: f64 = 1e-9;
/// Iteration cap for the rate solve
const MAX_ITERATIONS: usize = 200;
/// Bracket expansion candidates for the upper rate bound
const RATE_BRACKETS: [f64; 4] = [1.0, 10.0, 100.0, 1000.0];

/// A dated cash flow inside a lookback window
///
/// `days` counts from the window start; `amount` is signed from the
/// position's point of view: negative when money enters the position,
/// positive when money leaves it toward the investor.
#[derive(Debug, Clone, Copy)]
struct WindowFlow {
    days: i64,
    amount: f64,
}

/// Window start for an N-month lookback ending at `as_of`
pub fn lookback_start(as_of: NaiveDate, months: u32) -> NaiveDate {
    as_of
        .checked_sub_months(Months::new(months))
        .unwrap_or(as_of)
}

/// Per-ticker performance records over `[lookback_date, as_of]`
///
/// Every ticker present in the transaction log gets a row, including the
/// cash ticker and fully closed positions. `dwrr_pct` is `None` for
/// tickers with no value and no flows inside the window.
pub fn performance(
    transactions: &[Transaction],
    prices: &PriceSeries,
    lookback_date: NaiveDate,
    as_of: NaiveDate,
) -> Result<Vec<PerformanceRecord>> {
    let start_snapshots = holdings::reconcile(transactions, lookback_date)?;
    let end_snapshots = holdings::reconcile(transactions, as_of)?;

    let mut records = Vec::new();
    for (ticker, end_snap) in &end_snapshots {
        let start_snap = start_snapshots.get(ticker);
        let record = ticker_record(
            ticker,
            transactions,
            prices,
            lookback_date,
            as_of,
            start_snap,
            end_snap,
        )
        .with_context(|| format!("failed to compute performance for {}", ticker))?;
        records.push(record);
    }

    Ok(records)
}

/// Aggregate record across all tickers (the synthetic "portfolio" row)
///
/// Market value is the sum over ticker rows (cash at its balance); the
/// rate of return is solved over the union of every ticker's window flows.
pub fn portfolio_record(
    transactions: &[Transaction],
    prices: &PriceSeries,
    lookback_date: NaiveDate,
    as_of: NaiveDate,
) -> Result<PerformanceRecord> {
    let start_snapshots = holdings::reconcile(transactions, lookback_date)?;
    let end_snapshots = holdings::reconcile(transactions, as_of)?;

    let mv_start = portfolio_value(&start_snapshots, prices);
    let mv_end = portfolio_value(&end_snapshots, prices);
    let basis_end: Decimal = end_snapshots.values().map(|s| s.cost_basis).sum();
    let units_end: Decimal = end_snapshots
        .iter()
        .filter(|(ticker, _)| ticker.as_str() != CASH_TICKER)
        .map(|(_, s)| s.units)
        .sum();

    let mut realized = Decimal::ZERO;
    let mut flows = Vec::new();
    for ticker in end_snapshots.keys() {
        let (ticker_realized, ticker_flows) =
            window_activity(ticker, transactions, lookback_date, as_of)?;
        realized += ticker_realized;
        flows.extend(ticker_flows);
    }

    let unrealized = mv_end - basis_end;
    let window_days = (as_of - lookback_date).num_days();
    let dwrr_pct = solve_window_return(mv_start, mv_end, &flows, window_days);

    Ok(PerformanceRecord {
        ticker: PORTFOLIO_TICKER.to_string(),
        date: as_of,
        lookback_date,
        average_price: Decimal::ZERO,
        last_price: Decimal::ZERO,
        cumulative_units: units_end,
        cumulative_cost: basis_end,
        market_value: mv_end,
        ret: realized + unrealized,
        dwrr_pct,
        dwrr_ann_pct: annualize(dwrr_pct, window_days),
        realized,
        unrealized,
    })
}

#[allow(clippy::too_many_arguments)]
fn ticker_record(
    ticker: &str,
    transactions: &[Transaction],
    prices: &PriceSeries,
    lookback_date: NaiveDate,
    as_of: NaiveDate,
    start_snap: Option<&HoldingSnapshot>,
    end_snap: &HoldingSnapshot,
) -> Result<PerformanceRecord> {
    let mv_start = start_snap
        .map(|snap| snapshot_value(ticker, snap, prices))
        .unwrap_or(Decimal::ZERO);
    let mv_end = snapshot_value(ticker, end_snap, prices);

    let (realized, flows) = window_activity(ticker, transactions, lookback_date, as_of)?;
    let unrealized = mv_end - end_snap.cost_basis;

    let window_days = (as_of - lookback_date).num_days();
    let dwrr_pct = solve_window_return(mv_start, mv_end, &flows, window_days);

    let last_price = if ticker == CASH_TICKER {
        Decimal::ONE
    } else {
        prices
            .price_on(ticker, as_of)
            .unwrap_or(end_snap.average_price)
    };

    Ok(PerformanceRecord {
        ticker: ticker.to_string(),
        date: as_of,
        lookback_date,
        average_price: end_snap.average_price,
        last_price,
        cumulative_units: end_snap.units,
        cumulative_cost: end_snap.cost_basis,
        market_value: mv_end,
        ret: realized + unrealized,
        dwrr_pct,
        dwrr_ann_pct: annualize(dwrr_pct, window_days),
        realized,
        unrealized,
    })
}

/// Realized gains and signed flows for one ticker inside the window
///
/// Sales are replayed through the running average-cost position from the
/// start of the log so that basis removal matches the reconciler exactly;
/// only sales dated inside the window count toward `realized`.
fn window_activity(
    ticker: &str,
    transactions: &[Transaction],
    lookback_date: NaiveDate,
    as_of: NaiveDate,
) -> Result<(Decimal, Vec<WindowFlow>)> {
    let mut txs: Vec<&Transaction> = transactions
        .iter()
        .filter(|tx| tx.ticker == ticker)
        .collect();
    txs.sort_by_key(|tx| tx.date);

    let mut position = AveragePosition::new();
    let mut realized = Decimal::ZERO;
    let mut flows = Vec::new();

    for tx in txs {
        let in_window = tx.date > lookback_date && tx.date <= as_of;

        if ticker == CASH_TICKER {
            // Deposits are money entering the cash position
            if in_window {
                flows.push(flow_at(tx.date, lookback_date, -tx.cost)?);
            }
            continue;
        }

        let outcome = position.apply(tx)?;
        if !in_window {
            continue;
        }
        if let Some(outcome) = outcome {
            realized += outcome.realized;
        }
        match tx.kind {
            TransactionType::Buy | TransactionType::Sell | TransactionType::Dividend => {
                flows.push(flow_at(tx.date, lookback_date, tx.cost)?);
            }
            TransactionType::Cash => {}
        }
    }

    Ok((realized, flows))
}

fn flow_at(date: NaiveDate, lookback_date: NaiveDate, amount: Decimal) -> Result<WindowFlow> {
    let amount = amount
        .to_f64()
        .with_context(|| format!("flow amount {} not representable", amount))?;
    Ok(WindowFlow {
        days: (date - lookback_date).num_days(),
        amount,
    })
}

/// Solve the money-weighted return over one window
///
/// The flow sequence is bounded by the window's opening market value as a
/// synthetic investment and its closing market value as a synthetic
/// payout; the rate returned is the one that zeroes the net present value
/// of the whole sequence. `None` when the return is undefined (no value
/// and no flows) or no root exists.
fn solve_window_return(
    mv_start: Decimal,
    mv_end: Decimal,
    flows: &[WindowFlow],
    window_days: i64,
) -> Option<Decimal> {
    if window_days <= 0 {
        return None;
    }
    let no_flows = flows.iter().all(|f| f.amount == 0.0);
    if mv_start == Decimal::ZERO && mv_end == Decimal::ZERO && no_flows {
        return None;
    }

    let mut sequence = Vec::with_capacity(flows.len() + 2);
    sequence.push(WindowFlow {
        days: 0,
        amount: -mv_start.to_f64()?,
    });
    sequence.extend_from_slice(flows);
    sequence.push(WindowFlow {
        days: window_days,
        amount: mv_end.to_f64()?,
    });

    let rate = solve_rate(&sequence, window_days)?;
    Decimal::from_f64_retain(rate).map(|d| d.round_dp(8))
}

/// Annualized return compounded to a 365-day basis
fn annualize(dwrr_pct: Option<Decimal>, window_days: i64) -> Option<Decimal> {
    let rate = dwrr_pct?.to_f64()?;
    if window_days <= 0 {
        return None;
    }
    let annual = (1.0 + rate).powf(365.0 / window_days as f64) - 1.0;
    Decimal::from_f64_retain(annual).map(|d| d.round_dp(8))
}

/// Net present value of a flow sequence at window rate `r`
fn npv(flows: &[WindowFlow], rate: f64, window_days: i64) -> f64 {
    flows
        .iter()
        .map(|flow| {
            let t = flow.days as f64 / window_days as f64;
            flow.amount / (1.0 + rate).powf(t)
        })
        .sum()
}

/// Bracketed bisection on the NPV function
///
/// Requires a sign change across the bracket; the upper bound expands
/// through `RATE_BRACKETS` until one is found. Returns `None` when the
/// flow pattern admits no root (e.g. all flows one-signed).
fn solve_rate(flows: &[WindowFlow], window_days: i64) -> Option<f64> {
    let f = |r: f64| npv(flows, r, window_days);

    let mut lo = -0.999_999;
    let f_lo = f(lo);
    if f_lo.abs() < RATE_TOLERANCE {
        return Some(lo);
    }

    let mut hi = None;
    for candidate in RATE_BRACKETS {
        if f_lo * f(candidate) <= 0.0 {
            hi = Some(candidate);
            break;
        }
    }
    let mut hi = match hi {
        Some(hi) => hi,
        None => {
            debug!("no sign change in NPV across rate brackets; return undefined");
            return None;
        }
    };

    for _ in 0..MAX_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        let f_mid = f(mid);

        if f_mid.abs() < RATE_TOLERANCE || (hi - lo) / 2.0 < RATE_TOLERANCE {
            return Some(mid);
        }

        if f_mid * f(lo) < 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    Some((lo + hi) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn buy(ticker: &str, on: NaiveDate, units: Decimal, cost: Decimal) -> Transaction {
        Transaction::new(ticker, on, TransactionType::Buy, units, cost, "test")
    }

    fn sell(ticker: &str, on: NaiveDate, units: Decimal, cost: Decimal) -> Transaction {
        Transaction::new(ticker, on, TransactionType::Sell, -units, cost, "test")
    }

    fn dividend(ticker: &str, on: NaiveDate, amount: Decimal) -> Transaction {
        Transaction::new(ticker, on, TransactionType::Dividend, amount, amount, "test")
    }

    fn find<'a>(records: &'a [PerformanceRecord], ticker: &str) -> &'a PerformanceRecord {
        records.iter().find(|r| r.ticker == ticker).unwrap()
    }

    #[test]
    fn test_closed_position_example() {
        // BUY 10 @ -1000 day 0, DIVIDEND +20 day 30, SELL 10 @ +1200 day 60
        let start = date(2024, 1, 1);
        let txs = vec![
            buy("XYZ", start, dec!(10), dec!(-1000)),
            dividend("XYZ", date(2024, 1, 31), dec!(20)),
            sell("XYZ", date(2024, 3, 1), dec!(10), dec!(1200)),
        ];
        let prices = PriceSeries::new(); // no price data; position is closed

        let records = performance(&txs, &prices, date(2023, 12, 31), date(2024, 3, 1)).unwrap();
        let record = find(&records, "XYZ");

        assert_eq!(record.realized, dec!(200));
        assert_eq!(record.unrealized, Decimal::ZERO);
        assert_eq!(record.cumulative_units, Decimal::ZERO);
        assert_eq!(record.ret, dec!(200));
    }

    #[test]
    fn test_return_is_realized_plus_unrealized() {
        let start = date(2024, 1, 2);
        let txs = vec![
            buy("XYZ", start, dec!(100), dec!(-1000)),
            sell("XYZ", date(2024, 2, 1), dec!(40), dec!(480)),
        ];
        let mut prices = PriceSeries::new();
        prices.insert("XYZ", date(2024, 3, 1), dec!(13));

        let records = performance(&txs, &prices, date(2024, 1, 1), date(2024, 3, 1)).unwrap();
        let record = find(&records, "XYZ");

        // realized: 480 - 400 basis; unrealized: 60 units * 13 - 600 basis
        assert_eq!(record.realized, dec!(80));
        assert_eq!(record.unrealized, dec!(180));
        assert_eq!(record.ret, record.realized + record.unrealized);
    }

    #[test]
    fn test_no_activity_ticker_has_null_return() {
        let txs = vec![
            buy("XYZ", date(2022, 1, 10), dec!(10), dec!(-1000)),
            sell("XYZ", date(2022, 6, 10), dec!(10), dec!(900)),
        ];
        let prices = PriceSeries::new();

        // Window long after the position closed: no value, no flows
        let records = performance(&txs, &prices, date(2024, 1, 1), date(2024, 6, 1)).unwrap();
        let record = find(&records, "XYZ");

        assert_eq!(record.dwrr_pct, None);
        assert_eq!(record.dwrr_ann_pct, None);
    }

    #[test]
    fn test_dwrr_single_flow_full_window() {
        // Invest 1000 at window start, worth 1100 at window end: 10%
        let as_of = date(2024, 12, 31);
        let lookback = date(2023, 12, 31);
        let txs = vec![buy("XYZ", date(2024, 1, 1), dec!(10), dec!(-1000))];
        let mut prices = PriceSeries::new();
        prices.insert("XYZ", as_of, dec!(110));

        let records = performance(&txs, &prices, lookback, as_of).unwrap();
        let record = find(&records, "XYZ");

        let dwrr = record.dwrr_pct.unwrap().to_f64().unwrap();
        assert!((dwrr - 0.10).abs() < 1e-3, "dwrr was {}", dwrr);
    }

    #[test]
    fn test_annualization_identity_for_365_day_window() {
        let as_of = date(2024, 12, 31);
        let lookback = as_of - chrono::Duration::days(365);
        let txs = vec![buy("XYZ", lookback + chrono::Duration::days(1), dec!(10), dec!(-1000))];
        let mut prices = PriceSeries::new();
        prices.insert("XYZ", as_of, dec!(120));

        let records = performance(&txs, &prices, lookback, as_of).unwrap();
        let record = find(&records, "XYZ");

        assert_eq!(record.dwrr_pct.is_some(), true);
        assert_eq!(record.dwrr_pct, record.dwrr_ann_pct);
    }

    #[test]
    fn test_cash_ticker_flat_return() {
        let txs = vec![Transaction::new(
            CASH_TICKER,
            date(2024, 3, 1),
            TransactionType::Cash,
            dec!(5000),
            dec!(5000),
            "test",
        )];
        let prices = PriceSeries::new();

        let records = performance(&txs, &prices, date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let record = find(&records, CASH_TICKER);

        assert_eq!(record.market_value, dec!(5000));
        assert_eq!(record.ret, Decimal::ZERO);
        let dwrr = record.dwrr_pct.unwrap().to_f64().unwrap();
        assert!(dwrr.abs() < 1e-6, "cash dwrr was {}", dwrr);
    }

    #[test]
    fn test_portfolio_record_sums_market_values() {
        let as_of = date(2024, 6, 28);
        let lookback = date(2024, 1, 1);
        let txs = vec![
            buy("XYZ", date(2024, 1, 10), dec!(10), dec!(-1000)),
            buy("ABC", date(2024, 2, 10), dec!(20), dec!(-400)),
            Transaction::new(
                CASH_TICKER,
                date(2024, 1, 5),
                TransactionType::Cash,
                dec!(2000),
                dec!(2000),
                "test",
            ),
        ];
        let mut prices = PriceSeries::new();
        prices.insert("XYZ", as_of, dec!(110));
        prices.insert("ABC", as_of, dec!(25));

        let records = performance(&txs, &prices, lookback, as_of).unwrap();
        let total: Decimal = records.iter().map(|r| r.market_value).sum();

        let portfolio = portfolio_record(&txs, &prices, lookback, as_of).unwrap();
        assert_eq!(portfolio.market_value, total);
        assert_eq!(portfolio.ret, portfolio.realized + portfolio.unrealized);
    }

    #[test]
    fn test_lookback_start() {
        assert_eq!(lookback_start(date(2024, 3, 31), 1), date(2024, 2, 29));
        assert_eq!(lookback_start(date(2024, 6, 15), 12), date(2023, 6, 15));
    }

    #[test]
    fn test_solve_rate_no_bracket_is_none() {
        // All flows positive: no root exists
        let flows = vec![
            WindowFlow { days: 0, amount: 100.0 },
            WindowFlow { days: 365, amount: 100.0 },
        ];
        assert_eq!(solve_rate(&flows, 365), None);
    }
}
