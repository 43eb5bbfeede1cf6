use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::engine::cost_basis::AveragePosition;
use crate::model::{Transaction, CASH_TICKER};

/// Point-in-time holding state for a ticker
///
/// Derived deterministically from the transaction log up to `date`;
/// never persisted as mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingSnapshot {
    pub date: NaiveDate,
    pub units: Decimal,
    pub cost_basis: Decimal,
    pub average_price: Decimal,
}

impl HoldingSnapshot {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            units: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            average_price: Decimal::ZERO,
        }
    }
}

/// Derive a holding snapshot per ticker as of `as_of`
///
/// Transactions are grouped by ticker and scanned date-ascending through
/// the running average-cost position. The cash ticker is a plain running
/// balance (units == cost for cash-equivalent rows). Tickers whose
/// positions have been fully closed still appear, with zeroed holdings.
pub fn reconcile(
    transactions: &[Transaction],
    as_of: NaiveDate,
) -> Result<BTreeMap<String, HoldingSnapshot>> {
    let mut snapshots = BTreeMap::new();

    for (ticker, txs) in group_by_ticker(transactions) {
        let snapshot = scan_ticker(&ticker, &txs, as_of)
            .with_context(|| format!("failed to reconcile holdings for {}", ticker))?;
        snapshots.insert(ticker, snapshot);
    }

    Ok(snapshots)
}

/// Dense daily holding series per ticker over `[from, to]`
///
/// Snapshot values are forward-filled across calendar gaps, so every
/// ticker has exactly one snapshot per day in the range.
pub fn daily_series(
    transactions: &[Transaction],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<BTreeMap<String, Vec<HoldingSnapshot>>> {
    let mut result = BTreeMap::new();

    for (ticker, txs) in group_by_ticker(transactions) {
        // Incremental walk: one pass over transactions, one snapshot per day
        let mut series = Vec::new();
        let mut position = AveragePosition::new();
        let mut cash_balance = Decimal::ZERO;
        let mut idx = 0;
        let mut day = from;
        while day <= to {
            while idx < txs.len() && txs[idx].date <= day {
                apply_tx(&ticker, &txs[idx], &mut position, &mut cash_balance)?;
                idx += 1;
            }
            series.push(snapshot_of(&ticker, day, &position, cash_balance));
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        result.insert(ticker, series);
    }

    Ok(result)
}

fn group_by_ticker(transactions: &[Transaction]) -> BTreeMap<String, Vec<Transaction>> {
    let mut groups: BTreeMap<String, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        groups.entry(tx.ticker.clone()).or_default().push(tx.clone());
    }
    for txs in groups.values_mut() {
        txs.sort_by_key(|tx| tx.date);
    }
    groups
}

fn scan_ticker(ticker: &str, txs: &[Transaction], as_of: NaiveDate) -> Result<HoldingSnapshot> {
    let mut position = AveragePosition::new();
    let mut cash_balance = Decimal::ZERO;

    for tx in txs.iter().filter(|tx| tx.date <= as_of) {
        apply_tx(ticker, tx, &mut position, &mut cash_balance)?;
    }

    Ok(snapshot_of(ticker, as_of, &position, cash_balance))
}

fn apply_tx(
    ticker: &str,
    tx: &Transaction,
    position: &mut AveragePosition,
    cash_balance: &mut Decimal,
) -> Result<()> {
    if ticker == CASH_TICKER {
        *cash_balance += tx.units;
    } else {
        position.apply(tx)?;
    }
    Ok(())
}

fn snapshot_of(
    ticker: &str,
    date: NaiveDate,
    position: &AveragePosition,
    cash_balance: Decimal,
) -> HoldingSnapshot {
    if ticker == CASH_TICKER {
        HoldingSnapshot {
            date,
            units: cash_balance,
            cost_basis: cash_balance,
            average_price: if cash_balance > Decimal::ZERO {
                Decimal::ONE
            } else {
                Decimal::ZERO
            },
        }
    } else if position.units() > Decimal::ZERO {
        HoldingSnapshot {
            date,
            units: position.units(),
            cost_basis: position.cost_basis(),
            average_price: position.average_price(),
        }
    } else {
        HoldingSnapshot::empty(date)
    }
}

/// Earliest transaction date in a log, if any
pub fn first_transaction_date(transactions: &[Transaction]) -> Option<NaiveDate> {
    transactions.iter().map(|tx| tx.date).min()
}
