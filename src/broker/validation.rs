//! Transaction validation
//!
//! Checks the non-negative-units invariant before normalized transactions
//! are persisted or fed to the engine: per (broker, ticker), date-sorted
//! cumulative units must never go negative. A violation aborts the import
//! unless fix mode is requested, in which case the offending rows are
//! logged and excluded.

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

use crate::error::EngineError;
use crate::model::{Transaction, TransactionType};

/// Validate a normalized transaction batch
///
/// Returns the surviving rows in their input order. With `fix` unset, the
/// first violation aborts with a `DataIntegrity` error; with `fix` set,
/// violations are excluded row by row so the rest of the batch survives.
pub fn validate(transactions: Vec<Transaction>, fix: bool) -> Result<Vec<Transaction>> {
    let today = chrono::Local::now().naive_local().date();

    // Process in (broker, ticker, date) order so the running-units check
    // sees each position's history in sequence, but keep input order in
    // the output.
    let mut order: Vec<usize> = (0..transactions.len()).collect();
    order.sort_by(|&a, &b| {
        let ta = &transactions[a];
        let tb = &transactions[b];
        (&ta.broker, &ta.ticker, ta.date).cmp(&(&tb.broker, &tb.ticker, tb.date))
    });

    let mut running: HashMap<(String, String), Decimal> = HashMap::new();
    let mut excluded = vec![false; transactions.len()];

    for idx in order {
        let tx = &transactions[idx];

        if tx.date > today {
            let message = format!(
                "{} {} on {} is dated in the future",
                tx.broker, tx.ticker, tx.date
            );
            if !fix {
                return Err(EngineError::DataIntegrity(message).into());
            }
            warn!("Excluding transaction: {}", message);
            excluded[idx] = true;
            continue;
        }

        if tx.kind.is_cash_equivalent() {
            continue;
        }

        let key = (tx.broker.clone(), tx.ticker.clone());
        let held = running.entry(key).or_insert(Decimal::ZERO);
        let after = *held + tx.units;

        if tx.kind == TransactionType::Sell && after < Decimal::ZERO {
            let message = format!(
                "sell of {} units of {} on {} exceeds {} held at {}",
                tx.units.abs(),
                tx.ticker,
                tx.date,
                held,
                tx.broker
            );
            if !fix {
                return Err(EngineError::DataIntegrity(message).into());
            }
            warn!("Excluding transaction: {}", message);
            excluded[idx] = true;
            continue;
        }

        *held = after;
    }

    Ok(transactions
        .into_iter()
        .zip(excluded)
        .filter(|(_, excluded)| !excluded)
        .map(|(tx, _)| tx)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn buy(ticker: &str, date: NaiveDate, units: Decimal, broker: &str) -> Transaction {
        Transaction::new(
            ticker,
            date,
            TransactionType::Buy,
            units,
            -units * dec!(10),
            broker,
        )
    }

    fn sell(ticker: &str, date: NaiveDate, units: Decimal, broker: &str) -> Transaction {
        Transaction::new(
            ticker,
            date,
            TransactionType::Sell,
            -units,
            units * dec!(12),
            broker,
        )
    }

    #[test]
    fn test_valid_history_passes() {
        let txs = vec![
            buy("XYZ", day(2), dec!(10), "ally"),
            sell("XYZ", day(5), dec!(10), "ally"),
        ];
        let validated = validate(txs.clone(), false).unwrap();
        assert_eq!(validated, txs);
    }

    #[test]
    fn test_oversell_aborts_without_fix() {
        let txs = vec![
            buy("XYZ", day(2), dec!(10), "ally"),
            sell("XYZ", day(5), dec!(20), "ally"),
        ];
        let err = validate(txs, false).unwrap_err();
        assert!(format!("{:?}", err).contains("data integrity"));
    }

    #[test]
    fn test_oversell_excluded_with_fix() {
        let txs = vec![
            buy("XYZ", day(2), dec!(10), "ally"),
            sell("XYZ", day(5), dec!(20), "ally"),
            buy("ABC", day(6), dec!(5), "ally"),
        ];
        let validated = validate(txs, true).unwrap();
        assert_eq!(validated.len(), 2);
        assert!(validated.iter().all(|tx| tx.kind == TransactionType::Buy));
    }

    #[test]
    fn test_brokers_are_scoped_independently() {
        // Each broker's history stands alone; selling at one broker what
        // was bought at another is an oversell.
        let txs = vec![
            buy("XYZ", day(2), dec!(10), "ally"),
            sell("XYZ", day(5), dec!(10), "fidelity"),
        ];
        assert!(validate(txs, false).is_err());
    }

    #[test]
    fn test_out_of_order_rows_are_sorted_for_the_scan() {
        // Statement sorted descending: the sell appears first in input
        // order but happens after the buy.
        let txs = vec![
            sell("XYZ", day(5), dec!(10), "ally"),
            buy("XYZ", day(2), dec!(10), "ally"),
        ];
        let validated = validate(txs, false).unwrap();
        assert_eq!(validated.len(), 2);
        // Input order preserved
        assert_eq!(validated[0].kind, TransactionType::Sell);
    }

    #[test]
    fn test_future_dated_row_excluded_with_fix() {
        let future = chrono::Local::now().naive_local().date() + chrono::Duration::days(30);
        let txs = vec![buy("XYZ", future, dec!(10), "ally")];

        assert!(validate(txs.clone(), false).is_err());
        assert_eq!(validate(txs, true).unwrap().len(), 0);
    }

    #[test]
    fn test_cash_rows_skip_unit_feasibility() {
        let txs = vec![Transaction::new(
            "Cash",
            day(2),
            TransactionType::Cash,
            dec!(-500),
            dec!(-500),
            "ally",
        )];
        // A negative cash movement is a withdrawal, not an oversell
        assert_eq!(validate(txs, false).unwrap().len(), 1);
    }
}
