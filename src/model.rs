use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ticker used for cash movements and the cash balance row
pub const CASH_TICKER: &str = "Cash";

/// Ticker of the synthetic benchmark row in performance tables
pub const BENCHMARK_TICKER: &str = "benchmark";

/// Ticker of the synthetic aggregate row in performance tables
pub const PORTFOLIO_TICKER: &str = "portfolio";

/// Canonical transaction type
///
/// Broker statements carry free-form activity labels ("Bought", "YOU SOLD",
/// "Cash Movement"); each broker adapter owns a fixed lookup table mapping
/// its labels into this set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
    Dividend,
    Cash,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::Dividend => "DIVIDEND",
            TransactionType::Cash => "CASH",
        }
    }

    /// Cash-equivalent rows carry no separate unit count (units == cost)
    pub fn is_cash_equivalent(&self) -> bool {
        matches!(self, TransactionType::Dividend | TransactionType::Cash)
    }
}

impl FromStr for TransactionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            "DIVIDEND" => Ok(TransactionType::Dividend),
            "CASH" => Ok(TransactionType::Cash),
            _ => Err(()),
        }
    }
}

/// A normalized brokerage transaction
///
/// `units` is signed (negative for SELL); `cost` is signed from the
/// account's point of view: negative for outflows (purchases), positive
/// for inflows (sale proceeds, dividends, deposits).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub ticker: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub units: Decimal,
    pub cost: Decimal,
    pub broker: String,
}

impl Transaction {
    pub fn new(
        ticker: impl Into<String>,
        date: NaiveDate,
        kind: TransactionType,
        units: Decimal,
        cost: Decimal,
        broker: impl Into<String>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            date,
            kind,
            units,
            cost,
            broker: broker.into(),
        }
    }

    pub fn is_cash_row(&self) -> bool {
        self.ticker == CASH_TICKER
    }
}

/// Per-ticker performance over a lookback window
///
/// `dwrr_pct` and `dwrr_ann_pct` are `None` when the return is undefined
/// (no units and no flows in the window) - reporting zero there would
/// falsely imply a flat position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub lookback_date: NaiveDate,
    pub average_price: Decimal,
    pub last_price: Decimal,
    pub cumulative_units: Decimal,
    pub cumulative_cost: Decimal,
    pub market_value: Decimal,
    #[serde(rename = "return")]
    pub ret: Decimal,
    pub dwrr_pct: Option<Decimal>,
    pub dwrr_ann_pct: Option<Decimal>,
    pub realized: Decimal,
    pub unrealized: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_transaction_type_roundtrip() {
        for kind in [
            TransactionType::Buy,
            TransactionType::Sell,
            TransactionType::Dividend,
            TransactionType::Cash,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_transaction_type_rejects_unknown() {
        assert!("TRANSFER".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_cash_equivalent_types() {
        assert!(TransactionType::Dividend.is_cash_equivalent());
        assert!(TransactionType::Cash.is_cash_equivalent());
        assert!(!TransactionType::Buy.is_cash_equivalent());
        assert!(!TransactionType::Sell.is_cash_equivalent());
    }

    #[test]
    fn test_cash_row_detection() {
        let tx = Transaction::new(
            CASH_TICKER,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            TransactionType::Cash,
            Decimal::from(100),
            Decimal::from(100),
            "ally",
        );
        assert!(tx.is_cash_row());
    }
}
