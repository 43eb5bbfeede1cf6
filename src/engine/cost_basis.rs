use anyhow::Result;
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::model::{Transaction, TransactionType};

/// Outcome of matching a sale against the running position
#[derive(Debug, Clone)]
pub struct SaleOutcome {
    /// Cost basis removed pro-rata for the sold units
    pub basis_removed: Decimal,
    /// Sale proceeds minus the removed basis
    pub realized: Decimal,
}

/// Running average-cost position for a single ticker
///
/// Cost basis is a positive running scalar: purchases add the amount paid,
/// sales remove basis pro-rata to the units sold. Lot-level (FIFO/LIFO)
/// matching is intentionally not modeled.
#[derive(Debug, Clone, Default)]
pub struct AveragePosition {
    units: Decimal,
    cost_basis: Decimal,
}

impl AveragePosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> Decimal {
        self.units
    }

    pub fn cost_basis(&self) -> Decimal {
        self.cost_basis
    }

    pub fn average_price(&self) -> Decimal {
        if self.units > Decimal::ZERO {
            self.cost_basis / self.units
        } else {
            Decimal::ZERO
        }
    }

    /// Add a purchase: `units` positive, `cost` negative (outflow)
    pub fn add_purchase(&mut self, units: Decimal, cost: Decimal) {
        self.units += units;
        self.cost_basis += -cost;
    }

    /// Match a sale against the position, removing basis pro-rata
    ///
    /// `units_sold` is the positive unit count; `proceeds` the positive
    /// cash inflow. Selling more than is held is a data-integrity error,
    /// not something to silently clamp.
    pub fn remove_sale(&mut self, units_sold: Decimal, proceeds: Decimal) -> Result<SaleOutcome> {
        if units_sold > self.units {
            return Err(EngineError::DataIntegrity(format!(
                "sell of {} units exceeds {} held",
                units_sold, self.units
            ))
            .into());
        }

        let avg = self.average_price();
        let basis_removed = avg * units_sold;

        self.units -= units_sold;
        self.cost_basis -= basis_removed;

        // Fully closed position: basis resets to exactly zero
        if self.units == Decimal::ZERO {
            self.cost_basis = Decimal::ZERO;
        }

        Ok(SaleOutcome {
            basis_removed,
            realized: proceeds - basis_removed,
        })
    }

    /// Apply a normalized transaction to the position
    ///
    /// Buys and sells move units and basis; dividends and cash rows leave
    /// the position untouched (their flows are handled by the caller).
    /// Returns the sale outcome for SELL rows.
    pub fn apply(&mut self, tx: &Transaction) -> Result<Option<SaleOutcome>> {
        match tx.kind {
            TransactionType::Buy => {
                self.add_purchase(tx.units, tx.cost);
                Ok(None)
            }
            TransactionType::Sell => {
                let outcome = self.remove_sale(tx.units.abs(), tx.cost)?;
                Ok(Some(outcome))
            }
            TransactionType::Dividend | TransactionType::Cash => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn buy(units: Decimal, cost: Decimal) -> Transaction {
        Transaction::new("XYZ", day(1), TransactionType::Buy, units, cost, "test")
    }

    fn sell(units: Decimal, cost: Decimal) -> Transaction {
        Transaction::new("XYZ", day(2), TransactionType::Sell, -units, cost, "test")
    }

    #[test]
    fn test_purchase_accumulates_basis() {
        let mut pos = AveragePosition::new();
        pos.apply(&buy(dec!(100), dec!(-1000))).unwrap();
        pos.apply(&buy(dec!(50), dec!(-1000))).unwrap();

        assert_eq!(pos.units(), dec!(150));
        assert_eq!(pos.cost_basis(), dec!(2000));
        // (1000 + 1000) / 150
        assert_eq!(pos.average_price().round_dp(4), dec!(13.3333));
    }

    #[test]
    fn test_sale_removes_basis_pro_rata() {
        let mut pos = AveragePosition::new();
        pos.apply(&buy(dec!(100), dec!(-1000))).unwrap();

        let outcome = pos.apply(&sell(dec!(60), dec!(720))).unwrap().unwrap();
        assert_eq!(outcome.basis_removed, dec!(600));
        assert_eq!(outcome.realized, dec!(120));
        assert_eq!(pos.units(), dec!(40));
        assert_eq!(pos.cost_basis(), dec!(400));
    }

    #[test]
    fn test_closing_position_resets_basis() {
        let mut pos = AveragePosition::new();
        pos.apply(&buy(dec!(10), dec!(-1000))).unwrap();
        let outcome = pos.apply(&sell(dec!(10), dec!(1200))).unwrap().unwrap();

        assert_eq!(outcome.realized, dec!(200));
        assert_eq!(pos.units(), Decimal::ZERO);
        assert_eq!(pos.cost_basis(), Decimal::ZERO);
        assert_eq!(pos.average_price(), Decimal::ZERO);
    }

    #[test]
    fn test_oversell_is_integrity_error() {
        let mut pos = AveragePosition::new();
        pos.apply(&buy(dec!(10), dec!(-100))).unwrap();

        let err = pos.apply(&sell(dec!(20), dec!(240))).unwrap_err();
        assert!(err.to_string().contains("data integrity"));
    }

    #[test]
    fn test_dividends_leave_position_untouched() {
        let mut pos = AveragePosition::new();
        pos.apply(&buy(dec!(10), dec!(-100))).unwrap();
        let div = Transaction::new(
            "XYZ",
            day(3),
            TransactionType::Dividend,
            dec!(5),
            dec!(5),
            "test",
        );
        pos.apply(&div).unwrap();

        assert_eq!(pos.units(), dec!(10));
        assert_eq!(pos.cost_basis(), dec!(100));
    }
}
