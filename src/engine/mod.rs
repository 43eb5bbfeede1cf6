//! Portfolio performance engine
//!
//! Pure transforms over normalized transaction logs: running average-cost
//! positions, holdings reconciliation, market valuation, and
//! money-weighted return calculation. No stage mutates another's output;
//! every result is recomputed from the transaction history on request.

pub mod cost_basis;
pub mod holdings;
pub mod returns;
pub mod valuation;

pub use cost_basis::{AveragePosition, SaleOutcome};
pub use holdings::{daily_series, first_transaction_date, reconcile, HoldingSnapshot};
pub use returns::{lookback_start, performance, portfolio_record};
pub use valuation::{portfolio_value, snapshot_value, value, ValuationPoint};
