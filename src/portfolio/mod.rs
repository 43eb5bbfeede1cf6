//! Portfolio and manager aggregation
//!
//! A `Portfolio` scopes a normalized transaction store to a broker subset
//! and exclusion list, and decorates the engine's per-ticker performance
//! table with the synthetic cash, benchmark, and aggregate rows. A
//! `Manager` composes several named portfolios into a side-by-side
//! summary. Both are constructed per request from explicit config; no
//! module-level singletons.

use anyhow::Result;
use chrono::NaiveDate;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::broker;
use crate::config::Config;
use crate::engine;
use crate::model::{PerformanceRecord, Transaction, TransactionType, BENCHMARK_TICKER, CASH_TICKER};
use crate::pricing::PriceSeries;

/// A broker-scoped view over a normalized transaction store
#[derive(Debug, Clone)]
pub struct Portfolio {
    name: String,
    tx_file: PathBuf,
    brokers: Vec<String>,
    exclude: Vec<String>,
    benchmark: Option<String>,
}

impl Portfolio {
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let portfolio_config = config.portfolio(name)?;
        Ok(Self {
            name: name.to_string(),
            tx_file: portfolio_config.tx_file.clone(),
            brokers: portfolio_config.brokers.clone(),
            exclude: portfolio_config.exclude.clone(),
            benchmark: portfolio_config.benchmark.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn benchmark(&self) -> Option<&str> {
        self.benchmark.as_deref()
    }

    /// Load the portfolio's transactions, applying the broker filter and
    /// ticker exclusions
    ///
    /// Reloaded on every call: the store on disk is the only state.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let transactions = broker::load_store(&self.tx_file)?;
        let filtered = transactions
            .into_iter()
            .filter(|tx| self.brokers.is_empty() || self.brokers.contains(&tx.broker))
            .filter(|tx| !self.exclude.contains(&tx.ticker))
            .collect::<Vec<_>>();
        debug!(
            "Loaded {} transactions for portfolio {}",
            filtered.len(),
            self.name
        );
        Ok(filtered)
    }

    /// Tickers needing price data, benchmark included
    pub fn required_tickers(&self) -> Result<Vec<String>> {
        let transactions = self.transactions()?;
        let mut tickers: Vec<String> = transactions
            .iter()
            .filter(|tx| !tx.is_cash_row())
            .map(|tx| tx.ticker.clone())
            .chain(self.benchmark.iter().cloned())
            .unique()
            .collect();
        tickers.sort();
        Ok(tickers)
    }

    /// Per-ticker performance over the window, with synthetic rows
    ///
    /// Appends the cash balance row (when absent from the log), the
    /// benchmark replay row, and the aggregate "portfolio" row.
    pub fn get_performance(
        &self,
        prices: &PriceSeries,
        lookback_date: NaiveDate,
        as_of: NaiveDate,
    ) -> Result<Vec<PerformanceRecord>> {
        let transactions = self.transactions()?;
        let mut records = engine::performance(&transactions, prices, lookback_date, as_of)?;

        if !records.iter().any(|r| r.ticker == CASH_TICKER) {
            records.push(empty_record(CASH_TICKER, lookback_date, as_of));
        }

        records.push(self.benchmark_record(&transactions, prices, lookback_date, as_of)?);
        records.push(engine::portfolio_record(
            &transactions,
            prices,
            lookback_date,
            as_of,
        )?);

        Ok(records)
    }

    /// Replay the portfolio's dated buy/sell flows into the benchmark
    /// index and run them through the same return math
    fn benchmark_record(
        &self,
        transactions: &[Transaction],
        prices: &PriceSeries,
        lookback_date: NaiveDate,
        as_of: NaiveDate,
    ) -> Result<PerformanceRecord> {
        let Some(benchmark) = self.benchmark.as_deref() else {
            return Ok(empty_record(BENCHMARK_TICKER, lookback_date, as_of));
        };
        if !prices.has_ticker(benchmark) {
            warn!(
                "No price data for benchmark {}; reporting undefined return",
                benchmark
            );
            return Ok(empty_record(BENCHMARK_TICKER, lookback_date, as_of));
        }

        let synthetic = benchmark_transactions(transactions, benchmark, prices);
        if synthetic.is_empty() {
            return Ok(empty_record(BENCHMARK_TICKER, lookback_date, as_of));
        }

        let records = engine::performance(&synthetic, prices, lookback_date, as_of)?;
        let record = records
            .into_iter()
            .find(|r| r.ticker == benchmark)
            .map(|mut record| {
                record.ticker = BENCHMARK_TICKER.to_string();
                record
            })
            .unwrap_or_else(|| empty_record(BENCHMARK_TICKER, lookback_date, as_of));
        Ok(record)
    }
}

/// Convert each buy/sell into benchmark units at that date's price
///
/// Sells are clamped to the units the replayed position holds, so a
/// portfolio that outran the index can never drive the synthetic position
/// negative.
fn benchmark_transactions(
    transactions: &[Transaction],
    benchmark: &str,
    prices: &PriceSeries,
) -> Vec<Transaction> {
    let mut sorted: Vec<&Transaction> = transactions
        .iter()
        .filter(|tx| !tx.is_cash_row())
        .filter(|tx| matches!(tx.kind, TransactionType::Buy | TransactionType::Sell))
        .collect();
    sorted.sort_by_key(|tx| tx.date);

    let mut held = Decimal::ZERO;
    let mut synthetic = Vec::new();

    for tx in sorted {
        let Some(price) = prices.price_on(benchmark, tx.date) else {
            warn!(
                "No {} price on or before {}; dropping flow from benchmark replay",
                benchmark, tx.date
            );
            continue;
        };
        if price <= Decimal::ZERO {
            continue;
        }

        match tx.kind {
            TransactionType::Buy => {
                let units = -tx.cost / price;
                held += units;
                synthetic.push(Transaction::new(
                    benchmark,
                    tx.date,
                    TransactionType::Buy,
                    units,
                    tx.cost,
                    tx.broker.clone(),
                ));
            }
            TransactionType::Sell => {
                let desired = tx.cost / price;
                let units = desired.min(held);
                if units <= Decimal::ZERO {
                    continue;
                }
                held -= units;
                synthetic.push(Transaction::new(
                    benchmark,
                    tx.date,
                    TransactionType::Sell,
                    -units,
                    units * price,
                    tx.broker.clone(),
                ));
            }
            _ => {}
        }
    }

    synthetic
}

fn empty_record(ticker: &str, lookback_date: NaiveDate, as_of: NaiveDate) -> PerformanceRecord {
    PerformanceRecord {
        ticker: ticker.to_string(),
        date: as_of,
        lookback_date,
        average_price: Decimal::ZERO,
        last_price: Decimal::ZERO,
        cumulative_units: Decimal::ZERO,
        cumulative_cost: Decimal::ZERO,
        market_value: Decimal::ZERO,
        ret: Decimal::ZERO,
        dwrr_pct: None,
        dwrr_ann_pct: None,
        realized: Decimal::ZERO,
        unrealized: Decimal::ZERO,
    }
}

/// Money-weighted returns for one lookback window of a summary row
#[derive(Debug, Clone, Serialize)]
pub struct LookbackReturn {
    pub months: u32,
    pub dwrr_pct: Option<Decimal>,
    pub dwrr_ann_pct: Option<Decimal>,
}

/// One portfolio's line in the manager summary
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub portfolio: String,
    pub date: NaiveDate,
    pub market_value: Decimal,
    pub equity: Decimal,
    pub cash: Decimal,
    #[serde(rename = "return")]
    pub ret: Decimal,
    pub lookbacks: Vec<LookbackReturn>,
}

/// An ordered collection of named portfolios
#[derive(Debug, Clone)]
pub struct Manager {
    portfolios: Vec<Portfolio>,
}

impl Manager {
    pub fn new(portfolios: Vec<Portfolio>) -> Self {
        Self { portfolios }
    }

    /// Build a manager over every portfolio in the config, in order
    pub fn from_config(config: &Config) -> Result<Self> {
        let portfolios = config
            .names()
            .map(|name| Portfolio::from_config(config, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(portfolios))
    }

    pub fn portfolios(&self) -> &[Portfolio] {
        &self.portfolios
    }

    /// Union of tickers needing price data across constituents
    ///
    /// A portfolio whose store cannot be read is skipped with a warning;
    /// the summary will simply miss its row.
    pub fn required_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .portfolios
            .iter()
            .filter_map(|portfolio| match portfolio.required_tickers() {
                Ok(tickers) => Some(tickers),
                Err(e) => {
                    warn!("Skipping tickers for {}: {e:#}", portfolio.name());
                    None
                }
            })
            .flatten()
            .unique()
            .collect();
        tickers.sort();
        tickers
    }

    /// One summary row per portfolio, one dwrr column pair per lookback
    ///
    /// A failing constituent is logged and omitted; the other rows still
    /// come back.
    pub fn get_summary(
        &self,
        prices: &PriceSeries,
        as_of: NaiveDate,
        lookback_months: &[u32],
    ) -> Vec<SummaryRow> {
        let mut rows = Vec::new();
        for portfolio in &self.portfolios {
            match summary_row(portfolio, prices, as_of, lookback_months) {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Skipping portfolio {} in summary: {e:#}", portfolio.name()),
            }
        }
        rows
    }
}

fn summary_row(
    portfolio: &Portfolio,
    prices: &PriceSeries,
    as_of: NaiveDate,
    lookback_months: &[u32],
) -> Result<SummaryRow> {
    let transactions = portfolio.transactions()?;

    // Shared columns cover the portfolio's whole history
    let inception = engine::first_transaction_date(&transactions).unwrap_or(as_of);
    let overall = engine::portfolio_record(&transactions, prices, inception, as_of)?;

    let snapshots = engine::reconcile(&transactions, as_of)?;
    let cash = snapshots
        .get(CASH_TICKER)
        .map(|snap| snap.cost_basis)
        .unwrap_or(Decimal::ZERO);

    let mut lookbacks = Vec::new();
    for &months in lookback_months {
        let lookback_date = engine::lookback_start(as_of, months);
        let record = engine::portfolio_record(&transactions, prices, lookback_date, as_of)?;
        lookbacks.push(LookbackReturn {
            months,
            dwrr_pct: record.dwrr_pct,
            dwrr_ann_pct: record.dwrr_ann_pct,
        });
    }

    Ok(SummaryRow {
        portfolio: portfolio.name().to_string(),
        date: as_of,
        market_value: overall.market_value,
        equity: overall.market_value - cash,
        cash,
        ret: overall.ret,
        lookbacks,
    })
}
