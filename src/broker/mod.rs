// Broker module - statement adapters and the normalized transaction store

pub mod ally;
pub mod fidelity;
pub mod validation;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{Transaction, TransactionType};

/// Fixed column order of the normalized transaction CSV
const STORE_COLUMNS: [&str; 6] = ["date", "ticker", "type", "units", "cost", "broker"];

/// Supported broker statement formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Ally,
    Fidelity,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Ally => "ally",
            BrokerKind::Fidelity => "fidelity",
        }
    }
}

impl FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ally" => Ok(BrokerKind::Ally),
            "fidelity" => Ok(BrokerKind::Fidelity),
            other => Err(anyhow!(
                "Unknown broker '{}'. Supported brokers: ally, fidelity",
                other
            )),
        }
    }
}

/// Normalize a raw broker statement into canonical transactions
///
/// Fails with `FileNotFound` when the statement is missing and `Parse`
/// when a required column is absent. Errors are broker-scoped: callers
/// importing several brokers continue with the others.
pub fn normalize<P: AsRef<Path>>(path: P, kind: BrokerKind) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.display().to_string()).into());
    }

    match kind {
        BrokerKind::Ally => ally::parse_statement(path, kind.as_str()),
        BrokerKind::Fidelity => fidelity::parse_statement(path, kind.as_str()),
    }
    .map_err(|e| EngineError::Parse(format!("{} statement {}: {e:#}", kind.as_str(), path.display())).into())
}

/// Normalize, validate, and optionally persist a broker statement
///
/// With an output path, the normalized rows are appended to an existing
/// store (idempotently) or written fresh. Returns the transactions now in
/// the store (or just the statement's rows when no output is given).
pub fn import<P: AsRef<Path>>(
    statement: P,
    kind: BrokerKind,
    output: Option<&Path>,
    fix: bool,
) -> Result<Vec<Transaction>> {
    let transactions = normalize(statement, kind)?;
    let transactions = validation::validate(transactions, fix)?;

    match output {
        Some(path) if path.exists() => append_store(path, transactions, kind.as_str()),
        Some(path) => {
            write_store(path, &transactions)?;
            Ok(transactions)
        }
        None => Ok(transactions),
    }
}

/// Load the normalized transaction store
pub fn load_store<P: AsRef<Path>>(path: P) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.display().to_string()).into());
    }

    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .context("Failed to open transaction store")?;

    let headers = reader
        .headers()
        .context("Failed to read store headers")?
        .clone();
    let index_of = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EngineError::Parse(format!("store column '{}' missing", name)).into())
    };
    let date_idx = index_of("date")?;
    let ticker_idx = index_of("ticker")?;
    let type_idx = index_of("type")?;
    let units_idx = index_of("units")?;
    let cost_idx = index_of("cost")?;
    let broker_idx = index_of("broker")?;

    let mut transactions = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.context("Failed to read store record")?;
        let field = |i: usize| -> Result<&str> {
            record
                .get(i)
                .ok_or_else(|| anyhow!("truncated row {}", idx + 2))
        };

        let date = NaiveDate::parse_from_str(field(date_idx)?, "%Y-%m-%d")
            .with_context(|| format!("bad date at row {}", idx + 2))?;
        let kind = field(type_idx)?
            .parse::<TransactionType>()
            .map_err(|_| EngineError::Parse(format!("bad type at row {}", idx + 2)))?;
        let units = Decimal::from_str(field(units_idx)?.trim())
            .with_context(|| format!("bad units at row {}", idx + 2))?;
        let cost = Decimal::from_str(field(cost_idx)?.trim())
            .with_context(|| format!("bad cost at row {}", idx + 2))?;

        transactions.push(Transaction::new(
            field(ticker_idx)?.to_string(),
            date,
            kind,
            units,
            cost,
            field(broker_idx)?.to_string(),
        ));
    }

    Ok(transactions)
}

/// Write the normalized store with fixed column order, newest first
pub fn write_store<P: AsRef<Path>>(path: P, transactions: &[Transaction]) -> Result<()> {
    let mut rows: Vec<&Transaction> = transactions.iter().collect();
    rows.sort_by(|a, b| (b.date, &b.ticker).cmp(&(a.date, &a.ticker)));

    let mut writer = WriterBuilder::new()
        .from_path(path.as_ref())
        .context("Failed to create transaction store")?;
    writer
        .write_record(STORE_COLUMNS)
        .context("Failed to write store header")?;

    for tx in rows {
        writer
            .write_record([
                tx.date.format("%Y-%m-%d").to_string(),
                tx.ticker.clone(),
                tx.kind.as_str().to_string(),
                tx.units.to_string(),
                tx.cost.to_string(),
                tx.broker.clone(),
            ])
            .context("Failed to write store row")?;
    }

    writer.flush().context("Failed to flush transaction store")?;
    Ok(())
}

/// Append new transactions to an existing store, idempotently
///
/// Only rows strictly newer than the store's maximum date for the same
/// broker are appended, so re-importing an overlapping statement never
/// duplicates rows. The whole file is rewritten (last writer wins);
/// serializing concurrent imports to one store is the caller's job.
pub fn append_store<P: AsRef<Path>>(
    path: P,
    transactions: Vec<Transaction>,
    broker: &str,
) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    let mut existing = load_store(path)?;

    let max_date = existing
        .iter()
        .filter(|tx| tx.broker == broker)
        .map(|tx| tx.date)
        .max();

    let new_rows: Vec<Transaction> = match max_date {
        Some(max_date) => transactions
            .into_iter()
            .filter(|tx| tx.date > max_date)
            .collect(),
        // No prior rows for this broker: everything is new
        None => transactions,
    };

    if new_rows.is_empty() {
        info!(
            "No transactions newer than the {} rows already in {}",
            broker,
            path.display()
        );
        return Ok(existing);
    }

    info!(
        "Appending {} {} rows newer than {:?} to {}",
        new_rows.len(),
        broker,
        max_date,
        path.display()
    );

    existing.extend(new_rows);
    write_store(path, &existing)?;
    Ok(existing)
}

/// Load and merge several stores, skipping missing ones with a warning
pub fn load_stores<P: AsRef<Path>>(paths: &[P]) -> Vec<Transaction> {
    let mut transactions = Vec::new();
    for path in paths {
        match load_store(path) {
            Ok(mut txs) => transactions.append(&mut txs),
            Err(e) => warn!("Skipping store {}: {e:#}", path.as_ref().display()),
        }
    }
    transactions
}
