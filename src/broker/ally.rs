use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::model::{Transaction, TransactionType, CASH_TICKER};

/// Fixed lookup table for Ally activity labels
fn map_activity(label: &str) -> Option<TransactionType> {
    match label {
        "Bought" => Some(TransactionType::Buy),
        "Sold" => Some(TransactionType::Sell),
        "Dividend" => Some(TransactionType::Dividend),
        "Cash Movement" => Some(TransactionType::Cash),
        _ => None,
    }
}

#[derive(Debug)]
struct ColumnMapping {
    date: usize,
    activity: usize,
    sym: usize,
    qty: usize,
    amount: usize,
}

fn find_columns(headers: &csv::StringRecord) -> Result<ColumnMapping> {
    let mut date_idx = None;
    let mut activity_idx = None;
    let mut sym_idx = None;
    let mut qty_idx = None;
    let mut amount_idx = None;

    for (idx, header) in headers.iter().enumerate() {
        let text = header.trim().to_lowercase().replace(' ', "_");

        match text.as_str() {
            "date" => date_idx = Some(idx),
            "activity" => activity_idx = Some(idx),
            "sym" | "symbol" => sym_idx = Some(idx),
            "qty" | "quantity" => qty_idx = Some(idx),
            "amount" => amount_idx = Some(idx),
            _ => {}
        }
    }

    Ok(ColumnMapping {
        date: date_idx.ok_or_else(|| anyhow!("Date column not found"))?,
        activity: activity_idx.ok_or_else(|| anyhow!("Activity column not found"))?,
        sym: sym_idx.ok_or_else(|| anyhow!("Symbol column not found"))?,
        qty: qty_idx.ok_or_else(|| anyhow!("Quantity column not found"))?,
        amount: amount_idx.ok_or_else(|| anyhow!("Amount column not found"))?,
    })
}

/// Parse an Ally activity export into normalized transactions
///
/// Download path: ally.com -> Holdings & Activity -> Activity -> copy to
/// .csv (UTF-8). Rows with activity labels outside the lookup table are
/// skipped with a warning.
pub fn parse_statement<P: AsRef<Path>>(path: P, broker: &str) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    info!("Parsing Ally statement: {:?}", path);

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .context("Failed to open statement file")?;

    let headers = reader
        .headers()
        .context("Failed to read statement headers")?
        .clone();
    debug!("Statement headers: {:?}", headers);

    let mapping = find_columns(&headers)?;

    let mut transactions = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.context("Failed to read statement record")?;
        match parse_row(&record, &mapping, broker, idx + 2) {
            Ok(Some(tx)) => transactions.push(tx),
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping row {}: {}", idx + 2, e);
                continue;
            }
        }
    }

    info!(
        "Parsed {} transactions from Ally statement",
        transactions.len()
    );
    Ok(transactions)
}

fn parse_row(
    record: &csv::StringRecord,
    mapping: &ColumnMapping,
    broker: &str,
    row_num: usize,
) -> Result<Option<Transaction>> {
    let activity = record
        .get(mapping.activity)
        .ok_or_else(|| anyhow!("Missing activity at row {}", row_num))?
        .trim();

    let Some(kind) = map_activity(activity) else {
        warn!("Unmapped Ally activity '{}' at row {}", activity, row_num);
        return Ok(None);
    };

    let date_str = record
        .get(mapping.date)
        .ok_or_else(|| anyhow!("Missing date at row {}", row_num))?
        .trim();
    let date = parse_date(date_str)?;

    let amount = parse_amount(
        record
            .get(mapping.amount)
            .ok_or_else(|| anyhow!("Missing amount at row {}", row_num))?,
    )?;

    let ticker = if kind == TransactionType::Cash {
        CASH_TICKER.to_string()
    } else {
        let sym = record
            .get(mapping.sym)
            .ok_or_else(|| anyhow!("Missing symbol at row {}", row_num))?
            .trim()
            .to_uppercase();
        if sym.is_empty() {
            return Ok(None);
        }
        sym
    };

    // Cash-equivalent rows carry the cash amount as their unit count
    let units = if kind.is_cash_equivalent() {
        amount
    } else {
        let qty = parse_amount(
            record
                .get(mapping.qty)
                .ok_or_else(|| anyhow!("Missing quantity at row {}", row_num))?,
        )?;
        match kind {
            TransactionType::Sell => -qty.abs(),
            _ => qty.abs(),
        }
    };

    Ok(Some(Transaction::new(
        ticker, date, kind, units, amount, broker,
    )))
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%m/%d/%Y") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    Err(anyhow!("Could not parse date: {}", text))
}

fn parse_amount(text: &str) -> Result<Decimal> {
    let cleaned = text
        .trim()
        .replace('$', "")
        .replace(',', "")
        .replace('(', "-")
        .replace(')', "");
    Decimal::from_str(&cleaned).with_context(|| format!("Failed to parse amount: {}", text))
}
