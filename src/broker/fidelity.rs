use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::model::{Transaction, TransactionType, CASH_TICKER};

/// Fixed lookup table for Fidelity action descriptions
///
/// Fidelity actions are verbose free text ("YOU BOUGHT PROSPECTUS UNDER
/// SEPARATE COVER ..."), matched by substring. Later entries win when more
/// than one pattern matches, so REINVESTMENT overrides the DIVIDEND tag on
/// dividend-reinvestment rows.
const TYPE_LOOKUP: [(&str, TransactionType); 5] = [
    ("DIVIDEND", TransactionType::Dividend),
    ("CASH DISTRIBUTN", TransactionType::Cash),
    ("YOU BOUGHT", TransactionType::Buy),
    ("REINVESTMENT", TransactionType::Buy),
    ("YOU SOLD", TransactionType::Sell),
];

fn map_action(action: &str) -> Option<TransactionType> {
    let upper = action.to_uppercase();
    let mut kind = None;
    for (pattern, mapped) in TYPE_LOOKUP {
        if upper.contains(pattern) {
            kind = Some(mapped);
        }
    }
    kind
}

#[derive(Debug)]
struct ColumnMapping {
    run_date: usize,
    action: usize,
    symbol: usize,
    quantity: usize,
    amount: usize,
}

fn find_columns(headers: &csv::StringRecord) -> Result<ColumnMapping> {
    let mut run_date_idx = None;
    let mut action_idx = None;
    let mut symbol_idx = None;
    let mut quantity_idx = None;
    let mut amount_idx = None;

    for (idx, header) in headers.iter().enumerate() {
        let text = header.trim().to_lowercase().replace(' ', "_");

        if text == "run_date" || text == "date" {
            run_date_idx = Some(idx);
        }
        if text == "action" {
            action_idx = Some(idx);
        }
        if text == "symbol" {
            symbol_idx = Some(idx);
        }
        if text == "quantity" {
            quantity_idx = Some(idx);
        }
        // Exported as "Amount ($)"
        if text.starts_with("amount") {
            amount_idx = Some(idx);
        }
    }

    Ok(ColumnMapping {
        run_date: run_date_idx.ok_or_else(|| anyhow!("Run Date column not found"))?,
        action: action_idx.ok_or_else(|| anyhow!("Action column not found"))?,
        symbol: symbol_idx.ok_or_else(|| anyhow!("Symbol column not found"))?,
        quantity: quantity_idx.ok_or_else(|| anyhow!("Quantity column not found"))?,
        amount: amount_idx.ok_or_else(|| anyhow!("Amount column not found"))?,
    })
}

/// Parse a Fidelity activity export into normalized transactions
///
/// Download path: fidelity.com -> Activity & Orders -> download to .csv
/// (UTF-8). Rows whose action matches no lookup pattern are skipped with
/// a warning.
pub fn parse_statement<P: AsRef<Path>>(path: P, broker: &str) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    info!("Parsing Fidelity statement: {:?}", path);

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
        "Parsed {} transactions from Fidelity statement",
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
    let action = record
        .get(mapping.action)
        .ok_or_else(|| anyhow!("Missing action at row {}", row_num))?
        .trim();
    if action.is_empty() {
        return Ok(None);
    }

    let Some(kind) = map_action(action) else {
        warn!("Unmapped Fidelity action '{}' at row {}", action, row_num);
        return Ok(None);
    };

    let date_str = record
        .get(mapping.run_date)
        .ok_or_else(|| anyhow!("Missing run date at row {}", row_num))?
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
        let symbol = record
            .get(mapping.symbol)
            .ok_or_else(|| anyhow!("Missing symbol at row {}", row_num))?
            .trim()
            .to_uppercase();
        if symbol.is_empty() {
            return Ok(None);
        }
        symbol
    };

    let units = if kind.is_cash_equivalent() {
        amount
    } else {
        let quantity = parse_amount(
            record
                .get(mapping.quantity)
                .ok_or_else(|| anyhow!("Missing quantity at row {}", row_num))?,
        )?;
        match kind {
            TransactionType::Sell => -quantity.abs(),
            _ => quantity.abs(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_statement(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_fidelity_statement() {
        let file = write_statement(
            "Run Date,Action,Symbol,Description,Quantity,Price ($),Amount ($)\n\
             01/03/2024,YOU BOUGHT PROSPECTUS AVAILABLE,XYZ,XYZ CORP,10,100.00,-1000.00\n\
             02/05/2024,DIVIDEND RECEIVED,XYZ,XYZ CORP,0,,20.00\n\
             02/05/2024,REINVESTMENT DIVIDEND REINVEST,XYZ,XYZ CORP,0.2,100.00,-20.00\n\
             03/04/2024,YOU SOLD,XYZ,XYZ CORP,-5,120.00,600.00\n\
             03/10/2024,CASH DISTRIBUTN,,TRANSFER,0,,750.00\n",
        );

        let txs = parse_statement(file.path(), "fidelity").unwrap();
        assert_eq!(txs.len(), 5);

        assert_eq!(txs[0].kind, TransactionType::Buy);
        assert_eq!(txs[1].kind, TransactionType::Dividend);
        assert_eq!(txs[1].units, dec!(20.00));

        // Dividend reinvestment rows are buys, not dividends
        assert_eq!(txs[2].kind, TransactionType::Buy);
        assert_eq!(txs[2].units, dec!(0.2));
        assert_eq!(txs[2].cost, dec!(-20.00));

        assert_eq!(txs[3].kind, TransactionType::Sell);
        assert_eq!(txs[3].units, dec!(-5));

        assert_eq!(txs[4].kind, TransactionType::Cash);
        assert_eq!(txs[4].ticker, CASH_TICKER);
    }

    #[test]
    fn test_map_action_last_match_wins() {
        assert_eq!(
            map_action("REINVESTMENT DIVIDEND REINVEST"),
            Some(TransactionType::Buy)
        );
        assert_eq!(map_action("DIVIDEND RECEIVED"), Some(TransactionType::Dividend));
        assert_eq!(map_action("JOURNAL ENTRY"), None);
    }

    #[test]
    fn test_missing_action_column_is_parse_error() {
        let file = write_statement("Run Date,Symbol,Quantity,Amount ($)\n01/03/2024,XYZ,10,-1\n");
        assert!(parse_statement(file.path(), "fidelity").is_err());
    }
}
