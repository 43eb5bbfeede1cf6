use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Parser;
use colored::Colorize;
use folio::broker::{self, BrokerKind};
use folio::cli::{Cli, Commands};
use folio::config::Config;
use folio::engine;
use folio::model::{PerformanceRecord, Transaction};
use folio::portfolio::{Manager, Portfolio, SummaryRow};
use folio::pricing;
use folio::utils::{format_currency, format_pct};
use tabled::{settings::Style, Table, Tabled};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let outcome = match cli.command {
        Commands::Import {
            ref file,
            ref broker,
            ref output,
            fix,
            dry_run,
        } => handle_import(file, broker, output.as_deref(), fix, dry_run, cli.json),

        Commands::Performance {
            ref config,
            ref portfolio,
            lookback_months,
        } => handle_performance(config, portfolio, lookback_months, cli.json).await,

        Commands::Summary {
            ref config,
            ref lookback_months,
        } => handle_summary(config, lookback_months, cli.json).await,

        Commands::Quote { ref ticker } => handle_quote(ticker, cli.json).await,

        Commands::History {
            ref tickers,
            ref from,
            ref to,
        } => handle_history(tickers, from, to, cli.json).await,
    };

    // Detailed errors go to the log sink; users get a terse failure line
    if let Err(e) = outcome {
        error!("{e:#}");
        eprintln!("{} could not load: {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

/// Handle import command
fn handle_import(
    file: &str,
    broker_name: &str,
    output: Option<&str>,
    fix: bool,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let kind: BrokerKind = broker_name.parse()?;
    info!("Importing {} statement from {}", kind.as_str(), file);

    let output_path = if dry_run {
        None
    } else {
        output.map(std::path::Path::new)
    };
    let transactions = broker::import(file, kind, output_path, fix)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&transactions)?);
        return Ok(());
    }

    println!(
        "\n{} Found {} transactions\n",
        "✓".green().bold(),
        transactions.len()
    );

    #[derive(Tabled)]
    struct TransactionPreview {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Ticker")]
        ticker: String,
        #[tabled(rename = "Type")]
        tx_type: String,
        #[tabled(rename = "Units")]
        units: String,
        #[tabled(rename = "Cost")]
        cost: String,
        #[tabled(rename = "Broker")]
        broker: String,
    }

    let preview: Vec<TransactionPreview> = transactions
        .iter()
        .take(10)
        .map(|tx| TransactionPreview {
            date: tx.date.format("%Y-%m-%d").to_string(),
            ticker: tx.ticker.clone(),
            tx_type: tx.kind.as_str().to_string(),
            units: tx.units.to_string(),
            cost: format_currency(tx.cost),
            broker: tx.broker.clone(),
        })
        .collect();

    let table = Table::new(preview).with(Style::rounded()).to_string();
    println!("{}", table);

    if transactions.len() > 10 {
        println!("\n... and {} more transactions", transactions.len() - 10);
    }

    if dry_run {
        println!("\n{} Dry run - no changes saved", "ℹ".blue().bold());
    } else if let Some(path) = output {
        println!("\n{} Store updated: {}", "✓".green().bold(), path);
    }

    Ok(())
}

/// Price history must reach back to the portfolio's first transaction so
/// window openings and benchmark replays can be valued.
fn price_fetch_start(transactions: &[Transaction], lookback_date: NaiveDate) -> NaiveDate {
    engine::first_transaction_date(transactions)
        .map(|first| first.min(lookback_date))
        .unwrap_or(lookback_date)
}

/// Handle performance command
async fn handle_performance(
    config_path: &str,
    portfolio_name: &str,
    lookback_months: u32,
    json: bool,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let portfolio = Portfolio::from_config(&config, portfolio_name)?;

    let as_of = Local::now().date_naive();
    let lookback_date = engine::lookback_start(as_of, lookback_months);

    let transactions = portfolio.transactions()?;
    let tickers = portfolio.required_tickers()?;
    let from = price_fetch_start(&transactions, lookback_date);
    let prices = pricing::fetch_history(&tickers, from, as_of).await;

    let records = portfolio.get_performance(&prices, lookback_date, as_of)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!(
        "\n{} {} performance, {} to {}\n",
        "✓".green().bold(),
        portfolio_name,
        lookback_date,
        as_of
    );
    print_performance_table(&records);
    Ok(())
}

fn print_performance_table(records: &[PerformanceRecord]) {
    #[derive(Tabled)]
    struct PerformanceRow {
        #[tabled(rename = "Ticker")]
        ticker: String,
        #[tabled(rename = "Units")]
        units: String,
        #[tabled(rename = "Avg Price")]
        average_price: String,
        #[tabled(rename = "Last Price")]
        last_price: String,
        #[tabled(rename = "Market Value")]
        market_value: String,
        #[tabled(rename = "Return")]
        ret: String,
        #[tabled(rename = "Realized")]
        realized: String,
        #[tabled(rename = "Unrealized")]
        unrealized: String,
        #[tabled(rename = "DWRR")]
        dwrr: String,
        #[tabled(rename = "DWRR (ann)")]
        dwrr_ann: String,
    }

    let rows: Vec<PerformanceRow> = records
        .iter()
        .map(|r| PerformanceRow {
            ticker: r.ticker.clone(),
            units: r.cumulative_units.round_dp(4).to_string(),
            average_price: format_currency(r.average_price),
            last_price: format_currency(r.last_price),
            market_value: format_currency(r.market_value),
            ret: format_currency(r.ret),
            realized: format_currency(r.realized),
            unrealized: format_currency(r.unrealized),
            dwrr: format_pct(r.dwrr_pct),
            dwrr_ann: format_pct(r.dwrr_ann_pct),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Handle summary command
async fn handle_summary(config_path: &str, lookback_months: &[u32], json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let manager = Manager::from_config(&config)?;

    let as_of = Local::now().date_naive();
    let max_months = lookback_months.iter().copied().max().unwrap_or(12);
    let mut from = engine::lookback_start(as_of, max_months);
    for portfolio in manager.portfolios() {
        if let Ok(transactions) = portfolio.transactions() {
            from = price_fetch_start(&transactions, from);
        }
    }

    let tickers = manager.required_tickers();
    let prices = pricing::fetch_history(&tickers, from, as_of).await;

    let summary = manager.get_summary(&prices, as_of, lookback_months);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("\n{} Manager summary as of {}\n", "✓".green().bold(), as_of);
    print_summary_table(&summary, lookback_months);
    Ok(())
}

fn print_summary_table(summary: &[SummaryRow], lookback_months: &[u32]) {
    let mut builder = tabled::builder::Builder::default();

    let mut header = vec![
        "Portfolio".to_string(),
        "Market Value".to_string(),
        "Equity".to_string(),
        "Cash".to_string(),
        "Return".to_string(),
    ];
    for months in lookback_months {
        header.push(format!("{}m DWRR", months));
        header.push(format!("{}m DWRR (ann)", months));
    }
    builder.push_record(header);

    for row in summary {
        let mut cells = vec![
            row.portfolio.clone(),
            format_currency(row.market_value),
            format_currency(row.equity),
            format_currency(row.cash),
            format_currency(row.ret),
        ];
        for lookback in &row.lookbacks {
            cells.push(format_pct(lookback.dwrr_pct));
            cells.push(format_pct(lookback.dwrr_ann_pct));
        }
        builder.push_record(cells);
    }

    let table = builder.build().with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Handle quote command
async fn handle_quote(ticker: &str, json: bool) -> Result<()> {
    let quote = pricing::fetch_quote(ticker).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&quote)?);
        return Ok(());
    }

    let change = format_pct(quote.change_pct.map(|pct| pct / rust_decimal::Decimal::from(100)));
    println!(
        "{}: {} ({}) as of {}",
        quote.ticker.bold(),
        format_currency(quote.price),
        change,
        quote.date
    );
    Ok(())
}

/// Handle history command
async fn handle_history(tickers: &[String], from: &str, to: &str, json: bool) -> Result<()> {
    let from = NaiveDate::parse_from_str(from, "%Y-%m-%d")?;
    let to = NaiveDate::parse_from_str(to, "%Y-%m-%d")?;

    let prices = pricing::fetch_history(tickers, from, to).await;

    // Union of dates across tickers, forward-filled per column
    let mut dates: Vec<NaiveDate> = tickers
        .iter()
        .filter_map(|ticker| prices.points(ticker))
        .flat_map(|points| points.keys().copied())
        .collect();
    dates.sort();
    dates.dedup();

    if json {
        let rows: Vec<serde_json::Value> = dates
            .iter()
            .map(|date| {
                let mut row = serde_json::Map::new();
                row.insert("date".to_string(), serde_json::json!(date.to_string()));
                for ticker in tickers {
                    let price = prices.price_on(ticker, *date).map(|p| p.to_string());
                    row.insert(ticker.clone(), serde_json::json!(price));
                }
                serde_json::Value::Object(row)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut builder = tabled::builder::Builder::default();
    let mut header = vec!["Date".to_string()];
    header.extend(tickers.iter().cloned());
    builder.push_record(header);

    for date in &dates {
        let mut cells = vec![date.to_string()];
        for ticker in tickers {
            let cell = prices
                .price_on(ticker, *date)
                .map(|price| format_currency(price))
                .unwrap_or_else(|| "-".to_string());
            cells.push(cell);
        }
        builder.push_record(cells);
    }

    let table = builder.build().with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}
