use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use super::Quote;

/// Yahoo Finance chart response
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Meta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    #[allow(dead_code)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

/// Historical price point (adjusted-close semantics)
#[derive(Debug, Clone)]
pub struct HistoricalPrice {
    pub date: NaiveDate,
    pub adj_close: Decimal,
}

fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent("Mozilla/5.0 (compatible; FolioBot/1.0)")
        .build()
        .context("Failed to build HTTP client")
}

fn chart_result(data: YahooChartResponse) -> Result<ChartResult> {
    if let Some(error) = data.chart.error {
        return Err(anyhow!(
            "Yahoo Finance API error: {} - {}",
            error.code,
            error.description
        ));
    }
    data.chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| anyhow!("No data returned from Yahoo Finance"))
}

/// Fetch the latest quote and percent change for a ticker
pub async fn fetch_quote(ticker: &str) -> Result<Quote> {
    info!("Fetching current quote for {} from Yahoo Finance", ticker);

    let client = build_client()?;
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}",
        ticker
    );

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to send request to Yahoo Finance")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Yahoo Finance returned error status: {}",
            response.status()
        ));
    }

    let data: YahooChartResponse = response
        .json()
        .await
        .context("Failed to parse Yahoo Finance response")?;

    let result = chart_result(data)?;

    let price = result
        .meta
        .regular_market_price
        .ok_or_else(|| anyhow!("No price data available"))?;

    let change_pct = result
        .meta
        .chart_previous_close
        .filter(|prev| *prev != 0.0)
        .map(|prev| (price - prev) / prev * 100.0)
        .and_then(Decimal::from_f64_retain)
        .map(|d| d.round_dp(4));

    Ok(Quote {
        ticker: ticker.to_string(),
        price: Decimal::from_f64_retain(price).ok_or_else(|| anyhow!("Invalid price value"))?,
        change_pct,
        date: Utc::now().date_naive(),
    })
}

/// Fetch historical adjusted-close prices for a ticker
pub async fn fetch_historical_prices(
    ticker: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<HistoricalPrice>> {
    info!(
        "Fetching historical prices for {} from {} to {}",
        ticker, from, to
    );

    let client = build_client()?;

    let from_timestamp = from
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Invalid from date"))?
        .and_utc()
        .timestamp();

    let to_timestamp = to
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| anyhow!("Invalid to date"))?
        .and_utc()
        .timestamp();

    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
        ticker, from_timestamp, to_timestamp
    );

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to send request to Yahoo Finance")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Yahoo Finance returned error status: {}",
            response.status()
        ));
    }

    let data: YahooChartResponse = response
        .json()
        .await
        .context("Failed to parse Yahoo Finance response")?;

    let result = chart_result(data)?;

    let timestamps = result
        .timestamp
        .ok_or_else(|| anyhow!("No timestamp data"))?;

    // Prefer adjusted close; fall back to raw close when absent
    let adjusted = result
        .indicators
        .adjclose
        .and_then(|blocks| blocks.into_iter().next())
        .and_then(|block| block.adjclose);
    let closes = match adjusted {
        Some(values) => values,
        None => result
            .indicators
            .quote
            .into_iter()
            .next()
            .and_then(|q| q.close)
            .ok_or_else(|| anyhow!("No close data"))?,
    };

    let mut prices = Vec::new();
    for (ts, close) in timestamps.iter().zip(closes.iter()) {
        let Some(close) = close else { continue };
        let date = DateTime::<Utc>::from_timestamp(*ts, 0)
            .ok_or_else(|| anyhow!("Invalid timestamp: {}", ts))?
            .date_naive();
        let adj_close = Decimal::from_f64_retain(*close)
            .ok_or_else(|| anyhow!("Invalid price value for {}", date))?;
        prices.push(HistoricalPrice { date, adj_close });
    }

    info!("Fetched {} price points for {}", prices.len(), ticker);
    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn should_skip_online_tests() -> bool {
        std::env::var("FOLIO_SKIP_ONLINE_TESTS")
            .map(|v| v != "0")
            .unwrap_or(true)
    }

    #[test]
    fn test_chart_result_surfaces_api_error() {
        let data = YahooChartResponse {
            chart: ChartData {
                result: None,
                error: Some(YahooError {
                    code: "Not Found".to_string(),
                    description: "No data found".to_string(),
                }),
            },
        };
        let err = chart_result(data).unwrap_err();
        assert!(err.to_string().contains("Not Found"));
    }

    #[test]
    fn test_chart_result_empty_payload() {
        let data = YahooChartResponse {
            chart: ChartData {
                result: Some(vec![]),
                error: None,
            },
        };
        assert!(chart_result(data).is_err());
    }

    #[tokio::test]
    async fn test_fetch_quote_online() {
        if should_skip_online_tests() {
            return;
        }

        let quote = match fetch_quote("IVV").await {
            Ok(q) => q,
            Err(e) => {
                eprintln!("Skipping online quote test: {}", e);
                return;
            }
        };
        assert!(quote.price > Decimal::ZERO);
    }
}
