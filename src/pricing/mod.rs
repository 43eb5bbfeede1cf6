// Pricing module - price series model and market-data providers

pub mod yahoo;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Global singleton quote fetcher with 24-hour cache.
/// This ensures cache is shared across all calls within a process.
static GLOBAL_FETCHER: Lazy<QuoteFetcher> = Lazy::new(QuoteFetcher::new);

/// Latest quote for a ticker
#[derive(Debug, Clone, serde::Serialize)]
pub struct Quote {
    pub ticker: String,
    pub price: Decimal,
    pub change_pct: Option<Decimal>,
    pub date: NaiveDate,
}

/// Date-indexed adjusted-close prices per ticker
///
/// Read-only reference data once built. Lookups forward-fill: the most
/// recent price at or before the requested date is returned, since broker
/// and market calendars can misalign.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    series: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticker: &str, date: NaiveDate, price: Decimal) {
        self.series
            .entry(ticker.to_string())
            .or_default()
            .insert(date, price);
    }

    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|s| s.as_str())
    }

    /// Most recent price at or before `date` (forward-fill join)
    pub fn price_on(&self, ticker: &str, date: NaiveDate) -> Option<Decimal> {
        self.series
            .get(ticker)?
            .range(..=date)
            .next_back()
            .map(|(_, price)| *price)
    }

    /// All (date, price) points for a ticker, date ascending
    pub fn points(&self, ticker: &str) -> Option<&BTreeMap<NaiveDate, Decimal>> {
        self.series.get(ticker)
    }

    /// Last known (date, price) pair for a ticker
    pub fn last_entry(&self, ticker: &str) -> Option<(NaiveDate, Decimal)> {
        self.series
            .get(ticker)?
            .iter()
            .next_back()
            .map(|(d, p)| (*d, *p))
    }

    /// Fold another series into this one (same-ticker dates overwrite)
    pub fn merge(&mut self, other: PriceSeries) {
        for (ticker, points) in other.series {
            self.series.entry(ticker).or_default().extend(points);
        }
    }
}

/// Quote cache entry
#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    timestamp: chrono::DateTime<Utc>,
}

/// Quote fetcher with caching (24hr TTL)
pub struct QuoteFetcher {
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    cache_ttl_hours: i64,
}

impl Default for QuoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteFetcher {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
            cache_ttl_hours: 24,
        }
    }

    /// Fetch the latest quote with caching
    pub async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(ticker) {
                let age = Utc::now().signed_duration_since(entry.timestamp);
                if age < Duration::hours(self.cache_ttl_hours) {
                    debug!(
                        "Using cached quote for {} (age: {}h)",
                        ticker,
                        age.num_hours()
                    );
                    return Ok(entry.quote.clone());
                }
            }
        }

        info!("Fetching fresh quote for {}", ticker);
        let quote = yahoo::fetch_quote(ticker)
            .await
            .context("quote fetch failed")?;

        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            ticker.to_string(),
            CacheEntry {
                quote: quote.clone(),
                timestamp: Utc::now(),
            },
        );
        Ok(quote)
    }

    #[allow(dead_code)]
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.clear();
        info!("Quote cache cleared");
    }

    #[allow(dead_code)]
    pub fn cache_size(&self) -> usize {
        let cache = self.cache.lock().unwrap();
        cache.len()
    }
}

/// Convenience function to fetch a quote using the global shared fetcher.
/// This uses a singleton cache that persists for the lifetime of the process.
pub async fn fetch_quote(ticker: &str) -> Result<Quote> {
    GLOBAL_FETCHER.fetch_quote(ticker).await
}

/// Fetch a date-indexed price series for a set of tickers
///
/// A ticker whose fetch fails is logged and omitted from the result rather
/// than failing the batch; downstream valuation treats it as priceless.
pub async fn fetch_history(tickers: &[String], from: NaiveDate, to: NaiveDate) -> PriceSeries {
    let mut series = PriceSeries::new();
    for ticker in tickers {
        match yahoo::fetch_historical_prices(ticker, from, to).await {
            Ok(points) => {
                for point in points {
                    series.insert(ticker, point.date, point.adj_close);
                }
            }
            Err(e) => {
                warn!("Skipping price history for {}: {}", ticker, e);
            }
        }
    }
    series
}
