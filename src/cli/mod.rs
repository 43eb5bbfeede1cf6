use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "folio")]
#[command(
    version,
    about = "Personal-finance portfolio tracker with broker imports and performance analysis"
)]
#[command(
    long_about = "Track brokerage portfolios across brokers: import activity statements into a \
normalized transaction log, then compute holdings, market values, and money-weighted returns \
over arbitrary lookback windows."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a broker statement into the normalized transaction store
    Import {
        /// Path to the statement file downloaded from the broker
        file: String,

        /// Statement format (ally, fidelity)
        #[arg(short, long)]
        broker: String,

        /// Normalized store to create or append to
        #[arg(short, long)]
        output: Option<String>,

        /// Exclude rows that violate integrity checks instead of aborting
        #[arg(long)]
        fix: bool,

        /// Preview only, don't write the store
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Per-ticker performance table for a configured portfolio
    Performance {
        /// Path to the portfolio config file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Portfolio name from the config
        #[arg(short, long)]
        portfolio: String,

        /// Lookback window in months
        #[arg(short, long, default_value_t = 12)]
        lookback_months: u32,
    },

    /// Manager summary across all configured portfolios
    Summary {
        /// Path to the portfolio config file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Lookback windows in months, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "1,3,12")]
        lookback_months: Vec<u32>,
    },

    /// Latest quote and percent change for a ticker
    Quote {
        /// Ticker symbol
        ticker: String,
    },

    /// Historical adjusted-close prices
    History {
        /// Ticker symbols
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: String,
    },
}
