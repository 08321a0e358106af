//! Brokerline CLI
//!
//! Command-line client for the brokerage trading API.
//!
//! # Usage
//!
//! ```bash
//! # Store an API key (prompts when --key is omitted)
//! brokerline auth login
//!
//! # List trading accounts
//! brokerline accounts
//!
//! # Quote two symbols
//! brokerline quotes 5OF12345 AAPL MSFT
//!
//! # Preview, then place, a limit order
//! brokerline order-preflight 5OF12345 AAPL -s BUY -T LIMIT -q 10 -l 187.50
//! brokerline order-place 5OF12345 AAPL -s BUY -T LIMIT -q 10 -l 187.50
//!
//! # Inspect and cancel an order, as JSON
//! brokerline --json order 5OF12345 2f1c...
//! brokerline order-cancel 5OF12345 2f1c...
//! ```

use std::process::ExitCode;

use anyhow::Result;
use brokerline_core::{
    ApiError, ClientConfig, ENDPOINT_ENV, ErrorKind,
    api::{
        HistoryQuery, InstrumentFilters, InstrumentRef, MarketSession, OpenCloseIndicator,
        OrderExpiration, OrderRequest, OrderSide, OrderType, PlaceOrderRequest, QuoteType,
        SecurityType, TimeInForce, TradingStatus, UnderlyingType,
    },
    executor::TOO_MANY_REQUESTS,
};
use chrono::{DateTime, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod output;

use commands::Session;
use output::Output;

#[derive(Debug, Parser)]
#[command(name = "brokerline")]
#[command(about = "Trade and inspect brokerage accounts from the terminal")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Make a single attempt per request
    #[arg(long, global = true)]
    no_retry: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// API base URL
    #[arg(long, global = true, env = ENDPOINT_ENV)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the stored API key
    Auth {
        #[command(subcommand)]
        action: AuthCommands,
    },

    /// List trading accounts
    Accounts,

    /// View the portfolio of an account
    Portfolio {
        /// Account ID
        account_id: String,
    },

    /// Show one order
    Order {
        /// Account ID
        account_id: String,

        /// Order ID
        order_id: String,
    },

    /// Cancel an open order
    OrderCancel {
        /// Account ID
        account_id: String,

        /// Order ID
        order_id: String,
    },

    /// Place a new single-leg order
    OrderPlace {
        /// Account ID
        account_id: String,

        /// Trading symbol
        symbol: String,

        #[command(flatten)]
        order: OrderArgs,

        /// Client order ID (UUID); generated when omitted
        #[arg(long)]
        order_id: Option<String>,
    },

    /// Preview estimated costs of a single-leg order
    OrderPreflight {
        /// Account ID
        account_id: String,

        /// Trading symbol
        symbol: String,

        #[command(flatten)]
        order: OrderArgs,
    },

    /// Get quotes for one or more instruments
    Quotes {
        /// Account ID
        account_id: String,

        /// Symbols to quote (e.g. AAPL TSLA BTC)
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Security type for all symbols (EQUITY, OPTION, CRYPTO, INDEX)
        #[arg(short = 't', long = "type", default_value = "EQUITY")]
        kind: QuoteType,
    },

    /// List option expiration dates for an underlying
    OptionsExpirations {
        /// Account ID
        account_id: String,

        /// Underlying symbol (e.g. AAPL, SPX)
        symbol: String,

        /// Underlying type (EQUITY, UNDERLYING_SECURITY_FOR_INDEX_OPTION)
        #[arg(short = 't', long = "type", default_value = "EQUITY")]
        kind: UnderlyingType,
    },

    /// Show the option chain for an underlying and expiration date
    OptionsChain {
        /// Account ID
        account_id: String,

        /// Underlying symbol (e.g. AAPL, SPX)
        symbol: String,

        /// Expiration date (YYYY-MM-DD)
        #[arg(value_parser = parse_date)]
        expiration: String,

        /// Underlying type (EQUITY, UNDERLYING_SECURITY_FOR_INDEX_OPTION)
        #[arg(short = 't', long = "type", default_value = "EQUITY")]
        kind: UnderlyingType,
    },

    /// Get Greeks for option symbols in OSI format
    OptionGreeks {
        /// Account ID
        account_id: String,

        /// OSI option symbols (at most 250)
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// List tradable instruments
    Instruments {
        /// Security types, comma-separated
        #[arg(short = 't', long = "type", value_delimiter = ',')]
        types: Vec<SecurityType>,

        /// Trading statuses, comma-separated
        #[arg(long, value_delimiter = ',')]
        trading: Vec<TradingStatus>,

        /// Fractional trading statuses, comma-separated
        #[arg(long, value_delimiter = ',')]
        fractional: Vec<TradingStatus>,

        /// Option trading statuses, comma-separated
        #[arg(long, value_delimiter = ',')]
        options: Vec<TradingStatus>,

        /// Option spread trading statuses, comma-separated
        #[arg(long, value_delimiter = ',')]
        spreads: Vec<TradingStatus>,
    },

    /// Show trading details of one instrument
    Instrument {
        /// Trading symbol (e.g. AAPL, BTC)
        symbol: String,

        /// Security type
        #[arg(short = 't', long = "type", default_value = "EQUITY")]
        kind: SecurityType,
    },

    /// View transaction history of an account
    History {
        /// Account ID
        account_id: String,

        /// Start timestamp (ISO 8601)
        #[arg(short, long, value_parser = parse_timestamp)]
        start: Option<String>,

        /// End timestamp (ISO 8601)
        #[arg(short, long, value_parser = parse_timestamp)]
        end: Option<String>,

        /// Maximum number of records
        #[arg(short = 'n', long)]
        limit: Option<u32>,

        /// Pagination token from a previous page
        #[arg(long)]
        next_token: Option<String>,
    },
}

/// Single-leg order options shared by `order-place` and `order-preflight`.
#[derive(Debug, Args)]
struct OrderArgs {
    /// Order side (BUY, SELL)
    #[arg(short, long)]
    side: OrderSide,

    /// Order type (MARKET, LIMIT, STOP, STOP_LIMIT)
    #[arg(short = 'T', long)]
    order_type: OrderType,

    /// Number of shares or contracts
    #[arg(short, long)]
    quantity: Option<String>,

    /// Dollar amount, instead of a quantity
    #[arg(short, long)]
    amount: Option<String>,

    /// Limit price (LIMIT and STOP_LIMIT)
    #[arg(short, long)]
    limit: Option<String>,

    /// Stop price (STOP and STOP_LIMIT)
    #[arg(long)]
    stop: Option<String>,

    /// Security type
    #[arg(short = 't', long = "type", default_value = "EQUITY")]
    kind: SecurityType,

    /// Time in force (DAY, GTD)
    #[arg(long, default_value = "DAY")]
    tif: TimeInForce,

    /// Market session (CORE, EXTENDED)
    #[arg(long, default_value = "CORE")]
    session: MarketSession,

    /// Open/close indicator for options (OPEN, CLOSE)
    #[arg(long)]
    open_close: Option<OpenCloseIndicator>,
}

impl OrderArgs {
    fn into_request(self, symbol: &str) -> OrderRequest {
        let mut order = OrderRequest::new(
            InstrumentRef::new(symbol, self.kind),
            self.side,
            self.order_type,
        );
        order.expiration = OrderExpiration {
            time_in_force: self.tif,
            expiration_time: None,
        };
        order.quantity = self.quantity;
        order.amount = self.amount;
        order.limit_price = self.limit;
        order.stop_price = self.stop;
        order.equity_market_session = Some(self.session);
        order.open_close_indicator = self.open_close;
        order
    }
}

fn parse_date(value: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| value.to_string())
        .map_err(|_| "Invalid date format. Use YYYY-MM-DD.".to_string())
}

fn parse_timestamp(value: &str) -> Result<String, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|_| value.to_string())
        .map_err(|_| {
            format!(
                "Invalid date format: {}. Use ISO 8601 format (e.g., 2025-01-15T09:00:00Z)",
                value
            )
        })
}

#[derive(Debug, Subcommand)]
enum AuthCommands {
    /// Validate an API key and store it in the system keychain
    Login {
        /// API key; prompted for when omitted
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Remove stored credentials
    Logout,

    /// Check authentication and list accounts
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let out = Output::from_env(cli.json);

    match run(cli, &out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            out.error(&describe_error(&e));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn client_config(cli: &Cli) -> Result<ClientConfig> {
    let config = match &cli.endpoint {
        Some(endpoint) => ClientConfig::with_endpoint(endpoint)?,
        None => ClientConfig::default(),
    };
    Ok(config.retries_enabled(!cli.no_retry))
}

async fn run(cli: Cli, out: &Output) -> Result<()> {
    let config = client_config(&cli)?;
    tracing::debug!(endpoint = %config.endpoint, retries = config.retry.enabled, "Using API endpoint");
    let session = Session::open(&config, out);

    match cli.command {
        Commands::Auth { action } => match action {
            AuthCommands::Login { key } => commands::login(&session, out, key).await,
            AuthCommands::Logout => commands::logout(&session, out).await,
            AuthCommands::Status => commands::status(&session, out).await,
        },
        Commands::Accounts => commands::accounts(&session, out).await,
        Commands::Portfolio { account_id } => commands::portfolio(&session, out, &account_id).await,
        Commands::Order {
            account_id,
            order_id,
        } => commands::order(&session, out, &account_id, &order_id).await,
        Commands::OrderCancel {
            account_id,
            order_id,
        } => commands::order_cancel(&session, out, &account_id, &order_id).await,
        Commands::OrderPlace {
            account_id,
            symbol,
            order,
            order_id,
        } => {
            let mut request = PlaceOrderRequest::new(order.into_request(&symbol));
            if let Some(order_id) = order_id {
                request = request.with_order_id(order_id);
            }
            commands::order_place(&session, out, &account_id, &request).await
        }
        Commands::OrderPreflight {
            account_id,
            symbol,
            order,
        } => commands::order_preflight(&session, out, &account_id, &order.into_request(&symbol)).await,
        Commands::Quotes {
            account_id,
            symbols,
            kind,
        } => commands::quotes(&session, out, &account_id, &symbols, kind).await,
        Commands::OptionsExpirations {
            account_id,
            symbol,
            kind,
        } => commands::option_expirations(&session, out, &account_id, &symbol, kind).await,
        Commands::OptionsChain {
            account_id,
            symbol,
            expiration,
            kind,
        } => commands::option_chain(&session, out, &account_id, &symbol, &expiration, kind).await,
        Commands::OptionGreeks {
            account_id,
            symbols,
        } => commands::option_greeks(&session, out, &account_id, &symbols).await,
        Commands::Instruments {
            types,
            trading,
            fractional,
            options,
            spreads,
        } => {
            let filters = InstrumentFilters {
                types,
                trading,
                fractional_trading: fractional,
                option_trading: options,
                option_spread_trading: spreads,
            };
            commands::instruments(&session, out, &filters).await
        }
        Commands::Instrument { symbol, kind } => {
            commands::instrument(&session, out, &symbol, kind).await
        }
        Commands::History {
            account_id,
            start,
            end,
            limit,
            next_token,
        } => {
            let query = HistoryQuery {
                start,
                end,
                page_size: limit,
                next_token,
            };
            commands::history(&session, out, &account_id, &query).await
        }
    }
}

/// User-facing message for a failed command.
///
/// Authentication and not-found messages are shown verbatim and rate limits
/// get a fixed hint. Everything else keeps the command's context prefix.
fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(api) => match api.kind() {
            ErrorKind::Authentication | ErrorKind::NotFound => api.to_string(),
            ErrorKind::RateLimit => TOO_MANY_REQUESTS.to_string(),
            _ => format!("{:#}", err),
        },
        None => format!("{:#}", err),
    }
}
