//! Command handlers.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use brokerline_core::{
    ClientConfig, DefaultTokenManager, RequestExecutor, Secret, SecretStore, TradingApi,
    api::{
        HistoryQuery, InstrumentFilters, InstrumentRef, OrderRequest, OrderSide,
        PlaceOrderRequest, QuoteType, SecurityType, UnderlyingType,
    },
    create_store,
};
use colored::Color;
use serde_json::{Value, json};

use crate::output::{Output, scalar_text};

/// Shortest API key accepted by `auth login`.
pub const MIN_API_KEY_LEN: usize = 16;

type TokenManager = DefaultTokenManager<Box<dyn SecretStore>>;

/// Token manager and API client sharing one credential store.
pub struct Session {
    tokens: Arc<TokenManager>,
    api: TradingApi,
}

impl Session {
    pub fn open(config: &ClientConfig, out: &Output) -> Self {
        let opened = create_store(true);
        if let Some(reason) = &opened.fallback {
            out.warn(&format!(
                "{}. Credentials will not be saved after this command.",
                reason
            ));
        }

        let tokens = Arc::new(DefaultTokenManager::new(opened.store, config));
        let api = TradingApi::new(RequestExecutor::new(config, tokens.clone()));
        Self { tokens, api }
    }
}

/// Trim a candidate key and check its length.
pub fn validate_api_key(raw: &str) -> Option<Secret> {
    let trimmed = raw.trim();
    (trimmed.chars().count() >= MIN_API_KEY_LEN).then(|| Secret::new(trimmed))
}

fn prompt_api_key(out: &Output) -> Result<String> {
    out.blank();
    println!("{}", out.dim("To get your API key:"));
    println!("{}", out.dim("  1. Log into your Public.com account"));
    println!("{}", out.dim("  2. Go to Settings > API"));
    println!("{}", out.dim("  3. Generate a secret key"));
    out.blank();

    inquire::Password::new("Enter API key:")
        .without_confirmation()
        .with_display_mode(inquire::PasswordDisplayMode::Hidden)
        .prompt()
        .context("Failed to read API key")
}

pub async fn login(session: &Session, out: &Output, key: Option<String>) -> Result<()> {
    let raw = match key {
        Some(key) => key,
        None => prompt_api_key(out)?,
    };

    let Some(secret) = validate_api_key(&raw) else {
        bail!(
            "Invalid API key format. API key must be at least {} characters.",
            MIN_API_KEY_LEN
        );
    };

    if !out.is_json() {
        out.info("Validating API key...");
    }

    let token = session.tokens.login(&secret).await?;

    if out.is_json() {
        out.print_json(&json!({
            "authenticated": true,
            "expiresAt": token.expires_at.to_rfc3339(),
        }))?;
    } else {
        out.success("Authenticated successfully. API key stored securely.");
    }
    Ok(())
}

pub async fn logout(session: &Session, out: &Output) -> Result<()> {
    let had_secret = session
        .tokens
        .logout()
        .await
        .context("Failed to logout")?;

    if out.is_json() {
        out.print_json(&json!({ "loggedOut": had_secret }))?;
    } else if had_secret {
        out.success("Logged out successfully. Credentials removed.");
    } else {
        out.info("No credentials were stored.");
    }
    Ok(())
}

pub async fn status(session: &Session, out: &Output) -> Result<()> {
    if !session.tokens.has_secret().await? {
        if out.is_json() {
            out.print_json(&json!({ "authenticated": false }))?;
        } else {
            out.info("Not authenticated. Run \"brokerline auth login\" to authenticate.");
        }
        return Ok(());
    }

    if !out.is_json() {
        out.info("Fetching account information...");
    }

    let response = session
        .api
        .accounts()
        .await
        .context("Failed to fetch account info")?;

    if out.is_json() {
        out.print_json(&json!({
            "authenticated": true,
            "accounts": response.accounts,
        }))?;
        return Ok(());
    }

    out.success("Authenticated");
    print_accounts(out, &response.accounts);
    Ok(())
}

pub async fn accounts(session: &Session, out: &Output) -> Result<()> {
    let response = session
        .api
        .accounts()
        .await
        .context("Failed to fetch accounts")?;

    if out.is_json() {
        out.print_json(&response)?;
    } else {
        print_accounts(out, &response.accounts);
    }
    Ok(())
}

fn print_accounts(out: &Output, accounts: &[brokerline_core::Account]) {
    if accounts.is_empty() {
        out.info("No accounts found.");
        return;
    }

    out.header("Accounts");
    for account in accounts {
        println!(
            "\n  {} {}",
            out.bold(&account.account_id),
            out.dim(&format!("({})", account.account_type))
        );
        out.row("Brokerage Type:   ", &account.brokerage_account_type, 4);
        out.row("Options Level:    ", &account.options_level, 4);
        out.row("Trade Permissions:", &account.trade_permissions, 4);
    }
    out.blank();
}

pub async fn portfolio(session: &Session, out: &Output, account_id: &str) -> Result<()> {
    let data = session
        .api
        .portfolio(account_id)
        .await
        .context("Failed to fetch portfolio")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    let account_type = data
        .get("accountType")
        .and_then(Value::as_str)
        .unwrap_or("unknown type");
    out.header(&format!("Account: {} ({})", account_id, account_type));
    out.fields(&data, 2);
    out.blank();
    Ok(())
}

pub async fn order(session: &Session, out: &Output, account_id: &str, order_id: &str) -> Result<()> {
    let details = session
        .api
        .order(account_id, order_id)
        .await
        .context("Failed to fetch order")?;

    if out.is_json() {
        out.print_json(&details)?;
        return Ok(());
    }

    out.header(&format!("Order {}", order_id));
    out.fields(&details, 2);
    out.blank();
    Ok(())
}

pub async fn order_cancel(
    session: &Session,
    out: &Output,
    account_id: &str,
    order_id: &str,
) -> Result<()> {
    session
        .api
        .cancel_order(account_id, order_id)
        .await
        .context("Failed to cancel order")?;

    if out.is_json() {
        out.print_json(&json!({
            "orderId": order_id,
            "status": "cancellation_requested",
        }))?;
        return Ok(());
    }

    out.success(&format!(
        "Cancellation request submitted for order: {}",
        order_id
    ));
    out.blank();
    out.info(&format!(
        "Check status: brokerline order {} {}",
        account_id, order_id
    ));
    Ok(())
}

pub async fn quotes(
    session: &Session,
    out: &Output,
    account_id: &str,
    symbols: &[String],
    kind: QuoteType,
) -> Result<()> {
    let instruments: Vec<_> = symbols
        .iter()
        .map(|symbol| InstrumentRef::new(symbol, kind))
        .collect();

    let data = session
        .api
        .quotes(account_id, &instruments)
        .await
        .context("Failed to fetch quotes")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    let quotes = list(&data, "quotes");
    if quotes.is_empty() {
        out.info("No quotes returned.");
        return Ok(());
    }

    out.success("Quotes");
    for quote in quotes {
        let instrument = &quote["instrument"];
        let symbol = scalar_text(&instrument["symbol"]);
        if quote["outcome"] != "SUCCESS" {
            println!("\n  {}: Failed to get quote", out.paint(&symbol, Color::Red));
            continue;
        }

        println!(
            "\n  {} {}",
            out.bold(&symbol),
            out.dim(&format!("({})", scalar_text(&instrument["type"])))
        );
        out.row("Last:    ", &out.bold(&scalar_text(&quote["last"])), 4);
        out.row(
            "Bid:     ",
            &format!("{} x {}", scalar_text(&quote["bid"]), scalar_text(&quote["bidSize"])),
            4,
        );
        out.row(
            "Ask:     ",
            &format!("{} x {}", scalar_text(&quote["ask"]), scalar_text(&quote["askSize"])),
            4,
        );
        out.row("Volume:  ", &scalar_text(&quote["volume"]), 4);
        if !quote["openInterest"].is_null() {
            out.row("Open Int:", &scalar_text(&quote["openInterest"]), 4);
        }
        if !quote["lastTimestamp"].is_null() {
            out.row("As of:   ", &out.dim(&scalar_text(&quote["lastTimestamp"])), 4);
        }
    }
    out.blank();
    Ok(())
}

pub async fn option_expirations(
    session: &Session,
    out: &Output,
    account_id: &str,
    symbol: &str,
    kind: UnderlyingType,
) -> Result<()> {
    let data = session
        .api
        .option_expirations(account_id, &InstrumentRef::new(symbol, kind))
        .await
        .context("Failed to fetch option expirations")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    let base = data["baseSymbol"]
        .as_str()
        .map(str::to_owned)
        .unwrap_or_else(|| symbol.to_uppercase());
    out.header(&format!("Option expirations for {}", base));

    let expirations = list(&data, "expirations");
    if expirations.is_empty() {
        out.info("No expiration dates available.");
        return Ok(());
    }

    for expiration in expirations {
        println!("  {}", out.bold(&scalar_text(expiration)));
    }
    out.blank();
    println!(
        "  {}",
        out.dim(&format!("Total: {} expiration dates", expirations.len()))
    );
    out.blank();
    Ok(())
}

pub async fn option_chain(
    session: &Session,
    out: &Output,
    account_id: &str,
    symbol: &str,
    expiration: &str,
    kind: UnderlyingType,
) -> Result<()> {
    let data = session
        .api
        .option_chain(account_id, &InstrumentRef::new(symbol, kind), expiration)
        .await
        .context("Failed to fetch option chain")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    out.success(&format!(
        "Option chain for {} - Expiration: {}",
        scalar_text(&data["baseSymbol"]),
        expiration
    ));

    let calls = list(&data, "calls");
    let puts = list(&data, "puts");
    if calls.is_empty() && puts.is_empty() {
        out.info("No options available for this expiration.");
        return Ok(());
    }

    for (label, side) in [("CALLS", calls), ("PUTS", puts)] {
        if side.is_empty() {
            continue;
        }
        println!("\n  {}", out.bold(label));
        println!(
            "  {}",
            out.dim(&format!(
                "{:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}",
                "Strike", "Last", "Bid", "Ask", "Volume", "Open Int"
            ))
        );
        println!("  {}", "-".repeat(70));
        for quote in side.iter().filter(|q| q["outcome"] == "SUCCESS") {
            println!("  {}", chain_row(quote));
        }
    }
    out.blank();
    Ok(())
}

fn chain_row(quote: &Value) -> String {
    let symbol = scalar_text(&quote["instrument"]["symbol"]);
    format!(
        "{:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}",
        strike_from_osi(&symbol).unwrap_or(symbol),
        scalar_text(&quote["last"]),
        scalar_text(&quote["bid"]),
        scalar_text(&quote["ask"]),
        scalar_text(&quote["volume"]),
        scalar_text(&quote["openInterest"]),
    )
}

/// Strike price encoded in the trailing eight digits of an OSI symbol.
fn strike_from_osi(symbol: &str) -> Option<String> {
    let digits = symbol.get(symbol.len().checked_sub(8)?..)?;
    let thousandths: u64 = digits.parse().ok()?;
    Some(format!("{}.{:02}", thousandths / 1000, (thousandths % 1000) / 10))
}

pub async fn option_greeks(
    session: &Session,
    out: &Output,
    account_id: &str,
    symbols: &[String],
) -> Result<()> {
    let data = session
        .api
        .option_greeks(account_id, symbols)
        .await
        .context("Failed to get option Greeks")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    let greeks = list(&data, "greeks");
    if greeks.is_empty() {
        out.info("No Greeks data returned.");
        return Ok(());
    }

    out.success("Option Greeks");
    for item in greeks {
        println!("\n  {}", out.bold(&scalar_text(&item["symbol"])));
        out.fields(&item["greeks"], 4);
    }
    out.blank();
    Ok(())
}

pub async fn instruments(session: &Session, out: &Output, filters: &InstrumentFilters) -> Result<()> {
    let data = session
        .api
        .instruments(filters)
        .await
        .context("Failed to fetch instruments")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    let entries = list(&data, "instruments");
    if entries.is_empty() {
        out.info("No instruments found.");
        return Ok(());
    }

    out.header(&format!("Instruments ({})", entries.len()));
    println!(
        "  {}",
        out.dim(&format!(
            "{:<10}  {:<10}  {:<18}  {:<18}  {:<18}  {:<18}",
            "Symbol", "Type", "Trading", "Fractional", "Options", "Spreads"
        ))
    );
    for entry in entries {
        println!(
            "  {:<10}  {:<10}  {:<18}  {:<18}  {:<18}  {:<18}",
            scalar_text(&entry["instrument"]["symbol"]),
            scalar_text(&entry["instrument"]["type"]),
            scalar_text(&entry["trading"]),
            scalar_text(&entry["fractionalTrading"]),
            scalar_text(&entry["optionTrading"]),
            scalar_text(&entry["optionSpreadTrading"]),
        );
    }
    out.blank();
    Ok(())
}

pub async fn instrument(
    session: &Session,
    out: &Output,
    symbol: &str,
    kind: SecurityType,
) -> Result<()> {
    let data = session
        .api
        .instrument(&symbol.to_uppercase(), kind)
        .await
        .context("Failed to fetch instrument")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    out.header(&format!(
        "{} ({})",
        scalar_text(&data["instrument"]["symbol"]),
        scalar_text(&data["instrument"]["type"])
    ));
    out.row("Trading:       ", &trading_status(out, &data["trading"]), 2);
    out.row("Fractional:    ", &trading_status(out, &data["fractionalTrading"]), 2);
    out.row("Options:       ", &trading_status(out, &data["optionTrading"]), 2);
    out.row("Option Spreads:", &trading_status(out, &data["optionSpreadTrading"]), 2);

    if data["instrumentDetails"].is_object() {
        println!("\n  {}", out.paint("Details", Color::Cyan));
        out.fields(&data["instrumentDetails"], 4);
    }
    out.blank();
    Ok(())
}

fn trading_status(out: &Output, status: &Value) -> String {
    match status.as_str() {
        Some("BUY_AND_SELL") => out.paint("Buy & Sell", Color::Green),
        Some("BUY_ONLY") => out.paint("Buy Only", Color::Yellow),
        Some("SELL_ONLY") => out.paint("Sell Only", Color::Yellow),
        Some("LIQUIDATION_ONLY") => out.paint("Liquidation Only", Color::Red),
        Some("DISABLED") => out.paint("Disabled", Color::Red),
        Some("NONE") => out.dim("None"),
        _ => scalar_text(status),
    }
}

pub async fn history(
    session: &Session,
    out: &Output,
    account_id: &str,
    query: &HistoryQuery,
) -> Result<()> {
    let data = session
        .api
        .history(account_id, query)
        .await
        .context("Failed to fetch history")?;

    if out.is_json() {
        out.print_json(&data)?;
        return Ok(());
    }

    out.header(&format!("Transaction History: {}", account_id));
    println!(
        "  {} {} - {}",
        out.dim("Period:"),
        scalar_text(&data["start"]),
        scalar_text(&data["end"])
    );

    let transactions = list(&data, "transactions");
    if transactions.is_empty() {
        out.info("No transactions found for this period.");
        return Ok(());
    }

    let noun = if transactions.len() == 1 { "transaction" } else { "transactions" };
    println!("\n  {}", out.dim(&format!("Showing {} {}", transactions.len(), noun)));

    for tx in transactions {
        println!("\n  {}", out.bold(&scalar_text(&tx["timestamp"])));
        println!(
            "    {} {}",
            out.paint(&scalar_text(&tx["type"]), Color::Cyan),
            out.dim(&format!("/ {}", scalar_text(&tx["subType"])))
        );
        println!("    {}", scalar_text(&tx["description"]));
        if !tx["symbol"].is_null() {
            out.row("Symbol:", &scalar_text(&tx["symbol"]), 4);
        }
        out.row(
            "Amount:",
            &format!(
                "{} {}",
                amount_text(out, &tx["netAmount"], &tx["direction"]),
                out.dim(&format!("({})", scalar_text(&tx["direction"])))
            ),
            4,
        );
    }

    if let Some(token) = data["nextToken"].as_str() {
        out.blank();
        out.info(&format!("More results available. Use --next-token \"{}\"", token));
    }
    out.blank();
    Ok(())
}

fn amount_text(out: &Output, amount: &Value, direction: &Value) -> String {
    let text = scalar_text(amount);
    let negative = text.starts_with('-');
    if direction == "CREDIT" || (!negative && text != "-" && text.parse::<f64>().is_ok_and(|v| v > 0.0)) {
        out.paint(&text, Color::Green)
    } else if negative {
        out.paint(&text, Color::Red)
    } else {
        text
    }
}

/// Reject orders the server would refuse for missing prices or size.
pub fn validate_order(order: &OrderRequest) -> Result<()> {
    if order.order_type.needs_limit_price() && order.limit_price.is_none() {
        bail!("Limit price is required for LIMIT and STOP_LIMIT orders.");
    }
    if order.order_type.needs_stop_price() && order.stop_price.is_none() {
        bail!("Stop price is required for STOP and STOP_LIMIT orders.");
    }
    if order.quantity.is_none() && order.amount.is_none() {
        bail!("Either --quantity or --amount is required.");
    }
    Ok(())
}

pub async fn order_place(
    session: &Session,
    out: &Output,
    account_id: &str,
    request: &PlaceOrderRequest,
) -> Result<()> {
    validate_order(&request.order)?;
    let order = &request.order;

    if !out.is_json() {
        out.warn(&format!(
            "Placing {} order for {}...",
            order.order_side, order.instrument.symbol
        ));
    }

    let placed = session
        .api
        .place_order(account_id, request)
        .await
        .context("Order placement failed")?;

    if out.is_json() {
        out.print_json(&placed)?;
        return Ok(());
    }

    out.success("Order placed successfully!");
    out.header("Order Details");
    out.row("Order ID:", &placed.order_id, 2);
    out.row("Symbol:  ", &order.instrument.symbol, 2);
    out.row("Side:    ", order.order_side.as_str(), 2);
    out.row("Type:    ", order.order_type.as_str(), 2);
    if let Some(quantity) = &order.quantity {
        out.row("Quantity:", quantity, 2);
    }
    if let Some(amount) = &order.amount {
        out.row("Amount:  ", &format!("${}", amount), 2);
    }
    if let Some(limit) = &order.limit_price {
        out.row("Limit:   ", &format!("${}", limit), 2);
    }
    if let Some(stop) = &order.stop_price {
        out.row("Stop:    ", &format!("${}", stop), 2);
    }
    out.blank();
    out.info(&format!(
        "Check status: brokerline order {} {}",
        account_id, placed.order_id
    ));
    Ok(())
}

pub async fn order_preflight(
    session: &Session,
    out: &Output,
    account_id: &str,
    order: &OrderRequest,
) -> Result<()> {
    validate_order(order)?;

    let estimate = session
        .api
        .preflight_single_leg(account_id, order)
        .await
        .context("Preflight failed")?;

    if out.is_json() {
        out.print_json(&estimate)?;
        return Ok(());
    }

    out.success(&format!("Order Preflight for {}", order.instrument.symbol));
    out.header("Cost Estimate");
    out.row("Order Value:     ", &scalar_text(&estimate["orderValue"]), 2);
    out.row("Est. Commission: ", &scalar_text(&estimate["estimatedCommission"]), 2);
    match order.order_side {
        OrderSide::Buy => out.row("Est. Cost:       ", &scalar_text(&estimate["estimatedCost"]), 2),
        OrderSide::Sell => out.row(
            "Est. Proceeds:   ",
            &scalar_text(&estimate["estimatedProceeds"]),
            2,
        ),
    }
    out.row(
        "Buying Power Req:",
        &scalar_text(&estimate["buyingPowerRequirement"]),
        2,
    );

    for (label, key) in [
        ("Regulatory Fees", "regulatoryFees"),
        ("Margin", "marginRequirement"),
        ("Option Details", "optionDetails"),
    ] {
        if estimate[key].is_object() {
            println!("\n  {}", out.paint(label, Color::Cyan));
            out.fields(&estimate[key], 4);
        }
    }
    out.blank();
    Ok(())
}

/// Array under `key`, or an empty slice when absent.
fn list<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data[key].as_array().map(Vec::as_slice).unwrap_or_default()
}
