//! Request payloads and wire enums for the trading endpoints.
//!
//! Enums serialize as the API's upper-case identifiers and parse from them
//! case-insensitively, so CLI arguments can be fed straight through.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A string that is not one of an enum's wire values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value}. Valid values: {expected}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_uppercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| UnknownVariant {
                        kind: $kind,
                        value: wanted,
                        expected: Self::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
        }
    };
}

wire_enum! {
    /// Instrument classes known to the trading API.
    SecurityType("security type") {
        Equity => "EQUITY",
        Etf => "ETF",
        Adr => "ADR",
        Crypto => "CRYPTO",
        Option => "OPTION",
        MultiLegInstrument => "MULTI_LEG_INSTRUMENT",
        Alt => "ALT",
        Treasury => "TREASURY",
        Bond => "BOND",
        Index => "INDEX",
        UnderlyingSecurityForIndexOption => "UNDERLYING_SECURITY_FOR_INDEX_OPTION",
    }
}

wire_enum! {
    /// Instrument classes the quote endpoint accepts.
    QuoteType("security type") {
        Equity => "EQUITY",
        Option => "OPTION",
        Crypto => "CRYPTO",
        Index => "INDEX",
    }
}

wire_enum! {
    /// Underlyings an option chain can be listed for.
    UnderlyingType("underlying type") {
        Equity => "EQUITY",
        IndexOption => "UNDERLYING_SECURITY_FOR_INDEX_OPTION",
    }
}

wire_enum! {
    TradingStatus("trading status") {
        BuyAndSell => "BUY_AND_SELL",
        BuyOnly => "BUY_ONLY",
        SellOnly => "SELL_ONLY",
        LiquidationOnly => "LIQUIDATION_ONLY",
        Disabled => "DISABLED",
        None => "NONE",
    }
}

wire_enum! {
    OrderSide("order side") {
        Buy => "BUY",
        Sell => "SELL",
    }
}

wire_enum! {
    OrderType("order type") {
        Market => "MARKET",
        Limit => "LIMIT",
        Stop => "STOP",
        StopLimit => "STOP_LIMIT",
    }
}

impl OrderType {
    pub fn needs_limit_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    pub fn needs_stop_price(self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }
}

wire_enum! {
    TimeInForce("time in force") {
        Day => "DAY",
        Gtd => "GTD",
    }
}

wire_enum! {
    MarketSession("market session") {
        Core => "CORE",
        Extended => "EXTENDED",
    }
}

wire_enum! {
    OpenCloseIndicator("open/close indicator") {
        Open => "OPEN",
        Close => "CLOSE",
    }
}

/// Symbol plus instrument class, as every market-data and order payload
/// addresses an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRef<T = SecurityType> {
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: T,
}

impl<T> InstrumentRef<T> {
    /// The symbol is upper-cased; the API treats symbols case-sensitively.
    pub fn new(symbol: &str, kind: T) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderExpiration {
    pub time_in_force: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
}

impl Default for OrderExpiration {
    fn default() -> Self {
        Self {
            time_in_force: TimeInForce::Day,
            expiration_time: None,
        }
    }
}

/// A single-leg order, as sent to preflight and to order placement.
///
/// Quantities and prices stay decimal strings end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub instrument: InstrumentRef,
    pub order_side: OrderSide,
    pub order_type: OrderType,
    pub expiration: OrderExpiration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equity_market_session: Option<MarketSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_close_indicator: Option<OpenCloseIndicator>,
}

impl OrderRequest {
    /// A day order with no size or prices set.
    pub fn new(instrument: InstrumentRef, order_side: OrderSide, order_type: OrderType) -> Self {
        Self {
            instrument,
            order_side,
            order_type,
            expiration: OrderExpiration::default(),
            quantity: None,
            amount: None,
            limit_price: None,
            stop_price: None,
            equity_market_session: None,
            open_close_indicator: None,
        }
    }
}

/// One leg of a multi-leg order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLeg {
    pub instrument: InstrumentRef,
    pub order_side: OrderSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_close_indicator: Option<OpenCloseIndicator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio_quantity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLegRequest {
    pub order_type: OrderType,
    pub expiration: OrderExpiration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    pub legs: Vec<OrderLeg>,
}

/// Order placement payload: the order plus a client-chosen id that makes
/// resubmission idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub order_id: String,
    #[serde(flatten)]
    pub order: OrderRequest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legs: Vec<OrderLeg>,
}

impl PlaceOrderRequest {
    /// Wrap `order` under a freshly generated v4 UUID.
    pub fn new(order: OrderRequest) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            order,
            legs: Vec::new(),
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub order_id: String,
}

/// Filters for the instrument listing. Empty lists are left out of the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentFilters {
    pub types: Vec<SecurityType>,
    pub trading: Vec<TradingStatus>,
    pub fractional_trading: Vec<TradingStatus>,
    pub option_trading: Vec<TradingStatus>,
    pub option_spread_trading: Vec<TradingStatus>,
}

impl InstrumentFilters {
    /// Query pairs, one per filter value.
    pub fn query_pairs(&self) -> Vec<(&'static str, &'static str)> {
        let statuses = [
            ("tradingFilter", &self.trading),
            ("fractionalTradingFilter", &self.fractional_trading),
            ("optionTradingFilter", &self.option_trading),
            ("optionSpreadTradingFilter", &self.option_spread_trading),
        ];

        self.types
            .iter()
            .map(|t| ("typeFilter", t.as_str()))
            .chain(
                statuses
                    .into_iter()
                    .flat_map(|(name, values)| values.iter().map(move |s| (name, s.as_str()))),
            )
            .collect()
    }
}

/// Window and paging for the transaction history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// ISO 8601 timestamp.
    pub start: Option<String>,
    /// ISO 8601 timestamp.
    pub end: Option<String>,
    pub page_size: Option<u32>,
    pub next_token: Option<String>,
}

impl HistoryQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(start) = &self.start {
            pairs.push(("start", start.clone()));
        }
        if let Some(end) = &self.end {
            pairs.push(("end", end.clone()));
        }
        if let Some(size) = self.page_size {
            pairs.push(("pageSize", size.to_string()));
        }
        if let Some(token) = &self.next_token {
            pairs.push(("nextToken", token.clone()));
        }
        pairs
    }
}
