//! Endpoint wrappers.
//!
//! Thin path builders over [`RequestExecutor`]. Request payloads are typed
//! (see [`types`]); responses other than the account list and order
//! placement are passed through as opaque JSON.
//!
//! Caller-supplied path segments go through [`segment`], which rejects the
//! dot segments URL joining would otherwise resolve away.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::executor::{ApiRequest, RequestExecutor};

pub mod types;

pub use types::{
    HistoryQuery, InstrumentFilters, InstrumentRef, MarketSession, MultiLegRequest,
    OpenCloseIndicator, OrderExpiration, OrderLeg, OrderRequest, OrderSide, OrderType,
    PlaceOrderRequest, PlaceOrderResponse, QuoteType, SecurityType, TimeInForce, TradingStatus,
    UnderlyingType, UnknownVariant,
};

/// Most OSI symbols the greeks endpoint takes per call.
pub const MAX_GREEKS_SYMBOLS: usize = 250;

/// A brokerage account as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    pub account_type: String,
    #[serde(default)]
    pub options_level: String,
    #[serde(default)]
    pub brokerage_account_type: String,
    #[serde(default)]
    pub trade_permissions: String,
}

/// Response of the account listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Typed entry points for the trading endpoints this client uses.
pub struct TradingApi {
    executor: RequestExecutor,
}

impl TradingApi {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// List the trading accounts of the authenticated user.
    pub async fn accounts(&self) -> Result<AccountsResponse, ApiError> {
        self.executor.get("userapigateway/trading/account").await
    }

    /// Fetch the portfolio of one account.
    pub async fn portfolio(&self, account_id: &str) -> Result<Value, ApiError> {
        let path = format!(
            "userapigateway/trading/{}/portfolio/v2",
            segment(account_id, "account ID")?
        );
        self.executor.get(&path).await
    }

    /// Fetch one order.
    pub async fn order(&self, account_id: &str, order_id: &str) -> Result<Value, ApiError> {
        self.executor.get(&order_path(account_id, order_id)?).await
    }

    /// Request cancellation of an open order.
    ///
    /// The endpoint answers with an empty body; any payload is returned as-is.
    pub async fn cancel_order(&self, account_id: &str, order_id: &str) -> Result<Value, ApiError> {
        self.executor
            .execute(&ApiRequest::delete(order_path(account_id, order_id)?))
            .await
    }

    /// Submit a single-leg order.
    pub async fn place_order(
        &self,
        account_id: &str,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, ApiError> {
        let path = format!(
            "userapigateway/trading/{}/order",
            segment(account_id, "account ID")?
        );
        tracing::debug!(order_id = %request.order_id, "Placing order");
        self.executor
            .execute(&ApiRequest::post(path).with_body(json_body(request)?))
            .await
    }

    /// Estimate costs and buying power for a single-leg order.
    pub async fn preflight_single_leg(
        &self,
        account_id: &str,
        request: &OrderRequest,
    ) -> Result<Value, ApiError> {
        self.post(&preflight_path(account_id, "single-leg")?, request)
            .await
    }

    /// Estimate costs for a multi-leg (spread) order.
    pub async fn preflight_multi_leg(
        &self,
        account_id: &str,
        request: &MultiLegRequest,
    ) -> Result<Value, ApiError> {
        self.post(&preflight_path(account_id, "multi-leg")?, request)
            .await
    }

    /// Transaction history of an account, one page at a time.
    pub async fn history(&self, account_id: &str, query: &HistoryQuery) -> Result<Value, ApiError> {
        let path = format!(
            "userapigateway/trading/{}/history",
            segment(account_id, "account ID")?
        );
        let pairs = query.query_pairs();
        self.executor
            .get(&with_query(
                path,
                pairs.iter().map(|(k, v)| (*k, v.as_str())),
            ))
            .await
    }

    /// List tradable instruments.
    pub async fn instruments(&self, filters: &InstrumentFilters) -> Result<Value, ApiError> {
        self.executor
            .get(&with_query(
                "userapigateway/trading/instruments".to_string(),
                filters.query_pairs(),
            ))
            .await
    }

    /// Trading permissions and details of one instrument.
    pub async fn instrument(&self, symbol: &str, kind: SecurityType) -> Result<Value, ApiError> {
        let path = format!(
            "userapigateway/trading/instruments/{}/{}",
            segment(symbol, "symbol")?,
            kind.as_str()
        );
        self.executor.get(&path).await
    }

    /// Latest quotes for a batch of instruments.
    pub async fn quotes(
        &self,
        account_id: &str,
        instruments: &[InstrumentRef<QuoteType>],
    ) -> Result<Value, ApiError> {
        self.post(
            &market_data_path(account_id, "quotes")?,
            &json!({ "instruments": instruments }),
        )
        .await
    }

    /// Expiration dates with listed options on an underlying.
    pub async fn option_expirations(
        &self,
        account_id: &str,
        instrument: &InstrumentRef<UnderlyingType>,
    ) -> Result<Value, ApiError> {
        self.post(
            &market_data_path(account_id, "option-expirations")?,
            &json!({ "instrument": instrument }),
        )
        .await
    }

    /// Calls and puts on an underlying for one expiration date (`YYYY-MM-DD`).
    pub async fn option_chain(
        &self,
        account_id: &str,
        instrument: &InstrumentRef<UnderlyingType>,
        expiration_date: &str,
    ) -> Result<Value, ApiError> {
        self.post(
            &market_data_path(account_id, "option-chain")?,
            &json!({ "instrument": instrument, "expirationDate": expiration_date }),
        )
        .await
    }

    /// Greeks for up to [`MAX_GREEKS_SYMBOLS`] OSI option symbols.
    pub async fn option_greeks(
        &self,
        account_id: &str,
        osi_symbols: &[String],
    ) -> Result<Value, ApiError> {
        if osi_symbols.is_empty() || osi_symbols.len() > MAX_GREEKS_SYMBOLS {
            return Err(ApiError::Config {
                message: format!(
                    "between 1 and {} option symbols are allowed per request, got {}",
                    MAX_GREEKS_SYMBOLS,
                    osi_symbols.len()
                ),
            });
        }

        let path = format!(
            "userapigateway/option-details/{}/greeks",
            segment(account_id, "account ID")?
        );
        self.executor
            .get(&with_query(
                path,
                osi_symbols.iter().map(|s| ("osiSymbols", s.as_str())),
            ))
            .await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        self.executor
            .execute(&ApiRequest::post(path).with_body(json_body(body)?))
            .await
    }
}

/// Percent-encode one caller-supplied path segment.
///
/// Empty, `.` and `..` are rejected: encoding leaves them unchanged and URL
/// joining would resolve them against the neighbouring segments.
pub fn segment(value: &str, what: &str) -> Result<String, ApiError> {
    match value {
        "" | "." | ".." => Err(ApiError::Config {
            message: format!("invalid {} '{}'", what, value),
        }),
        _ => Ok(urlencoding::encode(value).into_owned()),
    }
}

fn order_path(account_id: &str, order_id: &str) -> Result<String, ApiError> {
    Ok(format!(
        "userapigateway/trading/{}/order/{}",
        segment(account_id, "account ID")?,
        segment(order_id, "order ID")?
    ))
}

fn preflight_path(account_id: &str, kind: &str) -> Result<String, ApiError> {
    Ok(format!(
        "userapigateway/trading/{}/preflight/{}",
        segment(account_id, "account ID")?,
        kind
    ))
}

fn market_data_path(account_id: &str, resource: &str) -> Result<String, ApiError> {
    Ok(format!(
        "userapigateway/marketdata/{}/{}",
        segment(account_id, "account ID")?,
        resource
    ))
}

/// Append `pairs` as a form-encoded query; no `?` when there are none.
fn with_query<'a>(path: String, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut empty = true;
    for (key, value) in pairs {
        query.append_pair(key, value);
        empty = false;
    }

    if empty {
        path
    } else {
        format!("{}?{}", path, query.finish())
    }
}

fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Config {
        message: format!("request body could not be encoded: {}", e),
    })
}
