//! # Brokerline Core
//!
//! Authenticated request layer for the brokerline trading API client.
//!
//! This crate provides:
//! - A credential store adapter over the OS keyring (and an in-memory fake)
//! - A token manager that exchanges the long-lived API key for short-lived
//!   access tokens and renews them before they expire
//! - A request executor that refreshes rejected tokens once per call and
//!   retries transient failures with jittered exponential backoff
//! - Typed wrappers for the account, market-data, instrument and order
//!   endpoints
//! - The [`ApiError`] taxonomy those components surface
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brokerline_core::{ClientConfig, DefaultTokenManager, RequestExecutor, TradingApi, create_store};
//!
//! let config = ClientConfig::default();
//! let tokens = Arc::new(DefaultTokenManager::new(create_store(true).store, &config));
//! let api = TradingApi::new(RequestExecutor::new(&config, tokens));
//! let accounts = api.accounts().await?;
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod retry;
pub mod store;
pub mod token;
pub mod token_manager;

pub use api::{
    Account, AccountsResponse, HistoryQuery, InstrumentFilters, InstrumentRef, MultiLegRequest,
    OrderLeg, OrderRequest, OrderSide, OrderType, PlaceOrderRequest, PlaceOrderResponse,
    SecurityType, TradingApi,
};

pub use config::{ClientConfig, TokenSettings, DEFAULT_ENDPOINT, ENDPOINT_ENV};

pub use error::{ApiError, ErrorKind};

pub use executor::{ApiRequest, RequestExecutor, RequestOptions};

pub use retry::{RetryPolicy, Sleeper, TokioSleeper};

pub use store::{create_store, MemoryStore, OpenedStore, Secret, SecretStore, StoreError};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{CachedToken, TokenProvider};

pub use token_manager::DefaultTokenManager;
