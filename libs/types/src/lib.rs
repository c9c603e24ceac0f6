//! Types library for the price feed
//!
//! Shared definitions used by the market-data engine and the gateway,
//! so that bars, chart queries and errors have exactly one shape on both
//! sides of the HTTP and WebSocket boundaries.
//!
//! # Modules
//! - `ids`: Connection identifiers
//! - `asset`: Asset classes (crypto, stock, forex)
//! - `bar`: Canonical OHLCV bar model
//! - `chart`: Snapshot query parameters and responses
//! - `errors`: Error taxonomy

pub mod asset;
pub mod bar;
pub mod chart;
pub mod errors;
pub mod ids;
