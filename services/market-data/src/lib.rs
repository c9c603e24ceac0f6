//! Market Data Service
//!
//! Normalizes historical and live OHLCV bars from per-asset-class upstream
//! providers and distributes them to clients:
//! - Symbol routing to crypto, stock or forex adapters
//! - Chart snapshots with a TTL/LRU cache and request coalescing
//! - Live bar streams with one worker per subscribed symbol
//! - Per-connection bounded queues with drop-old-keep-new backpressure
//!
//! # Architecture
//!
//! ```text
//!   GET /chart                     WebSocket sessions
//!        │                                 │
//!  ┌─────▼──────┐                  ┌───────▼───────┐
//!  │ChartService│                  │  Dispatcher   │ ← one worker per symbol
//!  │ cache+coal.│                  └───┬───────▲───┘
//!  └─────┬──────┘                      │       │ fan-out
//!        │        ┌────────┐           │  ┌────┴─────┐
//!        └───────►│ Router │◄──────────┘  │ Registry │──► Outboxes
//!                 └───┬────┘              └──────────┘
//!          ┌──────────┼──────────┐
//!       ┌──▼──┐   ┌───▼──┐   ┌───▼──┐
//!       │Stock│   │Crypto│   │Forex │   Adapters (rate gate, deadline,
//!       └──┬──┘   └───┬──┘   └───┬──┘   unit conversion)
//!          └──────── Upstreams ──┘
//! ```

pub mod adapters;
pub mod bars;
pub mod cache;
pub mod chart;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod metrics;
pub mod outbox;
pub mod protocol;
pub mod range;
pub mod registry;
pub mod router;
pub mod session;

pub use engine::MarketDataEngine;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
