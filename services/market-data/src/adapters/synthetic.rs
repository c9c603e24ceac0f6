//! Synthetic upstream for demo deployments.
//!
//! Produces a seeded random walk per provider symbol so the gateway can run
//! without provider credentials. Same symbol, same seed: history is
//! reproducible across restarts. Timestamps are epoch milliseconds.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use types::chart::Timespan;
use types::errors::MarketDataResult;

use super::upstream::{RawBar, Upstream};

/// Bucket width of live bars, seconds.
const LIVE_BUCKET_SECS: i64 = 60;
/// Largest single-step move, basis points.
const MAX_STEP_BPS: i64 = 150;

struct Walk {
    rng: ChaCha8Rng,
    bucket: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

pub struct SyntheticUpstream {
    name: String,
    walks: Mutex<HashMap<String, Walk>>,
}

impl SyntheticUpstream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            walks: Mutex::new(HashMap::new()),
        }
    }
}

/// FNV-1a over the symbol bytes.
fn seed_for(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

/// Starting price and decimal places by provider prefix.
fn price_profile(provider_symbol: &str) -> (Decimal, u32) {
    if provider_symbol.starts_with("X:") {
        (Decimal::from(30_000), 2)
    } else if provider_symbol.starts_with("C:") {
        (Decimal::new(11, 1), 5)
    } else {
        (Decimal::from(150), 2)
    }
}

fn step(rng: &mut ChaCha8Rng, price: Decimal, dp: u32) -> Decimal {
    let bps = rng.gen_range(-MAX_STEP_BPS..=MAX_STEP_BPS);
    let next = (price + price * Decimal::new(bps, 4)).round_dp(dp);
    if next > Decimal::ZERO {
        next
    } else {
        price
    }
}

fn walk_bar(rng: &mut ChaCha8Rng, open: Decimal, dp: u32) -> (Decimal, Decimal, Decimal, Decimal) {
    let close = step(rng, open, dp);
    let high = step(rng, open.max(close), dp).max(open.max(close));
    let low = step(rng, open.min(close), dp).min(open.min(close));
    (open, high, low, close)
}

fn raw(time_secs: i64, ohlc: (Decimal, Decimal, Decimal, Decimal), volume: Decimal) -> RawBar {
    let (o, h, l, c) = ohlc;
    RawBar::new(time_secs * 1_000, o, h, l, c, Some(volume))
}

#[async_trait]
impl Upstream for SyntheticUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bars(
        &self,
        provider_symbol: &str,
        timespan: Timespan,
        limit: u32,
    ) -> MarketDataResult<Vec<RawBar>> {
        let (mut price, dp) = price_profile(provider_symbol);
        let mut rng = ChaCha8Rng::seed_from_u64(seed_for(provider_symbol) ^ timespan.duration_secs() as u64);
        let width = timespan.duration_secs();
        let last_bucket = Utc::now().timestamp().div_euclid(width) * width;

        let bars = (0..limit as i64)
            .rev()
            .map(|back| {
                let ohlc = walk_bar(&mut rng, price, dp);
                price = ohlc.3;
                let volume = Decimal::from(rng.gen_range(1_000..100_000u32));
                raw(last_bucket - back * width, ohlc, volume)
            })
            .collect();
        Ok(bars)
    }

    async fn latest(&self, provider_symbol: &str) -> MarketDataResult<Option<RawBar>> {
        let now = Utc::now().timestamp();
        let bucket = now.div_euclid(LIVE_BUCKET_SECS) * LIVE_BUCKET_SECS;
        let (start, dp) = price_profile(provider_symbol);

        let mut walks = self.walks.lock();
        let walk = walks.entry(provider_symbol.to_string()).or_insert_with(|| Walk {
            rng: ChaCha8Rng::seed_from_u64(seed_for(provider_symbol)),
            bucket,
            open: start,
            high: start,
            low: start,
            close: start,
            volume: Decimal::ZERO,
        });

        if walk.bucket != bucket {
            walk.bucket = bucket;
            walk.open = walk.close;
            walk.high = walk.close;
            walk.low = walk.close;
            walk.volume = Decimal::ZERO;
        }

        let close = step(&mut walk.rng, walk.close, dp);
        walk.close = close;
        walk.high = walk.high.max(close);
        walk.low = walk.low.min(close);
        walk.volume += Decimal::from(walk.rng.gen_range(1..500u32));

        Ok(Some(raw(
            walk.bucket,
            (walk.open, walk.high, walk.low, walk.close),
            walk.volume,
        )))
    }
}
