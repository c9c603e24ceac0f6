use market_data::MarketDataEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MarketDataEngine>,
}

impl AppState {
    pub fn new(engine: MarketDataEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
