use crate::handlers::{chart, health, ws};
use crate::state::AppState;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/chart", get(chart::get_chart))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics));

    Router::new()
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use market_data::adapters::{MockUpstream, RawBar, Upstreams};
    use market_data::config::MarketDataConfig;
    use market_data::MarketDataEngine;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;
    use types::errors::MarketDataError;

    struct TestApp {
        router: Router,
        stocks: Arc<MockUpstream>,
    }

    fn app() -> TestApp {
        let stocks = Arc::new(MockUpstream::new("stocks"));
        let engine = MarketDataEngine::new(
            MarketDataConfig::default(),
            Upstreams {
                stock: stocks.clone(),
                crypto: Arc::new(MockUpstream::new("crypto")),
                forex: Arc::new(MockUpstream::new("forex")),
            },
        )
        .unwrap();
        TestApp {
            router: create_router(AppState::new(engine)),
            stocks,
        }
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn bar(day: i64, close: i64) -> RawBar {
        let c = Decimal::from(close);
        RawBar::new(day * 86_400_000, c, c + Decimal::ONE, c - Decimal::ONE, c, Some(Decimal::TEN))
    }

    #[tokio::test]
    async fn test_chart_defaults_to_daily_range() {
        let app = app();
        app.stocks.set_bars(vec![bar(1, 100), bar(2, 101), bar(3, 102)]);

        let (status, _, body) = get(app.router, "/v1/chart?symbol=aapl").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["assetClass"], "stock");
        assert_eq!(body["bars"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_bad_request() {
        let app = app();
        let (status, _, body) = get(app.router, "/v1/chart?symbol=ZZZ1&range=1D").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UNKNOWN_SYMBOL");
        assert_eq!(app.stocks.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_range_is_bad_request() {
        let app = app();
        let (status, _, body) = get(app.router, "/v1/chart?symbol=AAPL&range=5Y").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_RANGE");
    }

    #[tokio::test]
    async fn test_invalid_provider_data_hides_detail() {
        let app = app();
        app.stocks
            .push_fetch_result(Err(MarketDataError::invalid_data("secret provider detail")));

        let (status, _, body) = get(app.router, "/v1/chart?symbol=AAPL").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "UPSTREAM_DATA_INVALID");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_rate_limit_sets_retry_after() {
        let app = app();
        for _ in 0..3 {
            app.stocks.push_fetch_result(Err(MarketDataError::RateLimited {
                retry_after_ms: Some(2_000),
            }));
        }

        let (status, headers, body) = get(app.router, "/v1/chart?symbol=AAPL").await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "2");
        assert_eq!(body["error"], "RATE_LIMITED");
        assert_eq!(app.stocks.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app();
        let (status, _, body) = get(app.router.clone(), "/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], market_data::SERVICE_VERSION);

        let (status, _, body) = get(app.router, "/v1/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected_clients"], 0);
    }

    #[tokio::test]
    async fn test_missing_symbol_is_rejected() {
        let app = app();
        let (status, _, _) = get(app.router, "/v1/chart?range=1D").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
