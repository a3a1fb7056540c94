//! HTTP market data adapter against a mocked data service

use std::time::Duration;

use bot_engine::{
    error::MarketDataError,
    market::{HttpMarketData, Interval, MarketDataProvider},
};
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn candle(timestamp: &str, close: &str) -> serde_json::Value {
    json!({
        "timestamp": timestamp,
        "open": close,
        "high": close,
        "low": close,
        "close": close,
        "volume": "10"
    })
}

async fn client(server: &MockServer) -> HttpMarketData {
    HttpMarketData::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_candles_sorted_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/candles/BTC-USDT"))
        .and(query_param("interval", "1h"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candles": [
                candle("2025-03-01T01:00:00Z", "101.5"),
                candle("2025-03-01T00:00:00Z", "100"),
            ]
        })))
        .mount(&server)
        .await;

    let candles = client(&server)
        .await
        .get_candles("BTC/USDT", Interval::Hour1, 2)
        .await
        .unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].close, Decimal::from(100));
    assert_eq!(candles[1].close, "101.5".parse::<Decimal>().unwrap());
}

#[tokio::test]
async fn test_latest_price_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices/ETH-USDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "price": "3150.25" })))
        .mount(&server)
        .await;

    let price = client(&server).await.get_latest_price("ETH/USDT").await.unwrap();
    assert_eq!(price, "3150.25".parse::<Decimal>().unwrap());
}

#[tokio::test]
async fn test_error_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices/DOGE-USDT"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices/BTC-USDT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices/SOL-USDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "price": "not-a-number" })))
        .mount(&server)
        .await;

    let market = client(&server).await;

    let missing = market.get_latest_price("DOGE/USDT").await.unwrap_err();
    assert!(matches!(missing, MarketDataError::SymbolNotFound(_)));
    assert!(!missing.is_retryable());

    let unavailable = market.get_latest_price("BTC/USDT").await.unwrap_err();
    assert!(unavailable.is_retryable());

    let garbled = market.get_latest_price("SOL/USDT").await.unwrap_err();
    assert!(matches!(garbled, MarketDataError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_slow_service_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices/BTC-USDT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "price": "100" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let market = HttpMarketData::new(&server.uri(), Duration::from_millis(200)).unwrap();
    let err = market.get_latest_price("BTC/USDT").await.unwrap_err();
    assert!(err.is_retryable());
}
