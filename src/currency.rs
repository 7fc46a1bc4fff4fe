// =============================================================================
// 通貨換算
// =============================================================================
// スパチャ金額をUSDに換算する。
// USD基準のレート表（open.er-api.com 形式）を1時間キャッシュして使う。
// 換算できない場合はエラーを返し、呼び出し側はリクエストを拒否する。
// =============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::http_timeout;

/// レート表キャッシュのTTL（1時間）
const RATES_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate table unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),
}

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// 金額をUSDに換算
    async fn to_usd(&self, amount: f64, currency: &str) -> Result<f64, CurrencyError>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    result: String,
    #[serde(default)]
    rates: HashMap<String, f64>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

#[derive(Debug)]
struct CachedRates {
    rates: HashMap<String, f64>,
    fetched_at: Instant,
}

/// USD基準レート表による換算
#[derive(Debug)]
pub struct RateTableConverter {
    client: Client,
    rates_url: String,
    ttl: Duration,
    cache: RwLock<Option<CachedRates>>,
}

impl RateTableConverter {
    pub fn new(rates_url: impl Into<String>) -> Result<Self, CurrencyError> {
        let client = Client::builder().timeout(http_timeout()).build()?;
        Ok(Self {
            client,
            rates_url: rates_url.into(),
            ttl: Duration::from_secs(RATES_TTL_SECS),
            cache: RwLock::new(None),
        })
    }

    /// 通貨コードに対するレート（1 USD あたり）を取得
    async fn rate_for(&self, currency: &str) -> Result<f64, CurrencyError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return lookup(&cached.rates, currency);
                }
            }
        }

        let rates = self.fetch_rates().await?;
        let rate = lookup(&rates, currency);

        let mut cache = self.cache.write().await;
        *cache = Some(CachedRates {
            rates,
            fetched_at: Instant::now(),
        });
        rate
    }

    async fn fetch_rates(&self) -> Result<HashMap<String, f64>, CurrencyError> {
        log::debug!("Fetching exchange rates from {}", self.rates_url);

        let response = self.client.get(&self.rates_url).send().await?;
        let body: RatesResponse = response.error_for_status()?.json().await?;

        if body.result != "success" {
            let reason = body.error_type.unwrap_or(body.result);
            log::error!("Exchange rate API error: {}", reason);
            return Err(CurrencyError::Unavailable(reason));
        }

        log::info!("Exchange rates updated ({} currencies)", body.rates.len());
        Ok(body.rates)
    }
}

fn lookup(rates: &HashMap<String, f64>, currency: &str) -> Result<f64, CurrencyError> {
    match rates.get(currency) {
        Some(rate) if rate.is_finite() && *rate > 0.0 => Ok(*rate),
        _ => Err(CurrencyError::UnknownCurrency(currency.to_string())),
    }
}

#[async_trait]
impl CurrencyConverter for RateTableConverter {
    async fn to_usd(&self, amount: f64, currency: &str) -> Result<f64, CurrencyError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CurrencyError::InvalidAmount(amount));
        }

        let currency = currency.trim().to_ascii_uppercase();
        if currency == "USD" {
            return Ok(amount);
        }

        let rate = self.rate_for(&currency).await?;
        Ok(amount / rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES_BODY: &str =
        r#"{"result":"success","base_code":"USD","rates":{"USD":1,"JPY":150.0,"EUR":0.5}}"#;

    async fn converter_for(server: &mockito::ServerGuard) -> RateTableConverter {
        RateTableConverter::new(format!("{}/v6/latest/USD", server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_usd_passes_through_without_fetch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v6/latest/USD")
            .expect(0)
            .create_async()
            .await;

        let converter = converter_for(&server).await;
        assert_eq!(converter.to_usd(7.5, "usd").await.unwrap(), 7.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_convert_and_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v6/latest/USD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RATES_BODY)
            .expect(1)
            .create_async()
            .await;

        let converter = converter_for(&server).await;
        let jpy = converter.to_usd(1500.0, "JPY").await.unwrap();
        assert!((jpy - 10.0).abs() < 1e-9);

        let eur = converter.to_usd(2.0, "EUR").await.unwrap();
        assert!((eur - 4.0).abs() < 1e-9);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v6/latest/USD")
            .with_status(200)
            .with_body(RATES_BODY)
            .create_async()
            .await;

        let converter = converter_for(&server).await;
        let result = converter.to_usd(100.0, "XYZ").await;
        assert!(matches!(result, Err(CurrencyError::UnknownCurrency(c)) if c == "XYZ"));
    }

    #[tokio::test]
    async fn test_api_error_result() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v6/latest/USD")
            .with_status(200)
            .with_body(r#"{"result":"error","error-type":"unsupported-code"}"#)
            .create_async()
            .await;

        let converter = converter_for(&server).await;
        let result = converter.to_usd(100.0, "JPY").await;
        assert!(matches!(result, Err(CurrencyError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_http_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v6/latest/USD")
            .with_status(503)
            .create_async()
            .await;

        let converter = converter_for(&server).await;
        assert!(matches!(
            converter.to_usd(100.0, "JPY").await,
            Err(CurrencyError::Http(_))
        ));
    }
}
