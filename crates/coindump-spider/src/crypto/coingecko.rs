use crate::config::Settings;
use crate::http::*;
use crate::SpiderError;
use reqwest::{ClientBuilder, Request};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

// endpoints (both return JSON, both capped at 10s):
//
// ping  = `https://api.coingecko.com/api/v3/ping`
//
// price = `https://api.coingecko.com/api/v3/simple/price`, all coins in one call

/// Token returned by a successful availability check.
pub const API_OK: &str = "API OK";

/////////////////////////////////////////////////////////////////////////////////
// core
/////////////////////////////////////////////////////////////////////////////////

/// Thin client over the two public CoinGecko endpoints the DAG uses.
#[derive(Debug, Clone)]
pub struct CoinGecko {
    http_client: HttpClient,
    base: String,
}

impl CoinGecko {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, SpiderError> {
        let base = base.trim_end_matches('/').to_string();
        let http_client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|source| {
                error!("failed to build the CoinGecko client, error({source})");
                SpiderError::Http {
                    url: base.clone(),
                    source,
                }
            })?;

        Ok(Self { http_client, base })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SpiderError> {
        Self::new(&settings.api_url, settings.http_timeout)
    }

    /// Ping the API; any answer that parses as JSON counts as available.
    pub async fn check_api(&self) -> Result<&'static str, SpiderError> {
        let body = async { self.fetch_json(self.ping_request()?).await }
            .await
            .map_err(|err| {
                error!("CoinGecko API error: {err}");
                err
            })?;

        info!("CoinGecko API responded: {body}");
        Ok(API_OK)
    }

    /// Current price, market cap, 24h volume and 24h change of `coins`, in USD.
    ///
    /// The body is returned as is: `{"bitcoin": {"usd": .., "usd_market_cap": ..}, ..}`.
    pub async fn get_prices(&self, coins: &[String]) -> Result<Value, SpiderError> {
        let body = async { self.fetch_json(self.price_request(coins)?).await }
            .await
            .map_err(|err| {
                error!("failed to fetch CoinGecko prices: {err}");
                err
            })?;

        info!("CoinGecko prices received: {body}");
        Ok(body)
    }

    pub fn ping_request(&self) -> Result<Request, SpiderError> {
        let url = format!("{}/ping", self.base);
        self.http_client
            .get(&url)
            .build()
            .map_err(|source| SpiderError::Http { url, source })
    }

    pub fn price_request(&self, coins: &[String]) -> Result<Request, SpiderError> {
        let url = format!("{}/simple/price", self.base);
        let ids = coins.join(",");
        self.http_client
            .get(&url)
            .query(&[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
            ])
            .build()
            .map_err(|source| SpiderError::Http { url, source })
    }

    async fn fetch_json(&self, request: Request) -> Result<Value, SpiderError> {
        let url = request.url().to_string();
        let time = std::time::Instant::now();

        trace!("GET {url}");
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|source| SpiderError::Http {
                url: url.clone(),
                source,
            })?;

        // the body is parsed whatever the status
        let status = response.status();
        if !status.is_success() {
            warn!("{url} answered with status {status}");
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|source| SpiderError::Decode {
                url: url.clone(),
                source,
            })?;

        debug!("GET {url} done, {}", crate::time_elapsed(time));
        Ok(body)
    }
}

/////////////////////////////////////////////////////////////////////////////////
// observations
/////////////////////////////////////////////////////////////////////////////////
//
// {
//   "bitcoin": {
//     "usd": 50000,
//     "usd_market_cap": 980000000000.0,
//     "usd_24h_vol": 30000000000.0,
//     "usd_24h_change": 1.2
//   },
//   "ethereum": {
//     "usd": 3000
//   }
// }

/// One coin's figures from a `/simple/price` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceObservation {
    pub coin_id: String,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub price_change_24h: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    usd: Option<f64>,
    usd_market_cap: Option<f64>,
    usd_24h_vol: Option<f64>,
    usd_24h_change: Option<f64>,
}

impl PriceObservation {
    /// Read one coin's entry; absent or null fields become `None`.
    pub fn from_entry(coin_id: &str, entry: &Value) -> Result<Self, SpiderError> {
        let entry = PriceEntry::deserialize(entry)
            .map_err(|err| SpiderError::Payload(format!("entry for `{coin_id}`: {err}")))?;

        Ok(Self {
            coin_id: coin_id.to_string(),
            price_usd: entry.usd,
            market_cap_usd: entry.usd_market_cap,
            volume_24h_usd: entry.usd_24h_vol,
            price_change_24h: entry.usd_24h_change,
        })
    }
}

/// Walk a `/simple/price` payload in its own key order.
pub fn observations(prices: &Value) -> Result<Vec<PriceObservation>, SpiderError> {
    let coins = prices.as_object().ok_or_else(|| {
        SpiderError::Payload(format!("expected an object keyed by coin id, got {prices}"))
    })?;

    coins
        .iter()
        .map(|(coin_id, entry)| PriceObservation::from_entry(coin_id, entry))
        .collect()
}
