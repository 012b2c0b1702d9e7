use crate::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // Start with 2 seconds

/// USD reference price for a token
#[derive(Debug, Clone)]
pub struct ReferencePrice {
    pub symbol: String,
    pub price_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Client for a DexScreener-style price API
///
/// Supplies the fiat reference price the ledger and gate use to value
/// lamport amounts.
#[derive(Clone)]
pub struct PriceFeedClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    pairs: Vec<PairData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairData {
    chain_id: String,
    base_token: TokenInfo,
    price_usd: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    symbol: String,
}

impl PriceFeedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Get current USD price for a token by its mint address
    /// Includes retry logic with exponential backoff for transient failures
    pub async fn get_price(&self, mint: &str) -> Result<ReferencePrice> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.fetch_price_once(mint).await {
                Ok(price) => {
                    if attempt > 1 {
                        tracing::info!("✓ Fetched {} price after {} attempts", mint, attempt);
                    }
                    return Ok(price);
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            "Price attempt {}/{} failed for {}: {}. Retrying in {}ms...",
                            attempt,
                            MAX_RETRIES,
                            mint,
                            last_error.as_ref().unwrap(),
                            backoff_ms
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "All retry attempts failed".into()))
    }

    async fn fetch_price_once(&self, mint: &str) -> Result<ReferencePrice> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);

        let response: PriceResponse = self.client.get(&url).send().await?.json().await?;

        // If multiple pairs exist, prefer the Solana one
        let pair = response
            .pairs
            .into_iter()
            .find(|p| p.chain_id == "solana")
            .ok_or("No Solana pair found for token")?;

        Ok(ReferencePrice {
            symbol: pair.base_token.symbol,
            price_usd: pair.price_usd.parse()?,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_price_parses_solana_pair() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"pairs":[
                    {"chainId":"ethereum","baseToken":{"symbol":"WSOL"},"priceUsd":"149.0"},
                    {"chainId":"solana","baseToken":{"symbol":"SOL"},"priceUsd":"150.25"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = PriceFeedClient::new(server.url());
        let price = client
            .get_price("So11111111111111111111111111111111111111112")
            .await
            .unwrap();
        assert_eq!(price.symbol, "SOL");
        assert!((price.price_usd - 150.25).abs() < 1e-9);
    }

    #[test]
    fn test_client_creation() {
        let client = PriceFeedClient::new("https://api.dexscreener.com");
        drop(client);
    }
}
