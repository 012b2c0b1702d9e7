use crate::models::SwapQuote;
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

// Jupiter Swap API v1
// Docs: https://dev.jup.ag/docs/swap-api/get-quote
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client for a Jupiter-style swap aggregator
///
/// Missing routes and upstream timeouts are normal outcomes here: both
/// quote and swap-build return `Ok(None)` so callers can treat "no quote"
/// as a decision input instead of a fault.
#[derive(Clone)]
pub struct JupiterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    input_mint: String,
    in_amount: String,
    output_mint: String,
    out_amount: String,
    price_impact_pct: String,
    #[serde(default)]
    slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

impl JupiterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Get a quote for swapping tokens
    ///
    /// # Arguments
    /// * `input_mint` - Input token mint address
    /// * `output_mint` - Output token mint address
    /// * `amount` - Amount in raw units (e.g., lamports for SOL)
    /// * `slippage_bps` - Slippage tolerance in basis points (50 = 0.5%)
    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Option<SwapQuote>> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps
        );

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Quote request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), input_mint, output_mint, "No route");
            return Ok(None);
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: QuoteResponse = match serde_json::from_value(raw.clone()) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed quote response");
                return Ok(None);
            }
        };

        let in_amount: u64 = parsed.in_amount.parse()?;
        let out_amount: u64 = parsed.out_amount.parse()?;
        let price_impact: f64 = parsed.price_impact_pct.parse().unwrap_or(0.0);

        Ok(Some(SwapQuote {
            input_mint: parsed.input_mint,
            output_mint: parsed.output_mint,
            in_amount,
            out_amount,
            price_impact_pct: price_impact,
            slippage_bps: if parsed.slippage_bps > 0 {
                parsed.slippage_bps
            } else {
                slippage_bps
            },
            raw,
        }))
    }

    /// Build the swap transaction for a previously fetched quote
    ///
    /// Returns the base64-encoded transaction ready for submission, or
    /// `None` when the aggregator declines to build one.
    pub async fn build_swap_transaction(
        &self,
        quote: &SwapQuote,
        wallet_pubkey: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": wallet_pubkey,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Swap build request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Swap build rejected");
            return Ok(None);
        }

        let parsed: SwapResponse = response.json().await?;
        Ok(Some(parsed.swap_transaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_body(in_amount: u64, out_amount: u64) -> String {
        format!(
            r#"{{
                "inputMint": "So11111111111111111111111111111111111111112",
                "inAmount": "{}",
                "outputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                "outAmount": "{}",
                "otherAmountThreshold": "{}",
                "priceImpactPct": "0.01",
                "slippageBps": 50
            }}"#,
            in_amount, out_amount, out_amount
        )
    }

    #[tokio::test]
    async fn test_get_quote_parses_amounts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(quote_body(1_000_000_000, 150_000_000))
            .create_async()
            .await;

        let client = JupiterClient::new(server.url());
        let quote = client
            .get_quote(
                "So11111111111111111111111111111111111111112",
                "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                1_000_000_000,
                50,
            )
            .await
            .unwrap()
            .expect("quote should parse");

        assert_eq!(quote.in_amount, 1_000_000_000);
        assert_eq!(quote.out_amount, 150_000_000);
        assert_eq!(quote.slippage_bps, 50);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_route_is_none_not_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": "No route found"}"#)
            .create_async()
            .await;

        let client = JupiterClient::new(server.url());
        let quote = client
            .get_quote("MintA", "MintB", 1_000, 50)
            .await
            .unwrap();
        assert!(quote.is_none());
    }

    #[tokio::test]
    async fn test_build_swap_transaction() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/swap")
            .with_status(200)
            .with_body(r#"{"swapTransaction": "AQAB47base64payload"}"#)
            .create_async()
            .await;

        let client = JupiterClient::new(server.url());
        let quote = SwapQuote {
            input_mint: "MintA".to_string(),
            output_mint: "MintB".to_string(),
            in_amount: 1_000,
            out_amount: 2_000,
            price_impact_pct: 0.0,
            slippage_bps: 50,
            raw: serde_json::json!({}),
        };

        let tx = client
            .build_swap_transaction(&quote, "WalletPubkey111")
            .await
            .unwrap();
        assert_eq!(tx.as_deref(), Some("AQAB47base64payload"));
    }

    #[tokio::test]
    async fn test_build_rejection_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/swap")
            .with_status(500)
            .create_async()
            .await;

        let client = JupiterClient::new(server.url());
        let quote = SwapQuote {
            input_mint: "MintA".to_string(),
            output_mint: "MintB".to_string(),
            in_amount: 1_000,
            out_amount: 2_000,
            price_impact_pct: 0.0,
            slippage_bps: 50,
            raw: serde_json::json!({}),
        };

        let tx = client
            .build_swap_transaction(&quote, "WalletPubkey111")
            .await
            .unwrap();
        assert!(tx.is_none());
    }
}
