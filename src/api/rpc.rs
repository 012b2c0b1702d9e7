use crate::error::ExecutionError;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

type RpcResult<T> = std::result::Result<T, ExecutionError>;

/// Result of a pre-broadcast simulation
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub units_consumed: Option<u64>,
}

/// Thin JSON-RPC client for the chain node
///
/// Commitment level is a constructor input and rides along on every
/// request; nothing here hard-codes it.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
    commitment: String,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, commitment: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            commitment: commitment.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let payload: Value = response.json().await?;

        if let Some(err) = payload.get("error") {
            return Err(ExecutionError::Rpc(format!("{}: {}", method, err)));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| ExecutionError::Rpc(format!("{}: missing result", method)))
    }

    /// Broadcast a base64 transaction. Preflight is skipped: the engine
    /// simulates every externally-quoted swap before it gets here.
    pub async fn send_transaction(&self, tx_base64: &str) -> RpcResult<String> {
        let result = self
            .call(
                "sendTransaction",
                json!([tx_base64, {
                    "skipPreflight": true,
                    "encoding": "base64",
                    "preflightCommitment": self.commitment,
                }]),
            )
            .await?;

        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ExecutionError::Rpc("sendTransaction: non-string signature".into()))
    }

    pub async fn simulate_transaction(&self, tx_base64: &str) -> RpcResult<SimulationOutcome> {
        let result = self
            .call(
                "simulateTransaction",
                json!([tx_base64, {
                    "encoding": "base64",
                    "commitment": self.commitment,
                    "replaceRecentBlockhash": true,
                }]),
            )
            .await?;

        let value = result.get("value").cloned().unwrap_or(Value::Null);
        if let Some(err) = value.get("err") {
            if !err.is_null() {
                return Err(ExecutionError::Simulation(err.to_string()));
            }
        }

        Ok(SimulationOutcome {
            units_consumed: value.get("unitsConsumed").and_then(|u| u.as_u64()),
        })
    }

    /// Poll signature status until it reaches the configured commitment,
    /// racing against `confirm_timeout`. A hung node cannot block the
    /// pipeline: on expiry the signature is reported unconfirmed.
    pub async fn confirm_signature(
        &self,
        signature: &str,
        confirm_timeout: Duration,
    ) -> RpcResult<()> {
        let poll = async {
            loop {
                match self.signature_confirmed(signature).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    // Transient poll errors are retried until the deadline
                    Err(e) => tracing::debug!(error = %e, "Status poll failed"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };

        match timeout(confirm_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::ConfirmTimeout {
                signature: signature.to_string(),
                timeout_secs: confirm_timeout.as_secs(),
            }),
        }
    }

    async fn signature_confirmed(&self, signature: &str) -> RpcResult<bool> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": false}]),
            )
            .await?;

        let status = result
            .get("value")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null);

        if status.is_null() {
            return Ok(false);
        }
        if let Some(err) = status.get("err") {
            if !err.is_null() {
                return Err(ExecutionError::Rpc(format!(
                    "transaction failed on-chain: {}",
                    err
                )));
            }
        }

        let reached = status
            .get("confirmationStatus")
            .and_then(|s| s.as_str())
            .map(|s| match (s, self.commitment.as_str()) {
                ("finalized", _) => true,
                ("confirmed", "confirmed") | ("confirmed", "processed") => true,
                ("processed", "processed") => true,
                _ => false,
            })
            .unwrap_or(false);
        Ok(reached)
    }

    /// Wallet balance in lamports
    pub async fn get_balance(&self, pubkey: &str) -> RpcResult<u64> {
        let result = self
            .call(
                "getBalance",
                json!([pubkey, {"commitment": self.commitment}]),
            )
            .await?;
        result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ExecutionError::Rpc("getBalance: missing value".into()))
    }

    /// Total balance of `mint` held by `owner`, summed across token
    /// accounts, in raw units
    pub async fn get_token_balance(&self, owner: &str, mint: &str) -> RpcResult<u64> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    owner,
                    {"mint": mint},
                    {"encoding": "jsonParsed", "commitment": self.commitment}
                ]),
            )
            .await?;

        let accounts = result
            .get("value")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut total = 0u64;
        for account in accounts {
            let amount = account
                .pointer("/account/data/parsed/info/tokenAmount/amount")
                .and_then(|a| a.as_str())
                .and_then(|a| a.parse::<u64>().ok())
                .unwrap_or(0);
            total += amount;
        }
        Ok(total)
    }
}
