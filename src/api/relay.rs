use crate::error::ExecutionError;
use crate::models::BundleStatus;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

type RelayResult<T> = std::result::Result<T, ExecutionError>;

/// Client for an atomic bundle relay (Jito-style block engine)
///
/// Several endpoints are configured in priority order; submission walks
/// the list until one accepts the bundle.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    endpoints: Vec<String>,
}

impl RelayClient {
    pub fn new(endpoints: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, endpoints }
    }

    /// Submit base64 transactions as one atomic unit
    ///
    /// Returns the relay-assigned bundle id from the first endpoint that
    /// accepts it.
    pub async fn submit_bundle(
        &self,
        transactions: &[String],
        tip_lamports: u64,
    ) -> RelayResult<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [transactions, {"encoding": "base64", "tipLamports": tip_lamports}],
        });

        for endpoint in &self.endpoints {
            match self.try_submit(endpoint, &body).await {
                Ok(bundle_id) => {
                    tracing::info!(%endpoint, %bundle_id, "Bundle accepted");
                    return Ok(bundle_id);
                }
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "Relay rejected bundle, trying next");
                }
            }
        }

        Err(ExecutionError::RelayExhausted {
            attempted: self.endpoints.len(),
        })
    }

    async fn try_submit(&self, endpoint: &str, body: &Value) -> RelayResult<String> {
        let response = self.client.post(endpoint).json(body).send().await?;
        let payload: Value = response.json().await?;

        if let Some(err) = payload.get("error") {
            return Err(ExecutionError::Rpc(format!("sendBundle: {}", err)));
        }
        payload
            .get("result")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ExecutionError::Rpc("sendBundle: missing bundle id".into()))
    }

    /// Current status of a submitted bundle, asked of the first endpoint
    /// that answers
    pub async fn get_bundle_status(&self, bundle_id: &str) -> RelayResult<BundleStatus> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        });

        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.try_status(endpoint, &body).await {
                Ok(status) => return Ok(status),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or(ExecutionError::RelayExhausted {
            attempted: self.endpoints.len(),
        }))
    }

    async fn try_status(&self, endpoint: &str, body: &Value) -> RelayResult<BundleStatus> {
        let response = self.client.post(endpoint).json(body).send().await?;
        let payload: Value = response.json().await?;

        if let Some(err) = payload.get("error") {
            return Err(ExecutionError::Rpc(format!("getBundleStatuses: {}", err)));
        }

        let entry = payload
            .pointer("/result/value/0")
            .cloned()
            .unwrap_or(Value::Null);
        if entry.is_null() {
            // Unknown to this relay yet
            return Ok(BundleStatus::Pending);
        }

        let status = entry
            .get("confirmation_status")
            .or_else(|| entry.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("pending");

        Ok(match status {
            "landed" | "confirmed" | "finalized" | "processed" => BundleStatus::Landed,
            "failed" => BundleStatus::Failed,
            "dropped" => BundleStatus::Dropped,
            "invalid" => BundleStatus::Invalid,
            _ => BundleStatus::Pending,
        })
    }

    /// Poll until the bundle reaches a terminal state or the deadline
    /// passes. A timeout is reported as its own error so the caller can
    /// keep the signatures for reconciliation: the bundle may still land.
    pub async fn wait_for_bundle(
        &self,
        bundle_id: &str,
        poll_interval: Duration,
        deadline: Duration,
    ) -> RelayResult<BundleStatus> {
        let poll = async {
            loop {
                match self.get_bundle_status(bundle_id).await {
                    Ok(status) if status.is_terminal() => return Ok(status),
                    Ok(_) => {}
                    Err(e) => tracing::debug!(bundle_id, error = %e, "Bundle status poll failed"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(deadline, poll).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::BundleTimeout {
                bundle_id: bundle_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_uses_first_healthy_endpoint() {
        let mut bad = mockito::Server::new_async().await;
        bad.mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"rate limited"}}"#)
            .create_async()
            .await;

        let mut good = mockito::Server::new_async().await;
        good.mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"bundle-abc"}"#)
            .create_async()
            .await;

        let relay = RelayClient::new(vec![bad.url(), good.url()]);
        let id = relay
            .submit_bundle(&["tx1".to_string(), "tx2".to_string()], 10_000)
            .await
            .unwrap();
        assert_eq!(id, "bundle-abc");
    }

    #[tokio::test]
    async fn test_submit_exhausts_endpoints() {
        let mut bad = mockito::Server::new_async().await;
        bad.mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let relay = RelayClient::new(vec![bad.url()]);
        let result = relay.submit_bundle(&["tx1".to_string()], 10_000).await;
        assert!(matches!(
            result,
            Err(ExecutionError::RelayExhausted { attempted: 1 })
        ));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"value":[{"bundle_id":"b","confirmation_status":"landed"}]}}"#,
            )
            .create_async()
            .await;

        let relay = RelayClient::new(vec![server.url()]);
        let status = relay.get_bundle_status("b").await.unwrap();
        assert_eq!(status, BundleStatus::Landed);
    }

    #[tokio::test]
    async fn test_unknown_bundle_is_pending() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"value":[null]}}"#)
            .create_async()
            .await;

        let relay = RelayClient::new(vec![server.url()]);
        let status = relay.get_bundle_status("b").await.unwrap();
        assert_eq!(status, BundleStatus::Pending);
    }

    #[tokio::test]
    async fn test_wait_times_out_conservatively() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"value":[null]}}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let relay = RelayClient::new(vec![server.url()]);
        let result = relay
            .wait_for_bundle("b", Duration::from_millis(50), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(ExecutionError::BundleTimeout { .. })));
    }
}
