use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// A candidate trade produced by a strategy
///
/// Amounts are in raw units (lamports / smallest token unit). The asset
/// path and mint path run in parallel: `asset_path[i]` is the symbol for
/// `mint_path[i]`, and a valid opportunity has at least two hops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub strategy: String,
    pub asset_path: Vec<String>,
    pub mint_path: Vec<String>,
    pub input_amount: u64,
    pub expected_output: u64,
    pub expected_profit_lamports: i64,
    pub expected_profit_usd: f64,
    /// Confidence score in [0, 1]
    pub confidence: f64,
    /// Pre-fetched quotes for each leg, in path order
    pub leg_quotes: Vec<SwapQuote>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Validate structural invariants before execution
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.asset_path.len() != self.mint_path.len() {
            return Err(format!(
                "asset path ({}) and mint path ({}) length mismatch",
                self.asset_path.len(),
                self.mint_path.len()
            ));
        }
        if self.mint_path.len() < 2 {
            return Err("path must contain at least two assets".to_string());
        }
        if self.input_amount == 0 {
            return Err("input amount must be non-zero".to_string());
        }
        Ok(())
    }

    /// Number of swap legs in the path
    pub fn leg_count(&self) -> usize {
        self.mint_path.len().saturating_sub(1)
    }

    /// Trades with 3+ legs must land atomically or not at all
    pub fn requires_bundle(&self) -> bool {
        self.leg_count() >= 3
            || self
                .metadata
                .get("requires_atomic")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }
}

/// Quote for a single swap leg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    /// Raw quote payload, passed back verbatim when building the swap
    pub raw: serde_json::Value,
}

/// Gate decision for a proposed trade
#[derive(Debug, Clone, PartialEq)]
pub struct RiskCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Present only when the gate shrank the requested size
    pub adjusted_amount: Option<u64>,
}

impl RiskCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            adjusted_amount: None,
        }
    }

    pub fn allow_adjusted(amount: u64) -> Self {
        Self {
            allowed: true,
            reason: None,
            adjusted_amount: Some(amount),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            adjusted_amount: None,
        }
    }
}

/// Point-in-time view of the circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub triggered: bool,
    pub consecutive_failures: u32,
    pub cooldown_remaining: StdDuration,
    pub last_trip: Option<DateTime<Utc>>,
    pub last_reset: Option<DateTime<Utc>>,
}

/// An open exposure in an intermediate asset
///
/// Created when leg 1 of a multi-leg trade lands; destroyed when the final
/// leg closes the cycle or the holding is flagged as stuck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: Uuid,
    pub strategy: String,
    pub mint: String,
    pub symbol: String,
    /// Committed amount in raw units
    pub amount: u64,
    pub entry_price_usd: f64,
    pub opened_at: DateTime<Utc>,
}

/// A balance the engine could not convert back to the base asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckAsset {
    pub id: Uuid,
    pub mint: String,
    pub symbol: String,
    pub estimated_amount: u64,
    pub trade_id: Uuid,
    pub reason: String,
    pub recovered: bool,
    pub detected_at: DateTime<Utc>,
}

impl StuckAsset {
    pub fn new(position: &Position, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mint: position.mint.clone(),
            symbol: position.symbol.clone(),
            estimated_amount: position.amount,
            trade_id: position.trade_id,
            reason: reason.into(),
            recovered: false,
            detected_at: Utc::now(),
        }
    }
}

/// Completed-trade record fed to the ledger and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: Uuid,
    pub strategy: String,
    pub success: bool,
    pub profit_usd: f64,
    pub profit_lamports: i64,
    pub fees_usd: f64,
    pub signatures: Vec<String>,
    pub executed_at: DateTime<Utc>,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub profit_lamports: i64,
    pub profit_usd: f64,
    pub signatures: Vec<String>,
    pub compute_units: Option<u64>,
    pub tip_lamports: u64,
    pub error: Option<String>,
    pub stuck_asset: Option<StuckAsset>,
    pub duration: StdDuration,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>, duration: StdDuration) -> Self {
        Self {
            success: false,
            profit_lamports: 0,
            profit_usd: 0.0,
            signatures: Vec::new(),
            compute_units: None,
            tip_lamports: 0,
            error: Some(error.into()),
            stuck_asset: None,
            duration,
        }
    }
}

/// Aggregate profit-and-loss view
#[derive(Debug, Clone, Default, Serialize)]
pub struct PnlSnapshot {
    pub total_profit_usd: f64,
    pub daily_profit_usd: f64,
    pub trades_total: u64,
    pub trades_won: u64,
    pub win_rate: f64,
    pub best_trade_usd: f64,
    pub worst_trade_usd: f64,
    /// Positive while winning, negative while losing
    pub current_streak: i32,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
    pub peak_balance_usd: f64,
    pub drawdown_usd: f64,
    pub drawdown_pct: f64,
}

/// Terminal and non-terminal bundle states reported by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Pending,
    Landed,
    Failed,
    Dropped,
    Invalid,
}

impl BundleStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BundleStatus::Pending)
    }
}

pub fn expiry_in(seconds: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(seconds)
}
