use serde::{Deserialize, Serialize};

/// Active limit profile selected at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Conservative
    }
}

/// Hard limits enforced before every transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Per-trade size ceiling in lamports
    pub max_trade_lamports: u64,
    /// Total exposure ceiling across open positions, in lamports
    pub max_position_lamports: u64,
    pub max_daily_loss_usd: f64,
    /// Daily loss ceiling as a fraction of configured capital
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_open_positions: usize,
    /// Kept aside for transaction fees when checking balance sufficiency
    pub fee_buffer_lamports: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl RiskLimits {
    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Conservative => Self {
                max_trade_lamports: 500_000_000,      // 0.5 SOL
                max_position_lamports: 2_000_000_000, // 2 SOL
                max_daily_loss_usd: 100.0,
                max_daily_loss_pct: 0.02, // -2% daily
                max_drawdown_pct: 0.10,   // -10% from peak
                max_open_positions: 2,
                fee_buffer_lamports: 10_000_000, // 0.01 SOL
                breaker_threshold: 3,
                breaker_cooldown_secs: 600,
            },
            RiskLevel::Moderate => Self {
                max_trade_lamports: 2_000_000_000,     // 2 SOL
                max_position_lamports: 10_000_000_000, // 10 SOL
                max_daily_loss_usd: 500.0,
                max_daily_loss_pct: 0.05,
                max_drawdown_pct: 0.20,
                max_open_positions: 5,
                fee_buffer_lamports: 10_000_000,
                breaker_threshold: 5,
                breaker_cooldown_secs: 300,
            },
            RiskLevel::Aggressive => Self {
                max_trade_lamports: 10_000_000_000,    // 10 SOL
                max_position_lamports: 50_000_000_000, // 50 SOL
                max_daily_loss_usd: 2_000.0,
                max_daily_loss_pct: 0.10,
                max_drawdown_pct: 0.30,
                max_open_positions: 10,
                fee_buffer_lamports: 10_000_000,
                breaker_threshold: 8,
                breaker_cooldown_secs: 120,
            },
        }
    }
}
