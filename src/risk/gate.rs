use crate::ledger::Ledger;
use crate::models::{CircuitBreakerSnapshot, RiskCheck};
use crate::risk::breaker::{BreakerCheck, CircuitBreaker};
use crate::risk::limits::{RiskLevel, RiskLimits};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Admission control in front of every transaction
///
/// `can_trade` runs an ordered pipeline of checks and short-circuits on
/// the first denial. Only the per-trade cap and the exposure-headroom
/// check may shrink the requested size; every other failing check is a
/// hard deny with a reason.
///
/// Persistence reads that feed the ledger are fail-open (storage errors
/// degrade to zero values upstream). Flipping that policy to fail-closed
/// would mean denying here whenever the ledger could not be restored.
pub struct RiskGate {
    level: RiskLevel,
    limits: RiskLimits,
    breaker: CircuitBreaker,
    emergency_stop: bool,
    strategies: HashMap<String, bool>,
    capital_usd: f64,
}

impl RiskGate {
    pub fn new(level: RiskLevel, strategies: HashMap<String, bool>, capital_usd: f64) -> Self {
        let limits = RiskLimits::for_level(level);
        let breaker = CircuitBreaker::new(
            limits.breaker_threshold,
            Duration::from_secs(limits.breaker_cooldown_secs),
        );
        Self {
            level,
            limits,
            breaker,
            emergency_stop: false,
            strategies,
            capital_usd,
        }
    }

    /// Evaluate a proposed trade against every safety limit
    ///
    /// The caller holds the ledger lock for the whole evaluation so all
    /// reads observe one consistent state.
    pub fn can_trade(
        &mut self,
        strategy: &str,
        requested_lamports: u64,
        ledger: &mut Ledger,
        balance_lamports: u64,
        base_price_usd: f64,
    ) -> RiskCheck {
        // 1. Emergency stop overrides everything
        if self.emergency_stop {
            return RiskCheck::deny("emergency stop active");
        }

        // 2. Circuit breaker, with lazy cooldown reset
        if let BreakerCheck::Open(remaining) = self.breaker.check(Utc::now()) {
            return RiskCheck::deny(format!(
                "circuit breaker tripped, {}s cooldown remaining",
                remaining.as_secs()
            ));
        }

        // 3. Unknown or disabled strategies fail closed
        if !self.strategies.get(strategy).copied().unwrap_or(false) {
            return RiskCheck::deny(format!("strategy '{}' is not enabled", strategy));
        }

        // 4. Daily loss ceiling, absolute and as a share of capital. The
        // committed size (after the per-trade cap it will receive anyway)
        // is treated as fully at risk: a stranded cycle can forfeit all
        // of it, so a trade that could push the day past budget is denied
        // up front rather than discovered after it loses.
        let daily_loss = ledger.daily_loss();
        let committed = requested_lamports.min(self.limits.max_trade_lamports);
        let committed_usd = committed as f64 / LAMPORTS_PER_SOL * base_price_usd;
        if daily_loss >= self.limits.max_daily_loss_usd
            || daily_loss + committed_usd > self.limits.max_daily_loss_usd
        {
            return RiskCheck::deny(format!(
                "daily loss ${:.2} + trade ${:.2} breaches limit ${:.2}",
                daily_loss, committed_usd, self.limits.max_daily_loss_usd
            ));
        }
        let pct_budget = self.capital_usd * self.limits.max_daily_loss_pct;
        if daily_loss >= pct_budget {
            return RiskCheck::deny(format!(
                "daily loss ${:.2} at {:.1}% of capital",
                daily_loss,
                self.limits.max_daily_loss_pct * 100.0
            ));
        }

        // 5. Drawdown ceiling against the tracked peak
        let balance_usd = balance_lamports as f64 / LAMPORTS_PER_SOL * base_price_usd;
        let (_, drawdown_pct) = ledger.drawdown(balance_usd);
        if drawdown_pct >= self.limits.max_drawdown_pct {
            return RiskCheck::deny(format!(
                "drawdown {:.1}% at limit {:.1}%",
                drawdown_pct * 100.0,
                self.limits.max_drawdown_pct * 100.0
            ));
        }

        // 6. Concurrent-position ceiling
        if ledger.open_position_count() >= self.limits.max_open_positions {
            return RiskCheck::deny(format!(
                "{} open positions at limit {}",
                ledger.open_position_count(),
                self.limits.max_open_positions
            ));
        }

        // 7. Per-trade size ceiling shrinks, never denies
        let mut amount = requested_lamports;
        let mut adjusted = false;
        if amount > self.limits.max_trade_lamports {
            amount = self.limits.max_trade_lamports;
            adjusted = true;
        }

        // 8. Exposure ceiling shrinks to remaining headroom
        let exposure = ledger.total_exposure();
        let headroom = self.limits.max_position_lamports.saturating_sub(exposure);
        if headroom == 0 {
            return RiskCheck::deny(format!(
                "exposure {} lamports at position limit",
                exposure
            ));
        }
        if amount > headroom {
            amount = headroom;
            adjusted = true;
        }

        // 9. Balance must cover the trade plus a fee buffer
        if balance_lamports < amount + self.limits.fee_buffer_lamports {
            return RiskCheck::deny(format!(
                "balance {} lamports below trade {} + fee buffer {}",
                balance_lamports, amount, self.limits.fee_buffer_lamports
            ));
        }

        if adjusted {
            RiskCheck::allow_adjusted(amount)
        } else {
            RiskCheck::allow()
        }
    }

    /// Sole write path for the circuit breaker. Gate denials never reach
    /// this; only execution outcomes drive the breaker.
    pub fn report_trade_result(&mut self, success: bool, profit_usd: f64) {
        self.breaker.record(success, profit_usd);
    }

    /// Proactive soft throttle applied before the hard gate
    ///
    /// Trade size scales linearly to zero as daily-loss usage moves from
    /// 50% to 100% of budget, and shrinks another quarter per consecutive
    /// failure.
    pub fn adjusted_trade_size(&mut self, requested_lamports: u64, ledger: &mut Ledger) -> u64 {
        let budget = self
            .limits
            .max_daily_loss_usd
            .min(self.capital_usd * self.limits.max_daily_loss_pct);
        let usage = if budget > 0.0 {
            (ledger.daily_loss() / budget).min(1.0)
        } else {
            1.0
        };

        let loss_factor = if usage <= 0.5 {
            1.0
        } else {
            (1.0 - usage) / 0.5
        };

        let failures = self.breaker.consecutive_failures();
        let failure_factor = (1.0 - 0.25 * failures as f64).max(0.25);

        let scaled = requested_lamports as f64 * loss_factor * failure_factor;
        scaled as u64
    }

    pub fn set_level(&mut self, level: RiskLevel) {
        self.level = level;
        self.limits = RiskLimits::for_level(level);
        self.breaker.reconfigure(
            self.limits.breaker_threshold,
            Duration::from_secs(self.limits.breaker_cooldown_secs),
        );
        tracing::info!(?level, "Risk profile swapped");
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn set_emergency_stop(&mut self, stop: bool) {
        if stop != self.emergency_stop {
            tracing::warn!(stop, "🛑 Emergency stop flag changed");
        }
        self.emergency_stop = stop;
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn breaker_tripped(&self) -> bool {
        self.breaker.is_triggered()
    }

    pub fn breaker_cooldown_remaining(&self) -> Duration {
        self.breaker.cooldown_remaining(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use uuid::Uuid;

    const SOL: f64 = 150.0;

    fn gate() -> RiskGate {
        let mut strategies = HashMap::new();
        strategies.insert("two_hop".to_string(), true);
        strategies.insert("disabled_strat".to_string(), false);
        RiskGate::new(RiskLevel::Conservative, strategies, 10_000.0)
    }

    fn position(amount: u64) -> Position {
        Position {
            trade_id: Uuid::new_v4(),
            strategy: "two_hop".to_string(),
            mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            symbol: "USDC".to_string(),
            amount,
            entry_price_usd: 1.0,
            opened_at: Utc::now(),
        }
    }

    fn loss(usd: f64) -> crate::models::TradeResult {
        crate::models::TradeResult {
            id: Uuid::new_v4(),
            strategy: "two_hop".to_string(),
            success: false,
            profit_usd: -usd,
            profit_lamports: 0,
            fees_usd: 0.0,
            signatures: Vec::new(),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_allows_normal_trade() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(check.allowed);
        assert!(check.adjusted_amount.is_none());
    }

    #[test]
    fn test_emergency_stop_denies_first() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);
        gate.set_emergency_stop(true);

        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("emergency stop"));
    }

    #[test]
    fn test_unknown_strategy_fails_closed() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        let check = gate.can_trade("mystery", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(!check.allowed);

        let check = gate.can_trade("disabled_strat", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(!check.allowed);
    }

    #[test]
    fn test_per_trade_cap_shrinks() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        // Conservative cap is 0.5 SOL
        let check = gate.can_trade("two_hop", 5_000_000_000, &mut ledger, 70_000_000_000, SOL);
        assert!(check.allowed);
        assert_eq!(check.adjusted_amount, Some(500_000_000));
    }

    #[test]
    fn test_exposure_headroom_boundary() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        // Conservative exposure cap is 2 SOL; commit 1.6 SOL
        ledger.open_position(position(1_600_000_000));
        let headroom = 400_000_000u64;

        // Exactly the headroom: approved at full size
        let check = gate.can_trade("two_hop", headroom, &mut ledger, 70_000_000_000, SOL);
        assert!(check.allowed);
        assert!(check.adjusted_amount.is_none());

        // One lamport more: shrunk to headroom, never denied
        let check = gate.can_trade("two_hop", headroom + 1, &mut ledger, 70_000_000_000, SOL);
        assert!(check.allowed);
        assert_eq!(check.adjusted_amount, Some(headroom));
    }

    #[test]
    fn test_zero_headroom_denies() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);
        ledger.open_position(position(2_000_000_000));

        let check = gate.can_trade("two_hop", 100, &mut ledger, 70_000_000_000, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("position limit"));
    }

    #[test]
    fn test_approved_trades_respect_caps() {
        // Invariant: whenever allowed, adjusted <= per-trade cap and
        // exposure + adjusted <= position cap.
        let mut gate = gate();
        let limits = gate.limits().clone();

        for exposure in [0u64, 500_000_000, 1_900_000_000] {
            for requested in [1_000u64, 400_000_000, 900_000_000, 10_000_000_000] {
                let mut ledger = Ledger::new(10_000.0);
                if exposure > 0 {
                    ledger.open_position(position(exposure));
                }
                let check =
                    gate.can_trade("two_hop", requested, &mut ledger, 70_000_000_000, SOL);
                if check.allowed {
                    let granted = check.adjusted_amount.unwrap_or(requested);
                    assert!(granted <= limits.max_trade_lamports);
                    assert!(exposure + granted <= limits.max_position_lamports);
                }
            }
        }
    }

    #[test]
    fn test_daily_loss_ceiling_blocks_third_trade() {
        // Daily budget $100, three 0.4 SOL trades at $100/SOL that each
        // lose their full size. The third must be denied by the daily
        // loss check before execution: the first two realized $80 of
        // loss and committing another $40 would breach the ceiling.
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);
        let price = 100.0;
        let trade_lamports = 400_000_000; // 0.4 SOL

        let check = gate.can_trade("two_hop", trade_lamports, &mut ledger, 100_000_000_000, price);
        assert!(check.allowed);
        ledger.record_trade(&loss(40.0));

        let check = gate.can_trade("two_hop", trade_lamports, &mut ledger, 100_000_000_000, price);
        assert!(check.allowed);
        ledger.record_trade(&loss(40.0));

        let check = gate.can_trade("two_hop", trade_lamports, &mut ledger, 100_000_000_000, price);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn test_drawdown_ceiling() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        // Establish a high peak, then check with a balance 12% below it
        ledger.drawdown(10_000.0);
        let low_balance_lamports = (8_800.0 / SOL * 1e9) as u64;
        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, low_balance_lamports, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("drawdown"));
    }

    #[test]
    fn test_position_count_ceiling() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);
        ledger.open_position(position(100_000_000));
        ledger.open_position(position(100_000_000));

        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("open positions"));
    }

    #[test]
    fn test_balance_insufficiency() {
        let mut gate = gate();
        // Small book so the tiny wallet is not a drawdown breach
        let mut ledger = Ledger::new(15.0);

        // Balance covers the trade but not the fee buffer
        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, 105_000_000, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("fee buffer"));
    }

    #[test]
    fn test_breaker_cooldown_denial_and_recovery() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        // Threshold is 3 on the conservative profile
        gate.report_trade_result(false, 0.0);
        gate.report_trade_result(false, 0.0);
        gate.report_trade_result(false, 0.0);
        assert!(gate.breaker_tripped());

        let check = gate.can_trade("two_hop", 100_000_000, &mut ledger, 66_000_000_000, SOL);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("cooldown"));
        assert!(gate.breaker_cooldown_remaining() > Duration::ZERO);

        // Gate denials alone never feed the breaker
        let failures_before = gate.breaker_snapshot().consecutive_failures;
        let _ = gate.can_trade("mystery", 100_000_000, &mut ledger, 5_000_000_000, SOL);
        assert_eq!(
            gate.breaker_snapshot().consecutive_failures,
            failures_before
        );
    }

    #[test]
    fn test_breaker_success_resets() {
        let mut gate = gate();
        gate.report_trade_result(false, 0.0);
        gate.report_trade_result(false, 0.0);
        gate.report_trade_result(true, 0.25);
        assert_eq!(gate.breaker_snapshot().consecutive_failures, 0);
        assert!(!gate.breaker_tripped());
    }

    #[test]
    fn test_soft_scaling_under_loss() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        // Budget on conservative: min($100, 2% of 10k) = $100
        // Below half budget: full size
        ledger.record_trade(&loss(40.0));
        assert_eq!(gate.adjusted_trade_size(1_000_000, &mut ledger), 1_000_000);

        // 75% of budget: half size
        ledger.record_trade(&loss(35.0));
        let scaled = gate.adjusted_trade_size(1_000_000, &mut ledger);
        assert!(scaled < 600_000 && scaled > 400_000, "got {}", scaled);
    }

    #[test]
    fn test_soft_scaling_with_failures() {
        let mut gate = gate();
        let mut ledger = Ledger::new(10_000.0);

        gate.report_trade_result(false, 0.0);
        let scaled = gate.adjusted_trade_size(1_000_000, &mut ledger);
        assert_eq!(scaled, 750_000);

        gate.report_trade_result(false, 0.0);
        let scaled = gate.adjusted_trade_size(1_000_000, &mut ledger);
        assert_eq!(scaled, 500_000);
    }

    #[test]
    fn test_set_level_swaps_limits() {
        let mut gate = gate();
        assert_eq!(gate.limits().max_trade_lamports, 500_000_000);

        gate.set_level(RiskLevel::Aggressive);
        assert_eq!(gate.level(), RiskLevel::Aggressive);
        assert_eq!(gate.limits().max_trade_lamports, 10_000_000_000);
    }
}
