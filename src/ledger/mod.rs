use crate::models::{PnlSnapshot, Position, TradeResult};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory record of open positions and profit-and-loss aggregates
///
/// The ledger is the single owner of position and PnL state. It is shared
/// behind one mutex and every gate evaluation performs all of its reads
/// under a single lock, so exposure and position counts cannot shift
/// mid-decision.
pub struct Ledger {
    open_positions: HashMap<Uuid, Position>,
    daily_date: NaiveDate,
    daily_profit_usd: f64,
    total_profit_usd: f64,
    trades_total: u64,
    trades_won: u64,
    best_trade_usd: f64,
    worst_trade_usd: f64,
    /// Positive while winning, negative while losing
    current_streak: i32,
    longest_win_streak: u32,
    longest_loss_streak: u32,
    peak_balance_usd: f64,
    last_drawdown_usd: f64,
    last_drawdown_pct: f64,
}

impl Ledger {
    pub fn new(initial_balance_usd: f64) -> Self {
        Self {
            open_positions: HashMap::new(),
            daily_date: Utc::now().date_naive(),
            daily_profit_usd: 0.0,
            total_profit_usd: 0.0,
            trades_total: 0,
            trades_won: 0,
            best_trade_usd: 0.0,
            worst_trade_usd: 0.0,
            current_streak: 0,
            longest_win_streak: 0,
            longest_loss_streak: 0,
            peak_balance_usd: initial_balance_usd,
            last_drawdown_usd: 0.0,
            last_drawdown_pct: 0.0,
        }
    }

    /// Rebuild ledger state loaded from persistence at startup
    pub fn restore(
        initial_balance_usd: f64,
        today_profit_usd: f64,
        total_profit_usd: f64,
        peak_balance_usd: f64,
        positions: Vec<Position>,
    ) -> Self {
        let mut ledger = Self::new(initial_balance_usd);
        ledger.daily_profit_usd = today_profit_usd;
        ledger.total_profit_usd = total_profit_usd;
        ledger.peak_balance_usd = peak_balance_usd.max(initial_balance_usd);
        for position in positions {
            ledger.open_positions.insert(position.trade_id, position);
        }

        tracing::info!(
            open_positions = ledger.open_positions.len(),
            total_pnl_usd = ledger.total_profit_usd,
            "Restored ledger from persistence"
        );
        ledger
    }

    /// Reset daily aggregates when the UTC date rolls over
    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.daily_date {
            tracing::info!(
                date = %self.daily_date,
                daily_pnl_usd = self.daily_profit_usd,
                "📅 Daily PnL rollover"
            );
            self.daily_date = today;
            self.daily_profit_usd = 0.0;
        }
    }

    /// Append a completed trade to daily and cumulative aggregates
    pub fn record_trade(&mut self, result: &TradeResult) {
        self.roll_day();

        let pnl = result.profit_usd;
        self.daily_profit_usd += pnl;
        self.total_profit_usd += pnl;
        self.trades_total += 1;

        let won = result.success && pnl >= 0.0;
        if won {
            self.trades_won += 1;
            self.current_streak = if self.current_streak > 0 {
                self.current_streak + 1
            } else {
                1
            };
            if self.current_streak as u32 > self.longest_win_streak {
                self.longest_win_streak = self.current_streak as u32;
            }
        } else {
            self.current_streak = if self.current_streak < 0 {
                self.current_streak - 1
            } else {
                -1
            };
            let losing = self.current_streak.unsigned_abs();
            if losing > self.longest_loss_streak {
                self.longest_loss_streak = losing;
            }
        }

        if pnl > self.best_trade_usd {
            self.best_trade_usd = pnl;
        }
        if pnl < self.worst_trade_usd {
            self.worst_trade_usd = pnl;
        }
    }

    /// Absolute value of today's net loss, 0 when the day is net-positive
    ///
    /// This is the figure the gate compares against the daily-loss ceiling.
    pub fn daily_loss(&mut self) -> f64 {
        self.roll_day();
        if self.daily_profit_usd < 0.0 {
            -self.daily_profit_usd
        } else {
            0.0
        }
    }

    pub fn daily_profit(&mut self) -> f64 {
        self.roll_day();
        self.daily_profit_usd
    }

    /// Update the tracked peak and return (drawdown_usd, drawdown_pct)
    pub fn drawdown(&mut self, current_balance_usd: f64) -> (f64, f64) {
        if current_balance_usd > self.peak_balance_usd {
            self.peak_balance_usd = current_balance_usd;
        }
        let dd = self.peak_balance_usd - current_balance_usd;
        let pct = if self.peak_balance_usd > 0.0 {
            dd / self.peak_balance_usd
        } else {
            0.0
        };
        self.last_drawdown_usd = dd;
        self.last_drawdown_pct = pct;
        (dd, pct)
    }

    pub fn peak_balance(&self) -> f64 {
        self.peak_balance_usd
    }

    pub fn open_position(&mut self, position: Position) {
        tracing::info!(
            trade_id = %position.trade_id,
            symbol = %position.symbol,
            amount = position.amount,
            "Opened position"
        );
        self.open_positions.insert(position.trade_id, position);
    }

    pub fn close_position(&mut self, trade_id: Uuid) -> Option<Position> {
        let closed = self.open_positions.remove(&trade_id);
        if let Some(ref position) = closed {
            tracing::info!(trade_id = %trade_id, symbol = %position.symbol, "Closed position");
        }
        closed
    }

    /// Sum of committed amounts across open positions, in lamports
    pub fn total_exposure(&self) -> u64 {
        self.open_positions.values().map(|p| p.amount).sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open_positions.values().cloned().collect()
    }

    pub fn snapshot(&mut self) -> PnlSnapshot {
        self.roll_day();
        PnlSnapshot {
            total_profit_usd: self.total_profit_usd,
            daily_profit_usd: self.daily_profit_usd,
            trades_total: self.trades_total,
            trades_won: self.trades_won,
            win_rate: if self.trades_total > 0 {
                self.trades_won as f64 / self.trades_total as f64
            } else {
                0.0
            },
            best_trade_usd: self.best_trade_usd,
            worst_trade_usd: self.worst_trade_usd,
            current_streak: self.current_streak,
            longest_win_streak: self.longest_win_streak,
            longest_loss_streak: self.longest_loss_streak,
            peak_balance_usd: self.peak_balance_usd,
            drawdown_usd: self.last_drawdown_usd,
            drawdown_pct: self.last_drawdown_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(success: bool, profit_usd: f64) -> TradeResult {
        TradeResult {
            id: Uuid::new_v4(),
            strategy: "two_hop".to_string(),
            success,
            profit_usd,
            profit_lamports: (profit_usd * 1e9 / 150.0) as i64,
            fees_usd: 0.0,
            signatures: Vec::new(),
            executed_at: Utc::now(),
        }
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

    #[test]
    fn test_record_trade_aggregates() {
        let mut ledger = Ledger::new(10_000.0);

        ledger.record_trade(&trade(true, 5.0));
        ledger.record_trade(&trade(true, 3.0));
        ledger.record_trade(&trade(false, -2.0));

        let snap = ledger.snapshot();
        assert_eq!(snap.trades_total, 3);
        assert_eq!(snap.trades_won, 2);
        assert!((snap.total_profit_usd - 6.0).abs() < 1e-9);
        assert_eq!(snap.best_trade_usd, 5.0);
        assert_eq!(snap.worst_trade_usd, -2.0);
    }

    #[test]
    fn test_streak_tracking() {
        let mut ledger = Ledger::new(10_000.0);

        ledger.record_trade(&trade(true, 1.0));
        ledger.record_trade(&trade(true, 1.0));
        ledger.record_trade(&trade(true, 1.0));
        assert_eq!(ledger.snapshot().current_streak, 3);
        assert_eq!(ledger.snapshot().longest_win_streak, 3);

        ledger.record_trade(&trade(false, -1.0));
        ledger.record_trade(&trade(false, -1.0));
        assert_eq!(ledger.snapshot().current_streak, -2);
        assert_eq!(ledger.snapshot().longest_loss_streak, 2);

        // Winning again flips the streak back to +1
        ledger.record_trade(&trade(true, 1.0));
        assert_eq!(ledger.snapshot().current_streak, 1);
        assert_eq!(ledger.snapshot().longest_win_streak, 3);
    }

    #[test]
    fn test_daily_loss_clamps_at_zero() {
        let mut ledger = Ledger::new(10_000.0);

        ledger.record_trade(&trade(true, 10.0));
        assert_eq!(ledger.daily_loss(), 0.0);

        ledger.record_trade(&trade(false, -25.0));
        assert!((ledger.daily_loss() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_loss_idempotent() {
        let mut ledger = Ledger::new(10_000.0);
        ledger.record_trade(&trade(false, -7.5));

        let first = ledger.daily_loss();
        let second = ledger.daily_loss();
        assert_eq!(first, second);
    }

    #[test]
    fn test_drawdown_tracks_peak() {
        let mut ledger = Ledger::new(10_000.0);

        // New high: no drawdown, peak moves up
        let (dd, pct) = ledger.drawdown(12_000.0);
        assert_eq!(dd, 0.0);
        assert_eq!(pct, 0.0);
        assert_eq!(ledger.peak_balance(), 12_000.0);

        // 25% below peak
        let (dd, pct) = ledger.drawdown(9_000.0);
        assert_eq!(dd, 3_000.0);
        assert!((pct - 0.25).abs() < 1e-9);

        // Peak never moves down
        assert_eq!(ledger.peak_balance(), 12_000.0);
    }

    #[test]
    fn test_exposure_and_position_set() {
        let mut ledger = Ledger::new(10_000.0);

        let p1 = position(1_000_000);
        let p2 = position(2_500_000);
        let id1 = p1.trade_id;

        ledger.open_position(p1);
        ledger.open_position(p2);
        assert_eq!(ledger.open_position_count(), 2);
        assert_eq!(ledger.total_exposure(), 3_500_000);

        let closed = ledger.close_position(id1);
        assert!(closed.is_some());
        assert_eq!(ledger.open_position_count(), 1);
        assert_eq!(ledger.total_exposure(), 2_500_000);

        // Closing twice is a no-op
        assert!(ledger.close_position(id1).is_none());
    }

    #[test]
    fn test_restore() {
        let positions = vec![position(4_000_000)];
        let mut ledger = Ledger::restore(10_000.0, -12.0, 88.0, 10_500.0, positions);

        assert_eq!(ledger.open_position_count(), 1);
        assert_eq!(ledger.total_exposure(), 4_000_000);
        assert!((ledger.daily_loss() - 12.0).abs() < 1e-9);
        assert_eq!(ledger.peak_balance(), 10_500.0);
        assert!((ledger.snapshot().total_profit_usd - 88.0).abs() < 1e-9);
    }

    #[test]
    fn test_win_rate() {
        let mut ledger = Ledger::new(10_000.0);
        ledger.record_trade(&trade(true, 1.0));
        ledger.record_trade(&trade(false, -1.0));
        ledger.record_trade(&trade(true, 1.0));
        ledger.record_trade(&trade(true, 1.0));

        let snap = ledger.snapshot();
        assert!((snap.win_rate - 0.75).abs() < 1e-9);
    }
}
