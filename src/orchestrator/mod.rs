// Scheduling loop and control surface
use crate::config::Settings;
use crate::db::Database;
use crate::execution::{run_sweep, ExecutionEngine, StuckAssetBook};
use crate::ledger::Ledger;
use crate::models::{
    CircuitBreakerSnapshot, Opportunity, PnlSnapshot, Position, StuckAsset, TradeResult,
};
use crate::risk::{RiskGate, RiskLevel};
use crate::strategy::{EventDrivenStrategy, OpportunityQueue, OpportunitySender, Strategy};
use chrono::{Timelike, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const BALANCE_REFRESH_SECS: u64 = 30;
const HOUSEKEEPING_SECS: u64 = 300;
const AGED_POSITION_WARN_SECS: i64 = 1800;

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    CircuitBreaker,
    Error,
}

/// Snapshot returned by the control surface
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub state: EngineState,
    pub risk_level: RiskLevel,
    pub pnl: PnlSnapshot,
    pub breaker: CircuitBreakerSnapshot,
    pub open_positions: usize,
    pub stuck_assets: usize,
    pub balance_lamports: u64,
}

struct PriceCache {
    price_usd: f64,
    fetched_at: Instant,
}

/// The scheduler: owns the component context and drives opportunities
/// through gate and engine, strictly sequentially, in descending
/// expected-profit order
///
/// All shared state lives in this context object and is handed to the
/// loop tasks by `Arc`; there are no ambient singletons. Ledger and gate
/// mutations go through their own mutex-guarded methods, and a gate
/// evaluation plus the position commit that follows happen under one
/// lock scope so no concurrent reader can observe a half-made decision.
pub struct Orchestrator {
    settings: Settings,
    engine: Arc<ExecutionEngine>,
    ledger: Arc<Mutex<Ledger>>,
    gate: Arc<Mutex<RiskGate>>,
    stuck_book: Arc<Mutex<StuckAssetBook>>,
    db: Option<Arc<Database>>,
    price_feed: crate::api::PriceFeedClient,
    price_cache: Mutex<Option<PriceCache>>,
    balance_lamports: AtomicU64,
    strategies: Mutex<Vec<Arc<dyn Strategy>>>,
    event_strategies: Mutex<Vec<Arc<dyn EventDrivenStrategy>>>,
    queue: tokio::sync::Mutex<OpportunityQueue>,
    queue_handle: OpportunitySender,
    state_tx: watch::Sender<EngineState>,
}

impl Orchestrator {
    /// Build the context, restoring ledger and stuck-asset state from
    /// persistence when it is reachable
    pub async fn new(
        settings: Settings,
        engine: ExecutionEngine,
        db: Option<Database>,
    ) -> Arc<Self> {
        let db = db.map(Arc::new);

        let (ledger, stuck) = match db.as_deref() {
            Some(db) => {
                let today = db.get_today_pnl().await;
                let peak = db
                    .get_state("peak_balance_usd")
                    .await
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(settings.trading.capital_usd);
                let total = db
                    .get_state("total_profit_usd")
                    .await
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0);
                let positions = db.load_positions().await;
                let stuck = db.get_stuck_tokens().await;
                (
                    Ledger::restore(settings.trading.capital_usd, today, total, peak, positions),
                    stuck,
                )
            }
            None => (Ledger::new(settings.trading.capital_usd), Vec::new()),
        };

        let gate = RiskGate::new(
            settings.trading.risk_level,
            settings.strategies.clone(),
            settings.trading.capital_usd,
        );
        let queue = OpportunityQueue::new();
        let queue_handle = queue.handle();
        let (state_tx, _) = watch::channel(EngineState::Stopped);
        let price_feed = crate::api::PriceFeedClient::new(settings.price_feed.base_url.clone());

        Arc::new(Self {
            settings,
            engine: Arc::new(engine),
            ledger: Arc::new(Mutex::new(ledger)),
            gate: Arc::new(Mutex::new(gate)),
            stuck_book: Arc::new(Mutex::new(StuckAssetBook::new(stuck))),
            db,
            price_feed,
            price_cache: Mutex::new(None),
            balance_lamports: AtomicU64::new(0),
            strategies: Mutex::new(Vec::new()),
            event_strategies: Mutex::new(Vec::new()),
            queue: tokio::sync::Mutex::new(queue),
            queue_handle,
            state_tx,
        })
    }

    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        tracing::info!(name = strategy.name(), "Registered poll strategy");
        self.strategies.lock().unwrap().push(strategy);
    }

    pub fn register_event_strategy(&self, strategy: Arc<dyn EventDrivenStrategy>) {
        tracing::info!(name = strategy.name(), "Registered event strategy");
        self.event_strategies.lock().unwrap().push(strategy);
    }

    /// Handle for the market-data layer to enqueue event opportunities
    pub fn opportunity_sender(&self) -> OpportunitySender {
        self.queue_handle.clone()
    }

    /// Feed a pending-transaction event to every event-driven strategy
    pub async fn on_pending_transaction(&self, event: crate::strategy::PendingTxEvent) {
        let strategies: Vec<_> = self.event_strategies.lock().unwrap().clone();
        for strategy in strategies {
            if let Some(opportunity) = strategy.on_pending_transaction(&event).await {
                self.queue_handle.push(opportunity);
            }
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: EngineState) {
        let previous = *self.state_tx.borrow();
        if previous != state {
            tracing::info!(?previous, ?state, "Engine state transition");
            self.state_tx.send_replace(state);
        }
    }

    /// Start the scan loop and housekeeping timers
    pub fn start(self: &Arc<Self>) {
        if self.state() != EngineState::Stopped {
            tracing::warn!("Start ignored, engine not stopped");
            return;
        }
        self.set_state(EngineState::Starting);

        let ctx = self.clone();
        tokio::spawn(async move {
            ctx.refresh_balance().await;
            ctx.set_state(EngineState::Running);
            ctx.scan_loop().await;
            ctx.set_state(EngineState::Stopped);
            tracing::info!("👋 Scan loop exited");
        });

        let ctx = self.clone();
        tokio::spawn(async move { ctx.housekeeping_loop().await });

        let ctx = self.clone();
        tokio::spawn(async move { ctx.balance_loop().await });
    }

    /// Graceful stop: the in-flight tick finishes, open positions stay on
    /// the book for the recovery sweep
    pub fn stop(&self) {
        if matches!(self.state(), EngineState::Stopped | EngineState::Stopping) {
            return;
        }
        tracing::info!("Stop requested");
        self.set_state(EngineState::Stopping);
    }

    /// Immediate halt. Idempotent, and always succeeds locally: every
    /// open position is queued as stranded for later recovery.
    pub fn emergency_stop(&self) {
        tracing::error!("🛑 EMERGENCY STOP");
        self.gate.lock().unwrap().set_emergency_stop(true);
        if self.state() != EngineState::Stopped {
            self.set_state(EngineState::Stopping);
        }

        let stranded: Vec<StuckAsset> = {
            let mut ledger = self.ledger.lock().unwrap();
            let open = ledger.open_positions();
            for position in &open {
                ledger.close_position(position.trade_id);
            }
            open.iter()
                .map(|p| StuckAsset::new(p, "emergency stop"))
                .collect()
        };

        if !stranded.is_empty() {
            let mut book = self.stuck_book.lock().unwrap();
            for asset in &stranded {
                book.add(asset.clone());
            }
        }

        if let Some(db) = self.db.clone() {
            tokio::spawn(async move {
                for asset in &stranded {
                    db.add_stuck_token(asset).await;
                    db.delete_position(asset.trade_id).await;
                }
            });
        }
    }

    pub fn set_risk_level(&self, level: RiskLevel) {
        self.gate.lock().unwrap().set_level(level);
    }

    pub fn status(&self) -> EngineStatus {
        let gate = self.gate.lock().unwrap();
        let mut ledger = self.ledger.lock().unwrap();
        EngineStatus {
            state: self.state(),
            risk_level: gate.level(),
            pnl: ledger.snapshot(),
            breaker: gate.breaker_snapshot(),
            open_positions: ledger.open_position_count(),
            stuck_assets: self.stuck_book.lock().unwrap().unrecovered_count(),
            balance_lamports: self.balance_lamports.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Scan loop
    // ------------------------------------------------------------------

    async fn scan_loop(&self) {
        tracing::info!("🔄 Scan loop starting");

        while self.state() == EngineState::Running
            || self.state() == EngineState::CircuitBreaker
        {
            let tick_started = Instant::now();

            // Tripped breaker: sleep out (part of) the cooldown instead
            // of scanning
            let cooldown = self.gate.lock().unwrap().breaker_cooldown_remaining();
            if cooldown > Duration::ZERO {
                self.set_state(EngineState::CircuitBreaker);
                let nap = cooldown.min(Duration::from_secs(
                    self.settings.scan.breaker_sleep_cap_secs,
                ));
                tracing::info!(nap_secs = nap.as_secs(), "⚡ Breaker cooling down");
                tokio::time::sleep(nap).await;
                continue;
            }
            if self.state() == EngineState::CircuitBreaker {
                self.set_state(EngineState::Running);
            }

            match self.refresh_price().await {
                Some(price) => {
                    self.tick(price).await;
                }
                None => {
                    tracing::warn!("No reference price, skipping tick");
                }
            }

            if self.state() != EngineState::Running {
                break;
            }

            let delay = self.tick_delay().saturating_sub(tick_started.elapsed());
            tokio::time::sleep(delay).await;
        }
    }

    async fn tick(&self, price_usd: f64) {
        // Stranded assets are retried before any new risk is taken
        {
            let mut book = self.stuck_book.lock().unwrap().take_for_sweep();
            run_sweep(&self.engine, &mut book, self.db.as_deref()).await;
            self.stuck_book.lock().unwrap().merge_after_sweep(book);
        }

        // Event-driven opportunities queued since the last tick, plus a
        // fresh poll of every registered strategy
        let mut candidates = self.queue.lock().await.drain();
        let strategies: Vec<_> = self.strategies.lock().unwrap().clone();
        for strategy in strategies {
            match strategy.scan().await {
                Ok(mut found) => candidates.append(&mut found),
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "Scan failed");
                }
            }
        }

        let candidates = rank_opportunities(candidates);
        if candidates.is_empty() {
            return;
        }
        tracing::info!(count = candidates.len(), "💹 Opportunities this tick");

        for opportunity in candidates {
            if self.state() != EngineState::Running {
                tracing::info!("Engine leaving running state, abandoning remaining candidates");
                break;
            }
            self.drive_opportunity(opportunity, price_usd).await;
        }
    }

    /// Gate, then execute, then report, one opportunity at a time
    async fn drive_opportunity(&self, opportunity: Opportunity, price_usd: f64) {
        if let Err(reason) = opportunity.validate() {
            tracing::warn!(id = %opportunity.id, reason = %reason, "Malformed opportunity rejected");
            return;
        }
        if opportunity.is_expired(Utc::now()) {
            tracing::debug!(id = %opportunity.id, "Opportunity expired before execution");
            return;
        }

        let balance = self.balance_lamports.load(Ordering::Relaxed);

        // One lock scope: soft sizing, hard gate, and the exposure
        // commit all see the same ledger state
        let approved = {
            let mut gate = self.gate.lock().unwrap();
            let mut ledger = self.ledger.lock().unwrap();

            let softened =
                gate.adjusted_trade_size(opportunity.input_amount, &mut ledger);
            if softened == 0 {
                tracing::info!(id = %opportunity.id, "Soft throttle scaled trade to zero");
                return;
            }

            let check = gate.can_trade(
                &opportunity.strategy,
                softened,
                &mut ledger,
                balance,
                price_usd,
            );
            if !check.allowed {
                tracing::info!(
                    id = %opportunity.id,
                    reason = check.reason.as_deref().unwrap_or("unknown"),
                    "🚫 Gate denied trade"
                );
                return;
            }
            let amount = check.adjusted_amount.unwrap_or(softened);
            if let Some(adjusted) = check.adjusted_amount {
                tracing::info!(
                    requested = softened,
                    adjusted,
                    "Gate shrank trade size"
                );
            }

            // Commit the exposure before any lamport leaves the wallet
            ledger.open_position(Position {
                trade_id: opportunity.id,
                strategy: opportunity.strategy.clone(),
                mint: opportunity.mint_path[1].clone(),
                symbol: opportunity.asset_path[1].clone(),
                amount,
                entry_price_usd: price_usd,
                opened_at: Utc::now(),
            });
            amount
        };

        if let Some(db) = self.db.as_deref() {
            let position = self.ledger.lock().unwrap().open_positions()
                .into_iter()
                .find(|p| p.trade_id == opportunity.id);
            if let Some(position) = position {
                db.save_position(&position).await;
            }
        }

        tracing::info!(
            id = %opportunity.id,
            strategy = %opportunity.strategy,
            amount = approved,
            expected_profit_usd = opportunity.expected_profit_usd,
            "▶ Executing"
        );

        let result = self.engine.execute(&opportunity, approved, price_usd).await;

        // Report back: ledger first, breaker second, persistence last
        let trade = TradeResult {
            id: opportunity.id,
            strategy: opportunity.strategy.clone(),
            success: result.success,
            profit_usd: result.profit_usd,
            profit_lamports: result.profit_lamports,
            fees_usd: 0.0,
            signatures: result.signatures.clone(),
            executed_at: Utc::now(),
        };

        let (peak, total_profit) = {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.close_position(opportunity.id);
            ledger.record_trade(&trade);
            (ledger.peak_balance(), ledger.snapshot().total_profit_usd)
        };
        self.gate
            .lock()
            .unwrap()
            .report_trade_result(result.success, result.profit_usd);

        if let Some(stuck) = result.stuck_asset.clone() {
            self.stuck_book.lock().unwrap().add(stuck.clone());
            if let Some(db) = self.db.as_deref() {
                db.add_stuck_token(&stuck).await;
            }
        }

        if let Some(db) = self.db.as_deref() {
            db.insert_trade(&trade).await;
            db.update_daily_pnl(
                Utc::now().date_naive(),
                trade.profit_usd,
                trade.success && trade.profit_usd >= 0.0,
            )
            .await;
            db.delete_position(opportunity.id).await;
            db.set_state("peak_balance_usd", &peak.to_string()).await;
            db.set_state("total_profit_usd", &total_profit.to_string())
                .await;
        }

        match (&result.success, &result.error) {
            (true, _) => tracing::info!(
                profit_usd = result.profit_usd,
                duration_ms = result.duration.as_millis() as u64,
                "✅ Trade complete"
            ),
            (false, Some(error)) => tracing::warn!(
                error = %error,
                duration_ms = result.duration.as_millis() as u64,
                "❌ Trade failed"
            ),
            (false, None) => tracing::warn!("❌ Trade failed without error detail"),
        }
    }

    // ------------------------------------------------------------------
    // Caches and timers
    // ------------------------------------------------------------------

    /// Reference price with a TTL cache; `None` when no price can be had
    async fn refresh_price(&self) -> Option<f64> {
        let ttl = Duration::from_secs(self.settings.price_feed.cache_ttl_secs);
        if let Some(cache) = self.price_cache.lock().unwrap().as_ref() {
            if cache.fetched_at.elapsed() < ttl {
                return Some(cache.price_usd);
            }
        }

        match self
            .price_feed
            .get_price(&self.settings.trading.base_mint)
            .await
        {
            Ok(price) => {
                *self.price_cache.lock().unwrap() = Some(PriceCache {
                    price_usd: price.price_usd,
                    fetched_at: Instant::now(),
                });
                Some(price.price_usd)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reference price fetch failed");
                // Serve a stale price rather than nothing at all
                self.price_cache
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|c| c.price_usd)
            }
        }
    }

    async fn refresh_balance(&self) {
        match self
            .engine
            .rpc()
            .get_balance(self.engine.wallet_pubkey())
            .await
        {
            Ok(balance) => {
                self.balance_lamports.store(balance, Ordering::Relaxed);
                let buffer = self.gate.lock().unwrap().limits().fee_buffer_lamports;
                if balance < buffer * 2 {
                    tracing::warn!(balance, "⚠️  Wallet balance running low");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Balance refresh failed"),
        }
    }

    async fn balance_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(BALANCE_REFRESH_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.state() == EngineState::Stopped {
                break;
            }
            self.refresh_balance().await;
        }
    }

    /// Low-frequency housekeeping: stats snapshot and aged-position
    /// warnings
    async fn housekeeping_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(HOUSEKEEPING_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.state() == EngineState::Stopped {
                break;
            }

            let (snapshot, aged) = {
                let mut ledger = self.ledger.lock().unwrap();
                let now = Utc::now();
                let aged: Vec<String> = ledger
                    .open_positions()
                    .into_iter()
                    .filter(|p| (now - p.opened_at).num_seconds() > AGED_POSITION_WARN_SECS)
                    .map(|p| p.symbol)
                    .collect();
                (ledger.snapshot(), aged)
            };

            tracing::info!(
                "\n📊 PnL: total ${:.2} | today ${:.2} | win rate {:.0}% | streak {}",
                snapshot.total_profit_usd,
                snapshot.daily_profit_usd,
                snapshot.win_rate * 100.0,
                snapshot.current_streak
            );
            for symbol in aged {
                tracing::warn!(symbol = %symbol, "Position open for over 30 minutes");
            }
        }
    }

    /// Dynamic inter-tick delay: fast inside activity windows, slow
    /// outside, never faster than the shared rate budget allows
    fn tick_delay(&self) -> Duration {
        let hour = Utc::now().hour() as u8;
        let base = if self.settings.in_activity_window(hour) {
            self.settings.scan.active_interval_secs
        } else {
            self.settings.scan.idle_interval_secs
        };

        // Each tracked mint costs roughly one quote call per tick
        let rps = self.settings.quoter.requests_per_second.max(1) as f64;
        let floor = (self.settings.scan.tracked_mints as f64 / rps).ceil() as u64;

        Duration::from_secs(base.max(floor))
    }
}

/// Strictly descending expected profit; ties keep arrival order
pub fn rank_opportunities(mut candidates: Vec<Opportunity>) -> Vec<Opportunity> {
    candidates.sort_by(|a, b| {
        b.expected_profit_usd
            .partial_cmp(&a.expected_profit_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::expiry_in;
    use uuid::Uuid;

    fn opportunity(profit_usd: f64) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            strategy: "two_hop".to_string(),
            asset_path: vec!["SOL".to_string(), "USDC".to_string(), "SOL".to_string()],
            mint_path: vec!["m1".to_string(), "m2".to_string(), "m1".to_string()],
            input_amount: 1_000_000,
            expected_output: 1_100_000,
            expected_profit_lamports: 100_000,
            expected_profit_usd: profit_usd,
            confidence: 0.9,
            leg_quotes: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            expires_at: expiry_in(60),
        }
    }

    #[test]
    fn test_rank_orders_by_profit_descending() {
        let ranked = rank_opportunities(vec![
            opportunity(0.5),
            opportunity(2.0),
            opportunity(1.25),
        ]);
        let profits: Vec<f64> = ranked.iter().map(|o| o.expected_profit_usd).collect();
        assert_eq!(profits, vec![2.0, 1.25, 0.5]);
    }

    #[tokio::test]
    async fn test_emergency_stop_strands_open_positions() {
        let settings = Settings::default();
        let engine = test_engine(&settings);
        let orchestrator = Orchestrator::new(settings, engine, None).await;

        orchestrator.ledger.lock().unwrap().open_position(Position {
            trade_id: Uuid::new_v4(),
            strategy: "two_hop".to_string(),
            mint: "m2".to_string(),
            symbol: "USDC".to_string(),
            amount: 1_000_000,
            entry_price_usd: 1.0,
            opened_at: Utc::now(),
        });

        orchestrator.emergency_stop();

        let status = orchestrator.status();
        assert_eq!(status.open_positions, 0);
        assert_eq!(status.stuck_assets, 1);
        assert!(orchestrator.gate.lock().unwrap().emergency_stopped());

        // Idempotent
        orchestrator.emergency_stop();
        assert_eq!(orchestrator.status().stuck_assets, 1);
    }

    #[tokio::test]
    async fn test_status_reports_components() {
        let settings = Settings::default();
        let engine = test_engine(&settings);
        let orchestrator = Orchestrator::new(settings, engine, None).await;

        let status = orchestrator.status();
        assert_eq!(status.state, EngineState::Stopped);
        assert_eq!(status.risk_level, RiskLevel::Conservative);
        assert!(!status.breaker.triggered);
        assert_eq!(status.pnl.trades_total, 0);
    }

    #[tokio::test]
    async fn test_set_risk_level() {
        let settings = Settings::default();
        let engine = test_engine(&settings);
        let orchestrator = Orchestrator::new(settings, engine, None).await;

        orchestrator.set_risk_level(RiskLevel::Aggressive);
        assert_eq!(orchestrator.status().risk_level, RiskLevel::Aggressive);
    }

    #[tokio::test]
    async fn test_tick_delay_respects_rate_floor() {
        let mut settings = Settings::default();
        settings.scan.active_interval_secs = 1;
        settings.scan.idle_interval_secs = 1;
        settings.scan.tracked_mints = 40;
        settings.quoter.requests_per_second = 10;
        let engine = test_engine(&settings);
        let orchestrator = Orchestrator::new(settings, engine, None).await;

        // 40 mints at 10 rps needs at least 4 seconds per tick
        assert_eq!(orchestrator.tick_delay(), Duration::from_secs(4));
    }

    fn test_engine(settings: &Settings) -> ExecutionEngine {
        use crate::api::{JupiterClient, RelayClient, RpcClient};
        use crate::execution::{shared_rate_limiter, EngineConfig};

        ExecutionEngine::new(
            JupiterClient::new("http://127.0.0.1:1"),
            RpcClient::new("http://127.0.0.1:1", "confirmed"),
            RelayClient::new(vec!["http://127.0.0.1:1".to_string()]),
            shared_rate_limiter(10),
            EngineConfig::from_settings(settings),
        )
    }
}
