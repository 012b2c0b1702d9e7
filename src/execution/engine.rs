use crate::api::{JupiterClient, RelayClient, RpcClient};
use crate::config::Settings;
use crate::error::ExecutionError;
use crate::execution::throttle::SharedRateLimiter;
use crate::models::{ExecutionResult, Opportunity, Position, StuckAsset, SwapQuote};
use chrono::Utc;
use rand::Rng;
use std::time::{Duration, Instant};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const SEND_BACKOFF_BASE_MS: u64 = 1_000;

/// Per-engine knobs lifted out of `Settings`
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub wallet_pubkey: String,
    pub base_mint: String,
    pub base_symbol: String,
    pub slippage_bps: u16,
    pub confirm_timeout: Duration,
    pub send_retries: u32,
    pub relay_poll_interval: Duration,
    pub relay_timeout: Duration,
    pub tip_lamports: u64,
    pub dry_run: bool,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            wallet_pubkey: settings.trading.wallet_pubkey.clone(),
            base_mint: settings.trading.base_mint.clone(),
            base_symbol: settings.trading.base_symbol.clone(),
            slippage_bps: settings.quoter.slippage_bps,
            confirm_timeout: Duration::from_secs(settings.rpc.confirm_timeout_secs),
            send_retries: settings.rpc.send_retries,
            relay_poll_interval: Duration::from_secs(settings.relay.status_poll_interval_secs),
            relay_timeout: Duration::from_secs(settings.relay.status_timeout_secs),
            tip_lamports: settings.relay.tip_lamports,
            dry_run: settings.trading.dry_run,
        }
    }
}

/// Outcome of one landed swap leg
#[derive(Debug, Clone)]
struct LegOutcome {
    signature: String,
    units_consumed: Option<u64>,
}

/// Stateless transformer from (opportunity, approved amount) to an
/// `ExecutionResult`
///
/// The engine owns no ledger state. It drives swap legs against the
/// quote service, the chain RPC and the bundle relay, and reports what
/// happened; the orchestrator feeds results to the ledger and gate. The
/// only shared resource is the process-wide rate limiter spacing calls
/// to the quote service.
pub struct ExecutionEngine {
    quoter: JupiterClient,
    rpc: RpcClient,
    relay: RelayClient,
    limiter: SharedRateLimiter,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        quoter: JupiterClient,
        rpc: RpcClient,
        relay: RelayClient,
        limiter: SharedRateLimiter,
        config: EngineConfig,
    ) -> Self {
        Self {
            quoter,
            rpc,
            relay,
            limiter,
            config,
        }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Execute an approved opportunity at the gate-approved amount
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        amount: u64,
        base_price_usd: f64,
    ) -> ExecutionResult {
        let started = Instant::now();

        if let Err(reason) = opportunity.validate() {
            return ExecutionResult::failure(
                format!("invalid opportunity: {}", reason),
                started.elapsed(),
            );
        }
        if opportunity.is_expired(Utc::now()) {
            return ExecutionResult::failure("opportunity expired", started.elapsed());
        }

        if opportunity.requires_bundle() {
            self.execute_via_bundle(opportunity, amount, base_price_usd, started)
                .await
        } else {
            self.execute_arbitrage_cycle(opportunity, amount, base_price_usd, started)
                .await
        }
    }

    /// Direct two-leg cycle: base -> intermediate -> base
    ///
    /// Leg 2 always runs against a fresh reverse quote for the amount leg
    /// 1 actually produced, never the quote the opportunity was scanned
    /// with. A round trip that would now realize a loss is declined and
    /// the intermediate holding flagged as stuck: holding a stranded
    /// asset beats crystallizing a known loss.
    async fn execute_arbitrage_cycle(
        &self,
        opportunity: &Opportunity,
        amount: u64,
        base_price_usd: f64,
        started: Instant,
    ) -> ExecutionResult {
        let intermediate_mint = &opportunity.mint_path[1];
        let intermediate_symbol = &opportunity.asset_path[1];

        // Leg 1: base -> intermediate. Reuse the scanned quote when the
        // gate approved the scanned size, otherwise re-quote.
        let leg1_quote = match self.leg1_quote(opportunity, amount).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                return ExecutionResult::failure(
                    format!("no leg-1 quote for {} lamports", amount),
                    started.elapsed(),
                )
            }
            Err(e) => return ExecutionResult::failure(e.to_string(), started.elapsed()),
        };
        let expected_intermediate = leg1_quote.out_amount;

        let leg1 = match self.swap(&leg1_quote).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Leg 1 never landed: nothing is stranded
                tracing::warn!(error = %e, "Leg 1 failed, aborting cycle");
                return ExecutionResult::failure(
                    format!("leg 1 failed: {}", e),
                    started.elapsed(),
                );
            }
        };

        tracing::info!(
            signature = %leg1.signature,
            out = expected_intermediate,
            symbol = %intermediate_symbol,
            "Leg 1 landed"
        );

        let holding = Position {
            trade_id: opportunity.id,
            strategy: opportunity.strategy.clone(),
            mint: intermediate_mint.clone(),
            symbol: intermediate_symbol.clone(),
            amount: expected_intermediate,
            entry_price_usd: base_price_usd,
            opened_at: Utc::now(),
        };

        // Fresh reverse quote for what leg 1 actually produced
        self.limiter.until_ready().await;
        let reverse = match self
            .quoter
            .get_quote(
                intermediate_mint,
                &self.config.base_mint,
                expected_intermediate,
                self.config.slippage_bps,
            )
            .await
        {
            Ok(Some(q)) => q,
            Ok(None) => {
                tracing::error!(
                    symbol = %intermediate_symbol,
                    "No reverse quote, asset is stranded"
                );
                let mut result = ExecutionResult::failure(
                    "no reverse quote obtainable",
                    started.elapsed(),
                );
                result.signatures = vec![leg1.signature];
                result.compute_units = leg1.units_consumed;
                result.stuck_asset = Some(StuckAsset::new(&holding, "no reverse quote"));
                return result;
            }
            Err(e) => {
                let mut result = ExecutionResult::failure(e.to_string(), started.elapsed());
                result.signatures = vec![leg1.signature];
                result.stuck_asset = Some(StuckAsset::new(&holding, "reverse quote failed"));
                return result;
            }
        };

        // Re-evaluate profitability before committing leg 2
        if reverse.out_amount < amount {
            let loss = amount as i64 - reverse.out_amount as i64;
            let decline = ExecutionError::EconomicDecline {
                loss_lamports: loss,
            };
            tracing::warn!(
                loss_lamports = loss,
                symbol = %intermediate_symbol,
                "Declining leg 2, holding the asset instead of selling at a loss"
            );
            let mut result = ExecutionResult::failure(decline.to_string(), started.elapsed());
            result.signatures = vec![leg1.signature];
            result.compute_units = leg1.units_consumed;
            result.stuck_asset = Some(StuckAsset::new(&holding, decline.to_string()));
            return result;
        }

        // Leg 2: intermediate -> base
        let leg2 = match self.swap(&reverse).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Leg 2 failed, asset is stranded");
                let mut result =
                    ExecutionResult::failure(format!("leg 2 failed: {}", e), started.elapsed());
                result.signatures = vec![leg1.signature];
                result.compute_units = leg1.units_consumed;
                result.stuck_asset =
                    Some(StuckAsset::new(&holding, format!("leg 2 failed: {}", e)));
                return result;
            }
        };

        // Fees are already reflected in the quoted amounts
        let profit_lamports = reverse.out_amount as i64 - amount as i64;
        let profit_usd = profit_lamports as f64 / LAMPORTS_PER_SOL * base_price_usd;
        let units = match (leg1.units_consumed, leg2.units_consumed) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };

        tracing::info!(
            profit_lamports,
            profit_usd,
            "✅ Cycle complete"
        );

        ExecutionResult {
            success: true,
            profit_lamports,
            profit_usd,
            signatures: vec![leg1.signature, leg2.signature],
            compute_units: units,
            tip_lamports: 0,
            error: None,
            stuck_asset: None,
            duration: started.elapsed(),
        }
    }

    async fn leg1_quote(
        &self,
        opportunity: &Opportunity,
        amount: u64,
    ) -> std::result::Result<Option<SwapQuote>, ExecutionError> {
        if let Some(first) = opportunity.leg_quotes.first() {
            if first.in_amount == amount {
                return Ok(Some(first.clone()));
            }
        }
        // The gate shrank the size; the scanned quote no longer applies
        self.limiter.until_ready().await;
        self.quoter
            .get_quote(
                &opportunity.mint_path[0],
                &opportunity.mint_path[1],
                amount,
                self.config.slippage_bps,
            )
            .await
            .map_err(|e| ExecutionError::Rpc(e.to_string()))
    }

    /// Atomic path for 3+ leg trades and anything marked atomic
    async fn execute_via_bundle(
        &self,
        opportunity: &Opportunity,
        amount: u64,
        base_price_usd: f64,
        started: Instant,
    ) -> ExecutionResult {
        if opportunity.leg_quotes.len() < opportunity.leg_count() {
            return ExecutionResult::failure(
                "bundle execution requires a quote per leg",
                started.elapsed(),
            );
        }

        // Build every transaction first; nothing is sent unless all build
        let mut transactions = Vec::with_capacity(opportunity.leg_quotes.len());
        for quote in &opportunity.leg_quotes {
            self.limiter.until_ready().await;
            match self
                .quoter
                .build_swap_transaction(quote, &self.config.wallet_pubkey)
                .await
            {
                Ok(Some(tx)) => transactions.push(tx),
                Ok(None) => {
                    return ExecutionResult::failure(
                        format!(
                            "swap build declined for {} -> {}",
                            quote.input_mint, quote.output_mint
                        ),
                        started.elapsed(),
                    )
                }
                Err(e) => return ExecutionResult::failure(e.to_string(), started.elapsed()),
            }
        }

        if self.config.dry_run {
            return self.dry_run_bundle(opportunity, amount, base_price_usd, &transactions, started)
                .await;
        }

        let bundle_id = match self
            .relay
            .submit_bundle(&transactions, self.config.tip_lamports)
            .await
        {
            Ok(id) => id,
            Err(e) => return ExecutionResult::failure(e.to_string(), started.elapsed()),
        };

        match self
            .relay
            .wait_for_bundle(
                &bundle_id,
                self.config.relay_poll_interval,
                self.config.relay_timeout,
            )
            .await
        {
            Ok(status) if status == crate::models::BundleStatus::Landed => {
                let last_out = opportunity
                    .leg_quotes
                    .last()
                    .map(|q| q.out_amount)
                    .unwrap_or(0);
                let profit_lamports = last_out as i64 - amount as i64;
                let profit_usd = profit_lamports as f64 / LAMPORTS_PER_SOL * base_price_usd;
                tracing::info!(%bundle_id, profit_lamports, "✅ Bundle landed");
                ExecutionResult {
                    success: true,
                    profit_lamports,
                    profit_usd,
                    signatures: vec![bundle_id],
                    compute_units: None,
                    tip_lamports: self.config.tip_lamports,
                    error: None,
                    stuck_asset: None,
                    duration: started.elapsed(),
                }
            }
            Ok(status) => {
                let mut result = ExecutionResult::failure(
                    format!("bundle terminal state: {:?}", status),
                    started.elapsed(),
                );
                result.tip_lamports = 0; // tip only pays when the bundle lands
                result.signatures = vec![bundle_id];
                result
            }
            Err(e @ ExecutionError::BundleTimeout { .. }) => {
                // Status unknown: treated as failure locally, but the id
                // is preserved so the landing can be reconciled later
                let mut result = ExecutionResult::failure(e.to_string(), started.elapsed());
                result.signatures = vec![bundle_id];
                result
            }
            Err(e) => ExecutionResult::failure(e.to_string(), started.elapsed()),
        }
    }

    async fn dry_run_bundle(
        &self,
        opportunity: &Opportunity,
        amount: u64,
        base_price_usd: f64,
        transactions: &[String],
        started: Instant,
    ) -> ExecutionResult {
        for tx in transactions {
            if let Err(e) = self.rpc.simulate_transaction(tx).await {
                return ExecutionResult::failure(
                    format!("dry-run simulation failed: {}", e),
                    started.elapsed(),
                );
            }
        }
        let last_out = opportunity
            .leg_quotes
            .last()
            .map(|q| q.out_amount)
            .unwrap_or(0);
        let profit_lamports = last_out as i64 - amount as i64;
        tracing::info!(
            legs = transactions.len(),
            profit_lamports,
            "Dry run: bundle would be submitted"
        );
        ExecutionResult {
            success: true,
            profit_lamports,
            profit_usd: profit_lamports as f64 / LAMPORTS_PER_SOL * base_price_usd,
            signatures: vec![format!("dry-run-{}", opportunity.id)],
            compute_units: None,
            tip_lamports: 0,
            error: None,
            stuck_asset: None,
            duration: started.elapsed(),
        }
    }

    /// Build, simulate and broadcast one swap leg, then wait for
    /// confirmation
    async fn swap(&self, quote: &SwapQuote) -> std::result::Result<LegOutcome, ExecutionError> {
        self.limiter.until_ready().await;
        let tx = self
            .quoter
            .build_swap_transaction(quote, &self.config.wallet_pubkey)
            .await
            .map_err(|e| ExecutionError::SwapBuild(e.to_string()))?
            .ok_or_else(|| {
                ExecutionError::SwapBuild(format!(
                    "aggregator declined {} -> {}",
                    quote.input_mint, quote.output_mint
                ))
            })?;

        // Every externally-quoted transaction is re-simulated before it
        // is broadcast
        let simulation = self.rpc.simulate_transaction(&tx).await?;

        if self.config.dry_run {
            tracing::info!(
                in_amount = quote.in_amount,
                out_amount = quote.out_amount,
                "Dry run: swap simulated only"
            );
            return Ok(LegOutcome {
                signature: format!("dry-run-{}", uuid::Uuid::new_v4()),
                units_consumed: simulation.units_consumed,
            });
        }

        let signature = self.send_with_retries(&tx).await?;
        self.rpc
            .confirm_signature(&signature, self.config.confirm_timeout)
            .await?;

        Ok(LegOutcome {
            signature,
            units_consumed: simulation.units_consumed,
        })
    }

    /// Broadcast with bounded exponential backoff (base 1s, x2 per
    /// attempt, jittered)
    async fn send_with_retries(&self, tx: &str) -> std::result::Result<String, ExecutionError> {
        let attempts = self.config.send_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.rpc.send_transaction(tx).await {
                Ok(signature) => return Ok(signature),
                Err(e) => {
                    let retryable = e.is_transient() && attempt + 1 < attempts;
                    tracing::warn!(
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "Send failed"
                    );
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    let backoff = SEND_BACKOFF_BASE_MS * 2u64.pow(attempt);
                    let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExecutionError::Rpc("send never attempted".into())))
    }

    /// Attempt to convert a stranded holding back into the base asset.
    /// Returns the reverse swap outcome, or `None` when no route exists
    /// right now.
    pub async fn reverse_swap(
        &self,
        mint: &str,
        amount: u64,
    ) -> std::result::Result<Option<(String, u64)>, ExecutionError> {
        self.limiter.until_ready().await;
        let quote = match self
            .quoter
            .get_quote(mint, &self.config.base_mint, amount, self.config.slippage_bps)
            .await
        {
            Ok(Some(q)) => q,
            Ok(None) => return Ok(None),
            Err(e) => return Err(ExecutionError::Rpc(e.to_string())),
        };

        let outcome = self.swap(&quote).await?;
        Ok(Some((outcome.signature, quote.out_amount)))
    }

    pub fn wallet_pubkey(&self) -> &str {
        &self.config.wallet_pubkey
    }

    pub fn base_mint(&self) -> &str {
        &self.config.base_mint
    }
}
