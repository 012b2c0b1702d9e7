use crate::models::{Position, StuckAsset, TradeResult};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

/// Per-strategy aggregate loaded for status reporting
#[derive(Debug, Clone)]
pub struct StrategyStats {
    pub strategy: String,
    pub trades: i64,
    pub wins: i64,
    pub profit_usd: f64,
}

/// Postgres persistence collaborator
///
/// Storage failures never stop trading: reads fall back to zero values
/// and writes are logged and swallowed, so an outage degrades the engine
/// to "no memory of past losses" instead of halting it. The trade-off is
/// documented in DESIGN.md; a fail-closed port would surface read errors
/// to the gate instead.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and run migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");
        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------

    pub async fn insert_trade(&self, trade: &TradeResult) {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (id, strategy, success, profit_usd, profit_lamports, fees_usd, signatures, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(&trade.strategy)
        .bind(trade.success)
        .bind(Decimal::from_f64_retain(trade.profit_usd).unwrap_or_default())
        .bind(trade.profit_lamports)
        .bind(Decimal::from_f64_retain(trade.fees_usd).unwrap_or_default())
        .bind(trade.signatures.join(","))
        .bind(trade.executed_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(trade_id = %trade.id, error = %e, "Failed to insert trade");
        }
    }

    pub async fn update_trade(&self, id: Uuid, success: bool, profit_usd: f64, signatures: &[String]) {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET success = $2, profit_usd = $3, signatures = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(Decimal::from_f64_retain(profit_usd).unwrap_or_default())
        .bind(signatures.join(","))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(trade_id = %id, error = %e, "Failed to update trade");
        }
    }

    // ------------------------------------------------------------------
    // Daily PnL
    // ------------------------------------------------------------------

    pub async fn update_daily_pnl(&self, date: NaiveDate, profit_delta: f64, won: bool) {
        let result = sqlx::query(
            r#"
            INSERT INTO daily_pnl (date, profit_usd, trades, wins)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (date) DO UPDATE SET
                profit_usd = daily_pnl.profit_usd + EXCLUDED.profit_usd,
                trades = daily_pnl.trades + 1,
                wins = daily_pnl.wins + EXCLUDED.wins,
                updated_at = NOW()
            "#,
        )
        .bind(date)
        .bind(Decimal::from_f64_retain(profit_delta).unwrap_or_default())
        .bind(if won { 1i32 } else { 0i32 })
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to update daily pnl");
        }
    }

    /// Today's net PnL in USD; 0.0 when unavailable
    pub async fn get_today_pnl(&self) -> f64 {
        let row = sqlx::query("SELECT profit_usd FROM daily_pnl WHERE date = $1")
            .bind(Utc::now().date_naive())
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => row
                .get::<Decimal, _>("profit_usd")
                .to_f64()
                .unwrap_or(0.0),
            Ok(None) => 0.0,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read today's pnl, assuming 0");
                0.0
            }
        }
    }

    pub async fn get_daily_pnl_history(&self, days: i64) -> Vec<(NaiveDate, f64)> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(days);
        let rows = sqlx::query(
            "SELECT date, profit_usd FROM daily_pnl WHERE date >= $1 ORDER BY date ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|row| {
                    let date: NaiveDate = row.get("date");
                    let pnl = row.get::<Decimal, _>("profit_usd").to_f64().unwrap_or(0.0);
                    (date, pnl)
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read pnl history");
                Vec::new()
            }
        }
    }

    pub async fn get_strategy_stats(&self) -> Vec<StrategyStats> {
        let rows = sqlx::query(
            r#"
            SELECT strategy,
                   COUNT(*) AS trades,
                   COUNT(*) FILTER (WHERE success AND profit_usd >= 0) AS wins,
                   COALESCE(SUM(profit_usd), 0) AS profit_usd
            FROM trades
            GROUP BY strategy
            ORDER BY profit_usd DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|row| StrategyStats {
                    strategy: row.get("strategy"),
                    trades: row.get("trades"),
                    wins: row.get("wins"),
                    profit_usd: row.get::<Decimal, _>("profit_usd").to_f64().unwrap_or(0.0),
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read strategy stats");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // Stuck tokens
    // ------------------------------------------------------------------

    pub async fn add_stuck_token(&self, asset: &StuckAsset) {
        let result = sqlx::query(
            r#"
            INSERT INTO stuck_tokens (id, mint, symbol, estimated_amount, trade_id, reason, recovered, detected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(asset.id)
        .bind(&asset.mint)
        .bind(&asset.symbol)
        .bind(asset.estimated_amount as i64)
        .bind(asset.trade_id)
        .bind(&asset.reason)
        .bind(asset.recovered)
        .bind(asset.detected_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(symbol = %asset.symbol, error = %e, "Failed to persist stuck token");
        }
    }

    /// Unrecovered stuck tokens; empty when unavailable
    pub async fn get_stuck_tokens(&self) -> Vec<StuckAsset> {
        let rows = sqlx::query(
            r#"
            SELECT id, mint, symbol, estimated_amount, trade_id, reason, recovered, detected_at
            FROM stuck_tokens
            WHERE NOT recovered
            ORDER BY detected_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|row| StuckAsset {
                    id: row.get("id"),
                    mint: row.get("mint"),
                    symbol: row.get("symbol"),
                    estimated_amount: row.get::<i64, _>("estimated_amount").max(0) as u64,
                    trade_id: row.get("trade_id"),
                    reason: row.get("reason"),
                    recovered: row.get("recovered"),
                    detected_at: row.get::<DateTime<Utc>, _>("detected_at"),
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stuck tokens");
                Vec::new()
            }
        }
    }

    pub async fn mark_token_recovered(&self, id: Uuid, proof: &str) {
        let result = sqlx::query(
            r#"
            UPDATE stuck_tokens
            SET recovered = TRUE, recovery_proof = $2, recovered_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(proof)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(stuck_id = %id, error = %e, "Failed to mark token recovered");
        }
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    pub async fn save_position(&self, position: &Position) {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (trade_id, strategy, mint, symbol, amount, entry_price_usd, opened_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (trade_id) DO UPDATE SET
                amount = EXCLUDED.amount,
                updated_at = NOW()
            "#,
        )
        .bind(position.trade_id)
        .bind(&position.strategy)
        .bind(&position.mint)
        .bind(&position.symbol)
        .bind(position.amount as i64)
        .bind(Decimal::from_f64_retain(position.entry_price_usd).unwrap_or_default())
        .bind(position.opened_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(trade_id = %position.trade_id, error = %e, "Failed to save position");
        }
    }

    pub async fn delete_position(&self, trade_id: Uuid) {
        let result = sqlx::query("DELETE FROM positions WHERE trade_id = $1")
            .bind(trade_id)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            tracing::warn!(trade_id = %trade_id, error = %e, "Failed to delete position");
        }
    }

    pub async fn load_positions(&self) -> Vec<Position> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, strategy, mint, symbol, amount, entry_price_usd, opened_at
            FROM positions
            ORDER BY opened_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|row| Position {
                    trade_id: row.get("trade_id"),
                    strategy: row.get("strategy"),
                    mint: row.get("mint"),
                    symbol: row.get("symbol"),
                    amount: row.get::<i64, _>("amount").max(0) as u64,
                    entry_price_usd: row
                        .get::<Decimal, _>("entry_price_usd")
                        .to_f64()
                        .unwrap_or(0.0),
                    opened_at: row.get::<DateTime<Utc>, _>("opened_at"),
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load positions");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // Generic key/value state
    // ------------------------------------------------------------------

    pub async fn get_state(&self, key: &str) -> Option<String> {
        let row = sqlx::query("SELECT value FROM engine_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row.map(|r| r.get("value")),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read state key");
                None
            }
        }
    }

    pub async fn set_state(&self, key: &str, value: &str) {
        let result = sqlx::query(
            r#"
            INSERT INTO engine_state (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Failed to write state key");
        }
    }
}
