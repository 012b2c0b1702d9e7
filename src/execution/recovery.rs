use crate::db::Database;
use crate::execution::engine::ExecutionEngine;
use crate::models::StuckAsset;
use uuid::Uuid;

/// In-memory registry of stranded holdings, write-through to persistence
///
/// The sweep works off this book; the database copy exists so strandings
/// survive restarts and show up in operator tooling.
#[derive(Default)]
pub struct StuckAssetBook {
    assets: Vec<StuckAsset>,
}

impl StuckAssetBook {
    pub fn new(assets: Vec<StuckAsset>) -> Self {
        Self { assets }
    }

    pub fn add(&mut self, asset: StuckAsset) {
        tracing::warn!(
            symbol = %asset.symbol,
            amount = asset.estimated_amount,
            reason = %asset.reason,
            "⚠️  Asset stranded"
        );
        self.assets.push(asset);
    }

    pub fn unrecovered(&self) -> Vec<StuckAsset> {
        self.assets.iter().filter(|a| !a.recovered).cloned().collect()
    }

    pub fn mark_recovered(&mut self, id: Uuid) -> bool {
        if let Some(asset) = self.assets.iter_mut().find(|a| a.id == id && !a.recovered) {
            asset.recovered = true;
            true
        } else {
            false
        }
    }

    pub fn unrecovered_count(&self) -> usize {
        self.assets.iter().filter(|a| !a.recovered).count()
    }

    /// Swap the book out for the duration of a sweep so a std mutex
    /// around it is never held across an await point
    pub fn take_for_sweep(&mut self) -> StuckAssetBook {
        std::mem::take(self)
    }

    /// Restore the swept book, keeping anything added in the meantime
    pub fn merge_after_sweep(&mut self, swept: StuckAssetBook) {
        let added_meanwhile = std::mem::take(&mut self.assets);
        self.assets = swept.assets;
        self.assets.extend(added_meanwhile);
    }
}

/// Try to reconvert every stranded asset still held
///
/// An asset counts as recovered when the wallet no longer holds it, or
/// when a reverse swap lands. Per-asset failures are logged and retried
/// on the next sweep. Returns how many assets were recovered this pass.
pub async fn run_sweep(
    engine: &ExecutionEngine,
    book: &mut StuckAssetBook,
    db: Option<&Database>,
) -> usize {
    let pending = book.unrecovered();
    if pending.is_empty() {
        return 0;
    }

    tracing::info!(count = pending.len(), "🔁 Recovery sweep starting");
    let mut recovered = 0;

    for asset in pending {
        let balance = match engine
            .rpc()
            .get_token_balance(engine.wallet_pubkey(), &asset.mint)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(symbol = %asset.symbol, error = %e, "Balance check failed");
                continue;
            }
        };

        if balance == 0 {
            tracing::info!(symbol = %asset.symbol, "Holding already gone, marking recovered");
            book.mark_recovered(asset.id);
            persist_recovery(db, asset.id, "balance-zero").await;
            recovered += 1;
            continue;
        }

        match engine.reverse_swap(&asset.mint, balance).await {
            Ok(Some((signature, out_amount))) => {
                tracing::info!(
                    symbol = %asset.symbol,
                    signature = %signature,
                    out_amount,
                    "✅ Stranded asset reconverted"
                );
                book.mark_recovered(asset.id);
                persist_recovery(db, asset.id, &signature).await;
                recovered += 1;
            }
            Ok(None) => {
                tracing::debug!(symbol = %asset.symbol, "Still no reverse route");
            }
            Err(e) => {
                tracing::warn!(symbol = %asset.symbol, error = %e, "Recovery attempt failed");
            }
        }
    }

    if recovered > 0 {
        tracing::info!(recovered, "Recovery sweep done");
    }
    recovered
}

async fn persist_recovery(db: Option<&Database>, id: Uuid, proof: &str) {
    if let Some(db) = db {
        db.mark_token_recovered(id, proof).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stuck(symbol: &str) -> StuckAsset {
        StuckAsset {
            id: Uuid::new_v4(),
            mint: format!("{}Mint11111111111111111111111111111111111", symbol),
            symbol: symbol.to_string(),
            estimated_amount: 1_000_000,
            trade_id: Uuid::new_v4(),
            reason: "leg 2 failed: blockhash expired".to_string(),
            recovered: false,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_book_tracks_unrecovered() {
        let mut book = StuckAssetBook::default();
        let a = stuck("USDC");
        let b = stuck("JUP");
        let a_id = a.id;

        book.add(a);
        book.add(b);
        assert_eq!(book.unrecovered_count(), 2);

        assert!(book.mark_recovered(a_id));
        assert_eq!(book.unrecovered_count(), 1);
        assert_eq!(book.unrecovered()[0].symbol, "JUP");

        // Recovering twice is a no-op
        assert!(!book.mark_recovered(a_id));
    }

    #[test]
    fn test_recovered_asset_never_reappears() {
        let mut book = StuckAssetBook::default();
        let asset = stuck("USDC");
        let id = asset.id;
        book.add(asset);

        book.mark_recovered(id);
        assert!(book.unrecovered().is_empty());

        // Only a new stranding event brings the symbol back
        book.add(stuck("USDC"));
        assert_eq!(book.unrecovered_count(), 1);
        assert_ne!(book.unrecovered()[0].id, id);
    }
}
