use crate::risk::RiskLevel;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level runtime settings
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `SOLARB_*` environment variables (double underscore as the section
/// separator, e.g. `SOLARB_RPC__URL`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub quoter: QuoterSettings,
    pub relay: RelaySettings,
    pub price_feed: PriceFeedSettings,
    pub trading: TradingSettings,
    pub scan: ScanSettings,
    /// Strategy name -> enabled. Unknown strategies are denied by the gate.
    pub strategies: HashMap<String, bool>,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub url: String,
    /// Commitment level passed to every RPC call
    pub commitment: String,
    pub confirm_timeout_secs: u64,
    pub send_retries: u32,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            confirm_timeout_secs: 30,
            send_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoterSettings {
    pub base_url: String,
    pub slippage_bps: u16,
    /// Requests-per-second budget shared across all quote/swap calls
    pub requests_per_second: u32,
}

impl Default for QuoterSettings {
    fn default() -> Self {
        Self {
            base_url: "https://lite-api.jup.ag/swap/v1".to_string(),
            slippage_bps: 50,
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Tried in order until one accepts the bundle
    pub endpoints: Vec<String>,
    pub tip_lamports: u64,
    pub status_poll_interval_secs: u64,
    pub status_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
                "https://amsterdam.mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
            ],
            tip_lamports: 10_000,
            status_poll_interval_secs: 2,
            status_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceFeedSettings {
    pub base_url: String,
    pub cache_ttl_secs: u64,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.dexscreener.com".to_string(),
            cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub wallet_pubkey: String,
    /// Base asset mint (the asset every cycle starts and ends in)
    pub base_mint: String,
    pub base_symbol: String,
    pub base_decimals: u8,
    /// Configured capital in USD, used for percentage-based limits
    pub capital_usd: f64,
    pub risk_level: RiskLevel,
    pub dry_run: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            wallet_pubkey: String::new(),
            base_mint: "So11111111111111111111111111111111111111112".to_string(),
            base_symbol: "SOL".to_string(),
            base_decimals: 9,
            capital_usd: 10_000.0,
            risk_level: RiskLevel::Conservative,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Inter-tick delay inside high-activity windows
    pub active_interval_secs: u64,
    /// Inter-tick delay outside them
    pub idle_interval_secs: u64,
    /// UTC hour ranges [start, end) with elevated scan frequency
    pub activity_windows: Vec<(u8, u8)>,
    /// Cap on how long a tripped breaker pauses the loop in one sleep
    pub breaker_sleep_cap_secs: u64,
    /// Mints tracked for the rate-budget floor calculation
    pub tracked_mints: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            active_interval_secs: 5,
            idle_interval_secs: 30,
            activity_windows: vec![(13, 16), (19, 22)],
            breaker_sleep_cap_secs: 60,
            tracked_mints: 4,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut strategies = HashMap::new();
        strategies.insert("two_hop".to_string(), true);
        strategies.insert("triangular".to_string(), true);

        Self {
            rpc: RpcSettings::default(),
            quoter: QuoterSettings::default(),
            relay: RelaySettings::default(),
            price_feed: PriceFeedSettings::default(),
            trading: TradingSettings::default(),
            scan: ScanSettings::default(),
            strategies,
            database_url: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        } else {
            builder = builder.add_source(File::with_name("Settings").required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("SOLARB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        // DATABASE_URL is the conventional name; honor it when the
        // prefixed variant is absent.
        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }

        Ok(settings)
    }

    pub fn strategy_enabled(&self, name: &str) -> bool {
        self.strategies.get(name).copied().unwrap_or(false)
    }

    /// True when the given UTC hour falls inside a configured activity window
    pub fn in_activity_window(&self, hour: u8) -> bool {
        self.scan
            .activity_windows
            .iter()
            .any(|&(start, end)| hour >= start && hour < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.rpc.commitment, "confirmed");
        assert_eq!(settings.quoter.slippage_bps, 50);
        assert!(settings.trading.dry_run);
        assert!(settings.strategy_enabled("two_hop"));
        assert!(!settings.strategy_enabled("unknown"));
    }

    #[test]
    fn test_activity_window() {
        let settings = Settings::default();
        assert!(settings.in_activity_window(13));
        assert!(settings.in_activity_window(15));
        assert!(!settings.in_activity_window(16));
        assert!(!settings.in_activity_window(3));
    }

    #[test]
    fn test_relay_defaults_have_failover() {
        let settings = Settings::default();
        assert!(settings.relay.endpoints.len() >= 2);
    }
}
