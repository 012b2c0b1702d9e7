// Swap execution module
pub mod engine;
pub mod recovery;
pub mod throttle;

pub use engine::{EngineConfig, ExecutionEngine};
pub use recovery::{run_sweep, StuckAssetBook};
pub use throttle::{shared_rate_limiter, SharedRateLimiter};
