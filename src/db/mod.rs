// Persistence module
pub mod postgres;

pub use postgres::{Database, StrategyStats};
