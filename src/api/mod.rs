pub mod jupiter;
pub mod price;
pub mod relay;
pub mod rpc;

pub use jupiter::JupiterClient;
pub use price::{PriceFeedClient, ReferencePrice};
pub use relay::RelayClient;
pub use rpc::{RpcClient, SimulationOutcome};
