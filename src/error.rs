use thiserror::Error;

/// Failure modes of a single execution attempt
///
/// `EconomicDecline` and `Stranded` are policy outcomes, not faults: the
/// engine reports them through `ExecutionResult` instead of crashing the
/// scan loop.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no quote available for {input} -> {output}")]
    QuoteUnavailable { input: String, output: String },

    #[error("swap transaction build failed: {0}")]
    SwapBuild(String),

    #[error("rpc request failed: {0}")]
    Rpc(String),

    #[error("transaction {signature} not confirmed within {timeout_secs}s")]
    ConfirmTimeout { signature: String, timeout_secs: u64 },

    #[error("all {attempted} relay endpoints rejected the bundle")]
    RelayExhausted { attempted: usize },

    #[error("bundle {bundle_id} status poll timed out")]
    BundleTimeout { bundle_id: String },

    #[error("round trip would realize a loss of {loss_lamports} lamports")]
    EconomicDecline { loss_lamports: i64 },

    #[error("simulation failed: {0}")]
    Simulation(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ExecutionError {
    /// Transient errors are worth retrying at the point of use
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutionError::Rpc(_) | ExecutionError::Http(_) => true,
            ExecutionError::ConfirmTimeout { .. } => false,
            _ => false,
        }
    }
}
