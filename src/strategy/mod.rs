// Opportunity producer interfaces
//
// The detection algorithms themselves live outside this crate; the
// engine only consumes their output through these traits.
use crate::models::Opportunity;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Capacity of the event-driven opportunity queue
const EVENT_QUEUE_DEPTH: usize = 256;

/// A poll-based opportunity producer
///
/// `scan` is called once per orchestrator tick. Producers guarantee
/// `expires_at` on returned opportunities reflects true quote validity.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Scan for candidate trades right now
    async fn scan(&self) -> Result<Vec<Opportunity>>;

    /// Strategy name, matched against the gate's enablement table
    fn name(&self) -> &str;
}

/// A parsed pending-transaction event from the market-data layer
#[derive(Debug, Clone)]
pub struct PendingTxEvent {
    pub signature: String,
    pub program: String,
    pub payload: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

/// Capability for strategies that react to streamed market data
///
/// Implementations turn a pending-transaction event into at most one
/// opportunity. Dispatch happens through this trait object, never by
/// inspecting the concrete strategy type.
#[async_trait]
pub trait EventDrivenStrategy: Strategy {
    async fn on_pending_transaction(&self, event: &PendingTxEvent) -> Option<Opportunity>;
}

/// Queue carrying event-driven opportunities into the scan loop
///
/// Producers push from stream callbacks; the orchestrator drains the
/// queue at the start of each tick. Pushes to a full queue are dropped
/// with a warning: event opportunities are short-lived anyway.
pub struct OpportunityQueue {
    sender: mpsc::Sender<Opportunity>,
    receiver: mpsc::Receiver<Opportunity>,
}

impl OpportunityQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Self { sender, receiver }
    }

    /// Handle given to event-driven producers
    pub fn handle(&self) -> OpportunitySender {
        OpportunitySender {
            sender: self.sender.clone(),
        }
    }

    /// Drain everything currently queued, discarding expired entries
    pub fn drain(&mut self) -> Vec<Opportunity> {
        let now = Utc::now();
        let mut drained = Vec::new();
        while let Ok(opportunity) = self.receiver.try_recv() {
            if opportunity.is_expired(now) {
                tracing::debug!(id = %opportunity.id, "Dropping expired queued opportunity");
                continue;
            }
            drained.push(opportunity);
        }
        drained
    }
}

impl Default for OpportunityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct OpportunitySender {
    sender: mpsc::Sender<Opportunity>,
}

impl OpportunitySender {
    pub fn push(&self, opportunity: Opportunity) {
        if let Err(e) = self.sender.try_send(opportunity) {
            tracing::warn!(error = %e, "Event opportunity queue full, dropping");
        }
    }
}
