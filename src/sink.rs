use crate::batch::Batch;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("push rejected: {0}")]
    Rejected(String),
}

/// Receipt for a push the sink accepted. Delivery is confirmed later, out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushTicket {
    pub batch_id: Uuid,
    pub entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Succeeded,
    Failed,
}

/// Remote end of the accumulated record. `push` must not block; the sink decides whether an
/// accepted push drains `batch`.
pub trait Sink: Send {
    fn push(&mut self, batch: &mut Batch) -> Result<PushTicket, PushError>;
}

/// Asynchronous delivery report. Logging only: the publish state is never touched from here.
pub fn report_push_outcome(batch_id: Uuid, outcome: PushOutcome) {
    match outcome {
        PushOutcome::Succeeded => tracing::debug!(%batch_id, "record push succeeded"),
        PushOutcome::Failed => tracing::warn!(%batch_id, "record push was not successful"),
    }
}
