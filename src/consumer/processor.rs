//! Per-message processing seam of the consumer

use crate::broker::ConsumedMessage;
use crate::consumer::error::{ProcessError, ProcessResult};
use crate::producer::SyntheticMessage;
use async_trait::async_trait;

/// Work done for each consumed message
///
/// An error skips the message; its offset is still resolved.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &ConsumedMessage) -> ProcessResult<()>;
}

/// Decodes the JSON product payload written by the producer
#[derive(Debug, Default, Clone)]
pub struct JsonProcessor;

impl JsonProcessor {
    pub fn decode(message: &ConsumedMessage) -> ProcessResult<SyntheticMessage> {
        let payload = message.value.as_deref().ok_or(ProcessError::MissingPayload)?;
        serde_json::from_slice(payload).map_err(|e| ProcessError::Decode {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl MessageProcessor for JsonProcessor {
    async fn process(&self, message: &ConsumedMessage) -> ProcessResult<()> {
        Self::decode(message).map(|_| ())
    }
}
