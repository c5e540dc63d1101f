//! Batch consumer with lag monitor
//!
//! - [`handler`]: processes the batches the consumer client delivers
//! - [`processor`]: the per-message seam, JSON decoding by default
//! - [`lag`]: periodic latest-minus-committed sampling
//! - [`service`]: lifecycle behind the [`LoadController`] surface
//!
//! [`LoadController`]: crate::core::controller::LoadController

pub mod error;
pub mod handler;
pub mod lag;
pub mod processor;
pub mod service;

#[cfg(test)]
mod tests;

pub use error::{ProcessError, ProcessResult};
pub use handler::ConsumerBatchHandler;
pub use lag::{compute_lag, LagMonitor, LagSample};
pub use processor::{JsonProcessor, MessageProcessor};
pub use service::{ConsumerService, ConsumerSettings, LagSettings};
