//! Rate-controlled load producer
//!
//! - [`generator`]: pure synthetic message generation
//! - [`pacing`]: the three-tier delay controller
//! - [`service`]: the producer loop behind the [`LoadController`] surface
//!
//! [`LoadController`]: crate::core::controller::LoadController

pub mod generator;
pub mod pacing;
pub mod service;

#[cfg(test)]
mod tests;

pub use generator::{encode_batch, generate_batch, SyntheticMessage};
pub use pacing::{PacingDecision, PacingSettings, RateController};
pub use service::{ProducerService, ProducerSettings, ProducerStats};
