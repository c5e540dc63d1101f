//! Shared stats sink
//!
//! Both loops report into one [`StatsSink`]. It owns a Prometheus registry
//! with the message counters, throughput gauges, processing-time histogram
//! and lag gauge, and renders them in the text exposition format.

pub mod error;
pub mod sink;

pub use error::{StatsError, StatsResult};
pub use sink::{Operation, StatsSink, PROCESSING_TIME_BUCKETS};
