//! Synthetic load harness for partitioned, log-based message brokers
//!
//! A rate-controlled producer keeps its throughput inside a target band by
//! adjusting the delay between iterations, and a batch consumer processes
//! partitions concurrently while a lag monitor samples how far its group
//! trails the log end. Both report into a shared Prometheus [`stats`] sink.

pub mod app;
pub mod broker;
pub mod consumer;
pub mod core;
pub mod producer;
pub mod stats;
