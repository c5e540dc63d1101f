//! Core services and infrastructure

pub mod controller;
pub mod error_handling;
pub mod logging;
pub mod loop_state;
pub mod retry;
pub mod shutdown;
pub mod sync;
pub mod time;
pub mod version;
