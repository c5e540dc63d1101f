//! Tests for configuration loading and validation

pub mod file_tests;
