//! Test modules for the broker collaborators
