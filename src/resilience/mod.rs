//! Resilience helpers for durable-tier I/O.

pub mod retry;
