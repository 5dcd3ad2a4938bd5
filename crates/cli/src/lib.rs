//! CLI and composition root for the price-quote automation pool.
//!
//! The binary wires the resilience pipeline around the worker pool into a
//! long-lived [`engine::QuoteEngine`] and exposes a few operational
//! commands on top of it.

/// Command-line definition.
pub mod cli;
/// Command implementations.
pub mod commands;
/// Pipeline composition root.
pub mod engine;
/// Tracing subscriber setup.
pub mod logging;
/// Result envelope and printing.
pub mod output;
