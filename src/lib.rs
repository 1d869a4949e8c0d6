//! roomwatch
//!
//! Collects nightly room prices for a set of hotel listings across
//! human-authored date ranges by driving headless browser sessions against
//! booking platforms. Free-text date ranges are parsed and expanded into
//! discrete stay windows, each `(target, window)` pair becomes a retryable
//! job on an at-least-once queue, and a pool of workers fetches, extracts
//! and reports prices which are aggregated into a CSV artifact.

pub mod config;
pub mod dates;
pub mod models;
pub mod services;
pub mod worker;
