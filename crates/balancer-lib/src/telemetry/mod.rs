//! Rolling per-node utilization history
//!
//! The store is the only owner of the history. Refreshes fetch every online
//! node in parallel, then apply all samples under one write lock so readers
//! never observe a partially refreshed cycle. Readers take a `TelemetrySnapshot`
//! copy before scoring.

mod history;
mod store;

#[cfg(test)]
mod tests;

pub use history::{NodeHistory, ResourceHistory, DEFAULT_WINDOW};
pub use store::{NodeSeries, RefreshReport, TelemetrySnapshot, TelemetryStore};
