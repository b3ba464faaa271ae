//! Post-ingestion analysis: trailing-window KPIs and threshold alerts.

mod alerts;
mod window;

pub use alerts::{evaluate, Direction, Threshold, Thresholds};
pub use window::filter_and_aggregate;
