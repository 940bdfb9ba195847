//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the application installs a recorder
//! (e.g. `metrics-exporter-prometheus`). Call sites go through the small
//! helper functions in each submodule so metric names and label keys stay in
//! one place.

pub mod counters;
pub mod gauges;
pub mod histograms;
pub mod labels;
