//! Exported gauges backing the Joule control plane.
//!
//! The cluster's telemetry-aware scheduler and the dashboard read three
//! signals from the time-series store: a per-node CPU utilization target,
//! a per-node schedulable flag, and a per-power-label energy consumption.
//! This crate owns the cells behind those gauges. Every mutation goes
//! through a cell's `set` so the exported value and the in-memory value
//! never diverge.

#![forbid(unsafe_code)]

mod cells;
mod hub;

pub use cells::{SchedulableCell, SchedulableTable, TargetCell, TargetTable};
pub use hub::{EnergyGauges, MetricsHub, SCHEDULABLE_METRIC_NAME, STATIC_ENERGY_SEED};
