//! Reconciliation strategies for the Joule control plane.
//!
//! Every control loop is a [`runtime::StrategyRuntime`] around a
//! [`runtime::Reconciler`]: a named background task that drains a Start/Stop
//! command channel without blocking, runs one reconcile per tick while
//! enabled, and never dies to a reconcile error. The strategies themselves
//! own no long-lived cluster state beyond their short-term memory (skiplist,
//! burst counters, cooldowns); everything else is re-read from the adapters
//! each tick so reconciliation stays idempotent against the remote state.

#![forbid(unsafe_code)]

mod error;
mod power;
mod relax;
mod runtime;
mod schedulable;
mod self_driving;
mod spawn;
mod submit;
mod tawa;

pub use error::{Result, StrategyError};
pub use power::{ServerPowerStrategy, MIN_AVG_TO_TURN_OFF, POWER_OFF_COOLDOWN};
pub use relax::TargetRelaxStrategy;
pub use runtime::{Reconciler, StrategyRuntime, DEFAULT_TICK};
pub use schedulable::SchedulableStrategy;
pub use self_driving::{
    SelfDrivingStrategy, ADJUSTMENT_SLACK, TIME_SINCE_INSERTION_THRESHOLD,
    TIME_SINCE_SCHEDULING_THRESHOLD,
};
pub use spawn::{
    AutomaticJobSpawn, BURST_RESET_TIMEOUT, MAX_BURST_PER_NODE, SPAWN_JOB_CPU_PERCENTAGE,
};
pub use submit::{SubmitError, WorkloadRequest, WorkloadSubmitter};
pub use tawa::TawaStrategy;
