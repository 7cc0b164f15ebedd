//! `conductor-scheduler` — the polling loop that turns schedules into work.
//!
//! Each tick runs a stuck-instance sweep, evaluates every enabled schedule
//! against `now`, and for each due one creates a JobInstance and enqueues a
//! message referencing it. Ticks are separated by a fixed delay so they
//! never overlap, and every decision is recomputed from durable state —
//! a mid-tick crash loses nothing but time.

pub mod due;
pub mod engine;
pub mod error;

pub use engine::{SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
