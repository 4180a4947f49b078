//! Background scheduler.
//!
//! Fires the daily rollover, the daily summary and the weekly summary with
//! its points reset at local wall-clock boundaries.

pub mod runner;
pub mod tasks;

pub use runner::{CycleReport, Scheduler, SchedulerHandle};
pub use tasks::{Schedule, Trigger, Weekday, next_fire_time};
