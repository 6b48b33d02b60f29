//! # Pre-transition guard checklist.
//!
//! Guards gate the transition into `ARMED`: the checklist runs every
//! predicate, blocking failures veto the transition with the full failing set
//! attached, soft failures degrade to job warnings.
//!
//! ## Contents
//! - [`Guard`], [`GuardContext`] the predicate extension point
//! - [`Checklist`] ordered evaluation returning all [`GuardResult`]s
//! - [`PlanPresent`], [`DeviceIdle`], [`DeviceAvailable`] built-in guards
//!   the orchestrator installs ahead of user-configured ones

mod checklist;

pub use checklist::{
    Checklist, DeviceAvailable, DeviceIdle, DriverMap, Guard, GuardContext, GuardResult,
    PlanPresent, Severity,
};
