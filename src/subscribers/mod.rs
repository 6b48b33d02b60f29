//! # Event subscribers.
//!
//! Subscribers consume the transition-event stream and run side effects off
//! the orchestrator's critical path: hook dispatch, recording supervision,
//! logging. The [`SubscriberSet`] gives each one a bounded queue and a
//! dedicated worker, so a slow or broken subscriber can never delay a
//! committed transition or block pause/abort handling.
//!
//! ## Contents
//! - [`Subscribe`] the handler trait
//! - [`SubscriberSet`] bounded-queue fan-out with panic isolation
//! - [`LogWriter`] events → `tracing`

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
