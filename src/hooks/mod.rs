//! # Side-effect hooks bound to state transitions.
//!
//! Each state may carry zero or more configured actions — external command,
//! script, or outbound webhook — with placeholder substitution for job id,
//! job path, state name, and error text.
//!
//! ## Contents
//! - [`HookAction`], [`HookBinding`], [`HookPhase`], [`HookContext`],
//!   [`substitute`] the configuration model
//! - [`HookDispatcher`] fire-and-forget dispatch wired to the event channel

mod action;
mod dispatcher;

pub use action::{HookAction, HookBinding, HookContext, HookPhase, substitute};
pub use dispatcher::HookDispatcher;
