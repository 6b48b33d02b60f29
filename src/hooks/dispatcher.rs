//! # Fire-and-forget hook dispatch.
//!
//! [`HookDispatcher`] matches transitions against the configured bindings and
//! spawns one task per matching action. Dispatch is fire-and-forget relative
//! to the FSM: a slow or hung hook cannot delay an already-committed
//! transition or block pause/abort handling.
//!
//! ## Rules
//! - Failures are captured, logged, and published as `HookFailed` — never
//!   retried, never escalated to job failure, never rolling back a journaled
//!   transition.
//! - "Before" hooks are fired by the orchestrator directly ahead of the
//!   journal write; "after" hooks arrive through the transition-event
//!   channel (this type is also a [`Subscribe`] implementation).

use async_trait::async_trait;
use tracing::warn;

use super::action::{HookAction, HookBinding, HookContext, HookPhase, substitute};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

/// Matches transitions to configured actions and spawns them.
pub struct HookDispatcher {
    bindings: Vec<HookBinding>,
    bus: Bus,
    http: reqwest::Client,
}

impl HookDispatcher {
    pub fn new(bindings: Vec<HookBinding>, bus: Bus) -> Self {
        Self {
            bindings,
            bus,
            http: reqwest::Client::new(),
        }
    }

    /// Spawns every action bound to `(phase, entering ctx.state)`.
    ///
    /// Returns immediately; each action runs in its own task.
    pub fn fire(&self, phase: HookPhase, ctx: &HookContext) {
        for binding in &self.bindings {
            if binding.phase != phase || binding.state != ctx.state {
                continue;
            }
            let action = binding.action.clone();
            let ctx = ctx.clone();
            let bus = self.bus.clone();
            let http = self.http.clone();
            tokio::spawn(async move {
                if let Err(detail) = run_action(&action, &ctx, &http).await {
                    warn!(
                        job = ctx.job_id,
                        hook = action.label(),
                        detail, "hook failed"
                    );
                    bus.publish(
                        Event::now(EventKind::HookFailed)
                            .with_job(ctx.job_id.clone())
                            .with_hook(action.label())
                            .with_error(detail),
                    );
                }
            });
        }
    }

    /// Bindings matching a phase and state, for introspection.
    pub fn bindings_for(&self, phase: HookPhase, state: crate::fsm::JobState) -> usize {
        self.bindings
            .iter()
            .filter(|b| b.phase == phase && b.state == state)
            .count()
    }
}

#[async_trait]
impl Subscribe for HookDispatcher {
    async fn on_event(&self, event: &Event) {
        if event.kind != EventKind::TransitionCommitted {
            return;
        }
        let (Some(job), Some(to)) = (&event.job, event.to) else {
            return;
        };
        let ctx = HookContext {
            job_id: job.to_string(),
            job_path: event.path.as_deref().unwrap_or("").to_string(),
            state: to,
            error: event.error.as_ref().map(|e| e.to_string()),
        };
        self.fire(HookPhase::After, &ctx);
    }

    fn name(&self) -> &'static str {
        "hooks"
    }
}

/// Runs one action to completion.
async fn run_action(
    action: &HookAction,
    ctx: &HookContext,
    http: &reqwest::Client,
) -> Result<(), String> {
    match action {
        HookAction::Command { program, args } => {
            run_process(&substitute(program, ctx), args, ctx).await
        }
        HookAction::Script { path, args } => {
            run_process(&path.to_string_lossy(), args, ctx).await
        }
        HookAction::Webhook { url } => {
            let url = substitute(url, ctx);
            let payload = serde_json::json!({
                "job_id": ctx.job_id,
                "job_path": ctx.job_path,
                "state": ctx.state.to_string(),
                "error": ctx.error,
            });
            let response = http
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| format!("webhook send: {e}"))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("webhook status: {}", response.status()))
            }
        }
    }
}

async fn run_process(program: &str, args: &[String], ctx: &HookContext) -> Result<(), String> {
    let args: Vec<String> = args.iter().map(|a| substitute(a, ctx)).collect();
    let status = tokio::process::Command::new(program)
        .args(&args)
        .status()
        .await
        .map_err(|e| format!("spawn {program}: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{program} exited with {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::JobState;
    use std::time::Duration;

    fn ctx(state: JobState) -> HookContext {
        HookContext {
            job_id: "j-1".into(),
            job_path: "/d.svg".into(),
            state,
            error: None,
        }
    }

    #[test]
    fn bindings_match_phase_and_state() {
        let bus = Bus::new(4);
        let dispatcher = HookDispatcher::new(
            vec![
                HookBinding {
                    state: JobState::Plotting,
                    phase: HookPhase::After,
                    action: HookAction::Command {
                        program: "true".into(),
                        args: vec![],
                    },
                },
                HookBinding {
                    state: JobState::Plotting,
                    phase: HookPhase::Before,
                    action: HookAction::Command {
                        program: "true".into(),
                        args: vec![],
                    },
                },
            ],
            bus,
        );
        assert_eq!(dispatcher.bindings_for(HookPhase::After, JobState::Plotting), 1);
        assert_eq!(dispatcher.bindings_for(HookPhase::After, JobState::Paused), 0);
    }

    #[tokio::test]
    async fn failing_command_publishes_hook_failed() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let dispatcher = HookDispatcher::new(
            vec![HookBinding {
                state: JobState::Completed,
                phase: HookPhase::After,
                action: HookAction::Command {
                    program: "false".into(),
                    args: vec![],
                },
            }],
            bus,
        );

        dispatcher.fire(HookPhase::After, &ctx(JobState::Completed));

        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event");
        assert_eq!(ev.kind, EventKind::HookFailed);
        assert_eq!(ev.job.as_deref(), Some("j-1"));
    }

    #[tokio::test]
    async fn succeeding_command_stays_silent() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let dispatcher = HookDispatcher::new(
            vec![HookBinding {
                state: JobState::Completed,
                phase: HookPhase::After,
                action: HookAction::Command {
                    program: "true".into(),
                    args: vec![],
                },
            }],
            bus,
        );

        dispatcher.fire(HookPhase::After, &ctx(JobState::Completed));

        let silent =
            tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(silent.is_err(), "no event expected for a clean hook");
    }
}
