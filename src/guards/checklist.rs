//! # Arming checklist: guard trait, evaluation, and built-in guards.
//!
//! A checklist is a named list of boolean predicates, each tagged blocking or
//! soft-fail. The evaluator always runs **every** guard and returns the full
//! result set, so the operator sees all outstanding issues at once instead of
//! fixing them one rejection at a time.
//!
//! ## Rules
//! - A blocking failure vetoes the gated transition; the job is untouched and
//!   nothing is journaled.
//! - A soft failure is recorded as a job warning and does not block (an
//!   unavailable auxiliary recorder degrades gracefully).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceDriver, DeviceLocks};
use crate::fsm::Job;

/// Driver handles keyed by device id.
pub type DriverMap = HashMap<String, Arc<dyn DeviceDriver>>;

/// How a failed guard affects the gated transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Failure vetoes the transition.
    Blocking,
    /// Failure is recorded as a warning; the transition proceeds.
    Soft,
}

/// Outcome of one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    /// Checklist item identity.
    pub name: String,
    /// Whether the predicate held.
    pub passed: bool,
    /// Blocking or soft-fail.
    pub severity: Severity,
    /// Failure detail, if any.
    pub detail: Option<String>,
}

impl GuardResult {
    pub fn pass(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            passed: true,
            severity,
            detail: None,
        }
    }

    pub fn fail(name: impl Into<String>, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            severity,
            detail: Some(detail.into()),
        }
    }

    /// True for a failed blocking guard.
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Blocking
    }
}

/// What a guard may inspect while deciding.
pub struct GuardContext<'a> {
    /// The job requesting the gated transition.
    pub job: &'a Job,
    /// Cancellation token for guards that talk to collaborators.
    pub token: CancellationToken,
}

/// One checklist predicate.
///
/// Implementations should be quick; a guard that queries a collaborator must
/// observe `ctx.token`.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    /// Stable checklist item name (kebab-case by convention).
    fn name(&self) -> &str;

    /// Whether a failure blocks the transition.
    fn severity(&self) -> Severity {
        Severity::Blocking
    }

    /// Evaluates the predicate. `Err` carries the failure detail.
    async fn check(&self, ctx: &GuardContext<'_>) -> Result<(), String>;
}

/// A named, ordered set of guards evaluated before a gated transition.
#[derive(Default)]
pub struct Checklist {
    guards: Vec<Arc<dyn Guard>>,
}

impl Checklist {
    pub fn new(guards: Vec<Arc<dyn Guard>>) -> Self {
        Self { guards }
    }

    /// Appends a guard; builder-style.
    pub fn with(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    /// Runs every guard and returns the full result set, pass and fail alike.
    pub async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<GuardResult> {
        let mut results = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            let result = match guard.check(ctx).await {
                Ok(()) => GuardResult::pass(guard.name(), guard.severity()),
                Err(detail) => GuardResult::fail(guard.name(), guard.severity(), detail),
            };
            results.push(result);
        }
        results
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Blocking: the job must carry a complete plan (every visible layer assigned
/// a pen, execution order computed).
pub struct PlanPresent;

#[async_trait]
impl Guard for PlanPresent {
    fn name(&self) -> &str {
        "plan-present"
    }

    async fn check(&self, ctx: &GuardContext<'_>) -> Result<(), String> {
        if ctx.job.plan.is_none() {
            return Err("no execution plan; run plan first".into());
        }
        let unassigned: Vec<&str> = ctx
            .job
            .layers
            .iter()
            .filter(|l| !l.hidden && l.assigned_pen.is_none())
            .map(|l| l.name.as_str())
            .collect();
        if unassigned.is_empty() {
            Ok(())
        } else {
            Err(format!("layers without a pen: {}", unassigned.join(", ")))
        }
    }
}

/// Blocking: the job's device driver must report itself idle.
pub struct DeviceIdle {
    drivers: Arc<DriverMap>,
}

impl DeviceIdle {
    pub fn new(drivers: Arc<DriverMap>) -> Self {
        Self { drivers }
    }
}

#[async_trait]
impl Guard for DeviceIdle {
    fn name(&self) -> &str {
        "device-idle"
    }

    async fn check(&self, ctx: &GuardContext<'_>) -> Result<(), String> {
        let Some(driver) = self.drivers.get(&ctx.job.device_id) else {
            return Err(format!("no driver for device {}", ctx.job.device_id));
        };
        match driver.report_status(&ctx.token).await {
            Ok(status) if status.idle => Ok(()),
            Ok(_) => Err("device reports motion in progress".into()),
            Err(e) => Err(format!("status query failed: {e}")),
        }
    }
}

/// Blocking: the device advisory lock must be free (or already held by this
/// job). A busy device fails arming immediately; jobs are never queued.
pub struct DeviceAvailable {
    locks: Arc<DeviceLocks>,
}

impl DeviceAvailable {
    pub fn new(locks: Arc<DeviceLocks>) -> Self {
        Self { locks }
    }
}

#[async_trait]
impl Guard for DeviceAvailable {
    fn name(&self) -> &str {
        "device-available"
    }

    async fn check(&self, ctx: &GuardContext<'_>) -> Result<(), String> {
        if self
            .locks
            .available_for(&ctx.job.device_id, &ctx.job.id_str())
            .await
        {
            Ok(())
        } else {
            let holder = self.locks.holder(&ctx.job.device_id).await;
            Err(format!(
                "device {} held by job {}",
                ctx.job.device_id,
                holder.unwrap_or_default()
            ))
        }
    }
}
