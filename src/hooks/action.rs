//! # Hook actions and placeholder substitution.
//!
//! A hook action is a tagged variant — external command, script invocation,
//! or outbound webhook — bound to a state transition. Action fields support
//! placeholder substitution before dispatch:
//!
//! | placeholder  | value                          |
//! |--------------|--------------------------------|
//! | `{job_id}`   | job identity                   |
//! | `{job_path}` | source drawing path            |
//! | `{state}`    | state being entered            |
//! | `{error}`    | error text, if any (else `""`) |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::fsm::JobState;

/// When the action runs relative to the journal commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Dispatched just before the transition is journaled.
    Before,
    /// Dispatched after the transition is committed and applied.
    After,
}

/// A configured side-effect action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookAction {
    /// Run an external command.
    Command { program: String, args: Vec<String> },
    /// Invoke a script file.
    Script { path: PathBuf, args: Vec<String> },
    /// POST a JSON notification to a URL.
    Webhook { url: String },
}

impl HookAction {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            HookAction::Command { program, .. } => format!("command:{program}"),
            HookAction::Script { path, .. } => format!("script:{}", path.display()),
            HookAction::Webhook { url } => format!("webhook:{url}"),
        }
    }
}

/// Binds an action to entering a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookBinding {
    /// The action fires when a job enters this state.
    pub state: JobState,
    /// Before or after the journal commit.
    pub phase: HookPhase,
    /// What to run.
    pub action: HookAction,
}

/// Values substituted into action fields.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub job_id: String,
    pub job_path: String,
    pub state: JobState,
    pub error: Option<String>,
}

/// Replaces every placeholder in `template` from the context.
pub fn substitute(template: &str, ctx: &HookContext) -> String {
    template
        .replace("{job_id}", &ctx.job_id)
        .replace("{job_path}", &ctx.job_path)
        .replace("{state}", &ctx.state.to_string())
        .replace("{error}", ctx.error.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HookContext {
        HookContext {
            job_id: "j-42".into(),
            job_path: "/drawings/wave.svg".into(),
            state: JobState::Plotting,
            error: None,
        }
    }

    #[test]
    fn substitute_fills_all_placeholders() {
        let out = substitute("notify {job_id} {state} {job_path}", &ctx());
        assert_eq!(out, "notify j-42 PLOTTING /drawings/wave.svg");
    }

    #[test]
    fn missing_error_becomes_empty_string() {
        assert_eq!(substitute("e=[{error}]", &ctx()), "e=[]");
        let mut with_err = ctx();
        with_err.error = Some("limit switch".into());
        assert_eq!(substitute("e=[{error}]", &with_err), "e=[limit switch]");
    }

    #[test]
    fn action_serde_is_tagged() {
        let action = HookAction::Webhook {
            url: "https://hooks.example/plot".into(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"type\":\"webhook\""));
        let back: HookAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
