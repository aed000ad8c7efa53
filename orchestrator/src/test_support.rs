//! Test-only fakes for the backend, command and notification seams, plus
//! deterministic fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::core::backoff::RetryPolicy;
use crate::core::types::{CommandSpec, ExecResult};
use crate::io::backend::{Backend, TransportFailure};
use crate::io::command_exec::CommandRunner;
use crate::io::config::OrchestratorConfig;
use crate::io::notify::{Delivery, Notifier, NotifyError};
use crate::pipeline::PipelineSettings;

/// Specification document containing every required section.
pub const FULL_SPEC: &str = "\
# Purpose
Aggregate the sales figures.

## Input
data/sales.csv

## Output
results/result_v2.txt with 合計, 平均 and 件数.

## Rules
Read-only access to data/.

## Environment
PowerShell 7

## Completion_Criteria
All three markers present.

## Prohibited
Deleting files.
";

/// Backend that replays a fixed queue of responses and records every prompt.
///
/// An exhausted queue answers with a transport failure.
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, TransportFailure>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<String, TransportFailure>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Successful responses only.
    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|text| Ok(text.to_string())).collect())
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, _model: &str, prompt: &str) -> Result<String, TransportFailure> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFailure::new("scripted", "no scripted response left")))
    }
}

/// Command runner that returns canned results and records the commands.
pub struct ScriptedRunner {
    results: RefCell<VecDeque<ExecResult>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(results: Vec<ExecResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> ExecResult {
        self.calls.borrow_mut().push(spec.clone());
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ExecResult {
                error: Some("no scripted result left".to_string()),
                ..ExecResult::default()
            })
    }
}

/// Notifier that keeps every message. A failing notifier records the message
/// and then reports a send failure.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: RefCell<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: RefCell::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> Result<Delivery, NotifyError> {
        self.messages.borrow_mut().push(message.to_string());
        if self.fail {
            return Err(NotifyError::SendFailed("scripted failure".to_string()));
        }
        Ok(Delivery::Sent)
    }
}

/// Default config with `bash` allowed and no transport retries, so a
/// scripted transport failure never sleeps.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        allow_types: vec!["bash".to_string()],
        api_retry: 0,
        ..OrchestratorConfig::default()
    }
}

/// Pipeline settings from [`test_config`] with immediate transport retries.
pub fn pipeline_settings() -> PipelineSettings {
    let cfg = test_config();
    PipelineSettings {
        transport_retry: RetryPolicy::immediate(cfg.api_retry),
        ..PipelineSettings::from_config(&cfg)
    }
}

/// Canned `(draft, review, final)` responses for one successful step.
pub fn stage_replies(commands: &[(&str, &str)], summary: &str) -> [String; 3] {
    let commands: Vec<serde_json::Value> = commands
        .iter()
        .map(|(kind, code)| serde_json::json!({"type": kind, "code": code}))
        .collect();
    let commands = serde_json::Value::Array(commands).to_string();
    [
        format!(r#"{{"thought": "next step", "commands": {commands}}}"#),
        format!(r#"{{"review": "looks fine", "improved_commands": {commands}, "approval": true}}"#),
        format!(r#"{{"final_commands": {commands}, "summary": "{summary}"}}"#),
    ]
}
