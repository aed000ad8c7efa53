//! Orchestrator configuration stored in `orchestrator.toml`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::gate::CommandGate;
use crate::core::payload::Stage;
use crate::core::types::{NextInstruction, NextPhase};

/// Environment variable that overrides `notify.webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "ORCHESTRATOR_WEBHOOK_URL";

/// Orchestrator configuration (TOML).
///
/// Edited by humans. Missing fields take the defaults below, so an empty
/// file (or no file) yields a runnable configuration. Credentials never live
/// here; see [`Provider::api_key_env`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Steps the loop may take before giving up.
    pub max_steps: u32,

    /// Per-command and per-backend-call timeout.
    pub timeout_secs: u64,

    /// Transport retries per backend call (after the first call).
    pub api_retry: u32,

    /// Repair re-prompts per stage (after the first attempt).
    pub json_retry: u32,

    pub backoff_base_secs: u32,

    /// Bytes kept per captured command stream.
    pub output_limit_bytes: usize,

    /// Bytes of raw backend text kept in step records.
    pub log_text_limit: usize,

    /// Bytes of rendered prompt kept in step records.
    pub prompt_log_limit: usize,

    pub allow_types: Vec<String>,

    /// Case-insensitive regexes; the first match denies a command.
    pub deny_patterns: Vec<String>,

    /// Command kind -> argv prefix. The command code is appended as the last
    /// argument.
    pub interpreters: BTreeMap<String, Vec<String>>,

    pub backends: BackendsConfig,
    pub prompts: PromptsConfig,
    pub done: DoneConfig,
    pub notify: NotifyConfig,

    /// Relative to the loop root.
    pub workspace_dir: PathBuf,
    /// Relative to the loop root.
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    /// Environment variable holding the API key for this provider.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub provider: Provider,
    pub model: String,
}

impl BackendConfig {
    fn openai() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
        }
    }

    fn anthropic() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendsConfig {
    pub draft: BackendConfig,
    pub review: BackendConfig,
    #[serde(rename = "final")]
    pub finalize: BackendConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            draft: BackendConfig::openai(),
            review: BackendConfig::anthropic(),
            finalize: BackendConfig::openai(),
        }
    }
}

impl BackendsConfig {
    pub fn for_stage(&self, stage: Stage) -> &BackendConfig {
        match stage {
            Stage::Draft => &self.draft,
            Stage::Review => &self.review,
            Stage::Final => &self.finalize,
        }
    }
}

const DRAFT_PROMPT: &str = "\
You are automating a task one step at a time. This is step {step_num}.
Previous steps: {history_json}
Propose the next commands. Reply with JSON only:
{\"thought\": \"...\", \"commands\": [{\"type\": \"powershell\", \"code\": \"...\"}]}";

const REVIEW_PROMPT: &str = "\
Review the proposed commands for step {step_num}. Fix unsafe or incorrect ones.
Draft:
{draft_json}
Reply with JSON only:
{\"review\": \"...\", \"improved_commands\": [{\"type\": \"powershell\", \"code\": \"...\"}], \"approval\": true}";

const FINAL_PROMPT: &str = "\
Decide the final commands for step {step_num}.
Draft:
{draft_json}
Review:
{review_json}
Reply with JSON only:
{\"final_commands\": [{\"type\": \"powershell\", \"code\": \"...\"}], \"summary\": \"...\"}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptsConfig {
    pub draft: String,
    pub review: String,
    #[serde(rename = "final")]
    pub finalize: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            draft: DRAFT_PROMPT.to_string(),
            review: REVIEW_PROMPT.to_string(),
            finalize: FINAL_PROMPT.to_string(),
        }
    }
}

impl PromptsConfig {
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Draft => &self.draft,
            Stage::Review => &self.review,
            Stage::Final => &self.finalize,
        }
    }
}

/// Completion check applied at the top of every step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DoneConfig {
    /// Relative to the workspace directory.
    pub target: PathBuf,
    pub required_markers: Vec<String>,
    pub next_phase: NextPhase,
}

impl Default for DoneConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from("results/result_v2.txt"),
            required_markers: vec![
                "合計:".to_string(),
                "平均:".to_string(),
                "件数:".to_string(),
            ],
            next_phase: NextPhase {
                name: "report".to_string(),
                done_condition: "TBD".to_string(),
                instruction: NextInstruction {
                    id: "report-001".to_string(),
                    summary: "Turn the aggregated results into a report".to_string(),
                    inputs: vec!["results/result_v2.txt".to_string()],
                    expected_outputs: vec!["artifacts/report.md".to_string()],
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    /// Webhook endpoint, with the environment taking precedence over the file.
    pub fn resolved_webhook_url(&self) -> Option<String> {
        std::env::var(WEBHOOK_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.webhook_url.clone().filter(|url| !url.trim().is_empty()))
    }
}

fn default_interpreters() -> BTreeMap<String, Vec<String>> {
    [
        ("powershell", ["powershell", "-Command"]),
        ("bash", ["bash", "-c"]),
        ("python", ["python", "-c"]),
    ]
    .into_iter()
    .map(|(kind, argv)| {
        (
            kind.to_string(),
            argv.iter().map(|arg| arg.to_string()).collect(),
        )
    })
    .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            timeout_secs: 120,
            api_retry: 2,
            json_retry: 2,
            backoff_base_secs: 2,
            output_limit_bytes: 1000,
            log_text_limit: 2000,
            prompt_log_limit: 500,
            allow_types: vec!["powershell".to_string()],
            deny_patterns: [
                r"Remove-Item",
                r"\brm\s+-",
                r"Format-Volume",
                r"Stop-Computer",
                r"Restart-Computer",
                r"\bshutdown\b",
                r"Invoke-WebRequest",
                r"Invoke-Expression",
                r"\breg\s+delete\b",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            interpreters: default_interpreters(),
            backends: BackendsConfig::default(),
            prompts: PromptsConfig::default(),
            done: DoneConfig::default(),
            notify: NotifyConfig::default(),
            workspace_dir: PathBuf::from("workspace"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.notify.timeout_secs == 0 {
            return Err(anyhow!("notify.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.log_text_limit == 0 || self.prompt_log_limit == 0 {
            return Err(anyhow!("log_text_limit and prompt_log_limit must be > 0"));
        }
        if self.allow_types.is_empty() {
            return Err(anyhow!("allow_types must not be empty"));
        }
        for kind in &self.allow_types {
            let argv = self
                .interpreters
                .get(kind)
                .ok_or_else(|| anyhow!("allowed kind '{kind}' has no [interpreters] entry"))?;
            if argv.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!("interpreters.{kind} must be a non-empty array"));
            }
        }
        self.gate().context("deny_patterns")?;
        if self.done.target.as_os_str().is_empty() || self.done.target.is_absolute() {
            return Err(anyhow!(
                "done.target must be a non-empty path relative to workspace_dir"
            ));
        }
        if self.done.required_markers.iter().any(String::is_empty) {
            return Err(anyhow!("done.required_markers must not contain empty markers"));
        }
        for stage in Stage::ALL {
            if self.backends.for_stage(stage).model.trim().is_empty() {
                return Err(anyhow!("backends.{stage}.model must not be empty"));
            }
        }
        Ok(())
    }

    /// Build the command gate described by `allow_types` and `deny_patterns`.
    pub fn gate(&self) -> Result<CommandGate> {
        CommandGate::new(&self.allow_types, &self.deny_patterns)
            .map_err(|err| anyhow!("invalid deny pattern: {err}"))
    }

    /// Providers used by any stage, deduplicated.
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = Vec::new();
        for stage in Stage::ALL {
            let provider = self.backends.for_stage(stage).provider;
            if !providers.contains(&provider) {
                providers.push(provider);
            }
        }
        providers
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
