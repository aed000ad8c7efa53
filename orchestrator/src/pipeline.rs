//! Draft → review → finalize pipeline with malformed-payload repair.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::backoff::RetryPolicy;
use crate::core::parser::{MalformedPayload, PayloadParser};
use crate::core::payload::{DraftPayload, FinalPayload, ReviewPayload, Stage, StagePayload};
use crate::core::step_record::{HistoryEntry, ModelsUsed, PromptUsage, StepRecord};
use crate::core::template::{PromptVars, render};
use crate::core::text::truncate_text;
use crate::io::backend::{Backend, TransportFailure, call_with_retry, http_backend};
use crate::io::config::{OrchestratorConfig, Provider};

/// Instruction prepended to the original prompt after a malformed response.
pub const REPAIR_PREFIX: &str = "\
Your previous response was not valid JSON in the requested format.
Reply with the JSON object only. Do not add any explanation.

";

/// Why a stage produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    #[error("no valid payload after {attempts} attempts ({last})")]
    Malformed {
        attempts: u32,
        last: MalformedPayload,
    },
    #[error(transparent)]
    Transport(#[from] TransportFailure),
}

/// A stage gave up; the step is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct StageFailed {
    pub stage: Stage,
    pub cause: StageFailure,
    /// Last raw backend text, if any call returned.
    pub last_raw: Option<String>,
}

/// Backend used by each stage. Stages may share one backend.
#[derive(Clone)]
pub struct StageBackends {
    pub draft: Rc<dyn Backend>,
    pub review: Rc<dyn Backend>,
    pub finalize: Rc<dyn Backend>,
}

impl StageBackends {
    /// One backend for every stage.
    pub fn shared(backend: Rc<dyn Backend>) -> Self {
        Self {
            draft: backend.clone(),
            review: backend.clone(),
            finalize: backend,
        }
    }

    /// HTTP backends for the configured providers, one client per provider.
    ///
    /// Fails when the API key of any configured provider is missing.
    pub fn from_config(cfg: &OrchestratorConfig) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let mut clients: Vec<(Provider, Rc<dyn Backend>)> = Vec::new();
        for provider in cfg.providers() {
            clients.push((provider, Rc::from(http_backend(provider, timeout)?)));
        }
        let pick = |stage: Stage| -> Result<Rc<dyn Backend>> {
            let provider = cfg.backends.for_stage(stage).provider;
            clients
                .iter()
                .find(|(candidate, _)| *candidate == provider)
                .map(|(_, backend)| backend.clone())
                .ok_or_else(|| anyhow!("no {provider} backend for {stage} stage"))
        };
        Ok(Self {
            draft: pick(Stage::Draft)?,
            review: pick(Stage::Review)?,
            finalize: pick(Stage::Final)?,
        })
    }

    fn for_stage(&self, stage: Stage) -> &dyn Backend {
        match stage {
            Stage::Draft => self.draft.as_ref(),
            Stage::Review => self.review.as_ref(),
            Stage::Final => self.finalize.as_ref(),
        }
    }
}

/// Knobs of the pipeline, taken from [`OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub models: ModelsUsed,
    pub templates: BTreeMap<Stage, String>,
    pub transport_retry: RetryPolicy,
    /// Re-prompts after a malformed response (attempts = this + 1).
    pub repair_retries: u32,
    pub prompt_log_limit: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &OrchestratorConfig) -> Self {
        Self {
            models: models_used(cfg),
            templates: Stage::ALL
                .into_iter()
                .map(|stage| (stage, cfg.prompts.for_stage(stage).to_string()))
                .collect(),
            transport_retry: RetryPolicy::new(cfg.api_retry, cfg.backoff_base_secs),
            repair_retries: cfg.json_retry,
            prompt_log_limit: cfg.prompt_log_limit,
        }
    }

    fn model(&self, stage: Stage) -> &str {
        match stage {
            Stage::Draft => &self.models.draft,
            Stage::Review => &self.models.review,
            Stage::Final => &self.models.finalize,
        }
    }
}

/// Models configured per stage, as recorded in step records.
pub fn models_used(cfg: &OrchestratorConfig) -> ModelsUsed {
    ModelsUsed {
        draft: cfg.backends.draft.model.clone(),
        review: cfg.backends.review.model.clone(),
        finalize: cfg.backends.finalize.model.clone(),
    }
}

/// Per-stage trace, present once the stage was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTrace {
    pub prompt: PromptUsage,
    /// Last raw response (full text; truncate before logging).
    pub raw: Option<String>,
    /// Re-prompts sent after malformed responses.
    pub repairs: u32,
}

/// Everything the pipeline produced for one step, successful or not.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub traces: BTreeMap<Stage, StageTrace>,
    pub draft: Option<DraftPayload>,
    pub review: Option<ReviewPayload>,
    pub finalize: Option<FinalPayload>,
    pub failure: Option<StageFailed>,
}

impl PipelineReport {
    /// Copy stage traces and payloads into a step record.
    pub fn fill_record(&self, record: &mut StepRecord, raw_limit: usize) {
        let raw = |stage: Stage| {
            self.traces
                .get(&stage)
                .and_then(|trace| trace.raw.as_deref())
                .map(|text| truncate_text(text, raw_limit))
        };
        record.prompts_used = Some(
            self.traces
                .iter()
                .map(|(stage, trace)| (*stage, trace.prompt.clone()))
                .collect(),
        );
        record.repairs = Some(
            self.traces
                .iter()
                .map(|(stage, trace)| (*stage, trace.repairs))
                .collect(),
        );
        record.draft = self.draft.clone();
        record.draft_raw = raw(Stage::Draft);
        record.review = self.review.clone();
        record.review_raw = raw(Stage::Review);
        record.finalize = self.finalize.clone();
        record.final_raw = raw(Stage::Final);
    }
}

pub struct StagePipeline {
    backends: StageBackends,
    settings: PipelineSettings,
    draft_parser: PayloadParser<DraftPayload>,
    review_parser: PayloadParser<ReviewPayload>,
    final_parser: PayloadParser<FinalPayload>,
}

impl StagePipeline {
    pub fn new(backends: StageBackends, settings: PipelineSettings) -> Result<Self> {
        Ok(Self {
            backends,
            settings,
            draft_parser: PayloadParser::new()?,
            review_parser: PayloadParser::new()?,
            final_parser: PayloadParser::new()?,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the three stages for `step_num`. A failed stage stops the pipeline;
    /// later stages are not invoked.
    #[instrument(skip_all, fields(step_num))]
    pub fn run(&self, step_num: u32, history: &[HistoryEntry]) -> PipelineReport {
        let mut report = PipelineReport::default();
        let history = serde_json::to_value(history).unwrap_or(Value::Array(Vec::new()));

        let vars = PromptVars {
            step_num,
            history: Some(&history),
            ..PromptVars::default()
        };
        let Some(draft) = self.stage(&self.draft_parser, &vars, &mut report) else {
            return report;
        };
        let draft_value = payload_value(&draft);
        report.draft = Some(draft);

        let vars = PromptVars {
            step_num,
            history: Some(&history),
            draft: Some(&draft_value),
            review: None,
        };
        let Some(review) = self.stage(&self.review_parser, &vars, &mut report) else {
            return report;
        };
        let review_value = payload_value(&review);
        report.review = Some(review);

        let vars = PromptVars {
            step_num,
            history: Some(&history),
            draft: Some(&draft_value),
            review: Some(&review_value),
        };
        if let Some(finalize) = self.stage(&self.final_parser, &vars, &mut report) {
            info!(
                commands = finalize.final_commands.len(),
                "pipeline produced final commands"
            );
            report.finalize = Some(finalize);
        }
        report
    }

    fn stage<T: StagePayload>(
        &self,
        parser: &PayloadParser<T>,
        vars: &PromptVars<'_>,
        report: &mut PipelineReport,
    ) -> Option<T> {
        let stage = T::STAGE;
        let template = self
            .settings
            .templates
            .get(&stage)
            .map(String::as_str)
            .unwrap_or_default();
        let rendered = render(template, vars);
        if !rendered.unresolved.is_empty() {
            warn!(%stage, unresolved = ?rendered.unresolved, "prompt placeholders left unresolved");
        }

        let mut trace = StageTrace {
            prompt: PromptUsage {
                template_name: format!("{stage}_prompt_template"),
                prompt: truncate_text(&rendered.text, self.settings.prompt_log_limit),
            },
            raw: None,
            repairs: 0,
        };
        let result = self.call_with_repair(parser, &rendered.text, &mut trace);
        let last_raw = trace.raw.clone();
        report.traces.insert(stage, trace);

        match result {
            Ok(payload) => Some(payload),
            Err(cause) => {
                warn!(%stage, err = %cause, "stage failed");
                report.failure = Some(StageFailed {
                    stage,
                    cause,
                    last_raw,
                });
                None
            }
        }
    }

    /// Call the stage backend until its text parses, re-prompting with
    /// [`REPAIR_PREFIX`] in front of the original prompt. Transport failures
    /// (after their own retries) end the stage immediately.
    fn call_with_repair<T: StagePayload>(
        &self,
        parser: &PayloadParser<T>,
        prompt: &str,
        trace: &mut StageTrace,
    ) -> Result<T, StageFailure> {
        let stage = T::STAGE;
        let backend = self.backends.for_stage(stage);
        let model = self.settings.model(stage);
        let attempts = self.settings.repair_retries + 1;
        let repair_prompt = format!("{REPAIR_PREFIX}{prompt}");

        let mut last = None;
        for attempt in 0..attempts {
            let text = if attempt == 0 { prompt } else { &repair_prompt };
            let raw = call_with_retry(backend, model, text, &self.settings.transport_retry)?;
            trace.repairs = attempt;
            let parsed = parser.parse(&raw);
            trace.raw = Some(raw);
            match parsed {
                Ok(payload) => {
                    debug!(%stage, repairs = attempt, commands = payload.commands().len(), "stage payload accepted");
                    return Ok(payload);
                }
                Err(err) => {
                    warn!(%stage, attempt = attempt + 1, attempts, reason = %err.reason, "malformed stage payload");
                    last = Some(err);
                }
            }
        }

        Err(StageFailure::Malformed {
            attempts,
            last: last.unwrap_or_else(|| MalformedPayload {
                reason: "no attempt was made".to_string(),
            }),
        })
    }
}

fn payload_value<T: StagePayload>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
