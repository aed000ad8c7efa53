//! Typed payloads returned by the three pipeline stages.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::CommandSpec;

/// One of the three pipeline calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Draft,
    Review,
    Final,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Draft, Stage::Review, Stage::Final];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::Review => "review",
            Stage::Final => "final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract shared by the stage payloads: which stage produces it, the JSON
/// Schema it must satisfy, and the commands it carries.
pub trait StagePayload: DeserializeOwned + Serialize + Clone {
    const STAGE: Stage;
    const SCHEMA: &'static str;

    fn commands(&self) -> &[CommandSpec];
}

/// `{thought, commands[]}` from the draft backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPayload {
    #[serde(default)]
    pub thought: Option<String>,
    pub commands: Vec<CommandSpec>,
    /// Keys this orchestrator does not interpret, passed through unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reviewer verdict; backends answer with either a flag or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Approval {
    Flag(bool),
    Text(String),
}

/// `{review, improved_commands[], approval}` from the review backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    #[serde(default)]
    pub review: Option<String>,
    pub improved_commands: Vec<CommandSpec>,
    #[serde(default)]
    pub approval: Option<Approval>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `{final_commands[], summary}` from the finalize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPayload {
    pub final_commands: Vec<CommandSpec>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StagePayload for DraftPayload {
    const STAGE: Stage = Stage::Draft;
    const SCHEMA: &'static str = include_str!("../schemas/draft.schema.json");

    fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }
}

impl StagePayload for ReviewPayload {
    const STAGE: Stage = Stage::Review;
    const SCHEMA: &'static str = include_str!("../schemas/review.schema.json");

    fn commands(&self) -> &[CommandSpec] {
        &self.improved_commands
    }
}

impl StagePayload for FinalPayload {
    const STAGE: Stage = Stage::Final;
    const SCHEMA: &'static str = include_str!("../schemas/final.schema.json");

    fn commands(&self) -> &[CommandSpec] {
        &self.final_commands
    }
}
