//! Agent Types
//!
//! Construction-time configuration shared by the pool and the registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration handed to a [`WorkerFactory`](crate::agents::pool::WorkerFactory)
/// when a new agent is constructed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Model identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Skills enabled for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    /// Spending cap in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra system instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_max_budget(mut self, usd: f64) -> Self {
        self.max_budget_usd = Some(usd);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Fill unset fields from `defaults`.
    pub fn merged_with(mut self, defaults: &AgentConfig) -> Self {
        if self.model.is_none() {
            self.model = defaults.model.clone();
        }
        if self.skills.is_none() {
            self.skills = defaults.skills.clone();
        }
        if self.max_budget_usd.is_none() {
            self.max_budget_usd = defaults.max_budget_usd;
        }
        if self.cwd.is_none() {
            self.cwd = defaults.cwd.clone();
        }
        if self.instructions.is_none() {
            self.instructions = defaults.instructions.clone();
        }
        self
    }
}
