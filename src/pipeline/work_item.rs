//! The mutable blackboard passed through the pipeline
//!
//! Created once per user request and exclusively owned by the pipeline
//! driver. Fields are append-only within one execution, except
//! `code_snippet`, which each correction iteration may replace.

use crate::analyzer::Host;
use crate::corpus::DeclarationEntry;
use crate::telemetry::TelemetryData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Immutable after creation.
    pub user_input: String,
    pub appendix: Appendix,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Appendix {
    /// Filled by the generator's pre-scan; never cleared within a run.
    pub host: Option<Host>,
    pub is_custom_function: bool,
    /// 0-100 difficulty rating; `None` until the pre-scan runs.
    pub complexity: Option<u8>,
    pub should_continue: bool,
    /// One retrieved reference snippet, when a match exists.
    pub code_sample: String,
    /// Ordered subtask descriptions. Once non-empty, not recomputed.
    pub code_task_breakdown: Vec<String>,
    pub code_explanation: String,
    /// Second-pass declaration retrieval; computed at most once per run.
    pub api_declarations: BTreeMap<String, DeclarationEntry>,
    /// The current best candidate snippet.
    pub code_snippet: String,
    pub telemetry: TelemetryData,
}

impl WorkItem {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            user_input: user_input.into(),
            appendix: Appendix::default(),
        }
    }

    /// True once the pre-scan has classified this request.
    pub fn is_scanned(&self) -> bool {
        self.appendix.host.is_some() && self.appendix.complexity.is_some()
    }

    /// Complexity with the unscanned default of zero.
    pub fn complexity(&self) -> u8 {
        self.appendix.complexity.unwrap_or(0)
    }
}
