//! Canonical stage statuses and the outcome decoder (C4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Canonical node-attempt status. Graph authors and handlers may spell these
/// with aliases (`ok`, `error`, `failure`, `skip`); [`decode_outcome`]
/// normalizes them before anything else sees the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl Status {
    /// Normalizes a raw status/outcome string, applying the alias table.
    /// Comparison is case-sensitive: `"OK"` is not recognized as `ok`. This
    /// is a deliberate, documented choice (see DESIGN.md) rather than an
    /// oversight — graph authors are expected to match the canonical
    /// spelling or one of the listed lowercase aliases.
    pub fn normalize(raw: &str) -> Option<Status> {
        Some(match raw {
            "success" => Status::Success,
            "partial_success" => Status::PartialSuccess,
            "retry" => Status::Retry,
            "fail" => Status::Fail,
            "skipped" => Status::Skipped,
            "ok" => Status::Success,
            "error" | "failure" => Status::Fail,
            "skip" => Status::Skipped,
            _ => return None,
        })
    }

    pub fn canonical(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::PartialSuccess => "partial_success",
            Status::Retry => "retry",
            Status::Fail => "fail",
            Status::Skipped => "skipped",
        }
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Status::Success | Status::PartialSuccess | Status::Skipped)
    }
}

/// Failure classification, used by the scheduler to decide whether a `fail`
/// status is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    TransientInfra,
    Deterministic,
}

impl FailureClass {
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw {
            "transient_infra" => Some(Self::TransientInfra),
            "deterministic" => Some(Self::Deterministic),
            _ => None,
        }
    }
}

/// The structured result a node handler returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    pub preferred_label: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_class: Option<FailureClass>,
    pub failure_signature: Option<String>,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: HashMap<String, Value>,
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            preferred_label: None,
            failure_reason: None,
            failure_class: None,
            failure_signature: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            meta: serde_json::Map::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            failure_reason: Some(reason.into()),
            ..Self::success_shell()
        }
    }

    fn success_shell() -> Self {
        Self {
            status: Status::Success,
            preferred_label: None,
            failure_reason: None,
            failure_class: None,
            failure_signature: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            meta: serde_json::Map::new(),
        }
    }

    /// Validates the invariant that a terminal `fail` or
    /// `retry` must carry a non-empty `failure_reason`.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.status, Status::Fail | Status::Retry)
            && self.failure_reason.as_deref().unwrap_or("").is_empty()
        {
            return Err(CoreError::OutcomeDecode(
                "status fail/retry requires a non-empty failure_reason".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decodes raw JSON bytes into an [`Outcome`], accepting both the canonical
/// dialect (`status` field) and the legacy dialect (`outcome` field, with a
/// free-form `details` string). Top-level `failure_class`/`failure_signature`
/// are promoted onto the outcome; any remaining top-level fields are folded
/// into `meta`.
pub fn decode_outcome(bytes: &[u8]) -> Result<Outcome> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| CoreError::OutcomeDecode("outcome payload must be a JSON object".to_string()))?;

    let raw_status = obj
        .remove("status")
        .or_else(|| obj.remove("outcome"))
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| CoreError::OutcomeDecode("missing status/outcome field".to_string()))?;

    let status = Status::normalize(&raw_status)
        .ok_or_else(|| CoreError::OutcomeDecode(format!("unknown status '{raw_status}'")))?;

    let preferred_label = obj
        .remove("preferred_label")
        .and_then(|v| v.as_str().map(|s| s.to_string()));

    let mut failure_reason = obj
        .remove("failure_reason")
        .and_then(|v| v.as_str().map(|s| s.to_string()));
    if failure_reason.is_none() {
        if let Some(details) = obj.remove("details").and_then(|v| v.as_str().map(|s| s.to_string())) {
            failure_reason = Some(details);
        }
    }

    let failure_class = obj
        .remove("failure_class")
        .and_then(|v| v.as_str().and_then(FailureClass::normalize));

    let failure_signature = obj
        .remove("failure_signature")
        .and_then(|v| v.as_str().map(|s| s.to_string()));

    let suggested_next_ids = obj
        .remove("suggested_next_ids")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let context_updates = obj
        .remove("context_updates")
        .and_then(|v| v.as_object().cloned())
        .map(|m| m.into_iter().collect::<HashMap<_, _>>())
        .unwrap_or_default();

    let meta = obj
        .remove("meta")
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    let outcome = Outcome {
        status,
        preferred_label,
        failure_reason,
        failure_class,
        failure_signature,
        suggested_next_ids,
        context_updates,
        meta,
    };
    outcome.validate()?;
    Ok(outcome)
}
