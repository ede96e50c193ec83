use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::domain::context_block::ContextBlock;
use crate::models::domain::question::{Difficulty, Question, QuestionType};

const MIX_TOLERANCE: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_request_shape"))]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 200))]
    pub subject_name: String,

    #[validate(length(min = 1))]
    pub doc_ids: Vec<String>,

    #[validate(range(min = 1))]
    pub total_count: u32,

    pub allowed_types: BTreeSet<QuestionType>,

    #[serde(default)]
    pub counts_by_type: BTreeMap<QuestionType, u32>,

    pub difficulty_mix: BTreeMap<Difficulty, f64>,

    #[validate(range(min = 1))]
    pub budget_cap: u32,
}

impl GenerationRequest {
    /// Per-type question targets. Explicit counts are kept; whatever remains
    /// of `total_count` is dealt round-robin over the allowed types.
    pub fn type_targets(&self) -> BTreeMap<QuestionType, u32> {
        let mut targets: BTreeMap<QuestionType, u32> = self
            .allowed_types
            .iter()
            .map(|t| (*t, self.counts_by_type.get(t).copied().unwrap_or(0)))
            .collect();

        let assigned: u32 = targets.values().sum();
        let mut remainder = self.total_count.saturating_sub(assigned);
        let order: Vec<QuestionType> = self.allowed_types.iter().copied().collect();
        if order.is_empty() {
            return targets;
        }

        let mut cursor = 0;
        while remainder > 0 {
            if let Some(count) = targets.get_mut(&order[cursor % order.len()]) {
                *count += 1;
            }
            cursor += 1;
            remainder -= 1;
        }
        targets
    }

    pub fn unique_doc_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.doc_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

fn request_error(code: &'static str, message: String) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::from(message));
    error
}

fn validate_request_shape(request: &GenerationRequest) -> Result<(), ValidationError> {
    if request.subject_name.trim().is_empty() {
        return Err(request_error(
            "subject_blank",
            "subject_name must not be blank".to_string(),
        ));
    }

    if request.doc_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(request_error(
            "doc_id_blank",
            "doc_ids must not contain blank ids".to_string(),
        ));
    }

    if request.allowed_types.is_empty() {
        return Err(request_error(
            "no_allowed_types",
            "allowed_types must name at least one question type".to_string(),
        ));
    }

    if let Some(stray) = request
        .counts_by_type
        .keys()
        .find(|t| !request.allowed_types.contains(*t))
    {
        return Err(request_error(
            "count_for_disallowed_type",
            format!("counts_by_type names {} which is not an allowed type", stray),
        ));
    }

    let requested: u32 = request.counts_by_type.values().sum();
    if requested > request.total_count {
        return Err(request_error(
            "counts_exceed_total",
            format!(
                "counts_by_type sums to {} which exceeds total_count {}",
                requested, request.total_count
            ),
        ));
    }

    if request.difficulty_mix.is_empty() {
        return Err(request_error(
            "difficulty_mix_empty",
            "difficulty_mix must not be empty".to_string(),
        ));
    }
    if request
        .difficulty_mix
        .values()
        .any(|share| !share.is_finite() || *share < 0.0)
    {
        return Err(request_error(
            "difficulty_mix_negative",
            "difficulty_mix shares must be finite and non-negative".to_string(),
        ));
    }
    let total_share: f64 = request.difficulty_mix.values().sum();
    if (total_share - 1.0).abs() > MIX_TOLERANCE {
        return Err(request_error(
            "difficulty_mix_sum",
            format!("difficulty_mix sums to {:.3}, expected 1.0", total_share),
        ));
    }

    Ok(())
}

/// Which provider call produced a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    FirstAttempt,
    Repaired,
}

impl std::fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptPhase::FirstAttempt => write!(f, "first_attempt"),
            AttemptPhase::Repaired => write!(f, "repaired"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Invalid,
    TransientFailure,
    FatalFailure,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttemptRecord {
    pub phase: AttemptPhase,
    /// Hash of the prompt pair sent in this attempt.
    pub prompt_hash: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub violation_count: usize,
}

/// Audit record of exactly what was asked and what came back.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GenerationTrace {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    pub raw_response: Option<String>,
    pub language_votes: BTreeMap<String, usize>,
    pub attempts: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
}

impl GenerationTrace {
    pub fn new(provider: &str, model: &str, prompt_hash: &str) -> Self {
        GenerationTrace {
            run_id: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_hash: prompt_hash.to_string(),
            raw_response: None,
            language_votes: BTreeMap::new(),
            attempts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn provider_calls(&self) -> usize {
        self.attempts.len()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GenerationResult {
    pub questions: Vec<Question>,
    pub blocks: Vec<ContextBlock>,
    pub language_code: String,
    pub trace: GenerationTrace,
}
