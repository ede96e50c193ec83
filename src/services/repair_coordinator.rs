//! Two-state repair protocol: a first attempt, then at most one repair.

use crate::{
    errors::AppError,
    models::domain::{generation::AttemptPhase, Violation},
    services::prompt_composer::{compose_repair, PromptPair},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairState {
    FirstAttempt,
    Repaired,
}

impl RepairState {
    pub fn phase(&self) -> AttemptPhase {
        match self {
            RepairState::FirstAttempt => AttemptPhase::FirstAttempt,
            RepairState::Repaired => AttemptPhase::Repaired,
        }
    }
}

/// A recoverable attempt failure. Fatal provider errors never get here.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptFailure {
    Invalid {
        raw: String,
        violations: Vec<Violation>,
    },
    Transient {
        reason: String,
        raw: Option<String>,
    },
}

impl AttemptFailure {
    pub fn raw(&self) -> Option<&str> {
        match self {
            AttemptFailure::Invalid { raw, .. } => Some(raw),
            AttemptFailure::Transient { raw, .. } => raw.as_deref(),
        }
    }

    pub fn violation_count(&self) -> usize {
        match self {
            AttemptFailure::Invalid { violations, .. } => violations.len(),
            AttemptFailure::Transient { .. } => 0,
        }
    }

    /// Terminal error reported once repair is no longer possible.
    pub fn into_error(self) -> AppError {
        match self {
            AttemptFailure::Invalid { violations, .. } => AppError::Validation(violations),
            AttemptFailure::Transient { reason, .. } => AppError::ProviderTransient(reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RepairDecision {
    Repair(PromptPair),
    GiveUp,
}

#[derive(Debug)]
pub struct RepairCoordinator {
    state: RepairState,
}

impl Default for RepairCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RepairCoordinator {
    pub fn new() -> Self {
        Self {
            state: RepairState::FirstAttempt,
        }
    }

    pub fn state(&self) -> RepairState {
        self.state
    }

    /// Single transition rule: a failed first attempt earns one repair
    /// prompt and moves to `Repaired`; a failure after that is final.
    pub fn next(&mut self, original: &PromptPair, failure: &AttemptFailure) -> RepairDecision {
        match self.state {
            RepairState::Repaired => RepairDecision::GiveUp,
            RepairState::FirstAttempt => {
                self.state = RepairState::Repaired;
                RepairDecision::Repair(repair_prompt(original, failure))
            }
        }
    }
}

fn repair_prompt(original: &PromptPair, failure: &AttemptFailure) -> PromptPair {
    match failure {
        AttemptFailure::Invalid { raw, violations } => {
            let problems: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
            compose_repair(original, raw, &problems)
        }
        AttemptFailure::Transient {
            reason,
            raw: Some(raw),
        } => compose_repair(original, raw, &[format!("the response could not be used: {}", reason)]),
        // Nothing came back; ask the same question again.
        AttemptFailure::Transient { raw: None, .. } => original.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> PromptPair {
        PromptPair {
            system: "system".to_string(),
            user: "make five questions".to_string(),
        }
    }

    fn citation_failure() -> AttemptFailure {
        AttemptFailure::Invalid {
            raw: "{\"questions\": [\"bad\"]}".to_string(),
            violations: vec![Violation::citation(0, "quote is a paraphrase")],
        }
    }

    #[test]
    fn test_first_failure_earns_exactly_one_repair() {
        let mut coordinator = RepairCoordinator::new();
        assert_eq!(coordinator.state(), RepairState::FirstAttempt);

        let decision = coordinator.next(&original(), &citation_failure());
        let RepairDecision::Repair(prompts) = decision else {
            panic!("expected a repair prompt");
        };
        assert!(prompts.user.starts_with("make five questions"));
        assert!(prompts.user.contains("[citation] question 0: quote is a paraphrase"));
        assert!(prompts.user.contains("{\"questions\": [\"bad\"]}"));
        assert_eq!(coordinator.state(), RepairState::Repaired);

        assert_eq!(
            coordinator.next(&original(), &citation_failure()),
            RepairDecision::GiveUp
        );
        assert_eq!(
            coordinator.next(&original(), &citation_failure()),
            RepairDecision::GiveUp
        );
    }

    #[test]
    fn test_transient_without_body_resends_original_prompt() {
        let mut coordinator = RepairCoordinator::new();
        let failure = AttemptFailure::Transient {
            reason: "timed out".to_string(),
            raw: None,
        };

        assert_eq!(
            coordinator.next(&original(), &failure),
            RepairDecision::Repair(original())
        );
    }

    #[test]
    fn test_malformed_body_is_sent_back_with_reason() {
        let mut coordinator = RepairCoordinator::new();
        let failure = AttemptFailure::Transient {
            reason: "response is not valid JSON".to_string(),
            raw: Some("Sure, here are your questions".to_string()),
        };

        let RepairDecision::Repair(prompts) = coordinator.next(&original(), &failure) else {
            panic!("expected a repair prompt");
        };
        assert!(prompts.user.contains("Sure, here are your questions"));
        assert!(prompts.user.contains("response is not valid JSON"));
    }

    #[test]
    fn test_failures_convert_to_terminal_errors() {
        assert_eq!(citation_failure().into_error().error_code(), "VALIDATION_ERROR");
        let transient = AttemptFailure::Transient {
            reason: "timed out".into(),
            raw: None,
        };
        assert_eq!(transient.violation_count(), 0);
        assert_eq!(transient.into_error().error_code(), "PROVIDER_TRANSIENT");
        assert_eq!(RepairState::Repaired.phase(), AttemptPhase::Repaired);
    }
}
