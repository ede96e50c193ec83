use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Structural,
    Citation,
    Language,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::Structural => write!(f, "structural"),
            ViolationKind::Citation => write!(f, "citation"),
            ViolationKind::Language => write!(f, "language"),
        }
    }
}

/// One rejected aspect of a model response. `question_index` is `None` when
/// the problem concerns the batch as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub question_index: Option<usize>,
    pub reason: String,
}

impl Violation {
    pub fn structural(question_index: Option<usize>, reason: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Structural,
            question_index,
            reason: reason.into(),
        }
    }

    pub fn citation(question_index: usize, reason: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Citation,
            question_index: Some(question_index),
            reason: reason.into(),
        }
    }

    pub fn language(question_index: usize, reason: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Language,
            question_index: Some(question_index),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.question_index {
            Some(index) => write!(f, "[{}] question {}: {}", self.kind, index, self.reason),
            None => write!(f, "[{}] batch: {}", self.kind, self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_index() {
        let violation = Violation::citation(2, "quote not found in block c0003");
        assert_eq!(
            violation.to_string(),
            "[citation] question 2: quote not found in block c0003"
        );

        let batch = Violation::structural(None, "no questions returned");
        assert_eq!(batch.to_string(), "[structural] batch: no questions returned");
    }
}
