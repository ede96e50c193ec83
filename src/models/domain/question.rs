use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Mcq,
    TrueFalse,
    FillInBlank,
    ShortAnswer,
}

impl QuestionType {
    pub const ALL: [QuestionType; 4] = [
        QuestionType::Mcq,
        QuestionType::TrueFalse,
        QuestionType::FillInBlank,
        QuestionType::ShortAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::TrueFalse => "TRUE_FALSE",
            QuestionType::FillInBlank => "FILL_IN_BLANK",
            QuestionType::ShortAnswer => "SHORT_ANSWER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// A `{context_id, quote}` pair tying a question to literal source text.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SourceCitation {
    pub context_id: String,
    pub quote: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct QuestionMetadata {
    pub language: String,
    pub sources: Vec<SourceCitation>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RubricKeyPoint {
    pub point: String,
    pub weight: f64,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Rubric {
    pub key_points: Vec<RubricKeyPoint>,
    pub threshold: f64,
}

/// Per-type payload. Serialized with the `type` discriminator next to the
/// shared question fields.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionBody {
    Mcq {
        options: Vec<String>,
        correct_option: usize,
    },
    TrueFalse {
        options: Vec<String>,
        correct_option: usize,
    },
    FillInBlank {
        blanks: u32,
        correct_answer: String,
    },
    ShortAnswer {
        rubric: Rubric,
    },
}

impl QuestionBody {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionBody::Mcq { .. } => QuestionType::Mcq,
            QuestionBody::TrueFalse { .. } => QuestionType::TrueFalse,
            QuestionBody::FillInBlank { .. } => QuestionType::FillInBlank,
            QuestionBody::ShortAnswer { .. } => QuestionType::ShortAnswer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Question {
    pub stem: String,
    #[serde(flatten)]
    pub body: QuestionBody,
    pub metadata: QuestionMetadata,
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        self.body.question_type()
    }
}

/// Top-level object every provider is asked to return.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct GeneratedQuiz {
    pub questions: Vec<Question>,
}
