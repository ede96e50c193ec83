//! Renders the provider-agnostic prompt pair from fixed templates.
//!
//! Everything here is a pure function of its inputs; the same request, blocks
//! and language always yield byte-identical prompts.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    constants::prompts::{QUIZ_REPAIR_PROMPT, QUIZ_SYSTEM_PROMPT, QUIZ_USER_PROMPT},
    models::domain::{question::GeneratedQuiz, ContextBlock, GenerationRequest},
    services::language_detector::language_name,
};

static OUTPUT_SCHEMA: Lazy<String> = Lazy::new(|| {
    let schema = schemars::schema_for!(GeneratedQuiz);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
});

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

impl PromptPair {
    /// Hex SHA-256 over `system + "\n" + user`.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.system.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.user.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// JSON schema of the object every provider must return.
pub fn output_schema() -> &'static str {
    OUTPUT_SCHEMA.as_str()
}

pub fn compose(request: &GenerationRequest, blocks: &[ContextBlock], language_code: &str) -> PromptPair {
    let system = fill_template(
        QUIZ_SYSTEM_PROMPT,
        &[
            ("language_name", language_name(language_code)),
            ("language_code", language_code),
            ("output_schema", output_schema()),
        ],
    );

    let total_count = request.total_count.to_string();
    let type_targets = render_type_targets(request);
    let allowed_types = render_allowed_types(request);
    let difficulty_mix = render_difficulty_mix(request);
    let context_blocks = render_blocks(blocks);
    let user = fill_template(
        QUIZ_USER_PROMPT,
        &[
            ("subject_name", request.subject_name.trim()),
            ("total_count", total_count.as_str()),
            ("type_targets", type_targets.as_str()),
            ("allowed_types", allowed_types.as_str()),
            ("difficulty_mix", difficulty_mix.as_str()),
            ("context_blocks", context_blocks.as_str()),
        ],
    );

    PromptPair { system, user }
}

/// Same system prompt; the user prompt carries the original request, the
/// rejected output and what was wrong with it.
pub fn compose_repair(original: &PromptPair, raw_response: &str, problems: &[String]) -> PromptPair {
    let violations = problems
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n");
    let raw = if raw_response.trim().is_empty() {
        "(empty response)"
    } else {
        raw_response
    };

    PromptPair {
        system: original.system.clone(),
        user: fill_template(
            QUIZ_REPAIR_PROMPT,
            &[
                ("original_prompt", original.user.as_str()),
                ("violations", violations.as_str()),
                ("raw_response", raw),
            ],
        ),
    }
}

fn render_type_targets(request: &GenerationRequest) -> String {
    request
        .type_targets()
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(question_type, count)| format!("- {}: {}", question_type, count))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_allowed_types(request: &GenerationRequest) -> String {
    request
        .allowed_types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_difficulty_mix(request: &GenerationRequest) -> String {
    request
        .difficulty_mix
        .iter()
        .map(|(difficulty, share)| format!("- {}: {:.0}%", difficulty, share * 100.0))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_blocks(blocks: &[ContextBlock]) -> String {
    blocks
        .iter()
        .map(|block| format!("[{}] (document {})\n{}", block.id, block.document_id, block.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Replaces `{key}` placeholders in one left-to-right pass, so substituted
/// values are never rescanned. Unknown braces are copied through.
pub fn fill_template(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let matched = pairs.iter().find(|(key, _)| {
            tail.len() > key.len() + 1
                && tail[1..].starts_with(key)
                && tail[1 + key.len()..].starts_with('}')
        });
        match matched {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::question::QuestionType;
    use crate::test_utils::fixtures::{mcq_request, sample_blocks};

    #[test]
    fn test_fill_template_replaces_known_keys_once() {
        let out = fill_template(
            "Hello {name}, {unknown} {name}!",
            &[("name", "{name}")],
        );
        assert_eq!(out, "Hello {name}, {unknown} {name}!");

        let out = fill_template("{a}{b}", &[("a", "1"), ("b", "2")]);
        assert_eq!(out, "12");
    }

    #[test]
    fn test_compose_embeds_blocks_language_and_targets() {
        let request = mcq_request(5, 10);
        let blocks = sample_blocks();

        let prompts = compose(&request, &blocks, "es");

        assert!(prompts.system.contains("Spanish"));
        assert!(prompts.system.contains("\"es\""));
        assert!(prompts.system.contains("\"questions\""));
        assert!(prompts.user.contains("Total questions: 5"));
        assert!(prompts.user.contains("- MCQ: 5"));
        assert!(prompts.user.contains("Allowed types: MCQ."));
        assert!(prompts.user.contains("- medium: 50%"));
        for block in &blocks {
            assert!(prompts.user.contains(&format!("[{}]", block.id)));
            assert!(prompts.user.contains(&block.text));
        }
        assert!(!prompts.user.contains("{context_blocks}"));
    }

    #[test]
    fn test_compose_is_deterministic_and_hash_is_stable() {
        let request = mcq_request(5, 10);
        let blocks = sample_blocks();

        let first = compose(&request, &blocks, "en");
        let second = compose(&request, &blocks, "en");
        assert_eq!(first, second);
        assert_eq!(first.hash(), second.hash());
        assert_eq!(first.hash().len(), 64);

        let other = compose(&request, &blocks, "fr");
        assert_ne!(first.hash(), other.hash());
    }

    #[test]
    fn test_compose_lists_only_types_with_targets() {
        let mut request = mcq_request(2, 10);
        request.allowed_types = [QuestionType::Mcq, QuestionType::TrueFalse, QuestionType::ShortAnswer]
            .into_iter()
            .collect();
        request.counts_by_type.clear();

        let prompts = compose(&request, &sample_blocks(), "en");
        assert!(prompts.user.contains("- MCQ: 1"));
        assert!(prompts.user.contains("- TRUE_FALSE: 1"));
        assert!(!prompts.user.contains("- SHORT_ANSWER:"));
        assert!(prompts.user.contains("MCQ, TRUE_FALSE, SHORT_ANSWER"));
    }

    #[test]
    fn test_repair_prompt_keeps_original_and_lists_problems() {
        let original = compose(&mcq_request(5, 10), &sample_blocks(), "en");
        let repair = compose_repair(
            &original,
            "{\"questions\": []}",
            &["[citation] question 0: quote not found".to_string()],
        );

        assert_eq!(repair.system, original.system);
        assert!(repair.user.starts_with(&original.user));
        assert!(repair.user.contains("- [citation] question 0: quote not found"));
        assert!(repair.user.contains("{\"questions\": []}"));
    }

    #[test]
    fn test_output_schema_is_valid_json() {
        let schema: serde_json::Value =
            serde_json::from_str(output_schema()).expect("schema should parse");
        assert!(schema.is_object());
    }
}
