use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::models::domain::{
    question::Difficulty, ContextBlock, DocumentChunk, GenerationRequest, QuestionType,
};
use crate::services::context_builder::{curate_blocks, ContextLimits};

const PHOTOSYNTHESIS: [&str; 4] = [
    "Photosynthesis is the process by which green plants, algae and some bacteria convert light energy into chemical energy. \
     The overall reaction combines carbon dioxide and water to form glucose and release oxygen as a by-product. \
     It takes place mainly in the leaves, where the cells are packed with chloroplasts. \
     The pigment chlorophyll absorbs red and blue light most strongly and reflects green light, which is why leaves look green to us. \
     Without this process almost all life on Earth would lack a source of food and of atmospheric oxygen.",
    "The light-dependent reactions happen in the thylakoid membranes of the chloroplast. \
     When photons strike photosystem II, water molecules are split and oxygen is released into the air. \
     The energy captured from light is used to pump protons across the membrane, and the resulting gradient drives the enzyme ATP synthase. \
     The products of this stage are ATP and NADPH, which carry energy and electrons to the next stage of the process. \
     These reactions stop in darkness because they depend directly on a supply of light.",
    "The Calvin cycle takes place in the stroma, the fluid that surrounds the thylakoids. \
     The enzyme RuBisCO fixes carbon dioxide by attaching it to a five-carbon sugar called ribulose bisphosphate. \
     Using the ATP and NADPH made earlier, the cycle reduces the fixed carbon to a three-carbon sugar that the plant can turn into glucose, starch or cellulose. \
     Because the cycle does not use light directly it is sometimes called the light-independent stage, although it normally runs during the day.",
    "Several factors limit the rate of photosynthesis. \
     Light intensity, carbon dioxide concentration and temperature each set an upper bound, and the factor in shortest supply controls the overall rate. \
     Farmers growing crops in greenhouses often raise the level of carbon dioxide to increase yields. \
     At very high temperatures the enzymes involved begin to lose their shape and the rate falls sharply.",
];

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Five-question MCQ-only request over a single document.
    pub fn mcq_request(total_count: u32, budget_cap: u32) -> GenerationRequest {
        GenerationRequest {
            subject_name: "Biology".to_string(),
            doc_ids: vec!["doc-1".to_string()],
            total_count,
            allowed_types: BTreeSet::from([QuestionType::Mcq]),
            counts_by_type: BTreeMap::from([(QuestionType::Mcq, total_count)]),
            difficulty_mix: BTreeMap::from([
                (Difficulty::Easy, 0.3),
                (Difficulty::Medium, 0.5),
                (Difficulty::Hard, 0.2),
            ]),
            budget_cap,
        }
    }

    /// English chunks for `doc-1`, about 2,000 characters in total.
    pub fn sample_chunks() -> Vec<DocumentChunk> {
        PHOTOSYNTHESIS
            .iter()
            .enumerate()
            .map(|(i, text)| DocumentChunk::new("doc-1", i as u32, text))
            .collect()
    }

    pub fn sample_blocks() -> Vec<ContextBlock> {
        curate_blocks(sample_chunks(), &ContextLimits::default())
    }

    /// First `n` characters of the block text, always a literal substring.
    pub fn quote_from(block: &ContextBlock, n: usize) -> String {
        block.text.chars().take(n).collect()
    }

    pub fn mcq_json(stem: &str, context_id: &str, quote: &str, language: &str) -> Value {
        json!({
            "type": "MCQ",
            "stem": stem,
            "options": ["Chloroplast", "Nucleus", "Ribosome", "Vacuole"],
            "correct_option": 0,
            "metadata": {
                "language": language,
                "sources": [{ "context_id": context_id, "quote": quote }],
            },
        })
    }

    /// `count` valid MCQs, each citing a block in round-robin order.
    pub fn valid_quiz_json(blocks: &[ContextBlock], count: usize, language: &str) -> Value {
        let questions: Vec<Value> = (0..count)
            .map(|i| {
                let block = &blocks[i % blocks.len()];
                mcq_json(
                    &format!("Question {} about photosynthesis?", i + 1),
                    &block.id,
                    &quote_from(block, 40),
                    language,
                )
            })
            .collect();
        json!({ "questions": questions })
    }

    /// Same as [`valid_quiz_json`] but the first question quotes a paraphrase.
    pub fn paraphrased_quiz_json(blocks: &[ContextBlock], count: usize, language: &str) -> Value {
        let mut quiz = valid_quiz_json(blocks, count, language);
        quiz["questions"][0]["metadata"]["sources"][0]["quote"] =
            json!("Plants turn sunlight into chemical energy");
        quiz
    }
}

#[cfg(test)]
pub mod test_helpers {
    use crate::models::domain::{Violation, ViolationKind};

    /// Asserts that a violation of `kind` was reported for `question_index`.
    pub fn assert_has_violation(
        violations: &[Violation],
        kind: ViolationKind,
        question_index: Option<usize>,
    ) {
        assert!(
            violations
                .iter()
                .any(|v| v.kind == kind && v.question_index == question_index),
            "Expected {} violation at {:?}, got: {:?}",
            kind,
            question_index,
            violations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;

    #[test]
    fn test_sample_blocks_are_unclipped_and_sequential() {
        let blocks = sample_blocks();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].id, "c0001");
        assert_eq!(blocks[3].id, "c0004");
        assert!(blocks.iter().all(|b| b.char_len < 700));
    }

    #[test]
    fn test_valid_quiz_json_quotes_are_literal() {
        let blocks = sample_blocks();
        let quiz = valid_quiz_json(&blocks, 5, "en");
        let questions = quiz["questions"].as_array().unwrap();
        assert_eq!(questions.len(), 5);
        for (i, question) in questions.iter().enumerate() {
            let quote = question["metadata"]["sources"][0]["quote"].as_str().unwrap();
            assert!(blocks[i % blocks.len()].text.contains(quote));
        }
    }
}
