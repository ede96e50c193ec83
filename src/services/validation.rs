//! Checks a provider's JSON output before anything downstream touches it.
//!
//! The structural pass turns loosely typed JSON into [`Question`]s field by
//! field; the citation and language passes then run over the typed questions.
//! Every problem is collected so one repair round can address all of them.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::{
    models::domain::{
        question::{QuestionMetadata, Rubric, RubricKeyPoint, SourceCitation},
        ContextBlock, GenerationRequest, Question, QuestionBody, QuestionType, Violation,
    },
    services::language_detector::languages_match,
};

const RUBRIC_WEIGHT_TOLERANCE: f64 = 0.05;
/// Shorter quotes match almost any block and prove nothing.
const MIN_QUOTE_CHARS: usize = 8;
const TRUE_FALSE_OPTIONS: [&str; 2] = ["True", "False"];

pub struct OutputValidator<'a> {
    request: &'a GenerationRequest,
    blocks: &'a [ContextBlock],
    language: &'a str,
    count_tolerance: u32,
}

impl<'a> OutputValidator<'a> {
    pub fn new(
        request: &'a GenerationRequest,
        blocks: &'a [ContextBlock],
        language: &'a str,
        count_tolerance: u32,
    ) -> Self {
        Self {
            request,
            blocks,
            language,
            count_tolerance,
        }
    }

    /// Runs every pass. Returns the typed batch only when nothing was flagged.
    pub fn validate(&self, content: &Value) -> Result<Vec<Question>, Vec<Violation>> {
        let (questions, mut violations) = self.check_structure(content);
        violations.extend(check_citations(&questions, self.blocks));
        violations.extend(check_language(&questions, self.language));

        if violations.is_empty() {
            Ok(questions.into_iter().map(|(_, q)| q).collect())
        } else {
            Err(violations)
        }
    }

    /// Parses each question and checks batch-level counts. Questions that
    /// parsed are returned with their original index.
    pub fn check_structure(&self, content: &Value) -> (Vec<(usize, Question)>, Vec<Violation>) {
        let mut violations = Vec::new();

        let items = match question_items(content) {
            Some(items) => items,
            None => {
                violations.push(Violation::structural(
                    None,
                    "expected an object with a \"questions\" array",
                ));
                return (Vec::new(), violations);
            }
        };

        if items.is_empty() {
            violations.push(Violation::structural(None, "no questions were returned"));
            return (Vec::new(), violations);
        }

        let mut questions = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match parse_question(index, item) {
                Ok(question) => {
                    if !self.request.allowed_types.contains(&question.question_type()) {
                        violations.push(Violation::structural(
                            Some(index),
                            format!("type {} is not allowed", question.question_type()),
                        ));
                        continue;
                    }
                    questions.push((index, question));
                }
                Err(mut problems) => violations.append(&mut problems),
            }
        }

        violations.extend(self.check_counts(items.len(), &questions));
        (questions, violations)
    }

    fn check_counts(&self, emitted: usize, questions: &[(usize, Question)]) -> Vec<Violation> {
        let mut violations = Vec::new();
        let tolerance = self.count_tolerance as usize;

        let mut per_type: BTreeMap<QuestionType, usize> = BTreeMap::new();
        for (_, question) in questions {
            *per_type.entry(question.question_type()).or_insert(0) += 1;
        }
        for (question_type, target) in self.request.type_targets() {
            let target = target as usize;
            let count = per_type.get(&question_type).copied().unwrap_or(0);
            if count > target + tolerance {
                violations.push(Violation::structural(
                    None,
                    format!(
                        "{} {} questions returned, at most {} allowed",
                        count,
                        question_type,
                        target + tolerance
                    ),
                ));
            } else if count + tolerance < target {
                violations.push(Violation::structural(
                    None,
                    format!(
                        "{} usable {} questions returned, at least {} required",
                        count,
                        question_type,
                        target - tolerance
                    ),
                ));
            }
        }

        let total = self.request.total_count as usize;
        let ceiling = (total + tolerance).min(self.request.budget_cap as usize);
        if emitted > ceiling {
            violations.push(Violation::structural(
                None,
                format!("{} questions returned, at most {} allowed", emitted, ceiling),
            ));
        } else if emitted + tolerance < total {
            violations.push(Violation::structural(
                None,
                format!(
                    "{} questions returned, at least {} required",
                    emitted,
                    total - tolerance
                ),
            ));
        }
        violations
    }
}

/// Every citation must name a curated block and quote it verbatim.
pub fn check_citations(questions: &[(usize, Question)], blocks: &[ContextBlock]) -> Vec<Violation> {
    let by_id: HashMap<&str, &ContextBlock> = blocks.iter().map(|b| (b.id.as_str(), b)).collect();
    let mut violations = Vec::new();

    for (index, question) in questions {
        for source in &question.metadata.sources {
            match by_id.get(source.context_id.as_str()) {
                None => violations.push(Violation::citation(
                    *index,
                    format!("context_id {} does not exist", source.context_id),
                )),
                Some(block) if !block.text.contains(source.quote.as_str()) => {
                    violations.push(Violation::citation(
                        *index,
                        format!(
                            "quote \"{}\" is not a literal substring of {}",
                            source.quote, source.context_id
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
    }
    violations
}

pub fn check_language(questions: &[(usize, Question)], language: &str) -> Vec<Violation> {
    questions
        .iter()
        .filter(|(_, q)| !languages_match(language, &q.metadata.language))
        .map(|(index, q)| {
            Violation::language(
                *index,
                format!(
                    "metadata.language is \"{}\", expected \"{}\"",
                    q.metadata.language, language
                ),
            )
        })
        .collect()
}

fn question_items(content: &Value) -> Option<&Vec<Value>> {
    match content {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("questions").and_then(Value::as_array),
        _ => None,
    }
}

fn parse_question(index: usize, item: &Value) -> Result<Question, Vec<Violation>> {
    let Some(object) = item.as_object() else {
        return Err(vec![Violation::structural(Some(index), "question is not an object")]);
    };

    let mut fields = FieldReader::new(index, object);
    let stem = fields.text("stem");
    let question_type = fields.text("type").and_then(|raw| {
        let parsed = QuestionType::parse(&raw);
        if parsed.is_none() {
            fields.flag(format!("unknown question type \"{}\"", raw));
        }
        parsed
    });
    let metadata = fields.object("metadata").and_then(|m| parse_metadata(&mut fields, m));
    let body = question_type.and_then(|t| parse_body(&mut fields, t));

    match (stem, body, metadata) {
        (Some(stem), Some(body), Some(metadata)) if fields.violations.is_empty() => Ok(Question {
            stem,
            body,
            metadata,
        }),
        _ => Err(fields.violations),
    }
}

fn parse_metadata(fields: &mut FieldReader, metadata: &Map<String, Value>) -> Option<QuestionMetadata> {
    let language = match metadata.get("language").and_then(Value::as_str) {
        Some(lang) if !lang.trim().is_empty() => Some(lang.trim().to_string()),
        _ => {
            fields.flag("metadata.language must be a non-empty string");
            None
        }
    };

    let sources = match metadata.get("sources").and_then(Value::as_array) {
        Some(sources) if !sources.is_empty() => {
            let mut parsed = Vec::with_capacity(sources.len());
            for (i, source) in sources.iter().enumerate() {
                let context_id = source.get("context_id").and_then(Value::as_str);
                let quote = source.get("quote").and_then(Value::as_str);
                match (context_id, quote) {
                    (Some(context_id), Some(quote))
                        if quote.trim().chars().count() >= MIN_QUOTE_CHARS =>
                    {
                        parsed.push(SourceCitation {
                            context_id: context_id.trim().to_string(),
                            quote: quote.to_string(),
                        })
                    }
                    _ => fields.flag(format!(
                        "metadata.sources[{}] needs a context_id and a quote of at least {} characters",
                        i, MIN_QUOTE_CHARS
                    )),
                }
            }
            Some(parsed)
        }
        _ => {
            fields.flag("metadata.sources must cite at least one context block");
            None
        }
    };

    Some(QuestionMetadata {
        language: language?,
        sources: sources?,
    })
}

fn parse_body(fields: &mut FieldReader, question_type: QuestionType) -> Option<QuestionBody> {
    match question_type {
        QuestionType::Mcq => {
            let (options, correct_option) = parse_choice(fields, 2)?;
            Some(QuestionBody::Mcq {
                options,
                correct_option,
            })
        }
        QuestionType::TrueFalse => {
            let (options, correct_option) = parse_choice(fields, 2)?;
            if options != TRUE_FALSE_OPTIONS {
                fields.flag(format!(
                    "TRUE_FALSE options must be exactly [\"True\", \"False\"], got {:?}",
                    options
                ));
                return None;
            }
            Some(QuestionBody::TrueFalse {
                options,
                correct_option,
            })
        }
        QuestionType::FillInBlank => {
            let blanks = fields.unsigned("blanks");
            let correct_answer = fields.text("correct_answer");
            let blanks = match blanks {
                Some(0) => {
                    fields.flag("blanks must be at least 1");
                    return None;
                }
                Some(n) => match u32::try_from(n) {
                    Ok(n) => n,
                    Err(_) => {
                        fields.flag(format!("blanks value {} is too large", n));
                        return None;
                    }
                },
                None => return None,
            };
            Some(QuestionBody::FillInBlank {
                blanks,
                correct_answer: correct_answer?,
            })
        }
        QuestionType::ShortAnswer => {
            let rubric = fields.object("rubric")?;
            parse_rubric(fields, rubric).map(|rubric| QuestionBody::ShortAnswer { rubric })
        }
    }
}

fn parse_choice(fields: &mut FieldReader, min_options: usize) -> Option<(Vec<String>, usize)> {
    let options: Option<Vec<String>> = match fields.array("options") {
        Some(values) => {
            let texts: Vec<String> = values
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if texts.len() != values.len() {
                fields.flag("every option must be a non-empty string");
                None
            } else if texts.len() < min_options {
                fields.flag(format!(
                    "at least {} options are required, got {}",
                    min_options,
                    texts.len()
                ));
                None
            } else {
                Some(texts)
            }
        }
        None => None,
    };
    let correct_option = fields.unsigned("correct_option");

    let options = options?;
    let correct_option = match usize::try_from(correct_option?) {
        Ok(index) => index,
        Err(_) => {
            fields.flag("correct_option does not fit in a platform index");
            return None;
        }
    };
    if correct_option >= options.len() {
        fields.flag(format!(
            "correct_option {} is out of range for {} options",
            correct_option,
            options.len()
        ));
        return None;
    }
    Some((options, correct_option))
}

fn parse_rubric(fields: &mut FieldReader, rubric: &Map<String, Value>) -> Option<Rubric> {
    let threshold = match rubric.get("threshold").and_then(Value::as_f64) {
        Some(t) if (0.0..=1.0).contains(&t) => Some(t),
        _ => {
            fields.flag("rubric.threshold must be a number between 0 and 1");
            None
        }
    };

    let points = match rubric.get("key_points").and_then(Value::as_array) {
        Some(points) if !points.is_empty() => points,
        _ => {
            fields.flag("rubric.key_points must be a non-empty array");
            return None;
        }
    };

    let mut key_points = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        let text = point.get("point").and_then(Value::as_str).map(str::trim);
        let weight = point.get("weight").and_then(Value::as_f64);
        let aliases: Vec<String> = point
            .get("aliases")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        match (text, weight) {
            (Some(text), Some(weight)) if !text.is_empty() && (0.0..=1.0).contains(&weight) => {
                key_points.push(RubricKeyPoint {
                    point: text.to_string(),
                    weight,
                    aliases,
                })
            }
            _ => fields.flag(format!(
                "rubric.key_points[{}] needs a point and a weight between 0 and 1",
                i
            )),
        }
    }
    if key_points.len() != points.len() {
        return None;
    }

    let total: f64 = key_points.iter().map(|p| p.weight).sum();
    if (total - 1.0).abs() > RUBRIC_WEIGHT_TOLERANCE {
        fields.flag(format!("rubric weights sum to {:.2}, expected 1.0", total));
        return None;
    }

    Some(Rubric {
        key_points,
        threshold: threshold?,
    })
}

/// Reads typed fields off one question object, recording a violation for
/// every field that is missing or of the wrong kind.
struct FieldReader<'v> {
    index: usize,
    object: &'v Map<String, Value>,
    violations: Vec<Violation>,
}

impl<'v> FieldReader<'v> {
    fn new(index: usize, object: &'v Map<String, Value>) -> Self {
        Self {
            index,
            object,
            violations: Vec::new(),
        }
    }

    fn flag(&mut self, reason: impl Into<String>) {
        self.violations.push(Violation::structural(Some(self.index), reason));
    }

    fn text(&mut self, field: &str) -> Option<String> {
        match self.object.get(field).and_then(Value::as_str) {
            Some(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            _ => {
                self.flag(format!("{} must be a non-empty string", field));
                None
            }
        }
    }

    fn unsigned(&mut self, field: &str) -> Option<u64> {
        let value = self.object.get(field).and_then(Value::as_u64);
        if value.is_none() {
            self.flag(format!("{} must be a non-negative integer", field));
        }
        value
    }

    fn array(&mut self, field: &str) -> Option<&'v Vec<Value>> {
        let value = self.object.get(field).and_then(Value::as_array);
        if value.is_none() {
            self.flag(format!("{} must be an array", field));
        }
        value
    }

    fn object(&mut self, field: &str) -> Option<&'v Map<String, Value>> {
        let value = self.object.get(field).and_then(Value::as_object);
        if value.is_none() {
            self.flag(format!("{} must be an object", field));
        }
        value
    }
}
