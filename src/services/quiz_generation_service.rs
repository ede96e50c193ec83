use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use validator::Validate;

use crate::{
    config::Config,
    errors::{AppError, AppResult, GenerationFailure},
    models::domain::{
        generation::{AttemptOutcome, AttemptPhase, AttemptRecord},
        ContextBlock, GenerationRequest, GenerationResult, GenerationTrace,
    },
    repositories::ChunkRepository,
    services::{
        context_builder::{ContextBuilder, ContextLimits},
        language_detector::LanguageDetector,
        prompt_composer::{self, PromptPair},
        providers::{build_provider, ProviderError, ProviderResponse, QuizModelProvider},
        repair_coordinator::{AttemptFailure, RepairCoordinator, RepairDecision},
        validation::OutputValidator,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenerationSettings {
    /// Hard ceiling on a single provider call.
    pub provider_timeout: Duration,
    /// Curated characters needed per requested question.
    pub chars_per_question: usize,
    pub count_tolerance: u32,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider_timeout: config.provider_timeout(),
            chars_per_question: config.chars_per_question.max(1),
            count_tolerance: config.count_tolerance,
        }
    }
}

/// Runs one request through context curation, language detection, prompt
/// composition, the provider call, validation and at most one repair.
///
/// Holds no per-request state, so one instance serves concurrent requests.
pub struct QuizGenerationService {
    context_builder: ContextBuilder,
    language_detector: LanguageDetector,
    provider: Arc<dyn QuizModelProvider>,
    settings: GenerationSettings,
}

impl QuizGenerationService {
    pub fn new(
        repository: Arc<dyn ChunkRepository>,
        provider: Arc<dyn QuizModelProvider>,
        config: &Config,
    ) -> Self {
        Self {
            context_builder: ContextBuilder::new(repository, ContextLimits::from_config(config)),
            language_detector: LanguageDetector::from_config(config),
            provider,
            settings: GenerationSettings::from_config(config),
        }
    }

    /// Builds the provider named by the configuration. Missing credentials
    /// fail here, before any request is served.
    pub fn from_config(config: &Config, repository: Arc<dyn ChunkRepository>) -> AppResult<Self> {
        let provider = build_provider(config)?;
        Ok(Self::new(repository, provider, config))
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationFailure> {
        request.validate().map_err(AppError::from)?;
        if request.total_count > request.budget_cap {
            return Err(AppError::BudgetExceeded {
                requested: request.total_count,
                supported: request.budget_cap,
            }
            .into());
        }

        let blocks = self.context_builder.build(&request.unique_doc_ids()).await?;

        let supported = supported_questions(&blocks, self.settings.chars_per_question)
            .min(request.budget_cap);
        if request.total_count > supported {
            log::warn!(
                "Rejecting request for {} questions; curated context supports {}",
                request.total_count,
                supported
            );
            return Err(AppError::BudgetExceeded {
                requested: request.total_count,
                supported,
            }
            .into());
        }

        let detection = self.language_detector.detect_blocks(&blocks);
        let language = detection.code.clone();
        let prompts = prompt_composer::compose(request, &blocks, &language);

        let mut trace = GenerationTrace::new(
            self.provider.name(),
            &self.provider.model(),
            &prompts.hash(),
        );
        trace.language_votes = detection.votes;

        log::info!(
            "Generation run {} started: provider={} model={} blocks={} language={}{} prompt_hash={}",
            trace.run_id,
            trace.provider,
            trace.model,
            blocks.len(),
            language,
            if detection.fell_back { " (default)" } else { "" },
            trace.prompt_hash
        );

        self.run_attempts(request, blocks, language, prompts, trace)
            .await
    }

    /// Same as [`generate`](Self::generate), abandoned as soon as `cancel`
    /// resolves. The in-flight provider call is dropped with it.
    pub async fn generate_until<F>(
        &self,
        request: &GenerationRequest,
        cancel: F,
    ) -> Result<GenerationResult, GenerationFailure>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.generate(request) => result,
            _ = cancel => {
                log::warn!("Generation for '{}' cancelled by caller", request.subject_name);
                Err(AppError::Cancelled.into())
            }
        }
    }

    async fn run_attempts(
        &self,
        request: &GenerationRequest,
        blocks: Vec<ContextBlock>,
        language: String,
        prompts: PromptPair,
        mut trace: GenerationTrace,
    ) -> Result<GenerationResult, GenerationFailure> {
        let validator =
            OutputValidator::new(request, &blocks, &language, self.settings.count_tolerance);
        let mut coordinator = RepairCoordinator::new();
        let mut current = prompts.clone();

        loop {
            let phase = coordinator.state().phase();
            let prompt_hash = current.hash();
            let started = Instant::now();
            let outcome = self.call_provider(&current).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(ProviderResponse { content, raw }) => match validator.validate(&content) {
                    Ok(questions) => {
                        trace.raw_response = Some(raw);
                        trace.attempts.push(attempt(
                            phase,
                            &prompt_hash,
                            AttemptOutcome::Accepted,
                            latency_ms,
                            0,
                        ));
                        log::info!(
                            "Generation run {} accepted {} questions after {} provider call(s)",
                            trace.run_id,
                            questions.len(),
                            trace.provider_calls()
                        );
                        return Ok(GenerationResult {
                            questions,
                            blocks,
                            language_code: language,
                            trace,
                        });
                    }
                    Err(violations) => {
                        trace.raw_response = Some(raw.clone());
                        trace.attempts.push(attempt(
                            phase,
                            &prompt_hash,
                            AttemptOutcome::Invalid,
                            latency_ms,
                            violations.len(),
                        ));
                        AttemptFailure::Invalid { raw, violations }
                    }
                },
                Err(ProviderError::Fatal(reason)) => {
                    trace.attempts.push(attempt(
                        phase,
                        &prompt_hash,
                        AttemptOutcome::FatalFailure,
                        latency_ms,
                        0,
                    ));
                    log::error!(
                        "Generation run {} hit a fatal provider error: {}",
                        trace.run_id,
                        reason
                    );
                    return Err(GenerationFailure::with_trace(
                        AppError::ProviderFatal(reason),
                        trace,
                    ));
                }
                Err(ProviderError::Transient { reason, raw }) => {
                    if raw.is_some() {
                        trace.raw_response = raw.clone();
                    }
                    trace.attempts.push(attempt(
                        phase,
                        &prompt_hash,
                        AttemptOutcome::TransientFailure,
                        latency_ms,
                        0,
                    ));
                    AttemptFailure::Transient { reason, raw }
                }
            };

            match coordinator.next(&prompts, &failure) {
                RepairDecision::Repair(repair) => {
                    log::warn!(
                        "Generation run {} {} attempt failed ({} violation(s)); repairing once",
                        trace.run_id,
                        phase,
                        failure.violation_count()
                    );
                    current = repair;
                }
                RepairDecision::GiveUp => {
                    let error = failure.into_error();
                    log::error!(
                        "Generation run {} failed after repair: {}",
                        trace.run_id,
                        error
                    );
                    return Err(GenerationFailure::with_trace(error, trace));
                }
            }
        }
    }

    async fn call_provider(&self, prompts: &PromptPair) -> Result<ProviderResponse, ProviderError> {
        log::debug!(
            "Calling provider {} (system {} chars, user {} chars)",
            self.provider.name(),
            prompts.system.len(),
            prompts.user.len()
        );

        match tokio::time::timeout(
            self.settings.provider_timeout,
            self.provider.generate(&prompts.system, &prompts.user),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::transient(format!(
                "provider call timed out after {} ms",
                self.settings.provider_timeout.as_millis()
            ))),
        }
    }
}

fn attempt(
    phase: AttemptPhase,
    prompt_hash: &str,
    outcome: AttemptOutcome,
    latency_ms: u64,
    violation_count: usize,
) -> AttemptRecord {
    AttemptRecord {
        phase,
        prompt_hash: prompt_hash.to_string(),
        outcome,
        latency_ms,
        violation_count,
    }
}

/// How many questions the curated context can plausibly back: one per
/// `chars_per_question` curated characters.
pub fn supported_questions(blocks: &[ContextBlock], chars_per_question: usize) -> u32 {
    let total: usize = blocks.iter().map(|b| b.char_len).sum();
    u32::try_from(total / chars_per_question.max(1)).unwrap_or(u32::MAX)
}
