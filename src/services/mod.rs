pub mod context_builder;
pub mod language_detector;
pub mod prompt_composer;
pub mod providers;
pub mod quiz_generation_service;
pub mod repair_coordinator;
pub mod validation;

pub use quiz_generation_service::QuizGenerationService;
