pub mod context_block;
pub mod generation;
pub mod question;
pub mod violation;
pub use context_block::{ContextBlock, DocumentChunk};
pub use generation::{GenerationRequest, GenerationResult, GenerationTrace};
pub use question::{Question, QuestionBody, QuestionType};
pub use violation::{Violation, ViolationKind};
