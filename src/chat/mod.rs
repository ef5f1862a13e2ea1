pub mod crisis;
pub mod engine;
pub mod log;
pub mod provider;

pub use crisis::{contains_crisis_keywords, SAFETY_MESSAGE};
pub use engine::ChatEngine;
pub use log::ChatLogger;
pub use provider::{CompletionProvider, GeminiProvider, ProviderError, Turn};
