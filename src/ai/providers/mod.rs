//! Concrete LLM provider implementations.

pub mod openai_compatible;
pub mod reliable;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use reliable::ReliableProvider;
