//! Layered system-prompt composition.
//!
//! # Architecture
//! ```text
//! PromptManager
//!   ├── PromptProvider { priority, enabled, source }
//!   │     ├── Static  — fixed content + variables
//!   │     ├── Dynamic — named generator + config + optional template
//!   │     └── File    — on-disk content, optional reload on change
//!   └── generator registry: timestamp, session-context, memory-context,
//!       environment, conditional (+ custom registrations)
//! ```
//!
//! `generate()` resolves enabled providers in descending priority under a
//! total deadline and joins their outputs with the configured separator.

pub mod generators;
pub mod manager;

use std::collections::HashMap;

pub use generators::PromptGenerator;
pub use manager::{
    GeneratedPrompt, PromptManager, PromptProvider, PromptSource, ProviderResult,
};

/// Per-turn inputs available to prompt providers and generators.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub session_id: Option<String>,
    pub user_input: Option<String>,
    /// Pre-rendered memory recall block, if the caller fetched one.
    pub memory_context: Option<String>,
    /// Ad-hoc variables available to templates and the conditional generator.
    pub vars: HashMap<String, String>,
}

impl PromptContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}
