//! The background memory pipeline.
//!
//! # Architecture
//! ```text
//! MemoryEngine (knowledge)
//!   ├── summary      — deterministic interaction summaries
//!   ├── significance — retrieved-result / filler / length gates
//!   ├── extract      — facts, code patterns, tags
//!   ├── decision     — LLM judge with similarity-rule fallback
//!   └── engine       — embed → search → decide → persist, bounded workers
//!
//! ReflectionEngine (reasoning traces)
//!   └── reflection   — detect → extract steps → evaluate → store
//! ```
//!
//! # Agent tools
//! - [`tools::MemorySearchTool`]            — `memory_search`
//! - [`tools::ExtractAndOperateMemoryTool`] — `extract_and_operate_memory`
//! - [`tools::ReasoningExtractTool`]        — `reasoning_extract`
//! - [`tools::ReasoningEvaluateTool`]       — `reasoning_evaluate`
//! - [`tools::ReasoningStoreTool`]          — `reasoning_store`

pub mod decision;
pub mod engine;
pub mod extract;
pub mod reflection;
pub mod significance;
pub mod summary;
pub mod tools;
pub mod types;

use std::sync::Arc;

use crate::error::CoreError;
use crate::tools::UnifiedToolManager;

pub use engine::{MemoryEngine, MemoryStats};
pub use reflection::{
    ReasoningEvaluation, ReasoningStep, ReasoningTrace, ReflectionEngine, StepKind,
    detect_reasoning_confidence, extract_reasoning_steps,
};
pub use summary::{interaction_summary, tool_usage};
pub use types::{
    InteractionRecord, KnowledgeFact, MemoryAction, MemoryEvent, MemoryMode, MemoryOutcome,
    ToolUsage,
};

/// Register the five internal memory/reasoning tools.
pub fn register_memory_tools(
    manager: &UnifiedToolManager,
    memory: Arc<MemoryEngine>,
    reflection: Arc<ReflectionEngine>,
) -> Result<(), CoreError> {
    manager.register_internal(Arc::new(tools::MemorySearchTool::new(memory.clone())))?;
    manager.register_internal(Arc::new(tools::ExtractAndOperateMemoryTool::new(memory)))?;
    manager.register_internal(Arc::new(tools::ReasoningExtractTool))?;
    manager.register_internal(Arc::new(tools::ReasoningEvaluateTool::new(
        reflection.clone(),
    )))?;
    manager.register_internal(Arc::new(tools::ReasoningStoreTool::new(reflection)))?;
    Ok(())
}
