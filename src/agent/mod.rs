//! The reasoning loop and per-session orchestration.

pub mod inline_calls;
pub mod loop_;
pub mod session;

pub use inline_calls::inline_tool_calls;
pub use loop_::{AgentLoop, LoopResult};
pub use session::{ConversationSession, RunOptions};
