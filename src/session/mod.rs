//! Session lifecycle and retrieval.

pub mod manager;

pub use manager::{
    HistorySource, Session, SessionManager, SessionMetadata, generate_session_id,
    sanitize_session_id,
};
