//! Conversation memory
//!
//! Session lifecycle, windowed message history, and per-session turn locks.

pub mod history;
pub mod locks;
pub mod session;

pub use history::HistoryStore;
pub use locks::{SessionGuard, SessionLocks};
pub use session::SessionManager;
