//! Library root for the `dao_insure` crate
//!
//! Session gate, analytics event log and governance helpers behind the
//! DAO Insure front end.

// Error handling
pub mod errors;

// Configuration & CLI
pub mod cli;
pub mod config;

// Session gate
pub mod session;
pub mod session_guard;

// Analytics
pub mod event_log;
pub mod storage;

// Governance
pub mod governance;

// Web server interface
pub mod app_state;
pub mod web;

pub use errors::{InsureError, InsureResult};
pub use event_log::{EventCategory, EventKind, EventLogger, EventRecord};
pub use session::SessionRecord;
pub use session_guard::{evaluate, GuardDecision, GuardPolicy, RedirectDescriptor};
