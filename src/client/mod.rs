//! Client-side session handling for services and tools that call the auth
//! API: a reactive state container plus a proactive renewal scheduler.
//!
//! The store keeps the session snapshot, arms a single cancellable timer
//! that rotates the credential pair ahead of expiry, and falls back silently
//! to the caller's reactive (on-401) renewal path when proactive renewal
//! cannot complete.

mod api;
mod scheduler;
mod store;
mod token;

pub use api::{HttpSessionTransport, SessionTransport, TransportError};
pub use scheduler::ClientSessionConfig;
pub use store::ClientSessionStore;
