//! REST surface over the engine.
//!
//! Handlers authenticate the caller, translate camelCase JSON into engine
//! commands and render every failure as `{success: false, code, message}`
//! in the caller's language.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::create_router;
pub use state::AppState;
