pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod http;
pub mod limits;
pub mod messages;
pub mod model;
pub mod notify;
pub mod observability;
pub mod recurrence;
pub mod wal;
