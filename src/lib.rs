//! Credential lifecycle and session state machine for an Antigravity quota monitor.

pub mod api;
pub mod app;
pub mod auth;
pub mod clock;
pub mod credential_store;
pub mod dashboard;
pub mod http;
pub mod monitor_paths;
pub mod quota_view;
pub mod scheduler;
pub mod session;
pub mod structured_logger;
