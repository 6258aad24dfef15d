//! Batch quick-apply automation for login-gated job platforms.
//!
//! The library surface wires configuration into the engine crates; the
//! `autoapply` binary is the shipped caller.

pub mod app;
pub mod config;

pub use app::{load_ledger, refresh_login, run_application_batch};
pub use config::AppConfig;
