//! Core library for the schedule exporter.
//!
//! Logs in to an academic portal on a user's behalf, fetches class schedules,
//! caches them per (user, term) and converts them into calendar or JSON
//! artifacts.
//!
//! - [`api`]: the `AcademicClient` capability and a reference HTTP client
//! - [`auth`]: credentials, sessions, the per-user `SessionPool` and the
//!   `CredentialVault` that seals credentials into client tokens
//! - [`cache`]: the single-flight `ScheduleCache` and its storage backends
//! - [`export`]: pure conversion of snapshots into artifacts
//! - [`coordinator`]: end-to-end export requests

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod models;
pub mod retry;

pub use error::{Result, ScheduleError};
