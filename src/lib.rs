//! # Project Sync Library
//!
//! Sync job orchestration for projects linked to an issue tracker and a
//! resourcing system: triggers with per-project deduplication, background
//! execution, stuck-job reconciliation, status aggregation, and a client-side
//! poller for observers.

pub mod auth;
pub mod availability;
pub mod config;
pub mod connectors;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poller;
pub mod reconciler;
pub mod repositories;
pub mod server;
pub mod status;
pub mod telemetry;
pub mod worker;
pub use migration;
