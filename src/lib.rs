//! Crawl Coordinator — a pull-based distributed web-crawl job coordinator.
//!
//! Operators define crawl policies for groups of URLs within internet
//! domains; a fleet of autonomous bot processes periodically pulls work,
//! executes scrapes out-of-process, and submits structured price
//! observations back. This crate owns policy-driven job materialization, a
//! per-job lease-based state machine, retry/backoff accounting, and an
//! asynchronous auto-record pipeline into an external price-history log.

pub mod auto_record;
pub mod config;
pub mod config_provider;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod http;
pub mod ports;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{CoreError, CoreResult};
