//! Core library for LexCompare, a side-by-side legal Q&A comparison tool.
//!
//! A prompt is answered against a managed knowledge base by several language
//! models at once, and the answers are priced, stored and audited:
//! - [`agents`] holds the model registry, the provider dispatcher and pricing.
//! - [`retrieval`] queries the knowledge base for supporting passages.
//! - [`comparison`] runs one prompt through retrieval, fan-out and audit.
//! - [`audit`] appends one spreadsheet row per comparison.
//! - [`history`] and [`analytics`] keep conversations and ratings in SQLite.
//! - [`session`] is the login gate with its inactivity timeout.
//! - [`api`] serves the HTML pages and the JSON endpoints.
//! - [`config`], [`db`], [`errors`] and [`logging`] are the shared plumbing.

pub mod agents;
pub mod analytics;
pub mod api;
pub mod audit;
pub mod comparison;
pub mod config;
pub mod db;
pub mod errors;
pub mod history;
pub mod logging;
pub mod retrieval;
pub mod session;
