//! # pushlens
//!
//! Ingests source-control push events, analyzes the diffs, and stores a
//! durable record of each commit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  verify  ┌──────────┐  enqueue  ┌───────────────────────────────┐
//! │ webhook  │────────▶│  parse   │─────────▶│ worker: fetch ▶ analyze ▶     │
//! │ (axum)   │  202     │ payload  │           │         encode ▶ insert       │
//! └──────────┘          └──────────┘           └──────────────┬────────────────┘
//!                                                              │
//!                                      ┌───────────────────────┼──────────────┐
//!                                      ▼                       ▼              ▼
//!                                ┌──────────┐           ┌────────────┐  ┌──────────┐
//!                                │  SQLite  │           │ S3 (large  │  │ GitHub   │
//!                                │  events  │           │  diffs)    │  │ API      │
//!                                └──────────┘           └────────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pushlens init
//! pushlens serve
//! pushlens analyze ./push.json
//! pushlens stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`signature`] | Webhook HMAC verification |
//! | [`payload`] | Push payload parsing and platform detection |
//! | [`github`] | GitHub commits API client |
//! | [`language`] | Language and file-type classification |
//! | [`patch`] | Unified-diff hunk splitting |
//! | [`complexity`] | Complexity delta heuristic |
//! | [`structural`] | Function/class/import change heuristic |
//! | [`analyzer`] | Per-commit aggregation and summaries |
//! | [`storage`] | Diff compression and offload decisions |
//! | [`object_store`] | S3-compatible object store client |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Event persistence |
//! | [`pipeline`] | Per-event orchestration |
//! | [`queue`] | Background work queue |
//! | [`server`] | Webhook HTTP server |

pub mod analyze_cmd;
pub mod analyzer;
pub mod complexity;
pub mod config;
pub mod db;
pub mod error;
pub mod get;
pub mod github;
pub mod language;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod patch;
pub mod payload;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod signature;
pub mod stats;
pub mod storage;
pub mod store;
pub mod structural;
